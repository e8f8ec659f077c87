use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;
use vantage_core::{AuthSessionId, ContainerId, CredentialBundle, Error, QrImage, Result, SessionId};

/// State of one QR login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    AwaitingScan,
    Complete,
    Failed,
}

/// One QR-auth attempt from QR display to bundle capture.
#[derive(Debug, Clone)]
pub struct AuthRecord {
    pub id: AuthSessionId,
    /// The credential session this auth will create or refresh.
    pub owner: SessionId,
    pub status: AuthStatus,
    pub container_id: Option<ContainerId>,
    pub qr: Option<QrImage>,
    pub bundle: Option<CredentialBundle>,
    pub started_at: Instant,
}

/// Partial update applied by the auth background task as the flow advances.
#[derive(Debug, Default)]
pub struct AuthPatch {
    pub status: Option<AuthStatus>,
    pub container_id: Option<ContainerId>,
    pub qr: Option<QrImage>,
    pub bundle: Option<CredentialBundle>,
}

/// Ephemeral auth sessions. Records live until their first terminal poll or
/// until the age sweeper takes them, whichever comes first.
pub struct AuthStore {
    records: RwLock<HashMap<AuthSessionId, AuthRecord>>,
    timeout: Duration,
}

impl AuthStore {
    pub fn new(timeout: Duration) -> Self {
        Self { records: RwLock::new(HashMap::new()), timeout }
    }

    pub fn create(&self, owner: SessionId) -> AuthSessionId {
        let id = AuthSessionId::random();
        let record = AuthRecord {
            id: id.clone(),
            owner,
            status: AuthStatus::AwaitingScan,
            container_id: None,
            qr: None,
            bundle: None,
            started_at: Instant::now(),
        };
        self.records.write().expect("auth lock").insert(id.clone(), record);
        tracing::info!(auth_session = %id, "auth session created");
        id
    }

    pub fn get(&self, id: &AuthSessionId) -> Result<AuthRecord> {
        self.records
            .read()
            .expect("auth lock")
            .get(id)
            .cloned()
            .ok_or_else(|| Error::AuthSessionNotFound(id.to_string()))
    }

    pub fn update(&self, id: &AuthSessionId, patch: AuthPatch) -> Result<()> {
        let mut records = self.records.write().expect("auth lock");
        let record =
            records.get_mut(id).ok_or_else(|| Error::AuthSessionNotFound(id.to_string()))?;
        if let Some(status) = patch.status {
            record.status = status;
        }
        if let Some(container_id) = patch.container_id {
            record.container_id = Some(container_id);
        }
        if let Some(qr) = patch.qr {
            record.qr = Some(qr);
        }
        if let Some(bundle) = patch.bundle {
            record.bundle = Some(bundle);
        }
        Ok(())
    }

    pub fn remove(&self, id: &AuthSessionId) {
        self.records.write().expect("auth lock").remove(id);
    }

    pub fn len(&self) -> usize {
        self.records.read().expect("auth lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop records older than the auth timeout, terminal or not.
    pub fn sweep(&self) -> usize {
        let mut records = self.records.write().expect("auth lock");
        let before = records.len();
        let timeout = self.timeout;
        records.retain(|id, record| {
            let keep = record.started_at.elapsed() <= timeout;
            if !keep {
                tracing::info!(auth_session = %id, status = ?record.status, "auth session expired");
            }
            keep
        });
        before - records.len()
    }

    pub fn spawn_sweeper(self: &Arc<Self>, tick: Duration) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            loop {
                interval.tick().await;
                store.sweep();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_starts_awaiting_scan() {
        let store = AuthStore::new(Duration::from_secs(120));
        let id = store.create(SessionId::new("U"));
        let record = store.get(&id).unwrap();
        assert_eq!(record.status, AuthStatus::AwaitingScan);
        assert_eq!(record.owner.as_str(), "U");
        assert!(record.qr.is_none());
    }

    #[test]
    fn ids_are_distinct() {
        let store = AuthStore::new(Duration::from_secs(120));
        let a = store.create(SessionId::new("U"));
        let b = store.create(SessionId::new("U"));
        assert_ne!(a, b);
    }

    #[test]
    fn patch_applies_only_set_fields() {
        let store = AuthStore::new(Duration::from_secs(120));
        let id = store.create(SessionId::new("U"));

        store
            .update(
                &id,
                AuthPatch {
                    qr: Some(QrImage {
                        data: vec![1, 2, 3],
                        decoded_url: Some("https://www.tiktok.com/login/qr?x=1".into()),
                        error_tag: None,
                    }),
                    container_id: Some(ContainerId::new("c1")),
                    ..Default::default()
                },
            )
            .unwrap();

        let record = store.get(&id).unwrap();
        assert_eq!(record.status, AuthStatus::AwaitingScan, "status untouched by partial patch");
        assert_eq!(record.container_id.as_ref().unwrap().as_str(), "c1");
        assert_eq!(record.qr.unwrap().data, vec![1, 2, 3]);
    }

    #[test]
    fn unknown_record_is_not_found() {
        let store = AuthStore::new(Duration::from_secs(120));
        let err = store.get(&AuthSessionId::random()).unwrap_err();
        assert_eq!(err.kind(), "AuthSessionNotFound");
        assert!(store.update(&AuthSessionId::random(), AuthPatch::default()).is_err());
    }

    #[test]
    fn sweep_removes_aged_records_in_any_status() {
        let store = AuthStore::new(Duration::from_millis(30));
        let awaiting = store.create(SessionId::new("a"));
        let complete = store.create(SessionId::new("b"));
        store
            .update(&complete, AuthPatch { status: Some(AuthStatus::Complete), ..Default::default() })
            .unwrap();

        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(store.sweep(), 2);
        assert!(store.get(&awaiting).is_err());
        assert!(store.get(&complete).is_err());
    }
}
