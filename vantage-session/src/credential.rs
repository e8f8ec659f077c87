use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use vantage_core::{CredentialBundle, Error, Result, SessionId};
use vantage_crypto::SessionCipher;

struct StoredSession {
    sealed: String,
    last_access: Instant,
}

/// Durable credential sessions, one per user.
///
/// Bundles are sealed by the session cipher before they touch the map, so a
/// memory dump of this store yields only ciphertext. `get` decrypts on the
/// way out and bumps the idle clock.
pub struct CredentialStore {
    sessions: RwLock<HashMap<SessionId, StoredSession>>,
    cipher: Arc<SessionCipher>,
    timeout: Duration,
}

impl CredentialStore {
    pub fn new(cipher: Arc<SessionCipher>, timeout: Duration) -> Self {
        Self { sessions: RwLock::new(HashMap::new()), cipher, timeout }
    }

    /// Store a bundle and return its session id.
    ///
    /// The id is the bundle's stable user identity when present, otherwise a
    /// fresh random id. Loading a second bundle with the same identity
    /// replaces the stored bundle and keeps the id.
    pub fn load(&self, bundle: &CredentialBundle) -> Result<SessionId> {
        let id = bundle.identity().map(SessionId::new).unwrap_or_else(SessionId::random);
        let sealed = self.cipher.encrypt(&serde_json::to_vec(bundle)?);

        let mut sessions = self.sessions.write().expect("credential lock");
        sessions.insert(id.clone(), StoredSession { sealed, last_access: Instant::now() });
        tracing::info!(session = %id, "credential session loaded");
        Ok(id)
    }

    /// Decrypt and return the bundle, bumping `last_access`.
    pub fn get(&self, id: &SessionId) -> Result<CredentialBundle> {
        let sealed = {
            let mut sessions = self.sessions.write().expect("credential lock");
            let stored = sessions
                .get_mut(id)
                .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;
            stored.last_access = Instant::now();
            stored.sealed.clone()
        };
        let plain = self.cipher.decrypt(&sealed)?;
        Ok(serde_json::from_slice(&plain)?)
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.read().expect("credential lock").contains_key(id)
    }

    pub fn list(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> =
            self.sessions.read().expect("credential lock").keys().cloned().collect();
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        ids
    }

    pub fn remove(&self, id: &SessionId) {
        self.sessions.write().expect("credential lock").remove(id);
    }

    pub fn len(&self) -> usize {
        self.sessions.read().expect("credential lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop sessions idle past the timeout. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let mut sessions = self.sessions.write().expect("credential lock");
        let before = sessions.len();
        let timeout = self.timeout;
        sessions.retain(|id, stored| {
            let keep = stored.last_access.elapsed() <= timeout;
            if !keep {
                tracing::info!(session = %id, "idle credential session expired");
            }
            keep
        });
        before - sessions.len()
    }

    /// Spawn the periodic idle sweeper.
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
