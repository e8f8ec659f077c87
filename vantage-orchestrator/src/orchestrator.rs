use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use vantage_browser::{
    BrowserPage, CdpConnector, PageConnector, QrDecoder, QrExtractor, RqrrDecoder, extract_bundle,
    wait_for_login,
};
use vantage_core::{
    AuthSessionId, Config, ContainerId, CredentialBundle, Error, QrImage, Result, SessionId,
};
use vantage_crypto::SessionCipher;
use vantage_docker::ProxyUpstream;
use vantage_pool::{AssignPurpose, ContainerInfo, ContainerRecord, PoolManager, PoolStats};
use vantage_session::{AuthPatch, AuthStatus, AuthStore, CredentialStore};

use crate::modules::{AuthModules, PlainRequestSigner, SampleKind};
use crate::samplers::{BrowserSampler, FeedSampler, HistorySampler};

/// Result of one browser-driven sampling run.
#[derive(Debug, Clone)]
pub struct BrowserSampleResult {
    pub videos: Vec<Value>,
    pub method: &'static str,
    pub sampled_at: DateTime<Utc>,
}

/// Result of one module-driven sampling call.
#[derive(Debug, Clone)]
pub struct ModuleSampleResult {
    pub success: bool,
    pub raw: Value,
    pub status_code: u16,
}

/// What a poll returns; terminal polls also remove the auth record.
#[derive(Debug, Clone)]
pub struct AuthPollResult {
    pub status: AuthStatus,
    pub qr: Option<QrImage>,
    pub bundle: Option<CredentialBundle>,
}

/// Service health, as reported by the HTTP layer.
#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    pub sessions: usize,
    pub auth_sessions: usize,
    pub encryption: &'static str,
    pub pool: PoolStats,
}

/// Coordinates the pool, the session stores, crypto, and the browser layer
/// behind the public operations.
pub struct Orchestrator {
    config: Arc<Config>,
    pool: Arc<PoolManager>,
    credentials: Arc<CredentialStore>,
    auths: Arc<AuthStore>,
    cipher: Arc<SessionCipher>,
    connector: Arc<dyn PageConnector>,
    decoder: Arc<dyn QrDecoder>,
    feed_sampler: Arc<dyn BrowserSampler>,
    history_sampler: Arc<dyn BrowserSampler>,
    modules: Arc<dyn AuthModules>,
    http: reqwest::Client,
}

/// Assembles an [`Orchestrator`] with production collaborators by default;
/// tests swap in scripted ones.
pub struct OrchestratorBuilder {
    config: Arc<Config>,
    pool: Arc<PoolManager>,
    credentials: Arc<CredentialStore>,
    auths: Arc<AuthStore>,
    cipher: Arc<SessionCipher>,
    connector: Option<Arc<dyn PageConnector>>,
    decoder: Option<Arc<dyn QrDecoder>>,
    feed_sampler: Option<Arc<dyn BrowserSampler>>,
    history_sampler: Option<Arc<dyn BrowserSampler>>,
    modules: Option<Arc<dyn AuthModules>>,
}

impl OrchestratorBuilder {
    pub fn new(
        config: Arc<Config>,
        pool: Arc<PoolManager>,
        credentials: Arc<CredentialStore>,
        auths: Arc<AuthStore>,
        cipher: Arc<SessionCipher>,
    ) -> Self {
        Self {
            config,
            pool,
            credentials,
            auths,
            cipher,
            connector: None,
            decoder: None,
            feed_sampler: None,
            history_sampler: None,
            modules: None,
        }
    }

    pub fn with_connector(mut self, connector: Arc<dyn PageConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn QrDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    pub fn with_feed_sampler(mut self, sampler: Arc<dyn BrowserSampler>) -> Self {
        self.feed_sampler = Some(sampler);
        self
    }

    pub fn with_history_sampler(mut self, sampler: Arc<dyn BrowserSampler>) -> Self {
        self.history_sampler = Some(sampler);
        self
    }

    pub fn with_modules(mut self, modules: Arc<dyn AuthModules>) -> Self {
        self.modules = Some(modules);
        self
    }

    pub fn build(self) -> Arc<Orchestrator> {
        let target_host = self.config.target_host.clone();
        Arc::new(Orchestrator {
            connector: self.connector.unwrap_or_else(|| Arc::new(CdpConnector)),
            decoder: self.decoder.unwrap_or_else(|| Arc::new(RqrrDecoder)),
            feed_sampler: self
                .feed_sampler
                .unwrap_or_else(|| Arc::new(FeedSampler::new(self.config.clone()))),
            history_sampler: self
                .history_sampler
                .unwrap_or_else(|| Arc::new(HistorySampler::new(self.config.clone()))),
            modules: self.modules.unwrap_or_else(|| Arc::new(PlainRequestSigner::new(target_host))),
            http: reqwest::Client::new(),
            config: self.config,
            pool: self.pool,
            credentials: self.credentials,
            auths: self.auths,
            cipher: self.cipher,
        })
    }
}

impl Orchestrator {
    /// Validate and store a plaintext credential bundle.
    pub fn load_session(&self, bundle: Value) -> Result<SessionId> {
        let bundle = CredentialBundle::from_value(bundle)?;
        self.credentials.load(&bundle)
    }

    /// Store a bundle previously exported in sealed form.
    pub fn load_encrypted_session(&self, sealed_hex: &str) -> Result<SessionId> {
        let plain = self.cipher.decrypt(sealed_hex)?;
        let value: Value = serde_json::from_slice(&plain)
            .map_err(|e| Error::BadBundle(format!("sealed payload is not a bundle: {e}")))?;
        self.load_session(value)
    }

    pub fn list_sessions(&self) -> Vec<SessionId> {
        self.credentials.list()
    }

    /// Create an auth session and kick off the background QR flow.
    ///
    /// The container is assigned to the *auth* session id, not the owning
    /// credential id: it exists only for this one login attempt.
    pub fn start_auth(self: &Arc<Self>, owner: SessionId) -> AuthSessionId {
        let auth_id = self.auths.create(owner);
        let this = Arc::clone(self);
        let id = auth_id.clone();
        tokio::spawn(async move {
            this.run_auth_flow(id).await;
        });
        auth_id
    }

    /// Current auth status. A poll observing a terminal status removes the
    /// record: terminal polls are one-shot.
    pub fn poll_auth(&self, auth_id: &AuthSessionId) -> Result<AuthPollResult> {
        let record = self.auths.get(auth_id)?;
        if matches!(record.status, AuthStatus::Complete | AuthStatus::Failed) {
            self.auths.remove(auth_id);
        }
        Ok(AuthPollResult { status: record.status, qr: record.qr, bundle: record.bundle })
    }

    /// Browser-driven sampling: assign a container, inject the session's
    /// cookies, drive the capture script, always release.
    pub async fn sample_browser(
        &self,
        kind: SampleKind,
        session_id: &SessionId,
        count: usize,
    ) -> Result<BrowserSampleResult> {
        let bundle = self.credentials.get(session_id)?;
        let record = self.pool.assign(session_id.as_str(), AssignPurpose::Sampling).await?;

        let outcome = self.drive_sampling(kind, &record, &bundle, count).await;
        // Whether the script succeeded or raised, the container comes back.
        self.pool.release(session_id.as_str());

        let raw = outcome?;
        let videos = raw.get("itemList").and_then(Value::as_array).cloned().unwrap_or_default();
        let sampler = self.sampler_for(kind);
        Ok(BrowserSampleResult { videos, method: sampler.method(), sampled_at: Utc::now() })
    }

    /// Module-driven sampling: a signed direct API call, no container.
    pub async fn sample_modules(
        &self,
        kind: SampleKind,
        session_id: &SessionId,
        count: usize,
        proxy: Option<&str>,
    ) -> Result<ModuleSampleResult> {
        let bundle = self.credentials.get(session_id)?;

        let params = self.modules.build_authenticated_params(kind, count, &bundle)?;
        let url = self.modules.build_authenticated_url(kind.api_path(), &params, &bundle)?;
        let headers = self.modules.generate_auth_headers(&url, &bundle)?;

        let client = match proxy {
            Some(proxy_url) => reqwest::Client::builder()
                .proxy(
                    reqwest::Proxy::all(proxy_url)
                        .map_err(|e| Error::Internal(format!("bad proxy url: {e}")))?,
                )
                .build()
                .map_err(|e| Error::Internal(format!("client build: {e}")))?,
            None => self.http.clone(),
        };

        let mut request = client.get(&url);
        for (name, value) in &headers {
            request = request.header(name, value);
        }
        let response = request
            .send()
            .await
            .map_err(|e| Error::SamplingScriptFailed(format!("request failed: {e}")))?;

        let status_code = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| Error::SamplingScriptFailed(format!("body read failed: {e}")))?;
        let raw = serde_json::from_str(&text).unwrap_or(Value::String(text));

        Ok(ModuleSampleResult { success: (200..300).contains(&status_code), raw, status_code })
    }

    /// Operator passthrough: create one pooled container, optionally with an
    /// explicit upstream proxy.
    pub async fn create_container(&self, proxy: Option<ProxyUpstream>) -> Result<ContainerInfo> {
        let record = self.pool.create_container(proxy.as_ref()).await?;
        Ok(record.info())
    }

    pub async fn destroy_container(&self, id: &ContainerId) -> Result<()> {
        self.pool.destroy(id).await
    }

    pub fn containers(&self) -> (PoolStats, Vec<ContainerInfo>) {
        (self.pool.stats(), self.pool.list())
    }

    pub fn health(&self) -> HealthSnapshot {
        HealthSnapshot {
            sessions: self.credentials.len(),
            auth_sessions: self.auths.len(),
            encryption: if self.cipher.is_platform_key() { "platform" } else { "fallback" },
            pool: self.pool.stats(),
        }
    }

    fn sampler_for(&self, kind: SampleKind) -> &Arc<dyn BrowserSampler> {
        match kind {
            SampleKind::ForYouFeed => &self.feed_sampler,
            SampleKind::WatchHistory => &self.history_sampler,
        }
    }

    async fn drive_sampling(
        &self,
        kind: SampleKind,
        record: &ContainerRecord,
        bundle: &CredentialBundle,
        count: usize,
    ) -> Result<Value> {
        let page = self.connector.connect(&record.devtools_url).await?;
        page.set_cookies(&bundle.cookies, &cookie_domain(&self.config.target_host)).await?;

        let result = self.sampler_for(kind).sample(page.as_ref(), bundle, count).await;
        page.close().await;

        result.map_err(|e| match e {
            Error::SamplingScriptFailed(_) => e,
            other => Error::SamplingScriptFailed(other.to_string()),
        })
    }

    async fn run_auth_flow(self: Arc<Self>, auth_id: AuthSessionId) {
        if let Err(e) = self.drive_auth(&auth_id).await {
            tracing::warn!(auth_session = %auth_id, error = %e, "auth flow failed");
            let _ = self.auths.update(
                &auth_id,
                AuthPatch { status: Some(AuthStatus::Failed), ..Default::default() },
            );
            // The container (if one was assigned) goes to the idle sweeper.
            self.pool.release(auth_id.as_str());
        }
    }

    async fn drive_auth(&self, auth_id: &AuthSessionId) -> Result<()> {
        let record = self.pool.assign(auth_id.as_str(), AssignPurpose::Auth).await?;
        self.auths.update(
            auth_id,
            AuthPatch { container_id: Some(record.id.clone()), ..Default::default() },
        )?;

        let page = self.connector.connect(&record.devtools_url).await?;
        let outcome = self.drive_auth_on_page(auth_id, page.as_ref()).await;
        page.close().await;
        let session_id = outcome?;

        // Success: the container held a real login; destroy it outright so
        // nothing leaks into a later assignment.
        self.pool.recycle(auth_id.as_str()).await.ok();
        tracing::info!(auth_session = %auth_id, session = %session_id, "auth complete");
        Ok(())
    }

    async fn drive_auth_on_page(
        &self,
        auth_id: &AuthSessionId,
        page: &dyn BrowserPage,
    ) -> Result<SessionId> {
        page.navigate(&self.config.qr_login_url).await?;

        let qr = QrExtractor::new(page, self.decoder.as_ref(), &self.config).extract().await;
        let extracted = qr.decoded_url.is_some();
        let error_tag = qr.error_tag.clone();
        self.auths.update(auth_id, AuthPatch { qr: Some(qr), ..Default::default() })?;
        if !extracted {
            return Err(Error::QrExtractionFailed(
                error_tag.unwrap_or_else(|| "no valid login QR".into()),
            ));
        }

        wait_for_login(page, &self.config.target_host, self.config.auth_timeout).await?;

        let bundle = extract_bundle(page, &self.config).await?;
        let session_id = self.credentials.load(&bundle)?;
        self.auths.update(
            auth_id,
            AuthPatch { status: Some(AuthStatus::Complete), bundle: Some(bundle), ..Default::default() },
        )?;
        Ok(session_id)
    }
}

/// Cookie scope for the target host: `www.tiktok.com` → `.tiktok.com`.
fn cookie_domain(host: &str) -> String {
    match host.strip_prefix("www.") {
        Some(rest) => format!(".{rest}"),
        None => format!(".{host}"),
    }
}

#[cfg(test)]
mod tests {
    use super::cookie_domain;

    #[test]
    fn cookie_domain_strips_www() {
        assert_eq!(cookie_domain("www.tiktok.com"), ".tiktok.com");
        assert_eq!(cookie_domain("tiktok.com"), ".tiktok.com");
    }
}
