use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use vantage_browser::{BrowserPage, PageConnector, QrDecoder};
use vantage_core::{Config, ContainerId, Cookie, Error, Result, SessionId};
use vantage_crypto::SessionCipher;
use vantage_docker::{ContainerRuntime, CreateSpec, ProxyUpstream};
use vantage_orchestrator::{BrowserSampler, Orchestrator, OrchestratorBuilder, SampleKind};
use vantage_pool::PoolManager;
use vantage_session::{AuthStatus, AuthStore, CredentialStore};

// ---------------------------------------------------------------------------
// Mock container runtime

#[derive(Default)]
struct MockRuntime {
    next: AtomicUsize,
    destroyed: Mutex<Vec<ContainerId>>,
    fail_configure: AtomicUsize,
}

impl MockRuntime {
    fn destroyed_ids(&self) -> Vec<ContainerId> {
        self.destroyed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn create(&self, _spec: &CreateSpec) -> Result<ContainerId> {
        let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ContainerId::new(format!("c{n}")))
    }

    async fn inspect_ip(&self, id: &ContainerId) -> Result<String> {
        Ok(format!("10.0.0.{}", id.as_str().trim_start_matches('c')))
    }

    async fn wait_ready(&self, _ip: &str, _max_tries: u32) -> Result<()> {
        Ok(())
    }

    async fn configure_proxy(&self, _ip: &str, _upstream: &ProxyUpstream) -> Result<()> {
        let take = self
            .fail_configure
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1))
            .is_ok();
        if take {
            return Err(Error::ProxyConfig("mock control endpoint returned 500".into()));
        }
        Ok(())
    }

    async fn destroy(&self, id: &ContainerId) -> Result<()> {
        self.destroyed.lock().unwrap().push(id.clone());
        Ok(())
    }

    async fn list_orphans(&self, _label: &str) -> Result<Vec<ContainerId>> {
        Ok(vec![])
    }
}

// ---------------------------------------------------------------------------
// Scripted browser page

/// Behavior template cloned into every page the connector opens.
#[derive(Clone, Default)]
struct PageScript {
    /// Data URLs returned by successive canvas captures.
    canvas_data: Vec<Value>,
    /// URL sequence reported by `current_url`; the last entry repeats.
    urls: Vec<String>,
    cookies: Vec<Value>,
    identity: Value,
}

struct ScriptedPage {
    canvas_data: Mutex<Vec<Value>>,
    urls: Mutex<Vec<String>>,
    cookies: Vec<Value>,
    identity: Value,
}

impl ScriptedPage {
    fn from_script(script: &PageScript) -> Self {
        Self {
            canvas_data: Mutex::new(script.canvas_data.clone()),
            urls: Mutex::new(script.urls.clone()),
            cookies: script.cookies.clone(),
            identity: script.identity.clone(),
        }
    }
}

#[async_trait]
impl BrowserPage for ScriptedPage {
    async fn navigate(&self, _url: &str) -> Result<()> {
        Ok(())
    }

    async fn evaluate(&self, expression: &str) -> Result<Value> {
        if expression.contains("querySelector('canvas') !== null") {
            return Ok(json!(true));
        }
        if expression.contains("querySelectorAll('canvas')") {
            let mut data = self.canvas_data.lock().unwrap();
            return Ok(if data.is_empty() { Value::Null } else { data.remove(0) });
        }
        if expression.contains("querySelectorAll('img')") {
            return Ok(Value::Null);
        }
        if expression.contains("SIGI_STATE") {
            return Ok(self.identity.clone());
        }
        Ok(Value::Null)
    }

    async fn on_new_document(&self, _script: &str) -> Result<()> {
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        let mut urls = self.urls.lock().unwrap();
        Ok(match urls.len() {
            0 => "about:blank".to_string(),
            1 => urls[0].clone(),
            _ => urls.remove(0),
        })
    }

    async fn cookies(&self, _url: &str) -> Result<Vec<Value>> {
        Ok(self.cookies.clone())
    }

    async fn set_cookies(&self, _cookies: &[Cookie], _domain: &str) -> Result<()> {
        Ok(())
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        Ok(b"screenshot".to_vec())
    }

    async fn close(&self) {}
}

struct ScriptedConnector {
    script: PageScript,
}

#[async_trait]
impl PageConnector for ScriptedConnector {
    async fn connect(&self, _devtools_url: &str) -> Result<Box<dyn BrowserPage>> {
        Ok(Box::new(ScriptedPage::from_script(&self.script)))
    }
}

// ---------------------------------------------------------------------------
// Scripted decoder and sampler

struct TableDecoder;

impl QrDecoder for TableDecoder {
    fn decode(&self, png: &[u8]) -> Option<String> {
        match png {
            b"login-qr" => Some("https://www.tiktok.com/login/qrcode?token=1".into()),
            b"promo-qr" => Some("https://www.tiktok.com/login/app/download?x=1".into()),
            _ => None,
        }
    }
}

fn data_url(payload: &[u8]) -> Value {
    use base64::Engine;
    json!(format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(payload)
    ))
}

struct ScriptedSampler {
    raw: Value,
    fail: bool,
}

#[async_trait]
impl BrowserSampler for ScriptedSampler {
    async fn sample(
        &self,
        _page: &dyn BrowserPage,
        _bundle: &vantage_core::CredentialBundle,
        _count: usize,
    ) -> Result<Value> {
        if self.fail {
            return Err(Error::SamplingScriptFailed("scripted failure".into()));
        }
        Ok(self.raw.clone())
    }

    fn method(&self) -> &'static str {
        "scripted"
    }
}

// ---------------------------------------------------------------------------
// Harness

struct Harness {
    orchestrator: Arc<Orchestrator>,
    pool: Arc<PoolManager>,
    runtime: Arc<MockRuntime>,
}

fn logged_in_script() -> PageScript {
    PageScript {
        canvas_data: vec![data_url(b"login-qr")],
        urls: vec![
            "https://www.tiktok.com/login/qrcode".into(),
            "https://www.tiktok.com/foryou".into(),
        ],
        cookies: vec![
            json!({ "name": "sessionid", "value": "x", "domain": ".tiktok.com" }),
            json!({ "name": "msToken", "value": "tok", "domain": ".tiktok.com" }),
        ],
        identity: json!({ "sec_user_id": "U", "unique_id": "user", "nickname": "User" }),
    }
}

fn harness_with(config: Config, script: PageScript, sampler: ScriptedSampler) -> Harness {
    let config = Arc::new(config);
    let runtime = Arc::new(MockRuntime::default());
    let pool = Arc::new(PoolManager::new(runtime.clone(), config.clone()));
    let cipher = Arc::new(SessionCipher::from_seed("test-seed"));
    let credentials = Arc::new(CredentialStore::new(cipher.clone(), config.session_timeout));
    let auths = Arc::new(AuthStore::new(config.auth_timeout));

    let sampler = Arc::new(sampler);
    let orchestrator =
        OrchestratorBuilder::new(config, pool.clone(), credentials, auths, cipher)
            .with_connector(Arc::new(ScriptedConnector { script }))
            .with_decoder(Arc::new(TableDecoder))
            .with_feed_sampler(sampler.clone())
            .with_history_sampler(sampler)
            .build();

    Harness { orchestrator, pool, runtime }
}

fn harness(min_pool: usize) -> Harness {
    let mut config = Config::for_tests();
    config.pool_min_size = min_pool;
    let sampler = ScriptedSampler {
        raw: json!({ "itemList": [{ "id": "1" }, { "id": "2" }, { "id": "3" }] }),
        fail: false,
    };
    harness_with(config, logged_in_script(), sampler)
}

fn bundle_value(identity: &str) -> Value {
    json!({
        "cookies": [{ "name": "sessionid", "value": "x" }],
        "user": { "sec_user_id": identity },
    })
}

async fn poll_until_terminal(
    orchestrator: &Arc<Orchestrator>,
    auth_id: &vantage_core::AuthSessionId,
) -> vantage_orchestrator::AuthPollResult {
    for _ in 0..200 {
        let poll = orchestrator.poll_auth(auth_id).unwrap();
        if matches!(poll.status, AuthStatus::Complete | AuthStatus::Failed) {
            return poll;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("auth session never reached a terminal status");
}

/// The terminal status is visible before the background task finishes its
/// container cleanup; wait for the cleanup side effects too.
async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never became true");
}

// ---------------------------------------------------------------------------
// Scenarios

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn happy_path_sample() {
    let h = harness(2);
    h.pool.run_maintenance().await;
    assert_eq!(h.pool.pool_size(), 2);

    let sid = h.orchestrator.load_session(bundle_value("U")).unwrap();
    assert_eq!(sid.as_str(), "U");

    let result =
        h.orchestrator.sample_browser(SampleKind::ForYouFeed, &sid, 3).await.unwrap();
    assert_eq!(result.videos.len(), 3);
    assert_eq!(result.method, "scripted");

    // The container was released, not returned to the warm pool.
    let stats = h.pool.stats();
    assert_eq!(stats.released, 1);
    assert_eq!(stats.pooled, 1);

    // Maintenance restores the warm pool to its minimum.
    h.pool.run_maintenance().await;
    assert_eq!(h.pool.pool_size(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn capacity_backpressure_with_retry_after_refill() {
    let h = harness(1);
    h.pool.run_maintenance().await;

    h.orchestrator.load_session(bundle_value("A")).unwrap();
    h.orchestrator.load_session(bundle_value("B")).unwrap();

    let session_a = SessionId::new("A");
    let session_b = SessionId::new("B");
    let (a, b) = tokio::join!(
        h.orchestrator.sample_browser(SampleKind::ForYouFeed, &session_a, 3),
        h.orchestrator.sample_browser(SampleKind::ForYouFeed, &session_b, 3),
    );

    // Exactly one wins the single container; sampling releases it afterwards.
    let (winner_ok, loser) = match (a, b) {
        (Ok(_), Err(e)) => (true, e),
        (Err(e), Ok(_)) => (true, e),
        other => panic!("expected one winner and one AtCapacity, got {other:?}"),
    };
    assert!(winner_ok);
    assert_eq!(loser.kind(), "AtCapacity");

    // After refill the loser's retry succeeds.
    h.pool.run_maintenance().await;
    h.orchestrator
        .sample_browser(SampleKind::ForYouFeed, &SessionId::new("B"), 3)
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn auth_round_trip() {
    let h = harness(1);
    h.pool.run_maintenance().await;

    let auth_id = h.orchestrator.start_auth(SessionId::new("new"));

    let result = poll_until_terminal(&h.orchestrator, &auth_id).await;
    assert_eq!(result.status, AuthStatus::Complete);

    let bundle = result.bundle.expect("completed auth carries the bundle");
    assert_eq!(bundle.identity(), Some("U"));
    assert!(bundle.cookie("sessionid").is_some());
    let qr = result.qr.expect("completed auth carries the QR");
    assert_eq!(qr.decoded_url.as_deref(), Some("https://www.tiktok.com/login/qrcode?token=1"));

    // The bundle became credential session "U".
    let sessions = h.orchestrator.list_sessions();
    assert!(sessions.iter().any(|s| s.as_str() == "U"));

    // The auth container was recycled, not released.
    wait_until(|| h.runtime.destroyed_ids().len() == 1).await;
    assert_eq!(h.pool.stats().total, 0);

    // Terminal polls are one-shot: the record is gone now.
    let err = h.orchestrator.poll_auth(&auth_id).unwrap_err();
    assert_eq!(err.kind(), "AuthSessionNotFound");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn auth_timeout_fails_and_releases() {
    let mut config = Config::for_tests();
    config.pool_min_size = 1;
    config.auth_timeout = Duration::from_millis(100);
    let mut script = logged_in_script();
    // The user never scans: the page stays on the login URL.
    script.urls = vec!["https://www.tiktok.com/login/qrcode".into()];
    let h = harness_with(config, script, ScriptedSampler { raw: Value::Null, fail: false });
    h.pool.run_maintenance().await;

    let auth_id = h.orchestrator.start_auth(SessionId::new("new"));
    let result = poll_until_terminal(&h.orchestrator, &auth_id).await;
    assert_eq!(result.status, AuthStatus::Failed);

    // Failed auth releases its container for the idle sweeper.
    wait_until(|| h.pool.stats().released == 1).await;
    assert!(h.runtime.destroyed_ids().is_empty());

    let err = h.orchestrator.poll_auth(&auth_id).unwrap_err();
    assert_eq!(err.kind(), "AuthSessionNotFound");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn proxy_config_failure_reverts_assignment() {
    let h = harness(1);
    h.pool.run_maintenance().await;
    h.orchestrator.load_session(bundle_value("U")).unwrap();
    h.runtime.fail_configure.store(1, Ordering::SeqCst);

    let err = h
        .orchestrator
        .sample_browser(SampleKind::ForYouFeed, &SessionId::new("U"), 3)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "ProxyConfig");

    let stats = h.pool.stats();
    assert_eq!(stats.pooled, 1);
    assert_eq!(stats.sessions, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn promotional_qr_is_rejected_then_login_qr_accepted() {
    let mut script = logged_in_script();
    script.canvas_data = vec![data_url(b"promo-qr"), data_url(b"login-qr")];
    let mut config = Config::for_tests();
    config.pool_min_size = 1;
    let h = harness_with(config, script, ScriptedSampler { raw: Value::Null, fail: false });
    h.pool.run_maintenance().await;

    let auth_id = h.orchestrator.start_auth(SessionId::new("new"));
    let result = poll_until_terminal(&h.orchestrator, &auth_id).await;

    assert_eq!(result.status, AuthStatus::Complete);
    let qr = result.qr.unwrap();
    assert_eq!(qr.decoded_url.as_deref(), Some("https://www.tiktok.com/login/qrcode?token=1"));
}

// ---------------------------------------------------------------------------
// Smaller behaviors

#[tokio::test]
async fn sampling_unknown_session_is_not_found() {
    let h = harness(1);
    let err = h
        .orchestrator
        .sample_browser(SampleKind::ForYouFeed, &SessionId::new("ghost"), 3)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "SessionNotFound");
}

#[tokio::test]
async fn failed_sampler_still_releases_container() {
    let mut config = Config::for_tests();
    config.pool_min_size = 1;
    let h = harness_with(
        config,
        logged_in_script(),
        ScriptedSampler { raw: Value::Null, fail: true },
    );
    h.pool.run_maintenance().await;
    h.orchestrator.load_session(bundle_value("U")).unwrap();

    let err = h
        .orchestrator
        .sample_browser(SampleKind::ForYouFeed, &SessionId::new("U"), 3)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "SamplingScriptFailed");
    assert_eq!(h.pool.stats().released, 1);
    assert_eq!(h.pool.stats().sessions, 0);
}

#[tokio::test]
async fn load_session_twice_retains_latest_bundle_under_same_id() {
    let h = harness(0);
    let first = h.orchestrator.load_session(bundle_value("U")).unwrap();
    let second = h
        .orchestrator
        .load_session(json!({
            "cookies": [{ "name": "sessionid", "value": "newer" }],
            "user": { "sec_user_id": "U" },
        }))
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(h.orchestrator.list_sessions().len(), 1);
}

#[tokio::test]
async fn empty_bundle_is_rejected() {
    let h = harness(0);
    let err = h.orchestrator.load_session(json!({})).unwrap_err();
    assert_eq!(err.kind(), "BadBundle");
}

#[tokio::test]
async fn encrypted_session_round_trips() {
    let h = harness(0);
    let cipher = SessionCipher::from_seed("test-seed");
    let sealed = cipher.encrypt(bundle_value("U").to_string().as_bytes());

    let sid = h.orchestrator.load_encrypted_session(&sealed).unwrap();
    assert_eq!(sid.as_str(), "U");
}

#[tokio::test]
async fn tampered_encrypted_session_is_bad_ciphertext() {
    let h = harness(0);
    let err = h.orchestrator.load_encrypted_session("deadbeef").unwrap_err();
    assert_eq!(err.kind(), "BadCiphertext");
}

#[tokio::test]
async fn health_reports_store_sizes_and_key_source() {
    let h = harness(0);
    h.orchestrator.load_session(bundle_value("U")).unwrap();
    let health = h.orchestrator.health();
    assert_eq!(health.sessions, 1);
    assert_eq!(health.encryption, "fallback");
}

#[tokio::test]
async fn operator_container_create_and_destroy() {
    let h = harness(0);
    let info = h.orchestrator.create_container(None).await.unwrap();
    assert_eq!(h.pool.stats().total, 1);

    h.orchestrator.destroy_container(&info.container_id).await.unwrap();
    assert_eq!(h.pool.stats().total, 0);
    // Destroying an unknown container is a no-op.
    h.orchestrator.destroy_container(&ContainerId::new("ghost")).await.unwrap();
}
