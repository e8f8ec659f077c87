use serde_json::{Map, Value};
use vantage_core::{CredentialBundle, Result};

/// Which collection surface a sampling operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    ForYouFeed,
    WatchHistory,
}

impl SampleKind {
    /// API path the module family calls for this surface.
    pub fn api_path(&self) -> &'static str {
        match self {
            SampleKind::ForYouFeed => "/api/recommend/item_list/",
            SampleKind::WatchHistory => "/api/history/item_list/",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SampleKind::ForYouFeed => "foryoupage",
            SampleKind::WatchHistory => "watchhistory",
        }
    }
}

/// Request-signing seam for direct target-application API calls.
///
/// Production deployments bind an implementation that signs requests the way
/// the target application expects; the orchestrator only ever calls these
/// three operations. Bound at startup, no runtime loading.
pub trait AuthModules: Send + Sync {
    /// Full request URL for `path` with `params` and any signature baked in.
    fn build_authenticated_url(
        &self,
        path: &str,
        params: &Map<String, Value>,
        bundle: &CredentialBundle,
    ) -> Result<String>;

    /// Request headers, including whatever the signature scheme requires.
    fn generate_auth_headers(
        &self,
        url: &str,
        bundle: &CredentialBundle,
    ) -> Result<Vec<(String, String)>>;

    /// Query parameters for one sampling call.
    fn build_authenticated_params(
        &self,
        kind: SampleKind,
        count: usize,
        bundle: &CredentialBundle,
    ) -> Result<Map<String, Value>>;
}

/// Default binding: plain query-string requests with cookie auth and the
/// bundle's device identifiers, no proprietary signature.
pub struct PlainRequestSigner {
    target_host: String,
}

impl PlainRequestSigner {
    pub fn new(target_host: impl Into<String>) -> Self {
        Self { target_host: target_host.into() }
    }
}

impl AuthModules for PlainRequestSigner {
    fn build_authenticated_url(
        &self,
        path: &str,
        params: &Map<String, Value>,
        _bundle: &CredentialBundle,
    ) -> Result<String> {
        let query: Vec<String> = params
            .iter()
            .map(|(k, v)| {
                let value = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                format!("{k}={value}")
            })
            .collect();
        Ok(format!("https://{}{}?{}", self.target_host, path, query.join("&")))
    }

    fn generate_auth_headers(
        &self,
        _url: &str,
        bundle: &CredentialBundle,
    ) -> Result<Vec<(String, String)>> {
        Ok(vec![
            ("Cookie".to_string(), bundle.cookie_header()),
            ("Referer".to_string(), format!("https://{}/", self.target_host)),
            (
                "User-Agent".to_string(),
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) \
                 Chrome/126.0.0.0 Safari/537.36"
                    .to_string(),
            ),
        ])
    }

    fn build_authenticated_params(
        &self,
        kind: SampleKind,
        count: usize,
        bundle: &CredentialBundle,
    ) -> Result<Map<String, Value>> {
        let mut params = Map::new();
        params.insert("count".into(), Value::String(count.to_string()));
        params.insert("aid".into(), Value::String("1988".into()));
        if let Some(device) = &bundle.device {
            params.insert("device_id".into(), Value::String(device.device_id.clone()));
            params.insert("iid".into(), Value::String(device.install_id.clone()));
        }
        if kind == SampleKind::WatchHistory {
            params.insert("scene".into(), Value::String("history".into()));
        }
        Ok(params)
    }
}
