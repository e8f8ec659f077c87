use async_trait::async_trait;
use serde_json::Value;
use vantage_core::{Cookie, Result};

/// One controlled browser page. The orchestrator and the algorithms in this
/// crate only ever see this trait; the CDP client is one implementation.
#[async_trait]
pub trait BrowserPage: Send + Sync {
    /// Navigate and wait for the DOM to be ready, plus a short settle.
    async fn navigate(&self, url: &str) -> Result<()>;

    /// Evaluate a JavaScript expression, awaiting promises, returning the
    /// value by JSON.
    async fn evaluate(&self, expression: &str) -> Result<Value>;

    /// Install a script that runs in every new document before page scripts.
    async fn on_new_document(&self, script: &str) -> Result<()>;

    async fn current_url(&self) -> Result<String>;

    /// Cookies scoped to the given URL, as raw DevTools cookie objects.
    async fn cookies(&self, url: &str) -> Result<Vec<Value>>;

    /// Inject cookies for the given domain before navigation.
    async fn set_cookies(&self, cookies: &[Cookie], domain: &str) -> Result<()>;

    /// Full-page PNG screenshot.
    async fn screenshot(&self) -> Result<Vec<u8>>;

    async fn close(&self);
}

/// Opens pages on a container's DevTools endpoint.
#[async_trait]
pub trait PageConnector: Send + Sync {
    async fn connect(&self, devtools_url: &str) -> Result<Box<dyn BrowserPage>>;
}
