use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use vantage_browser::BrowserPage;
use vantage_core::{Config, CredentialBundle, Error, Result};

use crate::modules::SampleKind;

/// Upper bound on scroll rounds per sampling run.
const SCROLL_BUDGET: u32 = 30;
const SCROLL_SETTLE: Duration = Duration::from_millis(500);

/// Drives an assigned browser page until it has collected `count` items or
/// exhausted its scroll budget, returning the raw captured responses.
#[async_trait]
pub trait BrowserSampler: Send + Sync {
    async fn sample(
        &self,
        page: &dyn BrowserPage,
        bundle: &CredentialBundle,
        count: usize,
    ) -> Result<Value>;

    /// Method tag reported alongside results.
    fn method(&self) -> &'static str;
}

/// Network-capture sampler for the recommendation feed.
pub struct FeedSampler {
    config: std::sync::Arc<Config>,
}

impl FeedSampler {
    pub fn new(config: std::sync::Arc<Config>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BrowserSampler for FeedSampler {
    async fn sample(
        &self,
        page: &dyn BrowserPage,
        _bundle: &CredentialBundle,
        count: usize,
    ) -> Result<Value> {
        let url = format!("https://{}/foryou", self.config.target_host);
        run_capture(page, &url, &["/api/recommend/item_list"], count).await
    }

    fn method(&self) -> &'static str {
        "browser_feed_capture"
    }
}

/// Network-capture sampler for the watch-history page.
pub struct HistorySampler {
    config: std::sync::Arc<Config>,
}

impl HistorySampler {
    pub fn new(config: std::sync::Arc<Config>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BrowserSampler for HistorySampler {
    async fn sample(
        &self,
        page: &dyn BrowserPage,
        _bundle: &CredentialBundle,
        count: usize,
    ) -> Result<Value> {
        let url = format!("https://{}/tpp/watch-history", self.config.target_host);
        run_capture(page, &url, &["/api/history/item_list"], count).await
    }

    fn method(&self) -> &'static str {
        "browser_history_capture"
    }
}

impl SampleKind {
    /// The default sampler for this surface.
    pub fn sampler(&self, config: std::sync::Arc<Config>) -> Box<dyn BrowserSampler> {
        match self {
            SampleKind::ForYouFeed => Box::new(FeedSampler::new(config)),
            SampleKind::WatchHistory => Box::new(HistorySampler::new(config)),
        }
    }
}

/// Shared capture loop: install the response hook, navigate, scroll until
/// enough items arrived, then collect everything the hook recorded.
async fn run_capture(
    page: &dyn BrowserPage,
    url: &str,
    url_patterns: &[&str],
    count: usize,
) -> Result<Value> {
    let patterns = serde_json::to_string(url_patterns)?;
    page.on_new_document(&CAPTURE_HOOK.replace("__PATTERNS__", &patterns)).await?;
    page.navigate(url).await?;

    for _ in 0..SCROLL_BUDGET {
        let collected = page
            .evaluate(ITEM_COUNT_SNIPPET)
            .await?
            .as_u64()
            .unwrap_or(0) as usize;
        if collected >= count {
            break;
        }
        page.evaluate("window.scrollTo(0, document.body.scrollHeight)").await?;
        tokio::time::sleep(SCROLL_SETTLE).await;
    }

    let captured = page.evaluate("window.__vantageCapture || []").await?;
    let responses = captured
        .as_array()
        .cloned()
        .ok_or_else(|| Error::SamplingScriptFailed("capture buffer missing".into()))?;

    if responses.is_empty() {
        return Err(Error::SamplingScriptFailed("no matching responses captured".into()));
    }

    // Raw responses merged by item list; the service does not reshape items.
    let mut items = Vec::new();
    for response in &responses {
        if let Some(list) = response.pointer("/body/itemList").and_then(Value::as_array) {
            items.extend(list.iter().cloned());
        }
    }
    items.truncate(count);

    Ok(json!({ "itemList": items, "responses": responses }))
}

const ITEM_COUNT_SNIPPET: &str = r#"
(window.__vantageCapture || []).reduce(
  (n, captured) => n + ((captured.body && captured.body.itemList) || []).length,
  0
)
"#;

/// Installed before page scripts run: records JSON bodies of fetch and XHR
/// responses whose URL matches one of the patterns.
const CAPTURE_HOOK: &str = r#"
(() => {
  window.__vantageCapture = [];
  const patterns = __PATTERNS__;
  const matches = (url) => patterns.some(p => String(url).includes(p));

  const originalFetch = window.fetch;
  window.fetch = async (...args) => {
    const response = await originalFetch(...args);
    try {
      const url = typeof args[0] === 'string' ? args[0] : args[0].url;
      if (matches(url)) {
        response.clone().json()
          .then(body => window.__vantageCapture.push({ url, body }))
          .catch(() => {});
      }
    } catch (e) {}
    return response;
  };

  const originalOpen = XMLHttpRequest.prototype.open;
  XMLHttpRequest.prototype.open = function(method, url, ...rest) {
    this.__vantageUrl = url;
    return originalOpen.call(this, method, url, ...rest);
  };
  const originalSend = XMLHttpRequest.prototype.send;
  XMLHttpRequest.prototype.send = function(...args) {
    this.addEventListener('load', () => {
      try {
        if (matches(this.__vantageUrl)) {
          window.__vantageCapture.push({
            url: this.__vantageUrl,
            body: JSON.parse(this.responseText),
          });
        }
      } catch (e) {}
    });
    return originalSend.call(this, ...args);
  };
})()
"#;
