use std::time::Duration;

use vantage_core::{Error, Result};

use crate::page::BrowserPage;

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Poll the page URL until the user completes the QR scan.
///
/// Login is complete once the URL has left `/login` and still belongs to the
/// target host. Times out with `AuthTimeout` after `budget`.
pub async fn wait_for_login(
    page: &dyn BrowserPage,
    target_host: &str,
    budget: Duration,
) -> Result<()> {
    let deadline = tokio::time::Instant::now() + budget;
    loop {
        if let Ok(url) = page.current_url().await {
            if !url.contains("/login") && url.contains(target_host) {
                tracing::info!(url = %url, "login completed");
                return Ok(());
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(Error::AuthTimeout);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::Mutex;
    use vantage_core::Cookie;

    struct UrlSequencePage {
        urls: Mutex<Vec<String>>,
    }

    impl UrlSequencePage {
        fn new(urls: &[&str]) -> Self {
            Self { urls: Mutex::new(urls.iter().map(|s| s.to_string()).collect()) }
        }
    }

    #[async_trait]
    impl BrowserPage for UrlSequencePage {
        async fn navigate(&self, _url: &str) -> Result<()> {
            Ok(())
        }

        async fn evaluate(&self, _expression: &str) -> Result<Value> {
            Ok(Value::Null)
        }

        async fn on_new_document(&self, _script: &str) -> Result<()> {
            Ok(())
        }

        async fn current_url(&self) -> Result<String> {
            let mut urls = self.urls.lock().unwrap();
            Ok(if urls.len() > 1 { urls.remove(0) } else { urls[0].clone() })
        }

        async fn cookies(&self, _url: &str) -> Result<Vec<Value>> {
            Ok(vec![])
        }

        async fn set_cookies(&self, _cookies: &[Cookie], _domain: &str) -> Result<()> {
            Ok(())
        }

        async fn screenshot(&self) -> Result<Vec<u8>> {
            Ok(vec![])
        }

        async fn close(&self) {}
    }

    #[tokio::test(start_paused = true)]
    async fn completes_when_url_leaves_login() {
        let page = UrlSequencePage::new(&[
            "https://www.tiktok.com/login/qrcode",
            "https://www.tiktok.com/login/qrcode",
            "https://www.tiktok.com/foryou",
        ]);
        wait_for_login(&page, "www.tiktok.com", Duration::from_secs(120)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn foreign_redirect_does_not_count_as_login() {
        let page = UrlSequencePage::new(&[
            "https://www.tiktok.com/login/qrcode",
            "https://consent.example/landing",
        ]);
        let err =
            wait_for_login(&page, "www.tiktok.com", Duration::from_secs(5)).await.unwrap_err();
        assert_eq!(err.kind(), "AuthTimeout");
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_when_never_scanned() {
        let page = UrlSequencePage::new(&["https://www.tiktok.com/login/qrcode"]);
        let err =
            wait_for_login(&page, "www.tiktok.com", Duration::from_secs(120)).await.unwrap_err();
        assert_eq!(err.kind(), "AuthTimeout");
    }
}
