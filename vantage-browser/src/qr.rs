use std::time::Duration;

use base64::Engine;
use serde_json::Value;
use vantage_core::{Config, QrImage};

use crate::page::BrowserPage;

/// Attempts before giving up on finding pixel data. Short interval with many
/// tries beats longer waits for this DOM-timing problem.
const EXTRACT_TRIES: u32 = 30;
const EXTRACT_INTERVAL: Duration = Duration::from_millis(200);

/// Extra extraction rounds allowed after a decoded URL fails validation, in
/// case a placeholder was momentarily on screen.
const VALIDATION_RETRIES: u32 = 3;

/// How long to wait for any canvas element before proceeding anyway.
const CANVAS_WAIT_TRIES: u32 = 15;

/// Decodes a QR code from PNG bytes. Trait so the extraction loop is
/// testable without real QR images.
pub trait QrDecoder: Send + Sync {
    fn decode(&self, png: &[u8]) -> Option<String>;
}

/// Production decoder: `image` for pixel access, `rqrr` for detection.
pub struct RqrrDecoder;

impl QrDecoder for RqrrDecoder {
    fn decode(&self, png: &[u8]) -> Option<String> {
        let luma = image::load_from_memory(png).ok()?.to_luma8();
        let (width, height) = luma.dimensions();
        let mut prepared =
            rqrr::PreparedImage::prepare_from_greyscale(width as usize, height as usize, |x, y| {
                luma.get_pixel(x as u32, y as u32)[0]
            });
        for grid in prepared.detect_grids() {
            if let Ok((_meta, content)) = grid.decode() {
                return Some(content);
            }
        }
        None
    }
}

/// Check a decoded URL against the configured login allow-list and
/// download/promotional deny-list.
///
/// The target application sometimes serves a promotional QR that is visually
/// square and big enough to decode; only the decoded URL separates it from a
/// login QR.
pub fn validate_qr_url(url: &str, config: &Config) -> std::result::Result<(), String> {
    let parsed = url::Url::parse(url).map_err(|_| "not a URL".to_string())?;
    let host = parsed.host_str().unwrap_or("");
    let domain = config.target_host.strip_prefix("www.").unwrap_or(&config.target_host);
    if host != domain && !host.ends_with(&format!(".{domain}")) {
        return Err(format!("not a {domain} URL"));
    }
    if let Some(denied) = config.download_url_patterns.iter().find(|p| url.contains(p.as_str())) {
        return Err(format!("matches download pattern {denied}"));
    }
    if !config.login_url_patterns.iter().any(|p| url.contains(p.as_str())) {
        return Err("matches no login pattern".to_string());
    }
    Ok(())
}

/// Reads QR pixel data out of the login page.
///
/// Canvas first: the login QR is normally drawn into a canvas of at least
/// 100×100. Image fallback: square `<img>` elements of natural size ≥100
/// that are not the static placeholder, reloaded with cross-origin
/// permission and redrawn to a canvas.
pub struct QrExtractor<'a> {
    page: &'a dyn BrowserPage,
    decoder: &'a dyn QrDecoder,
    config: &'a Config,
}

impl<'a> QrExtractor<'a> {
    pub fn new(page: &'a dyn BrowserPage, decoder: &'a dyn QrDecoder, config: &'a Config) -> Self {
        Self { page, decoder, config }
    }

    /// Run the full extract-then-validate loop.
    ///
    /// Never fails: when no valid QR is found within the budget, the result
    /// carries a full-page screenshot, no decoded URL, and an error tag.
    pub async fn extract(&self) -> QrImage {
        self.wait_for_canvas().await;

        let mut validation_failures = 0u32;
        let mut last_rejection: Option<String> = None;

        for attempt in 1..=EXTRACT_TRIES {
            if let Some(png) = self.capture_candidate().await {
                if let Some(decoded) = self.decoder.decode(&png) {
                    match validate_qr_url(&decoded, self.config) {
                        Ok(()) => {
                            tracing::info!(attempt, url = %decoded, "login QR extracted");
                            return QrImage { data: png, decoded_url: Some(decoded), error_tag: None };
                        }
                        Err(reason) => {
                            tracing::debug!(attempt, url = %decoded, reason, "decoded QR rejected");
                            validation_failures += 1;
                            last_rejection = Some(reason);
                            if validation_failures > VALIDATION_RETRIES {
                                break;
                            }
                        }
                    }
                }
            }
            tokio::time::sleep(EXTRACT_INTERVAL).await;
        }

        let tag = match last_rejection {
            Some(reason) => format!("qr_validation_failed: {reason}"),
            None => "qr_extraction_failed".to_string(),
        };
        tracing::warn!(tag, "QR extraction exhausted its budget, returning screenshot");
        let screenshot = self.page.screenshot().await.unwrap_or_default();
        QrImage { data: screenshot, decoded_url: None, error_tag: Some(tag) }
    }

    async fn wait_for_canvas(&self) {
        for _ in 0..CANVAS_WAIT_TRIES {
            if let Ok(Value::Bool(true)) =
                self.page.evaluate("document.querySelector('canvas') !== null").await
            {
                return;
            }
            tokio::time::sleep(EXTRACT_INTERVAL).await;
        }
        // Proceed anyway: some variants render the QR as an <img>.
    }

    /// One capture attempt: canvas pixels, then image candidates. Returns
    /// PNG bytes when either produced a data URL.
    async fn capture_candidate(&self) -> Option<Vec<u8>> {
        if let Ok(Value::String(data_url)) = self.page.evaluate(CANVAS_SNIPPET).await {
            if let Some(png) = decode_data_url(&data_url) {
                return Some(png);
            }
        }

        let img_snippet =
            IMG_SNIPPET.replace("__PLACEHOLDER__", &self.config.qr_placeholder_pattern);
        if let Ok(Value::String(data_url)) = self.page.evaluate(&img_snippet).await {
            if let Some(png) = decode_data_url(&data_url) {
                return Some(png);
            }
        }
        None
    }
}

/// Strip a `data:image/png;base64,` prefix and decode.
fn decode_data_url(data_url: &str) -> Option<Vec<u8>> {
    let encoded = data_url.strip_prefix("data:image/png;base64,")?;
    base64::engine::general_purpose::STANDARD.decode(encoded).ok()
}

const CANVAS_SNIPPET: &str = r#"
(() => {
  const canvases = Array.from(document.querySelectorAll('canvas'));
  const qr = canvases.find(c => c.width >= 100 && c.height >= 100);
  return qr ? qr.toDataURL('image/png') : null;
})()
"#;

const IMG_SNIPPET: &str = r#"
(async () => {
  const candidates = Array.from(document.querySelectorAll('img'))
    .filter(img => img.naturalWidth >= 100 && img.naturalWidth === img.naturalHeight)
    .filter(img => !img.src.includes('__PLACEHOLDER__'));
  for (const img of candidates) {
    try {
      const fresh = new Image();
      fresh.crossOrigin = 'anonymous';
      const loaded = new Promise((resolve, reject) => {
        fresh.onload = resolve;
        fresh.onerror = reject;
      });
      fresh.src = img.src;
      await loaded;
      const canvas = document.createElement('canvas');
      canvas.width = fresh.naturalWidth;
      canvas.height = fresh.naturalHeight;
      canvas.getContext('2d').drawImage(fresh, 0, 0);
      return canvas.toDataURL('image/png');
    } catch (e) {
      // Tainted or broken image: try the next candidate.
    }
  }
  return null;
})()
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use base64::Engine;
    use serde_json::json;
    use std::sync::Mutex;
    use vantage_core::{Cookie, Result};

    fn config() -> Config {
        Config::for_tests()
    }

    #[test]
    fn accepts_login_url() {
        let url = "https://www.tiktok.com/login/qrcode?token=abc";
        assert!(validate_qr_url(url, &config()).is_ok());
    }

    #[test]
    fn rejects_foreign_domain() {
        let url = "https://evil.example/login/qrcode";
        assert!(validate_qr_url(url, &config()).is_err());
    }

    #[test]
    fn rejects_download_url_even_on_right_domain() {
        let url = "https://www.tiktok.com/login/app/download?campaign=qr";
        let err = validate_qr_url(url, &config()).unwrap_err();
        assert!(err.contains("download"));
    }

    #[test]
    fn rejects_unrecognized_shape() {
        let url = "https://www.tiktok.com/foryou";
        assert!(validate_qr_url(url, &config()).is_err());
    }

    /// Page whose canvas snippet yields a scripted sequence of data URLs.
    struct ScriptedPage {
        canvas_results: Mutex<Vec<Value>>,
        screenshot: Vec<u8>,
    }

    #[async_trait]
    impl crate::page::BrowserPage for ScriptedPage {
        async fn navigate(&self, _url: &str) -> Result<()> {
            Ok(())
        }

        async fn evaluate(&self, expression: &str) -> Result<Value> {
            if expression.contains("querySelector('canvas') !== null") {
                return Ok(json!(true));
            }
            if expression.contains("toDataURL") && expression.contains("querySelectorAll('canvas')") {
                let mut results = self.canvas_results.lock().unwrap();
                return Ok(if results.is_empty() { Value::Null } else { results.remove(0) });
            }
            Ok(Value::Null)
        }

        async fn on_new_document(&self, _script: &str) -> Result<()> {
            Ok(())
        }

        async fn current_url(&self) -> Result<String> {
            Ok("about:blank".into())
        }

        async fn cookies(&self, _url: &str) -> Result<Vec<Value>> {
            Ok(vec![])
        }

        async fn set_cookies(&self, _cookies: &[Cookie], _domain: &str) -> Result<()> {
            Ok(())
        }

        async fn screenshot(&self) -> Result<Vec<u8>> {
            Ok(self.screenshot.clone())
        }

        async fn close(&self) {}
    }

    /// Decoder that maps PNG payload bytes to URLs by content.
    struct TableDecoder;

    impl QrDecoder for TableDecoder {
        fn decode(&self, png: &[u8]) -> Option<String> {
            match png {
                b"login" => Some("https://www.tiktok.com/login/qrcode?token=1".into()),
                b"promo" => Some("https://www.tiktok.com/login/app/download?x=1".into()),
                _ => None,
            }
        }
    }

    fn data_url(payload: &[u8]) -> Value {
        json!(format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(payload)
        ))
    }

    #[tokio::test]
    async fn extracts_and_validates_first_good_qr() {
        let page = ScriptedPage {
            canvas_results: Mutex::new(vec![data_url(b"login")]),
            screenshot: b"shot".to_vec(),
        };
        let config = config();
        let qr = QrExtractor::new(&page, &TableDecoder, &config).extract().await;
        assert_eq!(qr.decoded_url.as_deref(), Some("https://www.tiktok.com/login/qrcode?token=1"));
        assert_eq!(qr.data, b"login");
        assert!(qr.error_tag.is_none());
    }

    #[tokio::test]
    async fn promotional_qr_is_rejected_then_real_one_accepted() {
        // First capture decodes a download link; the retry finds the real QR.
        let page = ScriptedPage {
            canvas_results: Mutex::new(vec![data_url(b"promo"), data_url(b"login")]),
            screenshot: b"shot".to_vec(),
        };
        let config = config();
        let qr = QrExtractor::new(&page, &TableDecoder, &config).extract().await;
        assert_eq!(qr.decoded_url.as_deref(), Some("https://www.tiktok.com/login/qrcode?token=1"));
        assert!(qr.error_tag.is_none());
    }

    #[tokio::test]
    async fn persistent_promotional_qr_falls_back_to_screenshot() {
        let promos: Vec<Value> = (0..10).map(|_| data_url(b"promo")).collect();
        let page =
            ScriptedPage { canvas_results: Mutex::new(promos), screenshot: b"shot".to_vec() };
        let config = config();
        let qr = QrExtractor::new(&page, &TableDecoder, &config).extract().await;
        assert!(qr.decoded_url.is_none());
        assert_eq!(qr.data, b"shot");
        assert!(qr.error_tag.unwrap().contains("qr_validation_failed"));
    }
}
