use std::time::Duration;

use vantage_core::{Error, Result};

use crate::ProxyUpstream;

/// HTTP client for the per-container relay control plane and the DevTools
/// readiness probe.
///
/// Every container runs a small SOCKS5 relay with two local ports: the SOCKS
/// port the browser is wired to at image build time, and a control port that
/// accepts exactly one kind of message, an upstream switch.
#[derive(Clone)]
pub struct ControlPlaneClient {
    http: reqwest::Client,
    devtools_port: u16,
    control_port: u16,
}

impl ControlPlaneClient {
    pub fn new(devtools_port: u16, control_port: u16) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .expect("reqwest client");
        Self { http, devtools_port, control_port }
    }

    /// Poll `GET /json/version` on the DevTools port until HTTP 200.
    /// Two seconds between tries.
    pub async fn wait_ready(&self, ip: &str, max_tries: u32) -> Result<()> {
        let url = format!("http://{}:{}/json/version", ip, self.devtools_port);
        for attempt in 1..=max_tries {
            match self.http.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    tracing::debug!(ip, attempt, "browser devtools ready");
                    return Ok(());
                }
                Ok(resp) => {
                    tracing::trace!(ip, attempt, status = %resp.status(), "devtools not ready");
                }
                Err(e) => {
                    tracing::trace!(ip, attempt, error = %e, "devtools probe failed");
                }
            }
            if attempt < max_tries {
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
        Err(Error::BrowserNotReady(format!("{url} never answered in {max_tries} tries")))
    }

    /// Switch the relay from passthrough to the given upstream.
    pub async fn configure(&self, ip: &str, upstream: &ProxyUpstream) -> Result<()> {
        let url = format!("http://{}:{}/configure", ip, self.control_port);
        let resp = self
            .http
            .post(&url)
            .json(upstream)
            .send()
            .await
            .map_err(|e| Error::ProxyConfig(format!("control endpoint unreachable: {e}")))?;
        if !resp.status().is_success() {
            return Err(Error::ProxyConfig(format!("control endpoint returned {}", resp.status())));
        }
        Ok(())
    }

    /// `GET /status` → `{ mode, upstream }`.
    pub async fn status(&self, ip: &str) -> Result<serde_json::Value> {
        let url = format!("http://{}:{}/status", ip, self.control_port);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::ProxyConfig(format!("control endpoint unreachable: {e}")))?;
        resp.json()
            .await
            .map_err(|e| Error::ProxyConfig(format!("control status malformed: {e}")))
    }
}
