use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use vantage_core::{Cookie, Error, Result};

use crate::page::{BrowserPage, PageConnector};

/// Per-command response budget. DevTools answers navigation and evaluate
/// calls well inside this; a stuck browser should fail, not hang the flow.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// How long `navigate` polls for DOM readiness before settling anyway.
const READY_POLL_TRIES: u32 = 20;

struct PendingCommand {
    id: u64,
    method: String,
    params: Value,
    respond: oneshot::Sender<Result<Value>>,
}

/// Minimal Chrome DevTools Protocol client bound to one page target.
///
/// A dispatcher task owns the websocket: commands go out with incrementing
/// ids, responses are matched back by id. Protocol events are not consumed;
/// readiness is polled via `Runtime.evaluate`, which keeps the client small.
pub struct DevToolsClient {
    commands: mpsc::Sender<PendingCommand>,
    next_id: AtomicU64,
}

impl DevToolsClient {
    /// Connect to the first page target advertised at `devtools_url`
    /// (e.g. `http://172.18.0.5:9222`).
    pub async fn connect(devtools_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .expect("reqwest client");

        let targets: Vec<Value> = http
            .get(format!("{devtools_url}/json"))
            .send()
            .await
            .map_err(|e| Error::BrowserNotReady(format!("target list unreachable: {e}")))?
            .json()
            .await
            .map_err(|e| Error::BrowserNotReady(format!("target list malformed: {e}")))?;

        let ws_url = targets
            .iter()
            .find(|t| t["type"] == "page")
            .and_then(|t| t["webSocketDebuggerUrl"].as_str())
            .ok_or_else(|| Error::BrowserNotReady("no page target advertised".into()))?;

        let (socket, _) = connect_async(ws_url)
            .await
            .map_err(|e| Error::BrowserNotReady(format!("devtools socket: {e}")))?;

        let (mut sink, mut stream) = socket.split();
        let (commands, mut command_rx) = mpsc::channel::<PendingCommand>(32);

        tokio::spawn(async move {
            let mut pending: HashMap<u64, oneshot::Sender<Result<Value>>> = HashMap::new();
            loop {
                tokio::select! {
                    command = command_rx.recv() => {
                        let Some(command) = command else { break };
                        let frame = json!({
                            "id": command.id,
                            "method": command.method,
                            "params": command.params,
                        });
                        pending.insert(command.id, command.respond);
                        if sink.send(Message::Text(frame.to_string())).await.is_err() {
                            break;
                        }
                    }
                    message = stream.next() => {
                        match message {
                            Some(Ok(Message::Text(text))) => {
                                let Ok(value) = serde_json::from_str::<Value>(&text) else {
                                    continue;
                                };
                                // Frames without an id are protocol events.
                                let Some(id) = value.get("id").and_then(Value::as_u64) else {
                                    continue;
                                };
                                if let Some(respond) = pending.remove(&id) {
                                    let outcome = match value.get("error") {
                                        Some(err) => Err(Error::Internal(format!("devtools: {err}"))),
                                        None => Ok(value.get("result").cloned().unwrap_or(Value::Null)),
                                    };
                                    let _ = respond.send(outcome);
                                }
                            }
                            Some(Ok(_)) => {}
                            _ => break,
                        }
                    }
                }
            }
        });

        let client = Self { commands, next_id: AtomicU64::new(1) };
        client.call("Page.enable", json!({})).await?;
        client.call("Runtime.enable", json!({})).await?;
        client.call("Network.enable", json!({})).await?;
        Ok(client)
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (respond, receive) = oneshot::channel();
        self.commands
            .send(PendingCommand { id, method: method.to_string(), params, respond })
            .await
            .map_err(|_| Error::Internal("devtools connection closed".into()))?;

        match tokio::time::timeout(COMMAND_TIMEOUT, receive).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(Error::Internal("devtools connection closed".into())),
            Err(_) => Err(Error::Internal(format!("devtools command {method} timed out"))),
        }
    }
}

#[async_trait]
impl BrowserPage for DevToolsClient {
    async fn navigate(&self, url: &str) -> Result<()> {
        self.call("Page.navigate", json!({ "url": url })).await?;

        // Poll readiness instead of consuming lifecycle events.
        for _ in 0..READY_POLL_TRIES {
            let state = self.evaluate("document.readyState").await?;
            if state == "interactive" || state == "complete" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        // Settle wait for late client-side rendering.
        tokio::time::sleep(Duration::from_millis(500)).await;
        Ok(())
    }

    async fn evaluate(&self, expression: &str) -> Result<Value> {
        let result = self
            .call(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;

        if let Some(exception) = result.get("exceptionDetails") {
            return Err(Error::Internal(format!("page script threw: {exception}")));
        }
        Ok(result.pointer("/result/value").cloned().unwrap_or(Value::Null))
    }

    async fn on_new_document(&self, script: &str) -> Result<()> {
        self.call("Page.addScriptToEvaluateOnNewDocument", json!({ "source": script })).await?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        let value = self.evaluate("window.location.href").await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::Internal("location.href was not a string".into()))
    }

    async fn cookies(&self, url: &str) -> Result<Vec<Value>> {
        let result = self.call("Network.getCookies", json!({ "urls": [url] })).await?;
        Ok(result
            .get("cookies")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    async fn set_cookies(&self, cookies: &[Cookie], domain: &str) -> Result<()> {
        for cookie in cookies {
            self.call(
                "Network.setCookie",
                json!({
                    "name": cookie.name,
                    "value": cookie.value,
                    "domain": cookie.domain.as_deref().unwrap_or(domain),
                    "path": cookie.path.as_deref().unwrap_or("/"),
                }),
            )
            .await?;
        }
        Ok(())
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        let result = self
            .call(
                "Page.captureScreenshot",
                json!({ "format": "png", "captureBeyondViewport": true }),
            )
            .await?;
        let data = result
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Internal("screenshot response had no data".into()))?;
        base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| Error::Internal(format!("screenshot not base64: {e}")))
    }

    async fn close(&self) {
        // Dropping the command sender stops the dispatcher, which closes the
        // socket. Nothing to flush: commands are fire-and-forget by now.
    }
}

/// [`PageConnector`] that dials the real DevTools endpoint, retrying the
/// connection up to 3 times with a 2 s backoff.
pub struct CdpConnector;

#[async_trait]
impl PageConnector for CdpConnector {
    async fn connect(&self, devtools_url: &str) -> Result<Box<dyn BrowserPage>> {
        let mut last = None;
        for attempt in 1..=3u32 {
            match DevToolsClient::connect(devtools_url).await {
                Ok(client) => return Ok(Box::new(client)),
                Err(e) => {
                    tracing::debug!(attempt, error = %e, "devtools connect failed");
                    last = Some(e);
                    if attempt < 3 {
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        }
        Err(last.unwrap_or_else(|| Error::BrowserNotReady("devtools connect failed".into())))
    }
}
