use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use vantage_core::{AuthSessionId, ContainerId, Error, SessionId};
use vantage_docker::ProxyUpstream;
use vantage_orchestrator::SampleKind;

use crate::state::AppState;

/// API error response body: `{ "error": "<kind>: <message>" }`.
#[derive(Serialize)]
pub struct ApiError {
    pub error: String,
}

impl ApiError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self { error: msg.into() }
    }
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

fn err(status: StatusCode, msg: impl Into<String>) -> (StatusCode, Json<ApiError>) {
    (status, Json(ApiError::new(msg)))
}

/// Map the service taxonomy onto the HTTP statuses of the public surface.
fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::BadBundle(_) => StatusCode::BAD_REQUEST,
        Error::SessionNotFound(_) | Error::AuthSessionNotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reject(error: Error) -> (StatusCode, Json<ApiError>) {
    err(status_for(&error), error.to_string())
}

/// Shortened session id for listings; the full id rides alongside.
fn truncate_id(id: &str) -> String {
    if id.chars().count() > 12 {
        let head: String = id.chars().take(12).collect();
        format!("{head}…")
    } else {
        id.to_string()
    }
}

// ---------------------------------------------------------------------------
// Sessions

pub async fn load_session(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> ApiResult<Value> {
    let session_id = if let Some(sealed) = body.get("encryptedSession").and_then(Value::as_str) {
        state.orchestrator.load_encrypted_session(sealed).map_err(reject)?
    } else if let Some(bundle) = body.get("sessionData") {
        state.orchestrator.load_session(bundle.clone()).map_err(reject)?
    } else {
        return Err(reject(Error::BadBundle(
            "body must carry sessionData or encryptedSession".into(),
        )));
    };

    Ok(Json(json!({ "sessionId": session_id, "status": "loaded" })))
}

pub async fn list_sessions(State(state): State<AppState>) -> ApiResult<Value> {
    let sessions = state.orchestrator.list_sessions();
    let listed: Vec<Value> = sessions
        .iter()
        .map(|id| json!({ "id": truncate_id(id.as_str()), "fullId": id }))
        .collect();
    Ok(Json(json!({ "count": listed.len(), "sessions": listed })))
}

// ---------------------------------------------------------------------------
// Auth

pub async fn auth_start(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Value> {
    let auth_id = state.orchestrator.start_auth(SessionId::new(session_id));
    Ok(Json(json!({ "authSessionId": auth_id, "status": "awaiting_scan" })))
}

pub async fn auth_poll(
    State(state): State<AppState>,
    Path(auth_session_id): Path<String>,
) -> ApiResult<Value> {
    let poll = state
        .orchestrator
        .poll_auth(&AuthSessionId::from(auth_session_id.as_str()))
        .map_err(reject)?;

    let mut body = json!({ "status": poll.status });
    if let Some(qr) = poll.qr {
        body["qrCodeData"] = json!({
            "image": base64::engine::general_purpose::STANDARD.encode(&qr.data),
            "decodedUrl": qr.decoded_url,
            "error": qr.error_tag,
        });
    }
    if let Some(bundle) = poll.bundle {
        body["sessionData"] = serde_json::to_value(&bundle).map_err(|e| {
            err(StatusCode::INTERNAL_SERVER_ERROR, format!("Internal: {e}"))
        })?;
    }
    Ok(Json(body))
}

// ---------------------------------------------------------------------------
// Sampling

fn default_count() -> usize {
    10
}

#[derive(Deserialize)]
pub struct BrowserSampleRequest {
    #[serde(default = "default_count")]
    pub count: usize,
}

#[derive(Deserialize)]
pub struct ModuleSampleRequest {
    #[serde(default = "default_count")]
    pub count: usize,
    #[serde(default)]
    pub module_type: Option<String>,
    #[serde(default)]
    pub proxy: Option<String>,
}

async fn browser_sample(
    state: AppState,
    kind: SampleKind,
    session_id: String,
    req: BrowserSampleRequest,
) -> ApiResult<Value> {
    let result = state
        .orchestrator
        .sample_browser(kind, &SessionId::new(session_id), req.count)
        .await
        .map_err(reject)?;
    Ok(Json(json!({
        "success": true,
        "videos": result.videos,
        "method": result.method,
        "sampled_at": result.sampled_at.to_rfc3339(),
    })))
}

pub async fn playwright_feed_sample(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<BrowserSampleRequest>,
) -> ApiResult<Value> {
    browser_sample(state, SampleKind::ForYouFeed, session_id, req).await
}

pub async fn playwright_history_sample(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<BrowserSampleRequest>,
) -> ApiResult<Value> {
    browser_sample(state, SampleKind::WatchHistory, session_id, req).await
}

async fn module_sample(
    state: AppState,
    kind: SampleKind,
    session_id: String,
    req: ModuleSampleRequest,
) -> ApiResult<Value> {
    let result = state
        .orchestrator
        .sample_modules(kind, &SessionId::new(session_id), req.count, req.proxy.as_deref())
        .await
        .map_err(reject)?;
    Ok(Json(json!({
        "success": result.success,
        "raw": result.raw,
        "statusCode": result.status_code,
    })))
}

pub async fn modules_feed_sample(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<ModuleSampleRequest>,
) -> ApiResult<Value> {
    module_sample(state, SampleKind::ForYouFeed, session_id, req).await
}

pub async fn modules_history_sample(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<ModuleSampleRequest>,
) -> ApiResult<Value> {
    module_sample(state, SampleKind::WatchHistory, session_id, req).await
}

// ---------------------------------------------------------------------------
// Containers

#[derive(Deserialize, Default)]
pub struct CreateContainerRequest {
    #[serde(default)]
    pub proxy: Option<ProxyRequest>,
}

#[derive(Deserialize)]
pub struct ProxyRequest {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub pass: Option<String>,
}

pub async fn containers_create(
    State(state): State<AppState>,
    body: Option<Json<CreateContainerRequest>>,
) -> ApiResult<Value> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let upstream = req.proxy.map(|p| ProxyUpstream {
        host: p.host,
        port: p.port,
        user: p.user,
        pass: p.pass,
    });

    let info = state.orchestrator.create_container(upstream).await.map_err(reject)?;
    Ok(Json(json!({
        "containerId": info.container_id,
        "ip": info.ip,
        "cdpUrl": info.cdp_url,
        "status": info.status,
    })))
}

pub async fn containers_destroy(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Value> {
    state.orchestrator.destroy_container(&ContainerId::new(id)).await.map_err(reject)?;
    Ok(Json(json!({ "success": true })))
}

pub async fn containers_list(State(state): State<AppState>) -> ApiResult<Value> {
    let (stats, containers) = state.orchestrator.containers();
    Ok(Json(json!({
        "total": stats.total,
        "available": stats.pooled,
        "assigned": stats.assigned,
        "containers": containers,
    })))
}

// ---------------------------------------------------------------------------
// Health and deprecation

pub async fn health(State(state): State<AppState>) -> ApiResult<Value> {
    let snapshot = state.orchestrator.health();
    Ok(Json(json!({
        "status": "ok",
        "sessions": snapshot.sessions,
        "authSessions": snapshot.auth_sessions,
        "uptime": state.uptime_secs(),
        "encryption": snapshot.encryption,
        "pool": snapshot.pool,
        "modules": {
            "foryoupage": true,
            "watchhistory": true,
        },
    })))
}

/// Catch-all for endpoints retired from the public surface.
pub async fn gone() -> (StatusCode, Json<ApiError>) {
    err(StatusCode::GONE, "deprecated endpoint: use the /playwright or /modules routes")
}
