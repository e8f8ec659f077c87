use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;
use vantage_core::{Config, ContainerId, Result};
use vantage_crypto::SessionCipher;
use vantage_docker::{ContainerRuntime, CreateSpec, ProxyUpstream};
use vantage_orchestrator::OrchestratorBuilder;
use vantage_pool::PoolManager;
use vantage_server::{AppState, api_routes};
use vantage_session::{AuthStore, CredentialStore};

#[derive(Default)]
struct MockRuntime {
    next: AtomicUsize,
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn create(&self, _spec: &CreateSpec) -> Result<ContainerId> {
        let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ContainerId::new(format!("c{n}")))
    }

    async fn inspect_ip(&self, _id: &ContainerId) -> Result<String> {
        Ok("10.0.0.1".into())
    }

    async fn wait_ready(&self, _ip: &str, _max_tries: u32) -> Result<()> {
        Ok(())
    }

    async fn configure_proxy(&self, _ip: &str, _upstream: &ProxyUpstream) -> Result<()> {
        Ok(())
    }

    async fn destroy(&self, _id: &ContainerId) -> Result<()> {
        Ok(())
    }

    async fn list_orphans(&self, _label: &str) -> Result<Vec<ContainerId>> {
        Ok(vec![])
    }
}

fn app() -> Router {
    let mut config = Config::for_tests();
    config.pool_min_size = 0;
    let config = Arc::new(config);

    let pool = Arc::new(PoolManager::new(Arc::new(MockRuntime::default()), config.clone()));
    let cipher = Arc::new(SessionCipher::from_seed("test-seed"));
    let credentials = Arc::new(CredentialStore::new(cipher.clone(), config.session_timeout));
    let auths = Arc::new(AuthStore::new(config.auth_timeout));

    let orchestrator =
        OrchestratorBuilder::new(config, pool, credentials, auths, cipher).build();
    api_routes().with_state(AppState::new(orchestrator))
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_reports_ok() {
    let response = app().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["encryption"], "fallback");
    assert_eq!(body["modules"]["foryoupage"], true);
}

#[tokio::test]
async fn load_session_then_list() {
    let app = app();

    let response = app
        .clone()
        .oneshot(post_json(
            "/load-session",
            json!({ "sessionData": {
                "cookies": [{ "name": "sessionid", "value": "x" }],
                "user": { "sec_user_id": "U" },
            }}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["sessionId"], "U");
    assert_eq!(body["status"], "loaded");

    let response = app.oneshot(get("/sessions")).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["sessions"][0]["fullId"], "U");
}

#[tokio::test]
async fn bad_bundle_is_400() {
    let response = app()
        .oneshot(post_json("/load-session", json!({ "sessionData": { "user": {} } })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().starts_with("BadBundle"));
}

#[tokio::test]
async fn body_without_session_payload_is_400() {
    let response = app().oneshot(post_json("/load-session", json!({}))).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn sampling_unknown_session_is_404() {
    let response = app()
        .oneshot(post_json("/playwright/foryoupage/sample/ghost", json!({ "count": 3 })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().starts_with("SessionNotFound"));
}

#[tokio::test]
async fn sampling_at_capacity_is_500_with_kind() {
    let app = app();
    app.clone()
        .oneshot(post_json(
            "/load-session",
            json!({ "sessionData": {
                "cookies": [{ "name": "sessionid", "value": "x" }],
                "user": { "sec_user_id": "U" },
            }}),
        ))
        .await
        .unwrap();

    // Empty warm pool: assign fails fast.
    let response = app
        .oneshot(post_json("/playwright/foryoupage/sample/U", json!({ "count": 3 })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().starts_with("AtCapacity"));
}

#[tokio::test]
async fn unknown_auth_session_poll_is_404() {
    let response = app().oneshot(get("/auth/poll/nope")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn deprecated_sampling_paths_are_410() {
    let response = app()
        .oneshot(post_json("/foryoupage/sample/U", json!({ "count": 1 })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::GONE);
}

#[tokio::test]
async fn container_lifecycle_over_http() {
    let app = app();

    let response =
        app.clone().oneshot(post_json("/containers/create", json!({}))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let created = body_json(response).await;
    let id = created["containerId"].as_str().unwrap().to_string();
    assert_eq!(created["status"], "pooled");
    assert!(created["cdpUrl"].as_str().unwrap().starts_with("http://10.0.0.1:"));

    let response = app.clone().oneshot(get("/containers")).await.unwrap();
    let listed = body_json(response).await;
    assert_eq!(listed["total"], 1);
    assert_eq!(listed["available"], 1);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/containers/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["success"], true);

    let response = app.oneshot(get("/containers")).await.unwrap();
    assert_eq!(body_json(response).await["total"], 0);
}

#[tokio::test]
async fn auth_start_returns_awaiting_scan() {
    // No warm container exists; the background flow will fail, but the start
    // call itself returns immediately with a pollable id.
    let app = app();
    let response = app.clone().oneshot(post_json("/auth/start/new", json!({}))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "awaiting_scan");
    assert!(body["authSessionId"].as_str().is_some());
}
