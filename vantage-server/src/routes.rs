use axum::{
    Router,
    routing::{delete, get, post},
};

use crate::handlers;
use crate::state::AppState;

/// The public route table.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Sessions
        .route("/load-session", post(handlers::load_session))
        .route("/sessions", get(handlers::list_sessions))
        // QR auth
        .route("/auth/start/{sessionId}", post(handlers::auth_start))
        .route("/auth/poll/{authSessionId}", get(handlers::auth_poll))
        // Browser-driven sampling
        .route(
            "/playwright/foryoupage/sample/{sessionId}",
            post(handlers::playwright_feed_sample),
        )
        .route(
            "/playwright/watchhistory/sample/{sessionId}",
            post(handlers::playwright_history_sample),
        )
        // Module-driven sampling
        .route("/modules/foryoupage/sample/{sessionId}", post(handlers::modules_feed_sample))
        .route(
            "/modules/watchhistory/sample/{sessionId}",
            post(handlers::modules_history_sample),
        )
        // Containers
        .route("/containers/create", post(handlers::containers_create))
        .route("/containers/{id}", delete(handlers::containers_destroy))
        .route("/containers", get(handlers::containers_list))
        // Health
        .route("/health", get(handlers::health))
        // Retired sampling paths from before the /playwright//modules split.
        .route("/foryoupage/sample/{sessionId}", post(handlers::gone))
        .route("/watchhistory/sample/{sessionId}", post(handlers::gone))
}
