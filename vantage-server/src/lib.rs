//! HTTP surface of the vantage service.
//!
//! Route table, controllers, and shared state; the binary in `main.rs` wires
//! these to a configured orchestrator and serves them with axum.

pub mod handlers;
pub mod routes;
pub mod state;

pub use routes::api_routes;
pub use state::AppState;
