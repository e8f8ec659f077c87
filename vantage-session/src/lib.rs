//! Two-tier in-memory session storage.
//!
//! Durable credential sessions (keyed by stable user identity, encrypted at
//! rest) and ephemeral auth sessions (keyed by random ids, tracking one QR
//! login attempt each). Each tier has its own TTL and sweeper; neither knows
//! about containers, the pool keeps the session-to-container binding.

mod auth;
mod credential;

pub use auth::{AuthPatch, AuthRecord, AuthStatus, AuthStore};
pub use vantage_core::QrImage;
pub use credential::CredentialStore;
