//! Core types shared by every vantage crate.
//!
//! This crate owns the identifier newtypes, the credential-bundle data model,
//! the service-wide error taxonomy, and the environment-driven configuration.
//! It deliberately has no async or I/O dependencies so that every other crate
//! can depend on it without pulling in a runtime.

mod bundle;
mod config;
mod error;
pub mod types;

pub use bundle::{Cookie, CredentialBundle, DeviceIds, QrImage, UserIdentity};
pub use config::{Config, ProxyMode};
pub use error::{Error, Result};
pub use types::{AuthSessionId, ContainerId, SessionId};
