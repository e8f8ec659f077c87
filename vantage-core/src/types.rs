use derive_more::{AsRef, Deref, Display, From, Into};
use serde::{Deserialize, Serialize};

/// Durable credential-session identifier.
///
/// Equal to the user's stable identity when the bundle carries one, otherwise
/// a random id minted at load time.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Display, From, AsRef, Deref, Into, Serialize, Deserialize, Default,
)]
pub struct SessionId(String);

/// Ephemeral QR-auth session identifier. Always random and unguessable.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Display, From, AsRef, Deref, Into, Serialize, Deserialize, Default,
)]
pub struct AuthSessionId(String);

/// Opaque container-runtime identifier, stable for the container's lifetime.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Display, From, AsRef, Deref, Into, Serialize, Deserialize, Default,
)]
pub struct ContainerId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AuthSessionId {
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ContainerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<&str> for AuthSessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<&str> for ContainerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
