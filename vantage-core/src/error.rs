use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Service-wide error taxonomy. One cause per kind; none overlap.
///
/// Every public operation surfaces one of these, and the HTTP layer renders
/// them as `{ "error": "<kind>: <message>" }` with the status from
/// [`Error::kind`]'s mapping table in vantage-server.
#[derive(Debug, Error)]
pub enum Error {
    /// Caller-supplied credential data fails shape checks.
    #[error("BadBundle: {0}")]
    BadBundle(String),

    #[error("SessionNotFound: {0}")]
    SessionNotFound(String),

    #[error("AuthSessionNotFound: {0}")]
    AuthSessionNotFound(String),

    /// Warm pool empty at assignment. Fail-fast backpressure signal; the pool
    /// never creates containers synchronously on this path.
    #[error("AtCapacity: no pooled container available")]
    AtCapacity,

    #[error("ContainerCreationFailed: {0}")]
    ContainerCreationFailed(String),

    /// The container came up but its DevTools endpoint never answered.
    #[error("BrowserNotReady: {0}")]
    BrowserNotReady(String),

    /// The in-container control endpoint rejected the upstream configuration.
    #[error("ProxyConfig: {0}")]
    ProxyConfig(String),

    #[error("AuthTimeout: login was not completed within the budget")]
    AuthTimeout,

    #[error("QrExtractionFailed: {0}")]
    QrExtractionFailed(String),

    /// A QR code decoded but its URL failed the allow/deny-list checks.
    #[error("QrValidationFailed: {0}")]
    QrValidationFailed(String),

    /// External sampling script raised; surfaced verbatim.
    #[error("SamplingScriptFailed: {0}")]
    SamplingScriptFailed(String),

    /// Credential bundle failed authenticated decryption under every key.
    #[error("BadCiphertext: {0}")]
    BadCiphertext(String),

    #[error("Internal: {0}")]
    Internal(String),
}

impl Error {
    /// Stable kind tag, used for log fields and client-visible bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::BadBundle(_) => "BadBundle",
            Error::SessionNotFound(_) => "SessionNotFound",
            Error::AuthSessionNotFound(_) => "AuthSessionNotFound",
            Error::AtCapacity => "AtCapacity",
            Error::ContainerCreationFailed(_) => "ContainerCreationFailed",
            Error::BrowserNotReady(_) => "BrowserNotReady",
            Error::ProxyConfig(_) => "ProxyConfig",
            Error::AuthTimeout => "AuthTimeout",
            Error::QrExtractionFailed(_) => "QrExtractionFailed",
            Error::QrValidationFailed(_) => "QrValidationFailed",
            Error::SamplingScriptFailed(_) => "SamplingScriptFailed",
            Error::BadCiphertext(_) => "BadCiphertext",
            Error::Internal(_) => "Internal",
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Internal(format!("json: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_kind_prefix() {
        let err = Error::BadBundle("cookies array is empty".into());
        assert_eq!(err.to_string(), "BadBundle: cookies array is empty");
        assert_eq!(err.kind(), "BadBundle");
    }

    #[test]
    fn at_capacity_has_fixed_message() {
        assert!(Error::AtCapacity.to_string().starts_with("AtCapacity"));
    }
}
