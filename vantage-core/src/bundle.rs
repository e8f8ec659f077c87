use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::{Error, Result};

/// One browser cookie from an extracted credential bundle.
///
/// Only `name` and `value` are required; everything else the extractor
/// captured is preserved verbatim so re-injection round-trips.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), value: value.into(), domain: None, path: None, extra: Map::new() }
    }
}

/// User-identity object embedded in a bundle. All fields optional: a bundle
/// without an extractable identity is still usable for sampling, it just
/// cannot be indexed by identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UserIdentity {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sec_user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Synthetic per-user device identifiers.
///
/// Not secrets: deterministic values the target application's scripts expect
/// to see alongside real cookies. Derived from the stable identity so the
/// same user always presents the same device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceIds {
    pub device_id: String,
    pub install_id: String,
}

impl DeviceIds {
    /// SHA-256 the identity and slice the digest into two decimal ids.
    pub fn derive(identity: &str) -> Self {
        let digest = Sha256::digest(identity.as_bytes());
        let device = u64::from_be_bytes(digest[0..8].try_into().expect("8-byte slice"));
        let install = u64::from_be_bytes(digest[8..16].try_into().expect("8-byte slice"));
        Self {
            device_id: format!("7{:018}", device % 1_000_000_000_000_000_000),
            install_id: format!("7{:018}", install % 1_000_000_000_000_000_000),
        }
    }
}

/// Captured QR payload. When extraction ultimately failed, `data` holds a
/// full-page screenshot and `error_tag` names the failure.
#[derive(Debug, Clone, PartialEq)]
pub struct QrImage {
    /// PNG bytes of the QR code (or the fallback screenshot).
    pub data: Vec<u8>,
    pub decoded_url: Option<String>,
    pub error_tag: Option<String>,
}

/// Opaque user credential bundle: cookies, derived tokens, and user metadata
/// sufficient to act as that user against the target web application.
///
/// The core reads only `user` (for the identity key) and `cookies`; `tokens`
/// and any extra fields ride along untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CredentialBundle {
    #[serde(default)]
    pub cookies: Vec<Cookie>,
    #[serde(default)]
    pub user: UserIdentity,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub tokens: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceIds>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CredentialBundle {
    /// Parse and shape-check a caller-supplied bundle.
    ///
    /// A bundle must carry a non-empty `cookies` array and a `user` object;
    /// anything less is `BadBundle`.
    pub fn from_value(value: Value) -> Result<Self> {
        let obj = value.as_object().ok_or_else(|| Error::BadBundle("not an object".into()))?;
        if !obj.get("cookies").map(Value::is_array).unwrap_or(false) {
            return Err(Error::BadBundle("missing cookies array".into()));
        }
        if !obj.get("user").map(Value::is_object).unwrap_or(false) {
            return Err(Error::BadBundle("missing user identity object".into()));
        }
        let bundle: CredentialBundle =
            serde_json::from_value(value).map_err(|e| Error::BadBundle(e.to_string()))?;
        if bundle.cookies.is_empty() {
            return Err(Error::BadBundle("cookies array is empty".into()));
        }
        Ok(bundle)
    }

    /// The stable identity used to key credential sessions, if present.
    pub fn identity(&self) -> Option<&str> {
        self.user.sec_user_id.as_deref().filter(|s| !s.is_empty())
    }

    pub fn cookie(&self, name: &str) -> Option<&Cookie> {
        self.cookies.iter().find(|c| c.name == name)
    }

    /// `Cookie:` header value for direct API calls made on the user's behalf.
    pub fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rejects_bundle_without_cookies() {
        let err = CredentialBundle::from_value(json!({ "user": {} })).unwrap_err();
        assert_eq!(err.kind(), "BadBundle");
    }

    #[test]
    fn rejects_empty_cookie_array() {
        let err =
            CredentialBundle::from_value(json!({ "cookies": [], "user": {} })).unwrap_err();
        assert_eq!(err.kind(), "BadBundle");
    }

    #[test]
    fn accepts_minimal_bundle_and_reads_identity() {
        let bundle = CredentialBundle::from_value(json!({
            "cookies": [{ "name": "sessionid", "value": "x" }],
            "user": { "sec_user_id": "U" },
        }))
        .unwrap();
        assert_eq!(bundle.identity(), Some("U"));
        assert_eq!(bundle.cookie_header(), "sessionid=x");
    }

    #[test]
    fn extra_fields_round_trip() {
        let input = json!({
            "cookies": [{ "name": "sessionid", "value": "x", "httpOnly": true }],
            "user": { "sec_user_id": "U" },
            "capturedAt": "2026-01-01T00:00:00Z",
        });
        let bundle = CredentialBundle::from_value(input.clone()).unwrap();
        let output = serde_json::to_value(&bundle).unwrap();
        assert_eq!(output["capturedAt"], input["capturedAt"]);
        assert_eq!(output["cookies"][0]["httpOnly"], json!(true));
    }

    #[test]
    fn device_ids_are_deterministic_per_identity() {
        let a = DeviceIds::derive("U");
        let b = DeviceIds::derive("U");
        let c = DeviceIds::derive("V");
        assert_eq!(a, b);
        assert_ne!(a.device_id, c.device_id);
        assert_eq!(a.device_id.len(), 19);
        assert!(a.device_id.chars().all(|ch| ch.is_ascii_digit()));
    }
}
