//! Client for the platform's attestation-bound key-derivation service.
//!
//! Inside a confidential-compute deployment a small sidecar exposes key
//! derivation over local HTTP; keys it returns are bound to the attested
//! workload identity and never leave the enclave boundary.

use serde::Deserialize;
use vantage_core::{Error, Result};

#[derive(Deserialize)]
struct DeriveResponse {
    key: String,
}

/// Request a 32-byte key for `label` from the KDS at `endpoint`.
pub async fn fetch_platform_key(endpoint: &str, label: &str) -> Result<[u8; 32]> {
    let url = format!("{}/derive", endpoint.trim_end_matches('/'));
    let response = reqwest::Client::new()
        .post(&url)
        .json(&serde_json::json!({ "label": label }))
        .send()
        .await
        .map_err(|e| Error::Internal(format!("kds request failed: {e}")))?;

    if !response.status().is_success() {
        return Err(Error::Internal(format!("kds returned {}", response.status())));
    }

    let body: DeriveResponse = response
        .json()
        .await
        .map_err(|e| Error::Internal(format!("kds response malformed: {e}")))?;

    let raw = hex::decode(&body.key)
        .map_err(|_| Error::Internal("kds key is not valid hex".into()))?;
    raw.try_into().map_err(|_| Error::Internal("kds key is not 32 bytes".into()))
}
