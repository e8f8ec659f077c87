//! Authenticated encryption for credential bundles.
//!
//! The rest of the service treats bundles as opaque blobs; this crate is the
//! only place that knows how they are sealed. Keys come from one of two
//! sources: the platform's attestation-bound key-derivation service, or a
//! SHA-256 digest of an operator-provided seed when no platform key is
//! available. Decryption tries the active key first and then the fallback
//! key, so data sealed before a platform key appeared stays readable.

mod kds;

use aes_gcm::aead::{Aead, AeadCore, OsRng};
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use sha2::{Digest, Sha256};
use vantage_core::{Config, Error, Result};

pub use kds::fetch_platform_key;

/// Label passed to the platform key-derivation service. Fixed so the same
/// attested workload always derives the same key.
pub const KDF_LABEL: &str = "session-encryption";

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Seals and opens credential bundles.
///
/// Wire format: `hex(nonce ‖ tag ‖ ciphertext)` with a 96-bit fresh random
/// nonce and a 128-bit authentication tag per call.
pub struct SessionCipher {
    active: Aes256Gcm,
    fallback: Option<Aes256Gcm>,
    platform: bool,
}

impl SessionCipher {
    /// Build the cipher from configuration, contacting the platform KDS when
    /// it is available.
    ///
    /// Startup fails when neither a platform key nor a fallback seed exists.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let fallback = config.fallback_seed.as_deref().map(seed_key);

        if config.platform_key_available {
            if let Some(endpoint) = config.kds_endpoint.as_deref() {
                match fetch_platform_key(endpoint, KDF_LABEL).await {
                    Ok(key) => {
                        tracing::info!("session cipher using platform-derived key");
                        return Ok(Self::from_keys(key, fallback, true));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "platform key derivation unavailable, falling back");
                    }
                }
            }
        }

        let seed_derived = fallback.ok_or_else(|| {
            Error::Internal("SESSION_KEY_SEED is required when no platform key is available".into())
        })?;
        tracing::info!("session cipher using seed-derived fallback key");
        Ok(Self::from_keys(seed_derived, None, false))
    }

    /// Cipher with an explicit 32-byte key, plus an optional fallback key.
    pub fn from_keys(active: [u8; 32], fallback: Option<[u8; 32]>, platform: bool) -> Self {
        Self {
            active: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&active)),
            fallback: fallback.map(|k| Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&k))),
            platform,
        }
    }

    /// Cipher derived purely from an operator seed.
    pub fn from_seed(seed: &str) -> Self {
        Self::from_keys(seed_key(seed), None, false)
    }

    /// Whether the active key came from the platform attestation path.
    pub fn is_platform_key(&self) -> bool {
        self.platform
    }

    /// Seal a plaintext. Fresh nonce on every call, so two encryptions of the
    /// same plaintext never produce equal ciphertexts.
    pub fn encrypt(&self, plaintext: &[u8]) -> String {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        // aes-gcm appends the tag to the ciphertext; re-frame as nonce‖tag‖ct.
        let sealed = self.active.encrypt(&nonce, plaintext).expect("aes-gcm encryption");
        let (ct, tag) = sealed.split_at(sealed.len() - TAG_LEN);

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(tag);
        out.extend_from_slice(ct);
        hex::encode(out)
    }

    /// Open a sealed blob, trying the active key and then the fallback key.
    pub fn decrypt(&self, sealed_hex: &str) -> Result<Vec<u8>> {
        let raw = hex::decode(sealed_hex)
            .map_err(|_| Error::BadCiphertext("not valid hex".into()))?;
        if raw.len() < NONCE_LEN + TAG_LEN {
            return Err(Error::BadCiphertext("too short".into()));
        }
        let nonce = Nonce::from_slice(&raw[..NONCE_LEN]);
        let tag = &raw[NONCE_LEN..NONCE_LEN + TAG_LEN];
        let ct = &raw[NONCE_LEN + TAG_LEN..];

        // aes-gcm wants ct‖tag back.
        let mut sealed = Vec::with_capacity(ct.len() + TAG_LEN);
        sealed.extend_from_slice(ct);
        sealed.extend_from_slice(tag);

        if let Ok(plain) = self.active.decrypt(nonce, sealed.as_slice()) {
            return Ok(plain);
        }
        if let Some(fallback) = &self.fallback {
            if let Ok(plain) = fallback.decrypt(nonce, sealed.as_slice()) {
                return Ok(plain);
            }
        }
        Err(Error::BadCiphertext("authentication failed under every key".into()))
    }
}

/// 32-byte key from an operator seed.
fn seed_key(seed: &str) -> [u8; 32] {
    Sha256::digest(seed.as_bytes()).into()
}
