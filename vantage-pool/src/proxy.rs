use rand::Rng;
use sha2::{Digest, Sha256};
use vantage_core::ProxyMode;
use vantage_docker::ProxyUpstream;

/// What the assignment is for. QR-auth assignments have no stable identity
/// yet, so bucketed mode picks their egress at random; sampling assignments
/// pin the user to a consistent bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignPurpose {
    Auth,
    Sampling,
}

/// Computes the upstream proxy for one assignment.
pub struct ProxySelector {
    mode: ProxyMode,
}

impl ProxySelector {
    pub fn new(mode: ProxyMode) -> Self {
        Self { mode }
    }

    pub fn select(&self, session_id: &str, purpose: AssignPurpose) -> ProxyUpstream {
        match &self.mode {
            ProxyMode::Rotating { host, port, user, pass } => {
                // A distinct session suffix gives each assignment its own
                // short-TTL upstream identity. The upstream rejects anything
                // outside [A-Za-z0-9-], so the suffix is digits only.
                let stamp = chrono::Utc::now().timestamp();
                let salt: u16 = rand::thread_rng().gen_range(0..10_000);
                ProxyUpstream {
                    host: host.clone(),
                    port: *port,
                    user: Some(sanitize(&format!("{user}-session-{stamp}{salt:04}"))),
                    pass: Some(pass.clone()),
                }
            }
            ProxyMode::Bucketed { host, port_base, count } => {
                let bucket = match purpose {
                    AssignPurpose::Auth => rand::thread_rng().gen_range(0..*count),
                    AssignPurpose::Sampling => stable_bucket(session_id, *count),
                };
                ProxyUpstream {
                    host: host.clone(),
                    port: port_base + bucket,
                    user: None,
                    pass: None,
                }
            }
        }
    }
}

/// Deterministic bucket for a session id, stable across assignments.
fn stable_bucket(session_id: &str, count: u16) -> u16 {
    let digest = Sha256::digest(session_id.as_bytes());
    let word = u16::from_be_bytes([digest[0], digest[1]]);
    word % count.max(1)
}

fn sanitize(username: &str) -> String {
    username.chars().filter(|c| c.is_ascii_alphanumeric() || *c == '-').collect()
}
