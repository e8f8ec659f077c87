use std::time::Instant;

use serde::Serialize;
use vantage_core::ContainerId;

/// Container lifecycle state.
///
/// ```text
/// (none) --create--> Pooled --assign--> Assigned --release--> Released --sweep--> gone
///                                           \--recycle--> gone
/// ```
/// `Pooled` containers leave only through explicit shrink or shutdown, never
/// through the idle sweeper; `Released` containers are time-expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Pooled,
    Assigned,
    Released,
}

/// One live container. `status == Assigned` iff `session_id` is set.
#[derive(Debug, Clone)]
pub struct ContainerRecord {
    pub id: ContainerId,
    pub ip: String,
    /// Base DevTools URL, e.g. `http://172.18.0.5:9222`.
    pub devtools_url: String,
    pub created_at: Instant,
    pub last_used_at: Instant,
    pub status: ContainerStatus,
    /// The credential- or auth-session owning this container while assigned.
    pub session_id: Option<String>,
}

impl ContainerRecord {
    pub fn new(id: ContainerId, ip: String, devtools_port: u16) -> Self {
        let now = Instant::now();
        let devtools_url = format!("http://{ip}:{devtools_port}");
        Self {
            id,
            ip,
            devtools_url,
            created_at: now,
            last_used_at: now,
            status: ContainerStatus::Pooled,
            session_id: None,
        }
    }

    /// Public view of this record for the containers listing.
    pub fn info(&self) -> ContainerInfo {
        ContainerInfo {
            container_id: self.id.clone(),
            ip: self.ip.clone(),
            cdp_url: self.devtools_url.clone(),
            status: self.status,
            session_id: self.session_id.clone(),
            age_secs: self.created_at.elapsed().as_secs(),
            idle_secs: self.last_used_at.elapsed().as_secs(),
        }
    }
}

/// Wire-friendly container summary.
#[derive(Debug, Clone, Serialize)]
pub struct ContainerInfo {
    #[serde(rename = "containerId")]
    pub container_id: ContainerId,
    pub ip: String,
    #[serde(rename = "cdpUrl")]
    pub cdp_url: String,
    pub status: ContainerStatus,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(rename = "ageSecs")]
    pub age_secs: u64,
    #[serde(rename = "idleSecs")]
    pub idle_secs: u64,
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct PoolStats {
    pub total: usize,
    pub pooled: usize,
    pub assigned: usize,
    pub released: usize,
    /// Sessions currently holding a container.
    pub sessions: usize,
}
