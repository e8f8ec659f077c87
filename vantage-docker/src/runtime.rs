use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;
use vantage_core::{ContainerId, Result};

/// Upstream proxy credentials posted to a container's control endpoint.
///
/// `user`/`pass` are absent for unauthenticated bucket endpoints. The
/// in-container relay switches atomically from passthrough to this upstream.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProxyUpstream {
    pub host: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pass: Option<String>,
}

/// Everything the driver needs to create one browser container.
#[derive(Debug, Clone)]
pub struct CreateSpec {
    pub name: String,
    pub image: String,
    pub network: String,
    pub env: Vec<String>,
    pub labels: HashMap<String, String>,
    /// Memory cap in bytes; unlimited when absent.
    pub memory_bytes: Option<i64>,
    /// CPU quota in units of 1e-9 CPUs; unlimited when absent.
    pub nano_cpus: Option<i64>,
}

/// Operations the pool manager needs from a container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create and start a container. Returns once the container's internal
    /// supervisor is running; DevTools readiness is checked separately via
    /// [`ContainerRuntime::wait_ready`].
    async fn create(&self, spec: &CreateSpec) -> Result<ContainerId>;

    /// The container's address on the configured network.
    async fn inspect_ip(&self, id: &ContainerId) -> Result<String>;

    /// Poll the DevTools version endpoint until it answers or the retry
    /// budget is exhausted.
    async fn wait_ready(&self, ip: &str, max_tries: u32) -> Result<()>;

    /// Post upstream proxy credentials to the in-container control endpoint.
    async fn configure_proxy(&self, ip: &str, upstream: &ProxyUpstream) -> Result<()>;

    /// Force-remove. Idempotent: removing an unknown container succeeds.
    async fn destroy(&self, id: &ContainerId) -> Result<()>;

    /// All containers labeled as belonging to a previous service instance.
    async fn list_orphans(&self, label: &str) -> Result<Vec<ContainerId>>;
}
