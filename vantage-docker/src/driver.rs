use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, ListContainersOptions,
    RemoveContainerOptions, StartContainerOptions,
};
use bollard::models::HostConfig;
use vantage_core::{ContainerId, Error, Result};

use crate::control::ControlPlaneClient;
use crate::runtime::{ContainerRuntime, CreateSpec, ProxyUpstream};

/// How long to wait for the in-container supervisor after `start`.
const SUPERVISOR_WAIT_TRIES: u32 = 30;

/// [`ContainerRuntime`] backed by the local Docker daemon.
pub struct DockerDriver {
    docker: Docker,
    control: ControlPlaneClient,
}

impl DockerDriver {
    /// Connect to the daemon over the given unix socket.
    pub fn connect(socket_path: &str, devtools_port: u16, control_port: u16) -> Result<Self> {
        let docker = Docker::connect_with_socket(socket_path, 120, bollard::API_DEFAULT_VERSION)
            .map_err(|e| Error::Internal(format!("docker connect: {e}")))?;
        Ok(Self { docker, control: ControlPlaneClient::new(devtools_port, control_port) })
    }

    async fn wait_supervisor(&self, id: &ContainerId) -> Result<()> {
        for _ in 0..SUPERVISOR_WAIT_TRIES {
            let inspect = self
                .docker
                .inspect_container(id.as_str(), None)
                .await
                .map_err(|e| Error::ContainerCreationFailed(format!("inspect: {e}")))?;
            let running =
                inspect.state.as_ref().and_then(|s| s.running).unwrap_or(false);
            if running {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        Err(Error::ContainerCreationFailed("supervisor never reported running".into()))
    }
}

#[async_trait]
impl ContainerRuntime for DockerDriver {
    async fn create(&self, spec: &CreateSpec) -> Result<ContainerId> {
        let config = ContainerConfig {
            image: Some(spec.image.clone()),
            env: Some(spec.env.clone()),
            labels: Some(spec.labels.clone()),
            host_config: Some(HostConfig {
                network_mode: Some(spec.network.clone()),
                memory: spec.memory_bytes,
                nano_cpus: spec.nano_cpus,
                ..Default::default()
            }),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions { name: spec.name.as_str(), platform: None }),
                config,
            )
            .await
            .map_err(|e| Error::ContainerCreationFailed(e.to_string()))?;

        let id = ContainerId::new(created.id);

        if let Err(e) = self
            .docker
            .start_container(id.as_str(), None::<StartContainerOptions<String>>)
            .await
        {
            // Partial state is destroyed here so a failed start never leaks
            // a stopped container into the daemon.
            let _ = self.destroy(&id).await;
            return Err(Error::ContainerCreationFailed(format!("start: {e}")));
        }

        if let Err(e) = self.wait_supervisor(&id).await {
            let _ = self.destroy(&id).await;
            return Err(e);
        }

        tracing::debug!(container = %id, image = %spec.image, "container created");
        Ok(id)
    }

    async fn inspect_ip(&self, id: &ContainerId) -> Result<String> {
        let inspect = self
            .docker
            .inspect_container(id.as_str(), None)
            .await
            .map_err(|e| Error::Internal(format!("inspect {id}: {e}")))?;

        // Pool containers sit on exactly one network, so the first endpoint
        // with an address is the right one.
        inspect
            .network_settings
            .and_then(|s| s.networks)
            .and_then(|networks| {
                networks.into_values().find_map(|endpoint| {
                    endpoint.ip_address.filter(|ip| !ip.is_empty())
                })
            })
            .ok_or_else(|| Error::Internal(format!("container {id} has no network address")))
    }

    async fn wait_ready(&self, ip: &str, max_tries: u32) -> Result<()> {
        self.control.wait_ready(ip, max_tries).await
    }

    async fn configure_proxy(&self, ip: &str, upstream: &ProxyUpstream) -> Result<()> {
        self.control.configure(ip, upstream).await
    }

    async fn destroy(&self, id: &ContainerId) -> Result<()> {
        match self
            .docker
            .remove_container(
                id.as_str(),
                Some(RemoveContainerOptions { force: true, ..Default::default() }),
            )
            .await
        {
            Ok(()) => Ok(()),
            // Removing an already-gone container is a no-op.
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(e) => Err(Error::Internal(format!("remove {id}: {e}"))),
        }
    }

    async fn list_orphans(&self, label: &str) -> Result<Vec<ContainerId>> {
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), vec![label.to_string()]);

        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions {
                all: true,
                filters,
                ..Default::default()
            }))
            .await
            .map_err(|e| Error::Internal(format!("list containers: {e}")))?;

        Ok(containers
            .into_iter()
            .filter_map(|c| c.id)
            .map(ContainerId::new)
            .collect())
    }
}
