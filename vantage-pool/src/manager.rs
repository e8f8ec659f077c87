use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::future::join_all;
use vantage_core::{Config, ContainerId, Error, Result};
use vantage_docker::{ContainerRuntime, CreateSpec, ProxyUpstream};

use crate::proxy::{AssignPurpose, ProxySelector};
use crate::record::{ContainerInfo, ContainerRecord, ContainerStatus, PoolStats};

/// All mutable pool state, guarded by one lock.
///
/// The lock is held only for map and list operations; container creation,
/// destruction, and proxy configuration all happen outside it.
#[derive(Default)]
struct PoolState {
    containers: HashMap<ContainerId, ContainerRecord>,
    /// Ids of `Pooled` containers, popped LIFO on assignment.
    warm: Vec<ContainerId>,
    /// session id → container id. At most one container per session.
    by_session: HashMap<String, ContainerId>,
}

/// Owns every live browser container and its lifecycle.
pub struct PoolManager {
    state: Mutex<PoolState>,
    runtime: Arc<dyn ContainerRuntime>,
    config: Arc<Config>,
    selector: ProxySelector,
    /// Reentrancy guard: a maintenance tick that finds the previous one still
    /// in flight skips instead of double-creating.
    refilling: AtomicBool,
    creations: AtomicU64,
    create_failures: AtomicU64,
    swept: AtomicU64,
}

impl PoolManager {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: Arc<Config>) -> Self {
        let selector = ProxySelector::new(config.proxy.clone());
        Self {
            state: Mutex::new(PoolState::default()),
            runtime,
            config,
            selector,
            refilling: AtomicBool::new(false),
            creations: AtomicU64::new(0),
            create_failures: AtomicU64::new(0),
            swept: AtomicU64::new(0),
        }
    }

    /// Hand a container to `session_id`, configuring its egress on the way.
    ///
    /// Idempotent per session: a second assign with the same id returns the
    /// already-assigned container. When the warm pool is empty this fails
    /// fast with `AtCapacity`; creation on the assign path would pin the
    /// caller for tens of seconds and hide the capacity signal.
    pub async fn assign(&self, session_id: &str, purpose: AssignPurpose) -> Result<ContainerRecord> {
        let record = {
            let mut state = self.state.lock().expect("pool lock");

            if let Some(existing) = state.by_session.get(session_id).cloned() {
                let record = state
                    .containers
                    .get_mut(&existing)
                    .ok_or_else(|| Error::internal("session map points at unknown container"))?;
                record.last_used_at = Instant::now();
                return Ok(record.clone());
            }

            let id = state.warm.pop().ok_or(Error::AtCapacity)?;
            let record = state
                .containers
                .get_mut(&id)
                .ok_or_else(|| Error::internal("warm pool points at unknown container"))?;
            record.status = ContainerStatus::Assigned;
            record.session_id = Some(session_id.to_string());
            record.last_used_at = Instant::now();
            let record = record.clone();
            state.by_session.insert(session_id.to_string(), id);
            record
        };

        let upstream = self.selector.select(session_id, purpose);
        if let Err(e) = self.runtime.configure_proxy(&record.ip, &upstream).await {
            // Revert: the container goes back to the warm pool untouched and
            // the session keeps no binding.
            let mut guard = self.state.lock().expect("pool lock");
            let state = &mut *guard;
            state.by_session.remove(session_id);
            if let Some(rec) = state.containers.get_mut(&record.id) {
                rec.status = ContainerStatus::Pooled;
                rec.session_id = None;
                state.warm.push(record.id.clone());
            }
            drop(guard);
            tracing::warn!(session = session_id, container = %record.id, error = %e, "proxy configuration failed, assignment reverted");
            return Err(e);
        }

        tracing::info!(session = session_id, container = %record.id, "container assigned");
        Ok(record)
    }

    /// Move a session's container to `Released`. The idle sweeper destroys it
    /// later; it never returns to the warm pool. No-op for unknown sessions.
    pub fn release(&self, session_id: &str) {
        let mut state = self.state.lock().expect("pool lock");
        if let Some(id) = state.by_session.remove(session_id) {
            if let Some(record) = state.containers.get_mut(&id) {
                record.status = ContainerStatus::Released;
                record.session_id = None;
                record.last_used_at = Instant::now();
                tracing::info!(session = session_id, container = %id, "container released");
            }
        }
    }

    /// Destroy a session's container outright. Used after auth flows so no
    /// login state survives the session. No-op for unknown sessions.
    pub async fn recycle(&self, session_id: &str) -> Result<()> {
        let id = {
            let mut state = self.state.lock().expect("pool lock");
            let Some(id) = state.by_session.remove(session_id) else {
                return Ok(());
            };
            state.containers.remove(&id);
            id
        };
        tracing::info!(session = session_id, container = %id, "container recycled");
        self.runtime.destroy(&id).await
    }

    /// Administrative destroy by container id. No-op for unknown containers.
    pub async fn destroy(&self, container_id: &ContainerId) -> Result<()> {
        {
            let mut state = self.state.lock().expect("pool lock");
            state.containers.remove(container_id);
            state.warm.retain(|id| id != container_id);
            state.by_session.retain(|_, id| id != container_id);
        }
        self.runtime.destroy(container_id).await
    }

    /// Create one container and add it to the warm pool. Used by the
    /// maintenance loop and the operator create endpoint.
    pub async fn create_container(&self, upstream: Option<&ProxyUpstream>) -> Result<ContainerRecord> {
        let record = self.provision().await?;
        if let Some(upstream) = upstream {
            if let Err(e) = self.runtime.configure_proxy(&record.ip, upstream).await {
                self.destroy(&record.id).await.ok();
                return Err(e);
            }
        }
        Ok(record)
    }

    /// Number of containers ready for immediate assignment.
    pub fn pool_size(&self) -> usize {
        self.state.lock().expect("pool lock").warm.len()
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock().expect("pool lock");
        let mut stats = PoolStats { total: state.containers.len(), ..Default::default() };
        for record in state.containers.values() {
            match record.status {
                ContainerStatus::Pooled => stats.pooled += 1,
                ContainerStatus::Assigned => stats.assigned += 1,
                ContainerStatus::Released => stats.released += 1,
            }
        }
        stats.sessions = state.by_session.len();
        stats
    }

    pub fn list(&self) -> Vec<ContainerInfo> {
        let state = self.state.lock().expect("pool lock");
        let mut infos: Vec<_> = state.containers.values().map(ContainerRecord::info).collect();
        infos.sort_by(|a, b| a.container_id.as_str().cmp(b.container_id.as_str()));
        infos
    }

    /// Destroy all containers labeled by a previous instance. Runs before the
    /// pool enters service so stale browsers never linger.
    pub async fn cleanup_orphans(&self) -> Result<usize> {
        let orphans = self.runtime.list_orphans(&self.config.container_label).await?;
        let count = orphans.len();
        for id in orphans {
            if let Err(e) = self.runtime.destroy(&id).await {
                tracing::warn!(container = %id, error = %e, "orphan destroy failed");
            }
        }
        if count > 0 {
            tracing::info!(count, "orphan containers cleaned up");
        }
        Ok(count)
    }

    /// One maintenance pass: refill the warm pool up to the configured
    /// minimum, creating the whole deficit in parallel. Skips when a previous
    /// pass is still running.
    pub async fn run_maintenance(&self) {
        if self.refilling.swap(true, Ordering::SeqCst) {
            tracing::debug!("maintenance tick skipped, previous refill still in flight");
            return;
        }

        let deficit = self.config.pool_min_size.saturating_sub(self.pool_size());
        if deficit > 0 {
            tracing::info!(deficit, "refilling warm pool");
            let outcomes = join_all((0..deficit).map(|_| self.provision())).await;
            let failures = outcomes.iter().filter(|r| r.is_err()).count();
            if failures > 0 {
                tracing::warn!(failures, deficit, "some pool creations failed");
            }
        }

        self.refilling.store(false, Ordering::SeqCst);
    }

    /// One sweeper pass: destroy `Released` containers idle past the timeout.
    /// `Pooled` containers are never idle-swept.
    pub async fn sweep_released(&self) {
        let expired: Vec<ContainerId> = {
            let mut state = self.state.lock().expect("pool lock");
            let idle_timeout = self.config.released_idle_timeout;
            let expired: Vec<ContainerId> = state
                .containers
                .values()
                .filter(|r| {
                    r.status == ContainerStatus::Released && r.last_used_at.elapsed() > idle_timeout
                })
                .map(|r| r.id.clone())
                .collect();
            for id in &expired {
                state.containers.remove(id);
            }
            expired
        };

        for id in expired {
            self.swept.fetch_add(1, Ordering::Relaxed);
            tracing::info!(container = %id, "idle released container destroyed");
            if let Err(e) = self.runtime.destroy(&id).await {
                tracing::warn!(container = %id, error = %e, "sweep destroy failed");
            }
        }
    }

    /// Destroy every container. Shutdown path.
    pub async fn shutdown(&self) {
        let ids: Vec<ContainerId> = {
            let mut state = self.state.lock().expect("pool lock");
            state.warm.clear();
            state.by_session.clear();
            state.containers.drain().map(|(id, _)| id).collect()
        };
        for id in ids {
            self.runtime.destroy(&id).await.ok();
        }
    }

    /// Spawn the periodic maintenance loop.
    pub fn spawn_maintenance(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let pool = Arc::clone(self);
        let tick = pool.config.maintenance_tick;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            loop {
                interval.tick().await;
                pool.run_maintenance().await;
            }
        })
    }

    /// Spawn the periodic released-container sweeper.
    pub fn spawn_released_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let pool = Arc::clone(self);
        let tick = pool.config.container_sweep_tick;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            loop {
                interval.tick().await;
                pool.sweep_released().await;
            }
        })
    }

    /// Create, address, and readiness-check one container, then register it
    /// as `Pooled`. Partial state is destroyed on any failure.
    async fn provision(&self) -> Result<ContainerRecord> {
        let name = format!("vantage-browser-{}", &uuid::Uuid::new_v4().simple().to_string()[..12]);
        let mut labels = HashMap::new();
        labels.insert(self.config.container_label.clone(), "1".to_string());

        let spec = CreateSpec {
            name,
            image: self.config.container_image.clone(),
            network: self.config.container_network.clone(),
            env: Vec::new(),
            labels,
            memory_bytes: Some(self.config.container_memory_mb * 1024 * 1024),
            nano_cpus: Some((self.config.container_cpus * 1e9) as i64),
        };

        let id = match tokio::time::timeout(self.config.create_timeout, self.runtime.create(&spec))
            .await
        {
            Ok(Ok(id)) => id,
            Ok(Err(e)) => {
                self.create_failures.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
            Err(_) => {
                self.create_failures.fetch_add(1, Ordering::Relaxed);
                return Err(Error::ContainerCreationFailed(format!(
                    "timed out after {:?}",
                    self.config.create_timeout
                )));
            }
        };

        let ip = match self.runtime.inspect_ip(&id).await {
            Ok(ip) => ip,
            Err(e) => {
                self.create_failures.fetch_add(1, Ordering::Relaxed);
                self.runtime.destroy(&id).await.ok();
                return Err(e);
            }
        };

        if let Err(e) = self.runtime.wait_ready(&ip, self.config.ready_max_tries).await {
            // A container that never answers on DevTools is destroyed and
            // never enters any registry.
            self.create_failures.fetch_add(1, Ordering::Relaxed);
            self.runtime.destroy(&id).await.ok();
            return Err(e);
        }

        let record = ContainerRecord::new(id.clone(), ip, self.config.devtools_port);
        {
            let mut state = self.state.lock().expect("pool lock");
            state.containers.insert(id.clone(), record.clone());
            state.warm.push(id);
        }
        self.creations.fetch_add(1, Ordering::Relaxed);
        tracing::info!(container = %record.id, ip = %record.ip, "container pooled");
        Ok(record)
    }
}
