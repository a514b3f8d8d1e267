//! Worker pool: builds supervisors from the registry, starts and stops them,
//! and routes tasks to a named worker.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::engine::dispatch::Dispatcher;
use crate::hub::Hub;
use crate::protocol::ToolDescriptor;
use crate::scope::WorkerTarget;
use crate::worker::{
    RegistryError, SupervisorError, SupervisorOptions, TaskOutcome, TaskRequest, WorkerConfig, WorkerRegistry,
    WorkerSupervisor,
};

/// Errors from pool operations.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("worker {0:?} not found in pool")]
    WorkerNotFound(String),

    #[error("worker {0:?} is no longer accepting tasks")]
    Closed(String),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Which workers came up in [`WorkerPool::start_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStartReport {
    pub started: Vec<String>,
    /// `(worker id, error message)`.
    pub failed: Vec<(String, String)>,
}

struct Member {
    supervisor: Arc<WorkerSupervisor>,
    permits: Semaphore,
    /// Tasks that entered `dispatch_task` and have not returned.
    load: AtomicUsize,
}

struct LoadGuard<'a>(&'a AtomicUsize);

impl<'a> LoadGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Owns one supervisor per enabled worker.
pub struct WorkerPool {
    hub: Arc<Hub>,
    members: BTreeMap<String, Member>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.members.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl WorkerPool {
    /// An empty pool.
    pub fn new(hub: Arc<Hub>) -> Self {
        Self {
            hub,
            members: BTreeMap::new(),
        }
    }

    /// Build a pool from every enabled registry entry.
    pub fn from_registry(registry: &WorkerRegistry, hub: Arc<Hub>, options: SupervisorOptions) -> Result<Self, PoolError> {
        let mut pool = Self::new(hub);
        for config in registry.enabled_configs()? {
            pool.add(config, options.clone());
        }
        info!(workers = pool.len(), "worker pool built from registry");
        Ok(pool)
    }

    /// Add a worker. Disabled configs are ignored; a config with an id
    /// already in the pool replaces the old entry.
    pub fn add(&mut self, config: WorkerConfig, options: SupervisorOptions) {
        if !config.enabled {
            return;
        }
        let id = config.id.clone();
        let permits = Semaphore::new(config.max_concurrent_tasks.max(1));
        let supervisor = Arc::new(WorkerSupervisor::with_options(config, Arc::clone(&self.hub), options));
        self.members.insert(
            id,
            Member {
                supervisor,
                permits,
                load: AtomicUsize::new(0),
            },
        );
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Worker ids in sorted order.
    pub fn worker_ids(&self) -> Vec<String> {
        self.members.keys().cloned().collect()
    }

    pub fn get(&self, worker_id: &str) -> Option<&Arc<WorkerSupervisor>> {
        self.members.get(worker_id).map(|m| &m.supervisor)
    }

    fn member(&self, worker_id: &str) -> Result<&Member, PoolError> {
        self.members
            .get(worker_id)
            .ok_or_else(|| PoolError::WorkerNotFound(worker_id.to_string()))
    }

    /// Start every worker. One worker failing to start does not stop the
    /// others; the failure has already been broadcast by its supervisor.
    pub async fn start_all(&self) -> PoolStartReport {
        let results = join_all(self.members.iter().map(|(id, member)| async move {
            (id.clone(), member.supervisor.start().await)
        }))
        .await;

        let mut report = PoolStartReport::default();
        for (id, result) in results {
            match result {
                Ok(()) => report.started.push(id),
                Err(e) => {
                    warn!(worker_id = %id, error = %e, "worker failed to start, continuing without it");
                    report.failed.push((id, e.to_string()));
                }
            }
        }
        info!(started = report.started.len(), failed = report.failed.len(), "worker pool started");
        report
    }

    /// Stop every worker.
    pub async fn stop_all(&self) {
        let results = join_all(self.members.values().map(|m| m.supervisor.stop())).await;
        for (id, result) in self.members.keys().zip(results) {
            if let Err(e) = result {
                warn!(worker_id = %id, error = %e, "error stopping worker");
            }
        }
        info!(workers = self.members.len(), "worker pool stopped");
    }

    pub async fn stop_worker(&self, worker_id: &str) -> Result<(), PoolError> {
        self.member(worker_id)?.supervisor.stop().await?;
        Ok(())
    }

    pub async fn list_tools(&self, worker_id: &str, timeout: Duration) -> Result<Vec<ToolDescriptor>, PoolError> {
        Ok(self.member(worker_id)?.supervisor.list_tools(timeout).await?)
    }

    /// Run `task` on the named worker, waiting for a concurrency slot first.
    pub async fn dispatch_task(&self, worker_id: &str, task: TaskRequest) -> Result<TaskOutcome, PoolError> {
        let member = self.member(worker_id)?;
        let _load = LoadGuard::enter(&member.load);
        let _permit = member
            .permits
            .acquire()
            .await
            .map_err(|_| PoolError::Closed(worker_id.to_string()))?;
        Ok(member.supervisor.execute_task(task).await?)
    }

    /// Tasks currently queued or running on a worker.
    pub fn load(&self, worker_id: &str) -> usize {
        self.members
            .get(worker_id)
            .map(|m| m.load.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Pick the running worker matching `target` with the most spare
    /// capacity; ties go to the lowest id.
    pub fn route(&self, target: &WorkerTarget) -> Option<String> {
        self.members
            .iter()
            .filter(|(_, m)| m.supervisor.is_running())
            .filter(|(_, m)| match target {
                WorkerTarget::Auto => true,
                WorkerTarget::Kind(kind) => m.supervisor.config().kind == *kind,
            })
            .map(|(id, m)| {
                let capacity = m.supervisor.config().max_concurrent_tasks as i64;
                (id, capacity - m.load.load(Ordering::SeqCst) as i64)
            })
            .fold(None::<(&String, i64)>, |best, (id, spare)| match best {
                Some((_, best_spare)) if best_spare >= spare => best,
                _ => Some((id, spare)),
            })
            .map(|(id, _)| id.clone())
    }
}

#[async_trait]
impl Dispatcher for WorkerPool {
    fn route(&self, target: &WorkerTarget) -> Option<String> {
        WorkerPool::route(self, target)
    }

    async fn dispatch(&self, worker_id: &str, task: TaskRequest) -> anyhow::Result<TaskOutcome> {
        Ok(self.dispatch_task(worker_id, task).await?)
    }

    async fn halt(&self, worker_ids: &[String]) {
        let stops = worker_ids.iter().map(|id| async move {
            if let Err(e) = self.stop_worker(id).await {
                warn!(worker_id = %id, error = %e, "failed to halt worker");
            }
        });
        join_all(stops).await;
    }
}
