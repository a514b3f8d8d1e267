//! The seam between the phase engine and whatever runs tasks.

use async_trait::async_trait;

use crate::scope::WorkerTarget;
use crate::worker::{TaskOutcome, TaskRequest};

/// Routes objectives to workers and runs them.
///
/// [`WorkerPool`](crate::pool::WorkerPool) is the production implementation.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Pick a worker for `target`, or `None` when nothing suitable is running.
    fn route(&self, target: &WorkerTarget) -> Option<String>;

    /// Run `task` on `worker_id` and wait for its outcome. A worker-reported
    /// failure is `Ok` with `success == false`.
    async fn dispatch(&self, worker_id: &str, task: TaskRequest) -> anyhow::Result<TaskOutcome>;

    /// Stop the given workers; used when a run is cancelled mid-wave.
    async fn halt(&self, worker_ids: &[String]);
}

// Compile-time check: Dispatcher must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn Dispatcher) {}
};
