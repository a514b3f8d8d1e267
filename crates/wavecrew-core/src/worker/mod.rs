//! Worker processes: configuration, registry, metrics and supervision.
//!
//! # Architecture
//!
//! ```text
//! WorkerRegistry (team.json / team.toml)
//!     |
//!     v
//! WorkerConfig --> WorkerSupervisor --start()--> subprocess (stdin/stdout/stderr)
//!                        |
//!                        +-- list_tools(timeout) / execute_task(task) / stop()
//!                        +-- WorkerMetrics
//!                        +-- Hub ("workers" channel)
//! ```

pub mod config;
pub mod metrics;
pub mod supervisor;
pub mod task;

pub use config::{RegistryError, WorkerConfig, WorkerEntry, WorkerKind, WorkerRegistry, expand_env_vars};
pub use metrics::{MetricsSnapshot, WorkerMetrics};
pub use supervisor::{SupervisorError, SupervisorOptions, SupervisorState, WorkerSupervisor};
pub use task::{CompletionKind, TaskOutcome, TaskRequest, TestCounts};
