//! Core of wavecrew: supervises coding-agent worker subprocesses, keeps
//! their file scopes exclusive within a wave, and drives an orchestration
//! run from request to accomplishment report.
//!
//! Leaf-first:
//!
//! - [`protocol`]: line-delimited JSON messages, framing and request correlation.
//! - [`worker`]: worker configuration, the registry file, and the per-process supervisor.
//! - [`hub`]: named broadcast channels for activity, metrics and progress.
//! - [`pool`]: one supervisor per registry entry, routing and concurrency limits.
//! - [`scope`]: scope validation, conflict deferral and wave grouping.
//! - [`analysis`]: codebase inventory, request classification and decomposition.
//! - [`engine`]: the phase engine and its progress event stream.
//! - [`store`], [`docs`], [`vcs`]: collaborators the engine writes through.

pub mod analysis;
pub mod docs;
pub mod engine;
pub mod hub;
pub mod pool;
pub mod protocol;
pub mod scope;
pub mod store;
pub mod vcs;
pub mod worker;
