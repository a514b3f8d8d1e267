//! Documentation collaborators and artifact rendering.

pub mod agents_log;
pub mod markdown;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::engine::artifacts::{AccomplishmentReport, AnalysisReport, CoordinationPlan};

pub use agents_log::AgentsLog;
pub use markdown::{render_accomplishment, render_analysis, render_plan};

/// Updates project documentation after a run.
#[async_trait]
pub trait DocsUpdater: Send + Sync {
    /// Returns a map of document name to a one-line description of what
    /// changed.
    async fn update(
        &self,
        analysis: &AnalysisReport,
        plan: &CoordinationPlan,
        accomplishment: &AccomplishmentReport,
    ) -> anyhow::Result<BTreeMap<String, String>>;
}

/// Text generation used only for human-readable prose, never for
/// scheduling decisions.
#[async_trait]
pub trait ProseWriter: Send + Sync {
    async fn write(&self, prompt: &str, context: &serde_json::Value) -> anyhow::Result<String>;
}

// Compile-time checks: both traits must be object-safe.
const _: () = {
    fn _assert_docs_object_safe(_: &dyn DocsUpdater) {}
    fn _assert_prose_object_safe(_: &dyn ProseWriter) {}
};
