//! Hook points a pipeline framework calls during one invocation.

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;

/// Identity of one run inside a pipeline invocation.
///
/// Frameworks start nested runs for sub-steps; only the run without a
/// parent is the invocation itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunInfo {
    /// This run
    pub run_id: Uuid,
    /// The run that started this one, if any
    pub parent_run_id: Option<Uuid>,
}

impl RunInfo {
    /// A new top-level run.
    pub fn root() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            parent_run_id: None,
        }
    }

    /// A new run nested under `parent`.
    pub fn child_of(parent: &RunInfo) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            parent_run_id: Some(parent.run_id),
        }
    }

    /// Whether this run is the invocation itself.
    pub fn is_root(&self) -> bool {
        self.parent_run_id.is_none()
    }
}

/// Callbacks around a pipeline invocation.
///
/// An error returned from a hook aborts the invocation.
#[async_trait]
pub trait InvocationHook: Send {
    /// A run is starting. Called before any pipeline work.
    async fn on_invocation_start(&mut self, run: &RunInfo) -> Result<()>;

    /// A model call finished. `llm_output` is its metadata, if it had any.
    async fn on_result(&mut self, run: &RunInfo, llm_output: Option<&Value>) -> Result<()>;

    /// A run finished successfully.
    async fn on_invocation_end(&mut self, run: &RunInfo) -> Result<()>;
}
