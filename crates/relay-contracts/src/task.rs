//! Workflow task status and reporting types.
//!
//! The live `Task` (which holds a shared agent handle) lives in
//! `relay-workflow`; these are the plain-data parts it exposes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Placeholder a `Substitute` task description uses for the prior result.
pub const PREVIOUS_PLACEHOLDER: &str = "{{previous}}";

/// Lifecycle of a task within one workflow run.
///
/// `Pending → Running → {Completed | Failed}`. A task never returns to
/// `Pending` once started within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// How a task builds its effective input from its predecessor's result.
///
/// Example in TOML:
/// ```toml
/// input = "standalone"
/// input = "append"
/// input = "substitute"
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputMode {
    /// Run with the task's own description only.
    Standalone,
    /// Description, a blank line, then the prior result.
    #[default]
    Append,
    /// Replace every [`PREVIOUS_PLACEHOLDER`] in the description with the
    /// prior result.
    Substitute,
}

/// An owned, serializable copy of one task, for reporting and for the
/// partial results carried by a workflow error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub index: usize,
    pub description: String,
    pub agent_name: String,
    pub input_mode: InputMode,
    pub status: TaskStatus,
    pub result: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}
