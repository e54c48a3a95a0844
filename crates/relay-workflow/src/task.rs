//! A single step of a sequential workflow.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use relay_contracts::{
    error::{RelayError, RelayResult},
    task::{InputMode, TaskSnapshot, TaskStatus, PREVIOUS_PLACEHOLDER},
};
use relay_core::Flow;

/// A flow shared between the tasks (and hosts) that drive it.
pub type AgentRef = Arc<Mutex<Flow>>;

/// Wrap `flow` so it can be bound to one or more tasks.
pub fn shared(flow: Flow) -> AgentRef {
    Arc::new(Mutex::new(flow))
}

/// One step of a workflow: a description bound to an agent.
#[derive(Debug)]
pub struct Task {
    pub(crate) description: String,
    pub(crate) agent: AgentRef,
    pub(crate) input_mode: InputMode,
    pub(crate) status: TaskStatus,
    pub(crate) result: Option<String>,
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) finished_at: Option<DateTime<Utc>>,
}

/// Read-only view of a task's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskView<'a> {
    pub description: &'a str,
    pub status: TaskStatus,
    pub result: Option<&'a str>,
}

impl Task {
    pub fn new(description: impl Into<String>, agent: AgentRef, input_mode: InputMode) -> Self {
        Self {
            description: description.into(),
            agent,
            input_mode,
            status: TaskStatus::Pending,
            result: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// Reject tasks that cannot build an input.
    pub fn validate(&self) -> RelayResult<()> {
        if self.input_mode == InputMode::Substitute && !self.description.contains(PREVIOUS_PLACEHOLDER) {
            return Err(RelayError::ConfigError {
                reason: format!(
                    "task '{}' substitutes the previous result but has no {} placeholder",
                    self.description, PREVIOUS_PLACEHOLDER
                ),
            });
        }
        Ok(())
    }

    /// The text handed to the agent, given the predecessor's result.
    ///
    /// With no predecessor, `Append` uses the description alone and
    /// `Substitute` replaces the placeholder with nothing.
    pub fn effective_input(&self, prior: Option<&str>) -> String {
        match (self.input_mode, prior) {
            (InputMode::Standalone, _) | (InputMode::Append, None) => self.description.clone(),
            (InputMode::Append, Some(prior)) => format!("{}\n\n{}", self.description, prior),
            (InputMode::Substitute, prior) => self
                .description
                .replace(PREVIOUS_PLACEHOLDER, prior.unwrap_or_default()),
        }
    }

    pub(crate) fn reset(&mut self) {
        self.status = TaskStatus::Pending;
        self.result = None;
        self.started_at = None;
        self.finished_at = None;
    }

    pub fn view(&self) -> TaskView<'_> {
        TaskView {
            description: &self.description,
            status: self.status,
            result: self.result.as_deref(),
        }
    }

    pub fn snapshot(&self, index: usize) -> TaskSnapshot {
        TaskSnapshot {
            index,
            description: self.description.clone(),
            agent_name: self.agent_name(),
            input_mode: self.input_mode,
            status: self.status,
            result: self.result.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }

    /// The bound agent's name. Readable even after a panicked run.
    pub fn agent_name(&self) -> String {
        match self.agent.lock() {
            Ok(flow) => flow.name().to_string(),
            Err(poisoned) => poisoned.into_inner().name().to_string(),
        }
    }

    pub fn agent(&self) -> &AgentRef {
        &self.agent
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn input_mode(&self) -> InputMode {
        self.input_mode
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn result(&self) -> Option<&str> {
        self.result.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use relay_contracts::config::AgentConfig;
    use relay_core::scripted::ScriptedInvoker;

    use super::*;

    fn task(description: &str, mode: InputMode) -> Task {
        let flow = Flow::new(Arc::new(ScriptedInvoker::repeating("x")), AgentConfig::new("a"));
        Task::new(description, shared(flow), mode)
    }

    #[test]
    fn test_append_joins_with_blank_line() {
        let t = task("review", InputMode::Append);
        assert_eq!(t.effective_input(Some("draft")), "review\n\ndraft");
        assert_eq!(t.effective_input(None), "review");
    }

    #[test]
    fn test_standalone_ignores_prior() {
        let t = task("summarize", InputMode::Standalone);
        assert_eq!(t.effective_input(Some("draft")), "summarize");
    }

    #[test]
    fn test_substitute_replaces_every_placeholder() {
        let t = task("Edit: {{previous}} / again: {{previous}}", InputMode::Substitute);
        assert_eq!(t.effective_input(Some("text")), "Edit: text / again: text");
        assert_eq!(t.effective_input(None), "Edit:  / again: ");
    }

    #[test]
    fn test_substitute_without_placeholder_is_invalid() {
        let t = task("Edit the article", InputMode::Substitute);
        assert!(matches!(t.validate(), Err(RelayError::ConfigError { .. })));
        task("Edit the article", InputMode::Append).validate().unwrap();
    }

    #[test]
    fn test_new_task_is_pending_and_snapshots_agent_name() {
        let t = task("write", InputMode::Append);
        let snapshot = t.snapshot(3);
        assert_eq!(snapshot.index, 3);
        assert_eq!(snapshot.status, TaskStatus::Pending);
        assert_eq!(snapshot.agent_name, "a");
        assert_eq!(snapshot.result, None);
    }
}
