//! Sequential multi-agent workflow.
//!
//! Tasks run strictly in insertion order. Each task's result becomes the
//! next task's prior input; with several passes, the last task's result
//! feeds the first task of the following pass.

use std::{num::NonZeroU32, sync::Arc};

use chrono::Utc;
use tracing::{debug, info, warn};

use relay_contracts::{
    error::{RelayError, RelayResult},
    outcome::RunOutcome,
    task::{InputMode, TaskSnapshot, TaskStatus},
};
use relay_core::CancelSignal;

use crate::task::{AgentRef, Task, TaskView};

/// How a workflow run ended, when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowOutcome {
    /// Every task of every pass completed. `result` is the last task's.
    Completed { result: String },
    /// The cancel signal fired while task `index` was running. Its partial
    /// result is recorded; later tasks did not run.
    Cancelled { index: usize },
}

/// An ordered pipeline of agent-bound tasks.
#[derive(Debug)]
pub struct SequentialWorkflow {
    name: String,
    tasks: Vec<Task>,
    max_loops: NonZeroU32,
}

impl SequentialWorkflow {
    /// An empty workflow that runs one pass.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tasks: Vec::new(),
            max_loops: NonZeroU32::MIN,
        }
    }

    /// Number of passes over the task list. Zero is clamped to one.
    pub fn with_max_loops(mut self, passes: u32) -> Self {
        self.max_loops = NonZeroU32::new(passes).unwrap_or(NonZeroU32::MIN);
        self
    }

    /// Append a task that receives its predecessor's result after its own
    /// description.
    pub fn add(&mut self, description: impl Into<String>, agent: AgentRef) -> &mut Self {
        self.add_with(description, agent, InputMode::Append)
    }

    pub fn add_with(&mut self, description: impl Into<String>, agent: AgentRef, mode: InputMode) -> &mut Self {
        self.tasks.push(Task::new(description, agent, mode));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_loops(&self) -> NonZeroU32 {
        self.max_loops
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Progress of every task, in execution order.
    pub fn tasks(&self) -> impl Iterator<Item = TaskView<'_>> {
        self.tasks.iter().map(Task::view)
    }

    /// Owned copies of every task, for reporting.
    pub fn snapshot(&self) -> Vec<TaskSnapshot> {
        self.tasks
            .iter()
            .enumerate()
            .map(|(index, task)| task.snapshot(index))
            .collect()
    }

    /// The last task's result, once it has one.
    pub fn final_result(&self) -> Option<&str> {
        self.tasks.last().and_then(Task::result)
    }

    /// Reject an empty workflow, a task that cannot build its input, or a
    /// task whose agent would refuse to run.
    ///
    /// Each distinct agent is locked once and checked with
    /// [`Flow::validate_config`](relay_core::Flow::validate_config). A
    /// poisoned agent is `AgentUnavailable`.
    pub fn validate(&self) -> RelayResult<()> {
        if self.tasks.is_empty() {
            return Err(RelayError::ConfigError {
                reason: format!("workflow '{}' has no tasks", self.name),
            });
        }
        self.tasks.iter().try_for_each(Task::validate)?;

        let mut checked: Vec<&AgentRef> = Vec::new();
        for (index, task) in self.tasks.iter().enumerate() {
            if checked.iter().any(|agent| Arc::ptr_eq(*agent, &task.agent)) {
                continue;
            }
            checked.push(&task.agent);

            let flow = task.agent.lock().map_err(|_| RelayError::AgentUnavailable {
                reason: format!("agent for task {} was poisoned by a panicked run", index),
            })?;
            flow.validate_config().map_err(|e| match e {
                RelayError::ConfigError { reason } => RelayError::ConfigError {
                    reason: format!("task {} ('{}'): {}", index, task.description, reason),
                },
                other => other,
            })?;
        }
        Ok(())
    }

    // ── Running ──────────────────────────────────────────────────────────────

    pub fn run(&mut self) -> RelayResult<WorkflowOutcome> {
        self.run_with_cancel(&CancelSignal::new())
    }

    /// Execute every task in order, `max_loops` times over.
    ///
    /// All tasks are reset to `Pending` first.
    ///
    /// # Errors
    ///
    /// - `ConfigError` for an empty workflow, an invalid task, or a
    ///   misconfigured agent, before any agent runs
    /// - `AgentUnavailable` when an agent was poisoned before the run
    /// - `WorkflowError` wrapping the first agent failure, together with a
    ///   snapshot of every task at that point. Tasks after the failed one
    ///   keep whatever state the previous pass left them in (`Pending` with
    ///   no result on the first pass).
    pub fn run_with_cancel(&mut self, cancel: &CancelSignal) -> RelayResult<WorkflowOutcome> {
        self.validate()?;

        for task in &mut self.tasks {
            task.reset();
        }

        info!(
            workflow = %self.name,
            tasks = self.tasks.len(),
            passes = self.max_loops.get(),
            "workflow starting"
        );

        let mut prior: Option<String> = None;

        for pass in 1..=self.max_loops.get() {
            debug!(workflow = %self.name, pass, "workflow pass starting");

            for index in 0..self.tasks.len() {
                let outcome = self.run_task(index, pass, prior.as_deref(), cancel);

                match outcome {
                    Ok(outcome) => {
                        let cancelled = outcome.is_cancelled();
                        prior = Some(outcome.response);
                        if cancelled {
                            warn!(workflow = %self.name, task_index = index, pass, "workflow cancelled");
                            return Ok(WorkflowOutcome::Cancelled { index });
                        }
                    }
                    Err(source) => {
                        warn!(
                            workflow = %self.name,
                            task_index = index,
                            pass,
                            error = %source,
                            "workflow halted on task failure"
                        );
                        return Err(RelayError::WorkflowError {
                            index,
                            task: self.tasks[index].description.clone(),
                            source: Box::new(source),
                            partial: self.snapshot(),
                        });
                    }
                }
            }
        }

        info!(workflow = %self.name, "workflow completed");
        Ok(WorkflowOutcome::Completed {
            result: prior.unwrap_or_default(),
        })
    }

    /// Run task `index` and record its status and result.
    fn run_task(
        &mut self,
        index: usize,
        pass: u32,
        prior: Option<&str>,
        cancel: &CancelSignal,
    ) -> RelayResult<RunOutcome> {
        let task = &mut self.tasks[index];
        let input = task.effective_input(prior);

        task.status = TaskStatus::Running;
        task.started_at = Some(Utc::now());
        task.finished_at = None;

        debug!(
            workflow = %self.name,
            task_index = index,
            pass,
            input_chars = input.len(),
            "task starting"
        );

        let result = task
            .agent
            .lock()
            .map_err(|_| RelayError::AgentUnavailable {
                reason: format!("agent for task {} was poisoned by a panicked run", index),
            })
            .and_then(|mut flow| flow.run_with_cancel(&input, cancel));

        task.finished_at = Some(Utc::now());
        match &result {
            Ok(outcome) => {
                task.status = TaskStatus::Completed;
                task.result = Some(outcome.response.clone());
                info!(
                    workflow = %self.name,
                    task_index = index,
                    pass,
                    loops = outcome.loops_completed,
                    "task completed"
                );
            }
            Err(_) => {
                task.status = TaskStatus::Failed;
                task.result = None;
            }
        }
        result
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
