//! Agent identity, transcript, and run-state types.
//!
//! `AgentState` is everything a `Flow` carries between iterations and
//! everything the state store persists. It is owned by exactly one flow.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::AgentConfig;

/// Unique identifier for a single `run` of an agent loop.
///
/// Appears on every log line emitted during that run and on the
/// `RunOutcome` returned to the caller. It is not persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionId(pub uuid::Uuid);

impl ExecutionId {
    /// Create a new, unique execution ID.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Who produced a turn of the transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The task text, or text supplied by a reviewer in interactive mode.
    User,
    /// A (filtered) model response.
    Assistant,
}

impl Role {
    /// The label used when the transcript is rendered into a prompt.
    pub fn label(self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

/// One entry of the transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

/// The full run state of one agent loop.
///
/// Mutated only by the owning flow's run and loop-control operations.
/// `load_state` replaces it wholesale or not at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    /// Ordered transcript. Turns are appended in strict loop order and never
    /// reordered; failed provider attempts are not recorded.
    pub history: Vec<Turn>,
    /// Model invocations completed in the current (or most recent) run.
    pub loop_count: u32,
    /// Temperature used by the most recent invocation.
    pub last_temperature: f64,
    /// The configuration snapshot the state was produced under.
    pub config: AgentConfig,
}

impl AgentState {
    /// A fresh state with an empty transcript.
    pub fn new(config: AgentConfig) -> Self {
        Self {
            history: Vec::new(),
            loop_count: 0,
            last_temperature: config.temperature,
            config,
        }
    }

    /// Iterate over the texts of all assistant turns, oldest first.
    pub fn assistant_turns(&self) -> impl Iterator<Item = &str> {
        self.history
            .iter()
            .filter(|t| t.role == Role::Assistant)
            .map(|t| t.text.as_str())
    }

    /// The most recent turn, if any.
    pub fn last_turn(&self) -> Option<&Turn> {
        self.history.last()
    }
}
