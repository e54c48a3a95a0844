//! Runtime error types for the Relay agent runtime.
//!
//! All fallible operations in Relay return `RelayResult<T>`. Variants carry
//! enough context (task index, loop index, file path) to diagnose a failure
//! without re-running it.

use thiserror::Error;

use crate::task::TaskSnapshot;

/// The unified error type for the Relay runtime.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Invalid agent or workflow setup. Raised before any model call and
    /// never retried.
    #[error("configuration error: {reason}")]
    ConfigError { reason: String },

    /// The model invoker kept failing after the full retry budget was spent.
    #[error("provider failed on loop {loop_index} after {attempts} attempt(s): {reason}")]
    ProviderError {
        loop_index: u32,
        attempts: u32,
        reason: String,
    },

    /// A persisted state document does not match the expected schema.
    ///
    /// The live agent state is left untouched when this is returned.
    #[error("failed to decode state '{path}': {reason}")]
    DeserializationError { path: String, reason: String },

    /// The persistence medium could not be read or written.
    #[error("i/o error on '{path}': {reason}")]
    IoError { path: String, reason: String },

    /// The host-supplied reviewer failed while the loop was suspended.
    #[error("interaction failed: {reason}")]
    InteractionError { reason: String },

    /// A shared agent could not be acquired (its lock was poisoned by a
    /// panicking holder).
    #[error("agent unavailable: {reason}")]
    AgentUnavailable { reason: String },

    /// A workflow task failed. Later tasks were not executed.
    #[error("workflow task {index} ('{task}') failed: {source}")]
    WorkflowError {
        index: usize,
        task: String,
        #[source]
        source: Box<RelayError>,
        /// Every task of the workflow as it stood when the failure halted it.
        partial: Vec<TaskSnapshot>,
    },
}

/// A single failed call reported by a model invoker.
///
/// The agent loop retries these; only when the retry budget is exhausted
/// does the last one surface as `RelayError::ProviderError`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct ProviderFailure {
    pub reason: String,
}

impl ProviderFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Convenience alias used throughout the Relay crates.
pub type RelayResult<T> = Result<T, RelayError>;
