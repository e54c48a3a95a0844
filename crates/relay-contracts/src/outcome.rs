//! What an agent run returns to its caller.

use serde::{Deserialize, Serialize};

use crate::agent::ExecutionId;

/// Why an agent loop stopped iterating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The numeric `max_loops` bound was reached.
    MaxLoops,
    /// The configured stopping condition matched a response.
    StoppingCondition,
    /// The interactive reviewer asked the loop to stop.
    UserStopped,
    /// The cancel signal fired (flag or deadline). The response is the best
    /// one accepted before cancellation, not the one that was in flight.
    Cancelled,
}

/// The result of one agent run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub execution_id: ExecutionId,
    /// The final accepted response. Empty when the run was cancelled before
    /// the first invocation completed.
    pub response: String,
    pub loops_completed: u32,
    pub termination: Termination,
}

impl RunOutcome {
    pub fn is_cancelled(&self) -> bool {
        self.termination == Termination::Cancelled
    }
}
