//! Offline, deterministic model for the demo.
//!
//! Every response is derived from the prompt alone: the latest user turn
//! and how many assistant turns precede it. The same prompt always yields
//! the same text.

use std::sync::atomic::{AtomicU32, Ordering};

use relay_contracts::{
    config::{GenerationParams, StopCondition},
    error::ProviderFailure,
};
use relay_core::ModelInvoker;

const HEADLINE_CHARS: usize = 72;

pub struct CannedInvoker {
    label: String,
    /// Append the done token once this many revisions exist.
    done_after: Option<usize>,
    /// Remaining calls that fail before the model "recovers".
    failures_left: AtomicU32,
}

impl CannedInvoker {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            done_after: None,
            failures_left: AtomicU32::new(0),
        }
    }

    pub fn with_done_after(mut self, revisions: usize) -> Self {
        self.done_after = Some(revisions);
        self
    }

    /// Fail the first `calls` invocations, to exercise retries.
    pub fn with_flaky_start(self, calls: u32) -> Self {
        self.failures_left.store(calls, Ordering::SeqCst);
        self
    }
}

impl ModelInvoker for CannedInvoker {
    fn invoke(&self, prompt: &str, params: &GenerationParams) -> Result<String, ProviderFailure> {
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ProviderFailure::new(format!("{}: simulated timeout", self.label)));
        }

        let revision = prompt
            .lines()
            .filter(|line| line.starts_with("Assistant: "))
            .count()
            + 1;
        let task = prompt
            .lines()
            .rev()
            .find_map(|line| line.strip_prefix("User: "))
            .unwrap_or("(no task)");
        let headline: String = task.chars().take(HEADLINE_CHARS).collect();

        let mut response = format!(
            "[{} r{} t={:.2}] {}",
            self.label, revision, params.temperature, headline
        );
        if self.done_after.is_some_and(|n| revision >= n) {
            response.push(' ');
            response.push_str(StopCondition::DONE_TOKEN);
        }
        Ok(response)
    }
}
