//! Bounded retry around a single model invocation.

use std::time::Duration;

use tracing::{debug, warn};

use relay_contracts::{
    config::GenerationParams,
    error::{RelayError, RelayResult},
};

use crate::{
    cancel::CancelSignal,
    traits::{ModelInvoker, Sleeper},
};

/// How many times to retry and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the initial attempt.
    pub retry_attempts: u32,
    pub retry_interval: Duration,
}

impl RetryPolicy {
    /// Total attempts, including the initial one.
    pub fn max_attempts(&self) -> u32 {
        self.retry_attempts.saturating_add(1)
    }
}

/// Result of a retried invocation that did not fail outright.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempted {
    Response(String),
    /// The cancel signal fired between attempts.
    Cancelled,
}

/// Call `invoker` until it succeeds, the budget runs out, or `cancel` fires.
///
/// Waits `retry_interval` between attempts but not after the last one.
///
/// # Errors
///
/// `ProviderError` carrying the last failure once `max_attempts()` calls
/// have failed.
pub fn invoke_with_retry(
    invoker: &dyn ModelInvoker,
    prompt: &str,
    params: &GenerationParams,
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    cancel: &CancelSignal,
    loop_index: u32,
) -> RelayResult<Attempted> {
    let max_attempts = policy.max_attempts();
    let mut attempt = 1u32;

    loop {
        debug!(loop_index, attempt, temperature = params.temperature, "invoking model");

        match invoker.invoke(prompt, params) {
            Ok(response) => return Ok(Attempted::Response(response)),
            Err(failure) => {
                warn!(
                    loop_index,
                    attempt,
                    max_attempts,
                    reason = %failure,
                    "model invocation failed"
                );

                if attempt >= max_attempts {
                    return Err(RelayError::ProviderError {
                        loop_index,
                        attempts: attempt,
                        reason: failure.reason,
                    });
                }
            }
        }

        sleeper.sleep(policy.retry_interval);
        if cancel.is_cancelled() {
            warn!(loop_index, attempt, "cancelled between retry attempts");
            return Ok(Attempted::Cancelled);
        }
        attempt += 1;
    }
}
