//! Deterministic stand-ins for the host-side traits.
//!
//! These let hosts and tests drive a `Flow` headlessly: scripted model
//! output, scripted review decisions, and a sleeper that records delays
//! instead of blocking.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use relay_contracts::{
    config::GenerationParams,
    error::{ProviderFailure, RelayResult},
};

use crate::traits::{ModelInvoker, Review, Reviewer, Sleeper};

#[derive(Debug, Default)]
struct InvokerLog {
    script: VecDeque<Result<String, ProviderFailure>>,
    prompts: Vec<String>,
    params: Vec<GenerationParams>,
}

/// A `ModelInvoker` that replays a fixed script of results.
///
/// Once the script is exhausted, every call returns the fallback (a
/// provider failure unless configured otherwise).
#[derive(Debug)]
pub struct ScriptedInvoker {
    log: Mutex<InvokerLog>,
    fallback: Result<String, ProviderFailure>,
}

impl ScriptedInvoker {
    /// Succeed with each of `responses` in turn.
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_results(responses.into_iter().map(|r| Ok(r.into())))
    }

    /// Replay arbitrary successes and failures in turn.
    pub fn from_results<I>(results: I) -> Self
    where
        I: IntoIterator<Item = Result<String, ProviderFailure>>,
    {
        Self {
            log: Mutex::new(InvokerLog {
                script: results.into_iter().collect(),
                ..Default::default()
            }),
            fallback: Err(ProviderFailure::new("scripted invoker exhausted")),
        }
    }

    /// Fail every call with `reason`.
    pub fn always_failing(reason: impl Into<String>) -> Self {
        Self::from_results(std::iter::empty()).with_fallback(Err(ProviderFailure::new(reason)))
    }

    /// Answer every call with `response`.
    pub fn repeating(response: impl Into<String>) -> Self {
        Self::from_results(std::iter::empty()).with_fallback(Ok(response.into()))
    }

    pub fn with_fallback(mut self, fallback: Result<String, ProviderFailure>) -> Self {
        self.fallback = fallback;
        self
    }

    /// Number of `invoke` calls so far, successful or not.
    pub fn calls(&self) -> usize {
        self.lock().prompts.len()
    }

    /// Every prompt received, oldest first.
    pub fn prompts(&self) -> Vec<String> {
        self.lock().prompts.clone()
    }

    /// The temperature of every call, oldest first.
    pub fn temperatures(&self) -> Vec<f64> {
        self.lock().params.iter().map(|p| p.temperature).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, InvokerLog> {
        // A panic while holding this lock can only come from a test thread;
        // the log itself is still consistent.
        self.log.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ModelInvoker for ScriptedInvoker {
    fn invoke(&self, prompt: &str, params: &GenerationParams) -> Result<String, ProviderFailure> {
        let mut log = self.lock();
        log.prompts.push(prompt.to_string());
        log.params.push(*params);
        log.script.pop_front().unwrap_or_else(|| self.fallback.clone())
    }
}

/// A `Reviewer` that replays fixed decisions, then accepts everything.
#[derive(Debug, Default)]
pub struct ScriptedReviewer {
    decisions: VecDeque<Review>,
    seen: Arc<Mutex<Vec<String>>>,
}

impl ScriptedReviewer {
    pub fn new<I: IntoIterator<Item = Review>>(decisions: I) -> Self {
        Self {
            decisions: decisions.into_iter().collect(),
            seen: Arc::default(),
        }
    }

    /// Shared handle to every response this reviewer was shown.
    pub fn seen(&self) -> Arc<Mutex<Vec<String>>> {
        self.seen.clone()
    }
}

impl Reviewer for ScriptedReviewer {
    fn review(&mut self, _loop_index: u32, response: &str) -> RelayResult<Review> {
        self.seen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(response.to_string());
        Ok(self.decisions.pop_front().unwrap_or(Review::Accept))
    }
}

/// A `Sleeper` that records requested delays and returns immediately.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every requested delay, oldest first.
    pub fn recorded(&self) -> Vec<Duration> {
        self.slept
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.slept
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(duration);
    }
}
