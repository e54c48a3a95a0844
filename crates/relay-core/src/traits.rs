//! Trait seams between the agent loop and its host.
//!
//! - `ModelInvoker` — the model backend (one implementation per provider)
//! - `Reviewer`     — the approve/edit/stop callback for interactive mode
//! - `Sleeper`      — the blocking delay used between retries and loops
//!
//! The flow depends only on these traits. Provider credentials, transport
//! and rate limiting belong to `ModelInvoker` implementations, configured
//! per instance at construction.

use std::{thread, time::Duration};

use relay_contracts::{
    config::GenerationParams,
    error::{ProviderFailure, RelayResult},
};

/// A model backend: prompt in, generated text out.
pub trait ModelInvoker: Send + Sync {
    /// Generate a completion for `prompt`.
    ///
    /// A returned `ProviderFailure` is treated as transient and retried by
    /// the caller within its configured budget.
    fn invoke(&self, prompt: &str, params: &GenerationParams) -> Result<String, ProviderFailure>;
}

/// The reviewer's decision on one response in interactive mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Review {
    /// Use the response as the next iteration's input.
    Accept,
    /// Use this text instead. It is recorded as a user turn.
    Edit(String),
    /// End the loop with the response as the final answer.
    Stop,
}

/// Host-supplied approval step for interactive mode.
///
/// The loop blocks inside `review` until the host decides. Console prompts,
/// chat front-ends and test scripts all plug in here.
pub trait Reviewer: Send {
    /// Decide what happens to `response`, produced on loop `loop_index`
    /// (1-based).
    ///
    /// An `Err` aborts the run and is surfaced unchanged to the caller.
    fn review(&mut self, loop_index: u32, response: &str) -> RelayResult<Review>;
}

/// Blocking delay used for `retry_interval` and `loop_interval`.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// `Sleeper` backed by `std::thread::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            thread::sleep(duration);
        }
    }
}
