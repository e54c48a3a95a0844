//! # relay-core
//!
//! The Relay agent loop.
//!
//! This crate provides:
//! - The host-side traits (`ModelInvoker`, `Reviewer`, `Sleeper`)
//! - The `Flow` that drives a model through repeated, retried, cancellable
//!   iterations on a task
//! - TOML loading for `AgentConfig`
//! - Scripted stand-ins for driving a flow without a real model
//!
//! ## Usage
//!
//! ```rust,ignore
//! use relay_core::{Flow, scripted::ScriptedInvoker};
//!
//! let invoker = Arc::new(ScriptedInvoker::new(["draft", "final"]));
//! let mut flow = Flow::new(invoker, AgentConfig::new("writer").with_max_loops(MaxLoops::fixed(2)));
//! assert_eq!(flow.run("write a haiku")?, "final");
//! ```

pub mod cancel;
pub mod config;
pub mod filter;
pub mod flow;
pub mod prompt;
pub mod retry;
pub mod scripted;
pub mod temperature;
pub mod traits;

pub use cancel::CancelSignal;
pub use flow::{Flow, StopPredicate};
pub use traits::{ModelInvoker, Review, Reviewer, Sleeper, ThreadSleeper};
