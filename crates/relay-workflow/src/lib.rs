//! # relay-workflow
//!
//! Multi-agent pipelines built on `relay-core` flows.
//!
//! ## Overview
//!
//! A `SequentialWorkflow` is an ordered list of tasks, each bound to a
//! shared agent. Tasks run one at a time; each result is handed to the next
//! task as input. A `WorkflowManifest` declares the same thing in TOML.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use relay_workflow::{shared, SequentialWorkflow};
//!
//! let mut workflow = SequentialWorkflow::new("blog");
//! workflow
//!     .add("Write a post about sleep", shared(writer))
//!     .add("Review the post", shared(editor));
//! let outcome = workflow.run()?;
//! ```

pub mod manifest;
pub mod sequential;
pub mod task;

pub use manifest::{TaskManifest, WorkflowManifest};
pub use sequential::{SequentialWorkflow, WorkflowOutcome};
pub use task::{shared, AgentRef, Task, TaskView};
