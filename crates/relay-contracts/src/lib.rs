//! # relay-contracts
//!
//! Shared types, configuration schema, and the error taxonomy for the Relay
//! agent runtime.
//!
//! All crates in the workspace import from here. No control logic lives in
//! this crate, only data definitions, serde representations, and error types.

pub mod agent;
pub mod config;
pub mod error;
pub mod outcome;
pub mod task;
