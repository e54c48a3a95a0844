//! # relay-state
//!
//! Persistence for agent loop state.
//!
//! ## Overview
//!
//! An `AgentState` is written as a versioned JSON document carrying a
//! SHA-256 checksum of its content. Saving goes through a temp file and an
//! atomic rename; loading verifies the version and checksum before handing
//! the state back, so a caller that replaces its live state with the result
//! never observes a partially decoded document.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use relay_state::{load_state, save_state};
//!
//! save_state(Path::new("flow_state.json"), &state)?;
//! let restored = load_state(Path::new("flow_state.json"))?;
//! assert_eq!(state, restored);
//! ```

pub mod document;
pub mod file;

pub use document::{state_checksum, StateDocument, FORMAT_VERSION};
pub use file::{load_state, save_state};

// ── Tests ─────────────────────────────────────────────────────────────────────
