//! The persisted state document and its integrity checksum.
//!
//! Layout on disk (pretty-printed JSON):
//!
//! ```json
//! {
//!   "format_version": 1,
//!   "saved_at": "2026-01-01T00:00:00Z",
//!   "checksum": "<64 hex chars>",
//!   "state": { "history": [...], "loop_count": 2, "last_temperature": 0.7, "config": {...} }
//! }
//! ```
//!
//! The checksum is SHA-256 over the compact JSON encoding of `state`. Field
//! order is fixed by the struct definitions, so re-encoding a decoded state
//! reproduces the same bytes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use relay_contracts::agent::AgentState;

/// The only document layout this crate reads and writes.
pub const FORMAT_VERSION: u32 = 1;

/// A sealed, self-verifying snapshot of one agent's state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateDocument {
    pub format_version: u32,
    pub saved_at: DateTime<Utc>,
    /// Lowercase hex SHA-256 of the compact JSON of `state`.
    pub checksum: String,
    pub state: AgentState,
}

impl StateDocument {
    /// Wrap `state` with the current format version, timestamp and checksum.
    pub fn seal(state: AgentState) -> Result<Self, serde_json::Error> {
        let checksum = state_checksum(&state)?;
        Ok(Self {
            format_version: FORMAT_VERSION,
            saved_at: Utc::now(),
            checksum,
            state,
        })
    }

    /// Check the format version and recompute the checksum.
    ///
    /// Returns a human-readable reason on mismatch.
    pub fn verify(&self) -> Result<(), String> {
        if self.format_version != FORMAT_VERSION {
            return Err(format!(
                "unsupported format_version {} (expected {})",
                self.format_version, FORMAT_VERSION
            ));
        }

        let recomputed = state_checksum(&self.state).map_err(|e| e.to_string())?;
        if recomputed != self.checksum {
            return Err(format!(
                "checksum mismatch: document says {}, content hashes to {}",
                self.checksum, recomputed
            ));
        }

        Ok(())
    }
}

/// SHA-256 (hex) of the compact JSON encoding of `state`.
pub fn state_checksum(state: &AgentState) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(state)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}
