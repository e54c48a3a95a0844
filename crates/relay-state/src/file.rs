//! File-backed save and load.
//!
//! `save_state` never leaves a half-written target behind: the document is
//! written to a hidden sibling file, flushed and synced, then renamed over
//! the target. A drop guard removes the sibling on every early return.
//! `load_state` either returns a fully decoded, verified state or an error.

use std::{
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use tracing::{debug, info, warn};

use relay_contracts::{
    agent::AgentState,
    error::{RelayError, RelayResult},
};

use crate::document::StateDocument;

/// Persist `state` to `path`, replacing any existing file atomically.
///
/// # Errors
///
/// `IoError` if the temp file cannot be created, written, synced, or renamed.
pub fn save_state(path: &Path, state: &AgentState) -> RelayResult<()> {
    let document = StateDocument::seal(state.clone()).map_err(|e| RelayError::IoError {
        path: path.display().to_string(),
        reason: format!("failed to encode state: {e}"),
    })?;

    let mut temp = TempFile::beside(path)?;
    debug!(target_path = %path.display(), temp_path = %temp.path.display(), "writing state");

    {
        let file = File::create(&temp.path).map_err(|e| io_error(&temp.path, e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &document).map_err(|e| RelayError::IoError {
            path: temp.path.display().to_string(),
            reason: format!("failed to write state document: {e}"),
        })?;
        writer.flush().map_err(|e| io_error(&temp.path, e))?;
        writer
            .get_ref()
            .sync_all()
            .map_err(|e| io_error(&temp.path, e))?;
        // The file handle closes here, before the rename.
    }

    fs::rename(&temp.path, path).map_err(|e| io_error(path, e))?;
    temp.commit();

    info!(
        path = %path.display(),
        turns = document.state.history.len(),
        checksum = %document.checksum,
        "agent state saved"
    );
    Ok(())
}

/// Read and verify the state document at `path`.
///
/// # Errors
///
/// - `IoError` if the file cannot be opened or read.
/// - `DeserializationError` if the content is not a valid state document,
///   carries an unknown format version, or fails its checksum.
pub fn load_state(path: &Path) -> RelayResult<AgentState> {
    let file = File::open(path).map_err(|e| io_error(path, e))?;
    let reader = BufReader::new(file);

    let document: StateDocument = serde_json::from_reader(reader).map_err(|e| {
        if e.is_io() {
            io_error_msg(path, e.to_string())
        } else {
            RelayError::DeserializationError {
                path: path.display().to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if let Err(reason) = document.verify() {
        warn!(path = %path.display(), %reason, "rejecting state document");
        return Err(RelayError::DeserializationError {
            path: path.display().to_string(),
            reason,
        });
    }

    info!(
        path = %path.display(),
        turns = document.state.history.len(),
        saved_at = %document.saved_at,
        "agent state loaded"
    );
    Ok(document.state)
}

fn io_error(path: &Path, e: std::io::Error) -> RelayError {
    io_error_msg(path, e.to_string())
}

fn io_error_msg(path: &Path, reason: String) -> RelayError {
    RelayError::IoError {
        path: path.display().to_string(),
        reason,
    }
}

/// A sibling temp file that deletes itself unless committed.
struct TempFile {
    path: PathBuf,
    committed: bool,
}

impl TempFile {
    fn beside(target: &Path) -> RelayResult<Self> {
        let name = target
            .file_name()
            .ok_or_else(|| io_error_msg(target, "path has no file name".to_string()))?;
        let path = target.with_file_name(format!(".{}.tmp", name.to_string_lossy()));
        Ok(Self {
            path,
            committed: false,
        })
    }

    fn commit(&mut self) {
        self.committed = true;
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if !self.committed && self.path.exists() {
            if let Err(e) = fs::remove_file(&self.path) {
                warn!(path = %self.path.display(), error = %e, "failed to remove temp state file");
            }
        }
    }
}
