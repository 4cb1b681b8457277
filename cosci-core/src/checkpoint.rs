//! Checkpoints: the research state serialized to JSON with a format version.
//!
//! Writes are atomic (write to a `.tmp` sibling, then rename), so an
//! interrupted save never leaves a truncated checkpoint behind.

use crate::error::CheckpointError;
use crate::state::ResearchState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use tracing::debug;

/// Current checkpoint format version.
pub const CHECKPOINT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub state: ResearchState,
}

impl Checkpoint {
    pub fn from_state(state: &ResearchState) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            saved_at: Utc::now(),
            state: state.clone(),
        }
    }

    pub fn into_state(self) -> ResearchState {
        self.state
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Write the checkpoint, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<(), CheckpointError> {
        let write_failed = |e: io::Error| CheckpointError::WriteFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        };
        let json = self.to_json().map_err(|e| write_failed(io::Error::other(e)))?;
        atomic_write(path, json.as_bytes()).map_err(write_failed)?;
        debug!(path = %path.display(), hypotheses = self.state.hypotheses.len(), "Checkpoint saved");
        Ok(())
    }

    /// Read a checkpoint and check its format version.
    pub fn load(path: &Path) -> Result<Self, CheckpointError> {
        let read_failed = |message: String| CheckpointError::ReadFailed {
            path: path.to_path_buf(),
            message,
        };
        let data = std::fs::read_to_string(path).map_err(|e| read_failed(e.to_string()))?;
        let checkpoint: Checkpoint =
            serde_json::from_str(&data).map_err(|e| read_failed(e.to_string()))?;
        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(CheckpointError::UnsupportedVersion {
                found: checkpoint.version,
                expected: CHECKPOINT_VERSION,
            });
        }
        Ok(checkpoint)
    }
}

/// Load an initial research state from JSON.
///
/// Accepts either a full checkpoint or a bare state object, so a hand-written
/// `{"goal": "..."}` file works as input.
pub fn load_state(path: &Path) -> Result<ResearchState, CheckpointError> {
    let read_failed = |message: String| CheckpointError::ReadFailed {
        path: path.to_path_buf(),
        message,
    };
    let data = std::fs::read_to_string(path).map_err(|e| read_failed(e.to_string()))?;
    let value: serde_json::Value =
        serde_json::from_str(&data).map_err(|e| read_failed(e.to_string()))?;
    if value.get("version").is_some() && value.get("state").is_some() {
        return Checkpoint::load(path).map(Checkpoint::into_state);
    }
    serde_json::from_value(value).map_err(|e| read_failed(e.to_string()))
}

fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
