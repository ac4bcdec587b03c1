//! Create-only persistence of the enrollment attempt record.
//!
//! The record exists for the shutdown policy and external diagnostics; the
//! engine itself never reads it back. An existing file is authoritative,
//! since the first attempt's start time must survive process restarts, so
//! the write is a no-op when the file is already there.

use std::fs;
use std::path::Path;

use fleetlink_core::EnrollmentState;

/// Errors raised reading or writing the state file.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StateFileError {
    /// Filesystem failure.
    #[error("state file io: {0}")]
    Io(#[from] std::io::Error),

    /// The file exists but does not parse as an enrollment record.
    #[error("malformed state file: {0}")]
    Malformed(String),
}

/// Write the attempt record unless one already exists.
///
/// Returns `true` if this call created the file.
///
/// # Errors
///
/// Returns an error if the parent directory cannot be created or the
/// write fails.
pub fn write_once(path: &Path, state: &EnrollmentState) -> Result<bool, StateFileError> {
    if path.exists() {
        tracing::debug!(path = %path.display(), "enrollment state file already present");
        return Ok(false);
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_vec(state).map_err(|e| StateFileError::Malformed(e.to_string()))?;
    fs::write(path, json)?;
    Ok(true)
}

/// Read the attempt record.
///
/// # Errors
///
/// Returns an error if the file is missing, unreadable, or malformed.
pub fn read(path: &Path) -> Result<EnrollmentState, StateFileError> {
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|e| StateFileError::Malformed(e.to_string()))
}
