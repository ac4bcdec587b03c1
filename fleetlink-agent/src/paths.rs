//! Agent filesystem layout.

use std::path::{Path, PathBuf};

/// Default root directory when the CLI names none.
const DEFAULT_ROOT_DIR: &str = "/var/lib/fleetlink";

/// Well-known paths under the agent root directory.
#[derive(Debug, Clone)]
pub struct AgentPaths {
    root_dir: PathBuf,
}

impl AgentPaths {
    /// Layout rooted at `root_dir`, or the system default if `None`.
    pub fn new(root_dir: Option<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_ROOT_DIR)),
        }
    }

    /// The agent root directory.
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Directory holding the mapper/instance certificates and key.
    pub fn certs_dir(&self) -> PathBuf {
        self.root_dir.join("certs")
    }

    /// Directory holding agent state records.
    pub fn state_dir(&self) -> PathBuf {
        self.root_dir.join("state")
    }

    /// Default location of the enrollment attempt record.
    pub fn enrollment_state_file(&self) -> PathBuf {
        self.state_dir().join("enrollment_state.json")
    }

    /// Marker written once the instance is fully operational; its presence
    /// suppresses the terminate-on-failure policy.
    pub fn operational_marker(&self) -> PathBuf {
        self.state_dir().join("instance_state.json")
    }

    /// Directory for the first-boot log.
    pub fn boot_log_dir(&self) -> PathBuf {
        self.root_dir.join("log")
    }
}
