//! Terminate-on-failure policy.
//!
//! An instance stuck failing to enroll past its setup window should not
//! keep consuming cloud resources silently. After each failed enrollment
//! cycle the engine consults this policy; when it says terminate, the host
//! is powered off and the process exits without another retry.
//!
//! Elapsed time is measured from the `started_at` persisted by the very
//! first attempt (see [`crate::state_file`]), not from this process's
//! start, so the window holds across restarts.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

/// Lower bound of the terminate-on-failure window since first attempt.
pub const WINDOW_MIN: Duration = Duration::from_secs(45 * 60);

/// Upper bound of the terminate-on-failure window since first attempt.
pub const WINDOW_MAX: Duration = Duration::from_secs(60 * 60);

/// What the engine should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    /// Keep retrying.
    Continue,
    /// Power off the host and exit now.
    Terminate,
}

/// Capability to power off the host.
#[async_trait]
pub trait HostController: Send + Sync {
    /// Initiate an immediate host power-off.
    async fn power_off(&self) -> std::io::Result<()>;
}

/// Production controller: spawns the platform shutdown command.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemController;

#[async_trait]
impl HostController for SystemController {
    async fn power_off(&self) -> std::io::Result<()> {
        tracing::warn!("powering off host");
        let status = tokio::process::Command::new("shutdown")
            .args(["-h", "now"])
            .status()
            .await?;
        if !status.success() {
            return Err(std::io::Error::other(format!(
                "shutdown command exited with {status}"
            )));
        }
        Ok(())
    }
}

/// The terminate-on-failure policy.
#[derive(Debug, Clone)]
pub struct ShutdownPolicy {
    or_die: bool,
    state_file: PathBuf,
    operational_marker: PathBuf,
}

impl ShutdownPolicy {
    /// Policy over the given attempt record and operational marker.
    pub fn new(or_die: bool, state_file: PathBuf, operational_marker: PathBuf) -> Self {
        Self {
            or_die,
            state_file,
            operational_marker,
        }
    }

    /// Decide whether the host must terminate, given the current epoch
    /// seconds.
    ///
    /// Terminates only when all three hold: the flag was requested, the
    /// elapsed time since the original first attempt falls inside the
    /// window, and the operational marker is absent. A missing or
    /// unreadable attempt record counts as "outside the window".
    pub fn check(&self, now_epoch: i64) -> PolicyDecision {
        if !self.or_die || self.operational_marker.exists() {
            return PolicyDecision::Continue;
        }

        let started_at = match crate::state_file::read(&self.state_file) {
            Ok(record) => record.started_at,
            Err(e) => {
                tracing::debug!("no readable attempt record for shutdown policy: {e}");
                return PolicyDecision::Continue;
            }
        };

        let elapsed = now_epoch.saturating_sub(started_at);
        if elapsed < 0 {
            return PolicyDecision::Continue;
        }
        let elapsed = Duration::from_secs(elapsed as u64);

        if (WINDOW_MIN..=WINDOW_MAX).contains(&elapsed) {
            tracing::error!(
                elapsed_minutes = elapsed.as_secs() / 60,
                "terminating after failing to enroll past the setup window"
            );
            PolicyDecision::Terminate
        } else {
            PolicyDecision::Continue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetlink_core::EnrollmentState;
    use std::path::Path;

    fn write_record(path: &Path, started_at: i64) {
        let state = EnrollmentState {
            root_dir: None,
            url: "fleet://b/fleet".into(),
            host: None,
            port: None,
            id: 1,
            or_die: true,
            retry: 3600,
            started_at,
        };
        crate::state_file::write_once(path, &state).unwrap();
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        state_file: PathBuf,
        marker: PathBuf,
    }

    fn fixture(started_at: Option<i64>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let state_file = dir.path().join("enrollment_state.json");
        let marker = dir.path().join("instance_state.json");
        if let Some(t0) = started_at {
            write_record(&state_file, t0);
        }
        Fixture {
            _dir: dir,
            state_file,
            marker,
        }
    }

    #[test]
    fn inside_window_terminates() {
        let f = fixture(Some(1_700_000_000));
        let policy = ShutdownPolicy::new(true, f.state_file.clone(), f.marker.clone());
        // 50 minutes after first attempt.
        let now = 1_700_000_000 + 50 * 60;
        assert_eq!(policy.check(now), PolicyDecision::Terminate);
    }

    #[test]
    fn window_edges() {
        let f = fixture(Some(0));
        let policy = ShutdownPolicy::new(true, f.state_file.clone(), f.marker.clone());
        assert_eq!(policy.check(44 * 60), PolicyDecision::Continue);
        assert_eq!(policy.check(45 * 60), PolicyDecision::Terminate);
        assert_eq!(policy.check(60 * 60), PolicyDecision::Terminate);
        assert_eq!(policy.check(61 * 60), PolicyDecision::Continue);
    }

    #[test]
    fn flag_unset_never_terminates() {
        let f = fixture(Some(0));
        let policy = ShutdownPolicy::new(false, f.state_file.clone(), f.marker.clone());
        assert_eq!(policy.check(50 * 60), PolicyDecision::Continue);
    }

    #[test]
    fn operational_marker_suppresses() {
        let f = fixture(Some(0));
        std::fs::write(&f.marker, b"{}").unwrap();
        let policy = ShutdownPolicy::new(true, f.state_file.clone(), f.marker.clone());
        assert_eq!(policy.check(50 * 60), PolicyDecision::Continue);
    }

    #[test]
    fn missing_record_continues() {
        let f = fixture(None);
        let policy = ShutdownPolicy::new(true, f.state_file.clone(), f.marker.clone());
        assert_eq!(policy.check(50 * 60), PolicyDecision::Continue);
    }

    #[test]
    fn elapsed_spans_process_restarts() {
        // A second process started much later still measures from the
        // original record.
        let f = fixture(Some(1_700_000_000));
        write_record(&f.state_file, 1_700_000_000); // no-op, already present
        let policy = ShutdownPolicy::new(true, f.state_file.clone(), f.marker.clone());
        assert_eq!(
            policy.check(1_700_000_000 + 50 * 60),
            PolicyDecision::Terminate
        );
    }
}
