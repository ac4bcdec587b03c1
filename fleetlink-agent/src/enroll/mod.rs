//! Enrollment state machine.
//!
//! One enrollment cycle publishes a signed request to the fleet service's
//! direct exchange, waits briefly for the response queue to be
//! provisioned, then listens on the predicted queue for a result envelope
//! whose timestamp echoes the in-flight request. Cycles repeat under
//! exponential backoff until the result arrives, the retry budget's
//! wall-clock deadline passes, an interrupt arrives, or the shutdown
//! policy terminates the host.

mod engine;
mod phase;
mod schedule;

pub use engine::{EnrollConfig, EnrollOutcome, EnrollmentEngine, Timing};
pub use phase::{AbortCause, CycleEvent, Phase};
pub use schedule::RetrySchedule;

use std::time::Duration;

/// Default retry budget: keep trying for 96 hours.
pub const RETRY_DEFAULT: Duration = Duration::from_secs(3600 * 96);

/// Fixed wait between publishing the request and listening for the
/// result, giving the fleet service time to provision the response queue.
pub const PRE_WAIT: Duration = Duration::from_secs(5);

/// Minimum time to wait for an enrollment response before retrying.
pub const WAIT_MIN: Duration = Duration::from_secs(4);

/// Maximum time to wait for an enrollment response before retrying.
pub const WAIT_MAX: Duration = Duration::from_secs(64);

/// Broker user for the unauthenticated request-publishing connection.
pub const ENROLL_USER: &str = "enrollment";

/// Broker password for the unauthenticated request-publishing connection.
pub const ENROLL_PASSWORD: &str = "enrollment";

/// Name of the well-known direct exchange enrollment requests go to.
pub const ENROLLMENT_EXCHANGE: &str = "enrollment";
