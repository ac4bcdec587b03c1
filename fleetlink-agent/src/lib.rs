//! Protocol engines for the fleetlink instance agent.
//!
//! Two reliability protocols share one shape (publish a request, await a
//! correlated response, retry under a deadline, declare the outcome exactly
//! once) over two different transports:
//!
//! - [`enroll`] - the enrollment state machine: identity bootstrap over the
//!   fleet broker, with backoff, replay validation, and a wall-clock
//!   deadline;
//! - [`gather`] - the credential gatherer: concurrent resolution of
//!   externally-stored work-order parameters over the local command socket.
//!
//! Supporting modules: [`state_file`] (create-only attempt record),
//! [`shutdown`] (terminate-on-failure policy), [`paths`] (agent filesystem
//! layout), [`interrupt`] (signal plumbing).

pub mod enroll;
pub mod gather;
pub mod interrupt;
pub mod paths;
pub mod shutdown;
pub mod state_file;

pub use enroll::{EnrollConfig, EnrollOutcome, EnrollmentEngine};
pub use gather::{CredentialGatherer, GatherFailure};
pub use interrupt::{InterruptCoordinator, InterruptSignal};
pub use paths::AgentPaths;
pub use shutdown::{HostController, PolicyDecision, ShutdownPolicy, SystemController};
