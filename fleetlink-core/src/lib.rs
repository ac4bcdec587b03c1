//! # Fleetlink Core
//!
//! Pure domain types for the fleetlink instance agent: work bundles,
//! external parameter references, enrollment request/result payloads,
//! and the audit sink capability.
//!
//! ## Design Principles
//!
//! This crate is intentionally **IO-free**:
//! - No filesystem operations
//! - No network calls
//! - No OS-specific APIs
//!
//! All types are plain Rust structs/enums with serde serialization. The
//! actual IO (broker traffic, command sockets, persistence) lives in
//! `fleetlink-transport` and `fleetlink-agent`.
//!
//! ## Modules
//!
//! - [`bundle`] - Work bundles, executables, and external parameter locations
//! - [`enrollment`] - Enrollment request/result payloads and the state-file record
//! - [`audit`] - Injected audit sink capability

pub mod audit;
pub mod bundle;
pub mod enrollment;

// Re-export commonly used types at crate root for convenience.
pub use audit::{AuditSink, TracingAuditSink};
pub use bundle::{CredentialValue, Executable, ExternalParameterLocation, WorkBundle};
pub use enrollment::{EnrollmentRequest, EnrollmentResult, EnrollmentState, PROTOCOL_VERSION};
