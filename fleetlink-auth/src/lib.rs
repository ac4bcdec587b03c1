//! Pure identity and verifier crypto for fleetlink enrollment.
//!
//! This crate is intentionally IO-free:
//! - No filesystem operations
//! - No network calls
//! - No logging
//!
//! Everything here is a deterministic function of its inputs. Both ends of
//! the enrollment protocol link this crate so that the requesting instance
//! and the fleet service independently compute the same identity string and
//! predicted response queue name from the shared secret, without either
//! ever appearing on the wire.
//!
//! # Example
//!
//! ```
//! use fleetlink_auth::{identity, Secret};
//!
//! let secret = Secret::new("launch-secret");
//! let queue = identity::predict_queue_name(42, &secret);
//! assert_eq!(queue, identity::agent_identity(42, &secret));
//! ```

pub mod envelope;
pub mod identity;

pub use envelope::{EnvelopeError, ResultEnvelope};
pub use identity::{
    agent_identity, create_verifier, derive_public_token, predict_queue_name, verify_verifier,
    Secret,
};
