//! Transport adapters for the fleetlink agent.
//!
//! Two transports share the same length-delimited JSON framing:
//!
//! - the **broker** transport: publish/subscribe against the fleet
//!   message broker, used by the enrollment engine;
//! - the **command socket** transport: request/response against the local
//!   agent command server, used by the credential gatherer.
//!
//! The protocol engines in `fleetlink-agent` depend only on the capability
//! traits ([`BrokerClient`], [`BrokerConnection`], [`CommandChannel`]); the
//! TCP implementations here are the production adapters.

pub mod broker;
pub mod command;
pub mod coordinates;
pub mod error;
pub mod framing;
pub mod wire;

pub use broker::{BrokerClient, BrokerConnection, TcpBroker};
pub use command::{CommandChannel, TcpCommandClient};
pub use coordinates::BrokerCoordinates;
pub use error::TransportError;
pub use wire::{CommandResult, Exchange, QueueDescriptor};
