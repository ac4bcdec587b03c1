//! JSON wire frames for the broker and command-socket protocols.
//!
//! Payloads cross the broker opaque to the transport: they are base64
//! inside the JSON frame, and the subscriber decodes them with whatever
//! envelope crypto applies. The command socket carries JSON values
//! directly since both ends are on the same host.

use serde::{Deserialize, Serialize};

/// Exchange kinds this agent publishes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeKind {
    /// Direct routing by exchange name.
    Direct,
}

/// A named broker exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    /// Routing kind.
    pub kind: ExchangeKind,
    /// Exchange name.
    pub name: String,
}

impl Exchange {
    /// A direct exchange with the given name.
    pub fn direct(name: impl Into<String>) -> Self {
        Self {
            kind: ExchangeKind::Direct,
            name: name.into(),
        }
    }
}

/// Descriptor of a queue to subscribe to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDescriptor {
    /// Queue name.
    pub name: String,
    /// Queue survives broker restarts.
    pub durable: bool,
    /// The queue must already exist; subscribing must not create it.
    pub no_declare: bool,
}

impl QueueDescriptor {
    /// Descriptor for the enrollment response queue: durable, owned by
    /// the fleet service, never declared from this side.
    pub fn existing_durable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: true,
            no_declare: true,
        }
    }
}

/// Frames sent by the agent to the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "frame")]
pub enum ClientFrame {
    /// First frame on every connection: authenticate into a vhost.
    Open {
        /// Broker user.
        user: String,
        /// Broker password.
        password: String,
        /// Virtual host.
        vhost: String,
    },
    /// Publish a payload to an exchange. Fire-and-forget: the broker
    /// sends no acknowledgment.
    Publish {
        /// Target exchange.
        exchange: Exchange,
        /// Base64 payload bytes.
        payload: String,
    },
    /// Start consuming from a queue.
    Subscribe {
        /// Queue to consume from.
        queue: QueueDescriptor,
    },
}

/// Frames sent by the broker to the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "frame")]
pub enum BrokerFrame {
    /// Connection accepted.
    OpenOk,
    /// Subscription established; deliveries follow.
    SubscribeOk,
    /// A message delivered from a subscribed queue.
    Delivery {
        /// Base64 payload bytes.
        payload: String,
    },
    /// Protocol-level failure.
    Error {
        /// Machine-readable error class.
        code: BrokerErrorCode,
        /// Human-readable detail.
        message: String,
    },
}

/// Error classes a broker can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrokerErrorCode {
    /// Credentials or vhost rejected.
    AccessRefused,
    /// Subscribed queue does not exist (and `no_declare` was set).
    QueueNotFound,
    /// Anything else.
    Internal,
}

/// A request over the local command socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    /// Command name; the gatherer only ever sends `send_idempotent_request`.
    pub name: String,
    /// Operation path, e.g. `/vault/get`.
    pub operation: String,
    /// Operation payload.
    pub payload: serde_json::Value,
    /// Shared cookie authenticating the caller to the local server.
    pub cookie: String,
}

/// A response over the local command socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    /// Operation result, to be decoded as a [`CommandResult`].
    pub payload: serde_json::Value,
}

/// Application-level result carried in a command response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum CommandResult {
    /// The operation succeeded; `content` is operation-specific.
    Success {
        /// Operation-specific result content.
        content: serde_json::Value,
    },
    /// The operation failed remotely.
    Error {
        /// Reason reported by the remote side.
        content: String,
    },
}
