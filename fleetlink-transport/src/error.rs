//! Transport error taxonomy.
//!
//! The enrollment engine's retry classification keys off these variants:
//! `QueueNotFound` triggers the coordinate-reversal retry, everything else
//! transient feeds the standard backoff.

/// Errors raised by the broker and command-socket transports.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum TransportError {
    /// TCP connect failed (broker offline, connection refused).
    #[error("connect to {addr} failed: {source}")]
    Connect {
        /// Address that was dialed.
        addr: String,
        /// Underlying socket error.
        source: std::io::Error,
    },

    /// The broker rejected the credentials or vhost.
    #[error("access refused: {0}")]
    AccessRefused(String),

    /// Subscribed queue does not exist and the descriptor forbids
    /// declaring it.
    #[error("queue not found: {0}")]
    QueueNotFound(String),

    /// The peer closed the connection.
    #[error("connection closed by peer")]
    Closed,

    /// Framing or socket IO failure mid-stream.
    #[error("transport io: {0}")]
    Io(#[from] std::io::Error),

    /// A frame arrived that does not decode as the expected wire type.
    #[error("codec: {0}")]
    Codec(String),

    /// The peer reported an error this agent has no specific handling for.
    #[error("peer error: {0}")]
    Peer(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_not_found_is_distinguishable() {
        let err = TransportError::QueueNotFound("fl-instance-1-x".into());
        assert!(matches!(err, TransportError::QueueNotFound(_)));
        assert!(err.to_string().contains("fl-instance-1-x"));
    }
}
