//! Local command-socket client.
//!
//! The agent's command server listens on loopback; the credential gatherer
//! talks to it to reach the external vault. Every idempotent request opens
//! its own connection: a malformed or slow response on one request can
//! then never block or corrupt another's correlation.

use async_trait::async_trait;
use tokio::net::TcpStream;

use crate::error::TransportError;
use crate::framing::{read_frame, write_frame};
use crate::wire::{CommandRequest, CommandResponse};

/// Command name for idempotent pass-through requests.
const IDEMPOTENT_REQUEST: &str = "send_idempotent_request";

/// Request/response channel to the local command server.
#[async_trait]
pub trait CommandChannel: Send + Sync {
    /// Issue one idempotent request and await its response payload.
    async fn send_idempotent_request(
        &self,
        operation: &str,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, TransportError>;
}

/// Production command client: framed JSON over loopback TCP.
#[derive(Debug, Clone)]
pub struct TcpCommandClient {
    listen_port: u16,
    cookie: String,
}

impl TcpCommandClient {
    /// Client for the command server on `listen_port`, authenticating
    /// with the shared `cookie`.
    pub fn new(listen_port: u16, cookie: impl Into<String>) -> Self {
        Self {
            listen_port,
            cookie: cookie.into(),
        }
    }
}

#[async_trait]
impl CommandChannel for TcpCommandClient {
    async fn send_idempotent_request(
        &self,
        operation: &str,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, TransportError> {
        let addr = format!("127.0.0.1:{}", self.listen_port);
        let mut stream =
            TcpStream::connect(&addr)
                .await
                .map_err(|source| TransportError::Connect {
                    addr: addr.clone(),
                    source,
                })?;

        let request = CommandRequest {
            name: IDEMPOTENT_REQUEST.to_string(),
            operation: operation.to_string(),
            payload,
            cookie: self.cookie.clone(),
        };
        let data =
            serde_json::to_vec(&request).map_err(|e| TransportError::Codec(e.to_string()))?;
        write_frame(&mut stream, &data).await?;

        let data = read_frame(&mut stream).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                TransportError::Closed
            } else {
                TransportError::Io(e)
            }
        })?;
        let response: CommandResponse =
            serde_json::from_slice(&data).map_err(|e| TransportError::Codec(e.to_string()))?;
        Ok(response.payload)
    }
}
