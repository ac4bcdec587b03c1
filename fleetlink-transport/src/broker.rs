//! Broker publish/subscribe client.
//!
//! The enrollment engine opens short-lived connections: one to publish the
//! request (fire-and-forget), a second to wait on the predicted response
//! queue. Both are expressed against the capability traits here so the
//! engine can be driven by a scripted broker in tests.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::coordinates::BrokerCoordinates;
use crate::error::TransportError;
use crate::framing::{read_frame, write_frame};
use crate::wire::{BrokerErrorCode, BrokerFrame, ClientFrame, Exchange, QueueDescriptor};

/// An open broker connection.
#[async_trait]
pub trait BrokerConnection: Send {
    /// Publish a payload to an exchange. No acknowledgment is awaited.
    async fn publish(&mut self, exchange: &Exchange, payload: &[u8]) -> Result<(), TransportError>;

    /// Start consuming from a queue.
    ///
    /// With `no_declare` set, a missing queue surfaces as
    /// [`TransportError::QueueNotFound`].
    async fn subscribe(&mut self, queue: &QueueDescriptor) -> Result<(), TransportError>;

    /// Await the next delivery on the active subscription.
    ///
    /// `Ok(None)` means the connection was torn down; no further
    /// deliveries will arrive.
    async fn next_message(&mut self) -> Result<Option<Bytes>, TransportError>;

    /// Tear the connection down. Pending reads resolve to `None`.
    async fn close(&mut self);
}

/// Factory for broker connections.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Open and authenticate a connection to the first reachable
    /// coordinate pair.
    async fn connect(
        &self,
        coords: &BrokerCoordinates,
    ) -> Result<Box<dyn BrokerConnection>, TransportError>;
}

/// Production broker client: framed JSON over TCP.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpBroker;

#[async_trait]
impl BrokerClient for TcpBroker {
    async fn connect(
        &self,
        coords: &BrokerCoordinates,
    ) -> Result<Box<dyn BrokerConnection>, TransportError> {
        let addr = coords.primary_addr();
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|source| TransportError::Connect {
                addr: addr.clone(),
                source,
            })?;
        tracing::debug!(%addr, vhost = %coords.vhost, "broker connected");

        let mut conn = TcpBrokerConnection { stream: Some(stream) };
        conn.send(&ClientFrame::Open {
            user: coords.user.clone(),
            password: coords.password.clone(),
            vhost: coords.vhost.clone(),
        })
        .await?;

        match conn.recv().await? {
            Some(BrokerFrame::OpenOk) => Ok(Box::new(conn)),
            Some(BrokerFrame::Error { code, message }) => Err(match code {
                BrokerErrorCode::AccessRefused => TransportError::AccessRefused(message),
                _ => TransportError::Peer(message),
            }),
            Some(other) => Err(TransportError::Codec(format!(
                "expected open-ok, got {other:?}"
            ))),
            None => Err(TransportError::Closed),
        }
    }
}

/// A live framed-TCP broker connection.
struct TcpBrokerConnection {
    /// `None` once closed.
    stream: Option<TcpStream>,
}

impl TcpBrokerConnection {
    async fn send(&mut self, frame: &ClientFrame) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        let data = serde_json::to_vec(frame).map_err(|e| TransportError::Codec(e.to_string()))?;
        write_frame(stream, &data).await?;
        Ok(())
    }

    /// `Ok(None)` on clean EOF.
    async fn recv(&mut self) -> Result<Option<BrokerFrame>, TransportError> {
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => return Ok(None),
        };
        match read_frame(stream).await {
            Ok(data) => {
                let frame = serde_json::from_slice(&data)
                    .map_err(|e| TransportError::Codec(e.to_string()))?;
                Ok(Some(frame))
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl BrokerConnection for TcpBrokerConnection {
    async fn publish(&mut self, exchange: &Exchange, payload: &[u8]) -> Result<(), TransportError> {
        self.send(&ClientFrame::Publish {
            exchange: exchange.clone(),
            payload: BASE64.encode(payload),
        })
        .await
    }

    async fn subscribe(&mut self, queue: &QueueDescriptor) -> Result<(), TransportError> {
        self.send(&ClientFrame::Subscribe {
            queue: queue.clone(),
        })
        .await?;

        match self.recv().await? {
            Some(BrokerFrame::SubscribeOk) => Ok(()),
            Some(BrokerFrame::Error { code, message }) => Err(match code {
                BrokerErrorCode::QueueNotFound => TransportError::QueueNotFound(message),
                BrokerErrorCode::AccessRefused => TransportError::AccessRefused(message),
                BrokerErrorCode::Internal => TransportError::Peer(message),
            }),
            Some(other) => Err(TransportError::Codec(format!(
                "expected subscribe-ok, got {other:?}"
            ))),
            None => Err(TransportError::Closed),
        }
    }

    async fn next_message(&mut self) -> Result<Option<Bytes>, TransportError> {
        loop {
            match self.recv().await? {
                Some(BrokerFrame::Delivery { payload }) => {
                    let bytes = BASE64
                        .decode(&payload)
                        .map_err(|e| TransportError::Codec(e.to_string()))?;
                    return Ok(Some(Bytes::from(bytes)));
                }
                Some(BrokerFrame::Error { message, .. }) => {
                    return Err(TransportError::Peer(message));
                }
                // Stray control frames between deliveries are ignored.
                Some(_) => continue,
                None => return Ok(None),
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
    }
}
