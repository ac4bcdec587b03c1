//! Test harness for enrollment E2E tests.
//!
//! Spawns a scripted in-process broker on a loopback port, speaking the
//! real framed-JSON wire protocol, so the tests exercise the production
//! TCP transport end to end.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use fleetlink_auth::{ResultEnvelope, Secret};
use fleetlink_core::{EnrollmentRequest, EnrollmentResult};
use fleetlink_transport::framing::{read_frame, write_frame};
use fleetlink_transport::wire::{BrokerErrorCode, BrokerFrame, ClientFrame};

/// What the broker does when a connection subscribes.
#[derive(Debug, Clone, Copy)]
#[allow(dead_code)]
pub enum ListenBehavior {
    /// Deliver a valid envelope echoing the captured request timestamp.
    Respond,
    /// Deliver an envelope with the timestamp shifted back by the offset.
    RespondStale(i64),
    /// Reject the subscription: the queue does not exist.
    QueueMissing,
}

/// Scripted in-process broker.
///
/// Publish connections capture the enrollment request; each subscribe
/// connection consumes the next [`ListenBehavior`] from the script
/// (defaulting to [`ListenBehavior::Respond`] when the script runs dry).
pub struct TestBroker {
    pub port: u16,
    pub requests: Arc<Mutex<Vec<EnrollmentRequest>>>,
    pub subscribed_queues: Arc<Mutex<Vec<String>>>,
    accept_task: JoinHandle<()>,
}

impl TestBroker {
    pub async fn spawn(secret: &str, script: Vec<ListenBehavior>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test broker");
        let port = listener.local_addr().expect("local addr").port();

        let secret = Secret::new(secret);
        let requests: Arc<Mutex<Vec<EnrollmentRequest>>> = Arc::default();
        let subscribed_queues: Arc<Mutex<Vec<String>>> = Arc::default();
        let script = Arc::new(Mutex::new(VecDeque::from(script)));

        let accept_requests = Arc::clone(&requests);
        let accept_queues = Arc::clone(&subscribed_queues);
        let accept_task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(serve(
                    stream,
                    secret.clone(),
                    Arc::clone(&accept_requests),
                    Arc::clone(&accept_queues),
                    Arc::clone(&script),
                ));
            }
        });

        Self {
            port,
            requests,
            subscribed_queues,
            accept_task,
        }
    }

    /// URL pointing the engine at this broker.
    pub fn url(&self) -> String {
        format!("fleet://acct:pw@127.0.0.1:{}/fleet", self.port)
    }
}

impl Drop for TestBroker {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn serve(
    mut stream: TcpStream,
    secret: Secret,
    requests: Arc<Mutex<Vec<EnrollmentRequest>>>,
    subscribed_queues: Arc<Mutex<Vec<String>>>,
    script: Arc<Mutex<VecDeque<ListenBehavior>>>,
) {
    let Ok(open) = read_frame(&mut stream).await else {
        return;
    };
    let Ok(ClientFrame::Open { .. }) = serde_json::from_slice(&open) else {
        return;
    };
    if send(&mut stream, &BrokerFrame::OpenOk).await.is_err() {
        return;
    }

    loop {
        let Ok(data) = read_frame(&mut stream).await else {
            return;
        };
        match serde_json::from_slice(&data) {
            Ok(ClientFrame::Publish { payload, .. }) => {
                let bytes = BASE64.decode(&payload).expect("base64 publish payload");
                let request: EnrollmentRequest =
                    serde_json::from_slice(&bytes).expect("enrollment request json");
                requests.lock().unwrap().push(request);
            }
            Ok(ClientFrame::Subscribe { queue }) => {
                subscribed_queues.lock().unwrap().push(queue.name.clone());
                let behavior = script
                    .lock()
                    .unwrap()
                    .pop_front()
                    .unwrap_or(ListenBehavior::Respond);
                let timestamp = requests
                    .lock()
                    .unwrap()
                    .last()
                    .map(|r| r.timestamp)
                    .unwrap_or_default();

                match behavior {
                    ListenBehavior::QueueMissing => {
                        let _ = send(
                            &mut stream,
                            &BrokerFrame::Error {
                                code: BrokerErrorCode::QueueNotFound,
                                message: queue.name,
                            },
                        )
                        .await;
                    }
                    ListenBehavior::Respond => {
                        let _ = send(&mut stream, &BrokerFrame::SubscribeOk).await;
                        let _ = deliver(&mut stream, &secret, timestamp).await;
                    }
                    ListenBehavior::RespondStale(offset) => {
                        let _ = send(&mut stream, &BrokerFrame::SubscribeOk).await;
                        let _ = deliver(&mut stream, &secret, timestamp - offset).await;
                    }
                }
            }
            _ => return,
        }
    }
}

async fn send(stream: &mut TcpStream, frame: &BrokerFrame) -> std::io::Result<()> {
    let data = serde_json::to_vec(frame).expect("broker frame json");
    write_frame(stream, &data).await
}

async fn deliver(stream: &mut TcpStream, secret: &Secret, timestamp: i64) -> std::io::Result<()> {
    let result = EnrollmentResult {
        mapper_cert: "MAPPER-CERT".into(),
        id_cert: "INSTANCE-CERT".into(),
        id_key: "INSTANCE-KEY".into(),
        timestamp,
    };
    let envelope = ResultEnvelope::seal(&result, secret).to_bytes();
    send(
        stream,
        &BrokerFrame::Delivery {
            payload: BASE64.encode(&envelope),
        },
    )
    .await
}
