//! The enrollment engine: drives cycles over the broker transport.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;

use fleetlink_auth::{identity, ResultEnvelope, Secret};
use fleetlink_core::{
    AuditSink, EnrollmentRequest, EnrollmentResult, EnrollmentState, PROTOCOL_VERSION,
};
use fleetlink_transport::{
    broker::{BrokerClient, BrokerConnection},
    BrokerCoordinates, Exchange, QueueDescriptor, TransportError,
};

use crate::interrupt::InterruptSignal;
use crate::shutdown::{HostController, PolicyDecision, ShutdownPolicy};
use crate::state_file::{self, StateFileError};

use super::phase::{CycleEvent, Phase};
use super::schedule::RetrySchedule;
use super::{ENROLLMENT_EXCHANGE, ENROLL_PASSWORD, ENROLL_USER, PRE_WAIT, WAIT_MAX, WAIT_MIN};

/// Tunable delays of the enrollment loop. Production uses the defaults;
/// tests shrink them.
#[derive(Debug, Clone)]
pub struct Timing {
    /// Wait between publishing and listening.
    pub pre_wait: Duration,
    /// Initial listen timeout and backoff base.
    pub wait_min: Duration,
    /// Backoff cap.
    pub wait_max: Duration,
    /// Pause before the one reroute retry after "queue not found".
    pub reroute_pause: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            pre_wait: PRE_WAIT,
            wait_min: WAIT_MIN,
            wait_max: WAIT_MAX,
            reroute_pause: Duration::from_secs(1),
        }
    }
}

/// Immutable configuration of one enrollment run.
#[derive(Clone)]
pub struct EnrollConfig {
    /// Broker coordinates under the account credentials.
    pub coordinates: BrokerCoordinates,
    /// Numeric token identifier assigned at launch.
    pub token_id: u64,
    /// Shared launch secret.
    pub secret: Secret,
    /// Wall-clock retry budget for the whole loop.
    pub retry_budget: Duration,
    /// Terminate the host if enrollment keeps failing inside the window.
    pub or_die: bool,
    /// Path of the create-only attempt record.
    pub state_file: PathBuf,
    /// Marker whose presence suppresses the shutdown policy.
    pub operational_marker: PathBuf,
    /// Directory the certificates land in on success.
    pub certs_dir: PathBuf,
    /// Options snapshot persisted into the attempt record; `started_at`
    /// is filled in by the engine.
    pub record: EnrollmentState,
    /// Loop delays.
    pub timing: Timing,
}

/// Terminal outcome of an enrollment run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollOutcome {
    /// Certificates received and written.
    Enrolled,
    /// The retry budget expired without a valid response.
    BudgetExhausted,
    /// An interrupt abandoned the run.
    Interrupted,
    /// The shutdown policy powered the host off.
    TerminatedByPolicy,
}

/// Local failures that abort the run outright (not retried).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum EnrollError {
    /// The attempt record could not be written.
    #[error(transparent)]
    StateFile(#[from] StateFileError),

    /// Certificates could not be persisted.
    #[error("writing credentials: {0}")]
    Io(#[from] std::io::Error),
}

/// One cycle's failure, classified for the retry policy.
#[derive(Debug, thiserror::Error)]
enum CycleError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("no enrollment response before timeout")]
    NoResponse,

    #[error("broker connection lost while awaiting response")]
    ConnectionLost,
}

/// Drives enrollment cycles until a terminal outcome.
pub struct EnrollmentEngine<'a> {
    config: EnrollConfig,
    audit: &'a dyn AuditSink,
}

impl<'a> EnrollmentEngine<'a> {
    /// Engine over `config`, reporting through `audit`.
    pub fn new(config: EnrollConfig, audit: &'a dyn AuditSink) -> Self {
        Self { config, audit }
    }

    /// Run the enrollment loop to completion.
    ///
    /// # Errors
    ///
    /// Returns an error only for local filesystem failures; transport
    /// failures feed the retry loop and surface as an outcome.
    pub async fn run(
        &self,
        broker: &dyn BrokerClient,
        controller: &dyn HostController,
        interrupt: InterruptSignal,
    ) -> Result<EnrollOutcome, EnrollError> {
        let started = Instant::now();

        let mut record = self.config.record.clone();
        record.started_at = Utc::now().timestamp();
        state_file::write_once(&self.config.state_file, &record)?;

        let policy = ShutdownPolicy::new(
            self.config.or_die,
            self.config.state_file.clone(),
            self.config.operational_marker.clone(),
        );
        let mut schedule = RetrySchedule::new(
            self.config.timing.wait_min,
            self.config.timing.wait_max,
            self.config.retry_budget,
            started,
        );
        let mut phase = Phase::Idle;

        self.audit.create_section("Enrolling with fleet service");

        loop {
            let cycle_started = Instant::now();
            if schedule.expired(cycle_started) {
                phase = phase.next(CycleEvent::DeadlineExceeded);
                self.audit.append_error(&format!(
                    "could not complete enrollment after {} sec; aborting",
                    self.config.retry_budget.as_secs()
                ));
                debug_assert!(phase.is_terminal());
                return Ok(EnrollOutcome::BudgetExhausted);
            }

            phase = phase.next(CycleEvent::CycleStarted);
            let remaining = schedule.remaining(cycle_started);
            // The interrupt arm must not touch `phase` while the cycle
            // future borrows it; resolve the race first, then act.
            let outcome = tokio::select! {
                _ = interrupt.recv() => None,
                res = tokio::time::timeout(
                    remaining,
                    self.cycle(broker, schedule.wait(), &mut phase),
                ) => Some(res.unwrap_or(Err(CycleError::NoResponse))),
            };
            let Some(outcome) = outcome else {
                phase = phase.next(CycleEvent::Interrupted);
                self.audit.append_info("interrupt received; abandoning enrollment");
                debug_assert!(phase.is_terminal());
                return Ok(EnrollOutcome::Interrupted);
            };

            match outcome {
                Ok(result) => {
                    phase = phase.next(CycleEvent::ResponseAccepted);
                    self.write_credentials(&result)?;
                    self.audit
                        .append_info("enrollment complete; credentials written");
                    debug_assert!(phase.is_terminal());
                    return Ok(EnrollOutcome::Enrolled);
                }
                Err(err) => {
                    phase = phase.next(CycleEvent::CycleFailed);
                    tracing::error!("enrollment cycle failed: {err}");

                    if policy.check(Utc::now().timestamp()) == PolicyDecision::Terminate {
                        self.audit
                            .append_error("terminating instance after enrollment failures");
                        if let Err(e) = controller.power_off().await {
                            tracing::error!("power off failed: {e}");
                        }
                        return Ok(EnrollOutcome::TerminatedByPolicy);
                    }

                    let now = Instant::now();
                    let pause = schedule.pause_after(now - cycle_started, now);
                    if !pause.is_zero() {
                        tracing::info!(
                            seconds = pause.as_secs(),
                            "sleeping before next enrollment attempt"
                        );
                        tokio::select! {
                            _ = interrupt.recv() => {
                                phase = phase.next(CycleEvent::Interrupted);
                                self.audit.append_info("interrupt received; abandoning enrollment");
                                debug_assert!(phase.is_terminal());
                                return Ok(EnrollOutcome::Interrupted);
                            }
                            _ = tokio::time::sleep(pause) => {}
                        }
                    }
                    phase = phase.next(CycleEvent::BackoffElapsed);
                    schedule.advance();
                }
            }
        }
    }

    /// One full cycle: publish, pre-wait, listen.
    async fn cycle(
        &self,
        broker: &dyn BrokerClient,
        wait: Duration,
        phase: &mut Phase,
    ) -> Result<EnrollmentResult, CycleError> {
        let timestamp = Utc::now().timestamp();
        tracing::info!(
            token_id = self.config.token_id,
            timestamp,
            "requesting enrollment"
        );
        self.publish_request(broker, timestamp).await?;
        *phase = phase.next(CycleEvent::RequestPublished);

        tokio::time::sleep(self.config.timing.pre_wait).await;

        tracing::info!(
            wait_secs = wait.as_secs(),
            "fetching enrollment response"
        );
        self.fetch_result(broker, timestamp, wait).await
    }

    /// Publish one request on a transient connection under the
    /// enrollment credentials. Fire-and-forget.
    async fn publish_request(
        &self,
        broker: &dyn BrokerClient,
        timestamp: i64,
    ) -> Result<(), CycleError> {
        let coords = self
            .config
            .coordinates
            .clone()
            .with_credentials(ENROLL_USER, ENROLL_PASSWORD);
        let mut conn = broker.connect(&coords).await?;

        let request = self.build_request(timestamp);
        let payload = serde_json::to_vec(&request).expect("enrollment request always serializes");
        let published = conn
            .publish(&Exchange::direct(ENROLLMENT_EXCHANGE), &payload)
            .await;
        conn.close().await;
        published?;
        Ok(())
    }

    fn build_request(&self, timestamp: i64) -> EnrollmentRequest {
        EnrollmentRequest {
            protocol_version: PROTOCOL_VERSION,
            agent_identity: identity::agent_identity(self.config.token_id, &self.config.secret),
            timestamp,
            token_id: self.config.token_id,
            verifier: identity::create_verifier(
                self.config.token_id,
                &self.config.secret,
                timestamp,
            ),
            host: self.config.coordinates.host_list(),
            port: self.config.coordinates.port_list(),
        }
    }

    /// Listen for the result, rerouting once through reversed
    /// coordinates if the predicted queue does not exist yet.
    async fn fetch_result(
        &self,
        broker: &dyn BrokerClient,
        timestamp: i64,
        wait: Duration,
    ) -> Result<EnrollmentResult, CycleError> {
        let mut coords = self.config.coordinates.clone();
        let mut rerouted = false;
        loop {
            match self.listen(broker, &coords, timestamp, wait).await {
                Err(CycleError::Transport(TransportError::QueueNotFound(queue)))
                    if !rerouted =>
                {
                    rerouted = true;
                    tracing::info!(
                        %queue,
                        "queue not found; retrying fetch with reversed coordinates"
                    );
                    coords = coords.reversed();
                    tokio::time::sleep(self.config.timing.reroute_pause).await;
                }
                other => return other,
            }
        }
    }

    /// Subscribe to the predicted queue and wait up to `wait` for a
    /// result echoing `timestamp`. A corrupted or misdirected packet
    /// flips the subscription into drain mode until teardown.
    async fn listen(
        &self,
        broker: &dyn BrokerClient,
        coords: &BrokerCoordinates,
        timestamp: i64,
        wait: Duration,
    ) -> Result<EnrollmentResult, CycleError> {
        let mut conn = broker.connect(coords).await?;
        let queue = QueueDescriptor::existing_durable(identity::predict_queue_name(
            self.config.token_id,
            &self.config.secret,
        ));
        match conn.subscribe(&queue).await {
            Ok(()) => {}
            Err(e) => {
                conn.close().await;
                return Err(e.into());
            }
        }

        let waited = tokio::time::timeout(
            wait,
            Self::consume(conn.as_mut(), &self.config.secret, timestamp),
        )
        .await;
        conn.close().await;

        match waited {
            Ok(inner) => inner,
            Err(_elapsed) => Err(CycleError::NoResponse),
        }
    }

    async fn consume(
        conn: &mut dyn BrokerConnection,
        secret: &Secret,
        timestamp: i64,
    ) -> Result<EnrollmentResult, CycleError> {
        let mut drain = false;
        loop {
            match conn.next_message().await {
                Ok(Some(bytes)) => {
                    if drain {
                        tracing::info!("discarding message in drain mode after a bad packet");
                        continue;
                    }
                    match ResultEnvelope::open(&bytes, secret) {
                        Ok(result) if result.timestamp == timestamp => {
                            tracing::info!("enrollment response received");
                            return Ok(result);
                        }
                        Ok(result) => {
                            tracing::error!(
                                expected = timestamp,
                                got = result.timestamp,
                                "wrong timestamp on enrollment result"
                            );
                            drain = true;
                        }
                        Err(e) => {
                            tracing::error!("received bad result packet: {e}");
                            drain = true;
                        }
                    }
                }
                Ok(None) => return Err(CycleError::ConnectionLost),
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Persist the issued credentials verbatim.
    fn write_credentials(&self, result: &EnrollmentResult) -> Result<(), EnrollError> {
        let dir = &self.config.certs_dir;
        fs::create_dir_all(dir)?;
        fs::write(dir.join("mapper.cert"), &result.mapper_cert)?;
        fs::write(dir.join("instance.cert"), &result.id_cert)?;
        fs::write(dir.join("instance.key"), &result.id_key)?;
        Ok(())
    }
}
