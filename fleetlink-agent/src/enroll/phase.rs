//! Explicit enrollment phase transitions.
//!
//! The engine drives IO; this table decides where each cycle event takes
//! the machine, so the control flow stays inspectable without a live
//! transport.

/// Why the machine aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortCause {
    /// The retry budget's wall-clock deadline passed.
    Deadline,
    /// An external interrupt arrived.
    Interrupted,
}

/// Phases of an enrollment run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Not yet started.
    Idle,
    /// Publishing the enrollment request.
    Requesting,
    /// Listening on the predicted response queue.
    AwaitingResponse,
    /// Waiting out the backoff before the next cycle.
    Retrying,
    /// Certificates received and validated.
    Succeeded,
    /// Run abandoned; no certificates written.
    Aborted(AbortCause),
}

/// Events produced while driving a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleEvent {
    /// A new cycle began; the request is being published.
    CycleStarted,
    /// Publish completed; listening begins after the pre-wait.
    RequestPublished,
    /// A response with the in-flight timestamp was accepted.
    ResponseAccepted,
    /// The cycle failed (no response, stale response drained, transport
    /// error); backoff follows.
    CycleFailed,
    /// The backoff pause elapsed.
    BackoffElapsed,
    /// The deadline passed.
    DeadlineExceeded,
    /// An interrupt arrived.
    Interrupted,
}

impl Phase {
    /// The phase after `event`. Terminal phases absorb every event.
    #[must_use]
    pub fn next(self, event: CycleEvent) -> Phase {
        use CycleEvent::*;
        match (self, event) {
            (Phase::Succeeded, _) | (Phase::Aborted(_), _) => self,
            (_, Interrupted) => Phase::Aborted(AbortCause::Interrupted),
            (_, DeadlineExceeded) => Phase::Aborted(AbortCause::Deadline),
            (_, CycleStarted) => Phase::Requesting,
            (Phase::Requesting, RequestPublished) => Phase::AwaitingResponse,
            (Phase::AwaitingResponse, ResponseAccepted) => Phase::Succeeded,
            (_, CycleFailed) => Phase::Retrying,
            (Phase::Retrying, BackoffElapsed) => Phase::Retrying,
            // Out-of-order events leave the phase alone.
            _ => self,
        }
    }

    /// True for `Succeeded` and `Aborted`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Succeeded | Phase::Aborted(_))
    }
}
