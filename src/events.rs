//! The event recorder: a pure observability sink invoked at every branch
//! of the election state machine, structured as a trait rather than ad
//! hoc string formatting at every call site.
//!
//! Implementations must never affect control flow and must never panic
//! out to the caller -- a misbehaving recorder is a bug in the recorder,
//! not a reason to fail an election round.

use std::sync::Mutex;

use uuid::Uuid;

use crate::error::RoundFailure;
use crate::types::Seq;

/// One occurrence worth recording. Kept as a plain enum rather than one
/// method per event so that `InMemoryEventRecorder` (used in tests) can
/// store and assert on a single homogeneous log.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    ProposalAttempted { seq: Seq },
    ProposalFailed { seq: Seq, cause: String },
    PingTimedOut { leader: Uuid },
    PingReturnedFalse { leader: Uuid },
    PingFailed { leader: Uuid, cause: String },
    NoQuorumObserved,
    NotLeadingObserved,
}

pub trait EventRecorder: Send + Sync {
    fn record(&self, event: Event);
}

impl Event {
    pub fn proposal_failed(seq: Seq, cause: &RoundFailure) -> Self {
        Event::ProposalFailed {
            seq,
            cause: cause.to_string(),
        }
    }
}

/// The default recorder: forwards every event to the `log` facade at a
/// level matching its severity, guarded by `log_enabled!`.
#[derive(Default)]
pub struct LoggingEventRecorder;

impl EventRecorder for LoggingEventRecorder {
    fn record(&self, event: Event) {
        match &event {
            Event::ProposalAttempted { seq } => {
                if log::log_enabled!(log::Level::Info) {
                    log::info!("proposing leadership for seq {}", seq);
                }
            }
            Event::ProposalFailed { seq, cause } => {
                log::warn!("proposal for seq {} failed: {}", seq, cause);
            }
            Event::PingTimedOut { leader } => {
                log::warn!("ping to suspected leader {} timed out", leader);
            }
            Event::PingReturnedFalse { leader } => {
                log::info!("suspected leader {} no longer believes it leads", leader);
            }
            Event::PingFailed { leader, cause } => {
                log::warn!("ping to suspected leader {} failed: {}", leader, cause);
            }
            Event::NoQuorumObserved => {
                if log::log_enabled!(log::Level::Debug) {
                    log::debug!("no quorum reachable on this pass");
                }
            }
            Event::NotLeadingObserved => {
                if log::log_enabled!(log::Level::Debug) {
                    log::debug!("not leading; continuing election loop");
                }
            }
        }
    }
}

/// Discards every event. Useful for benchmarks and demos that don't want
/// `env_logger` noise.
#[derive(Default)]
pub struct NoopEventRecorder;

impl EventRecorder for NoopEventRecorder {
    fn record(&self, _event: Event) {}
}

/// Records every event in order, for assertions in tests.
#[derive(Default)]
pub struct InMemoryEventRecorder {
    events: Mutex<Vec<Event>>,
}

impl InMemoryEventRecorder {
    pub fn new() -> Self {
        InMemoryEventRecorder::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().expect("event recorder mutex poisoned").clone()
    }
}

impl EventRecorder for InMemoryEventRecorder {
    fn record(&self, event: Event) {
        self.events.lock().expect("event recorder mutex poisoned").push(event);
    }
}
