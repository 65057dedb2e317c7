//! Error taxonomy. Recoverable failures are absorbed inside the election
//! loop and only observed through the event recorder; invariant
//! violations and misconfiguration are fatal and are the only things this
//! crate returns as `Err` (or panics on, for a truly unrecoverable
//! agreement violation in the learner).

use std::fmt;

use uuid::Uuid;

use crate::types::{BallotNumber, Seq};

/// Errors that can surface out of the election service to a caller.
#[derive(Debug, thiserror::Error)]
pub enum LeaderElectionError {
    #[error("log corruption detected at seq {seq}: {detail}")]
    LogCorruption { seq: Seq, detail: String },

    #[error("misconfiguration: {0}")]
    Misconfiguration(String),

    #[error("interrupted while blocking on leadership")]
    Interrupted,

    #[error("service not available: could not reach quorum")]
    ServiceNotAvailable,

    #[error("configuration error: {0}")]
    Config(String),
}

/// Errors from a single RPC to a single peer. Transport-level only --
/// these never indicate a Paxos-protocol rejection, which is carried in
/// the response value itself (`PrepareResponse::Nack`, etc.).
#[derive(Debug, Clone, thiserror::Error)]
pub enum PeerCallError {
    #[error("timed out waiting for peer {0}")]
    Timeout(Uuid),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Which Paxos phase a round failed in, for event-recorder context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Prepare,
    Accept,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Prepare => write!(f, "prepare"),
            Phase::Accept => write!(f, "accept"),
        }
    }
}

/// Why a Paxos round failed to produce a chosen value. Recovered
/// internally by the caller: retry with a higher ballot, or observe that
/// someone else's round was learned instead.
#[derive(Debug, Clone)]
pub enum RoundFailure {
    /// Fewer than a quorum of peers responded successfully before the
    /// round's deadline.
    NoQuorum {
        phase: Phase,
        successes: usize,
        quorum_size: usize,
    },
    /// A peer rejected our ballot because it had already promised or
    /// accepted a higher one.
    Preempted { phase: Phase, rival: BallotNumber },
}

impl fmt::Display for RoundFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundFailure::NoQuorum {
                phase,
                successes,
                quorum_size,
            } => write!(
                f,
                "no quorum in {} phase: {}/{} required",
                phase, successes, quorum_size
            ),
            RoundFailure::Preempted { phase, rival } => write!(
                f,
                "preempted in {} phase by ballot {}@{}",
                phase, rival.number, rival.proposer_uuid
            ),
        }
    }
}
