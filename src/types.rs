//! Core data model shared by every component: sequence numbers, ballots,
//! Paxos values and the leadership token/state the election service hands
//! back to callers.

use uuid::Uuid;

/// A Paxos round number. Monotonically increasing once rounds begin.
pub type Seq = i64;

/// Sentinel meaning "no round has yet occurred". The next proposed round
/// after the sentinel is `0`.
pub const NO_LOG_ENTRY: Seq = -1;

/// A Paxos ballot: a per-proposer-monotonic number with the proposer's
/// UUID as a total-order tiebreaker so that two distinct proposers can
/// never produce equal ballots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BallotNumber {
    pub number: u64,
    pub proposer_uuid: Uuid,
}

impl BallotNumber {
    pub fn bottom() -> Self {
        BallotNumber {
            number: 0,
            proposer_uuid: Uuid::nil(),
        }
    }
}

/// The value a Paxos round decides on: the identity of the leader for that
/// round, plus an opaque payload that is never interpreted by this crate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaxosValue {
    pub round: Seq,
    pub leader_uuid: Uuid,
    pub payload: Option<Vec<u8>>,
}

impl PaxosValue {
    pub fn for_leader(round: Seq, leader_uuid: Uuid) -> Self {
        PaxosValue {
            round,
            leader_uuid,
            payload: None,
        }
    }

    /// The anonymous value proposed by `step_down`: a leader identity that
    /// can never belong to a real peer, since peers are rejected at
    /// startup if they try to register the nil UUID as their own identity.
    pub fn anonymous(round: Seq) -> Self {
        PaxosValue {
            round,
            leader_uuid: Uuid::nil(),
            payload: None,
        }
    }
}

/// An opaque handle representing "I was leader at `seq = round`", issued
/// by `determine_leadership_state` and re-validated by `is_still_leading`.
/// Confirmed only at the moment of issuance; staleness is the caller's
/// problem to re-check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    value: PaxosValue,
}

impl Token {
    pub(crate) fn new(value: PaxosValue) -> Self {
        Token { value }
    }

    pub fn round(&self) -> Seq {
        self.value.round
    }

    pub fn leader_uuid(&self) -> Uuid {
        self.value.leader_uuid
    }

    pub(crate) fn value(&self) -> &PaxosValue {
        &self.value
    }
}

/// The status of a leadership check, whether for this node's own state or
/// for a previously issued token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LeadershipStatus {
    Leading,
    NotLeading,
    NoQuorum,
}

/// A snapshot of this node's leadership state, derived fresh on every call
/// to `determine_leadership_state` -- never stored.
#[derive(Clone, Debug)]
pub struct LeadershipState {
    pub greatest_learned: Option<PaxosValue>,
    pub status: LeadershipStatus,
    pub confirmed_token: Option<Token>,
}
