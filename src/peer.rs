//! The peer capability set (C4): a dispatch-table view of "something we
//! can ask to prepare/accept/learn/ping", implemented either by a direct
//! in-process call to this node's own acceptor/learner (`LocalPeer`) or
//! by a transport round-trip to a remote node (`RemotePeer`).
//!
//! A sum type over `{self, remote}` dispatched via a table rather than
//! inheritance; `Peer` is that table, and the election service holds
//! `Vec<Arc<dyn Peer>>` with exactly one `LocalPeer` entry representing
//! itself. This breaks the cyclic "the local node is also a peer"
//! ownership a naive design would otherwise have.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::acceptor::{AcceptResponse, Acceptor, PrepareResponse};
use crate::durable_log::DurableLog;
use crate::error::PeerCallError;
use crate::learner::Learner;
use crate::message::{RpcRequest, RpcResponse};
use crate::transport::{PeerAddress, Transport};
use crate::types::{BallotNumber, PaxosValue, Seq};

pub trait Peer: Send + Sync {
    fn uuid(&self) -> Uuid;

    fn prepare(&self, seq: Seq, ballot: BallotNumber, deadline: Duration) -> Result<PrepareResponse, PeerCallError>;

    fn accept(
        &self,
        seq: Seq,
        ballot: BallotNumber,
        value: PaxosValue,
        deadline: Duration,
    ) -> Result<AcceptResponse, PeerCallError>;

    fn learn(&self, seq: Seq, value: PaxosValue, deadline: Duration) -> Result<(), PeerCallError>;

    fn learned_values_since(&self, seq: Seq, deadline: Duration) -> Result<Vec<PaxosValue>, PeerCallError>;

    fn latest_sequence_prepared_or_accepted(&self, deadline: Duration) -> Result<Option<Seq>, PeerCallError>;

    /// True iff this peer believes *it itself* is the leader for its own
    /// greatest-learned value.
    fn ping(&self, deadline: Duration) -> Result<bool, PeerCallError>;

    fn get_uuid(&self, deadline: Duration) -> Result<Uuid, PeerCallError>;
}

/// The self-entry in the peer list: short-circuits straight to this
/// node's own acceptor/learner, never touching the network.
pub struct LocalPeer<AL, LL>
where
    AL: DurableLog<crate::acceptor::AcceptorRecord>,
    LL: DurableLog<PaxosValue>,
{
    uuid: Uuid,
    acceptor: Arc<Acceptor<AL>>,
    learner: Arc<Learner<LL>>,
}

impl<AL, LL> LocalPeer<AL, LL>
where
    AL: DurableLog<crate::acceptor::AcceptorRecord>,
    LL: DurableLog<PaxosValue>,
{
    pub fn new(uuid: Uuid, acceptor: Arc<Acceptor<AL>>, learner: Arc<Learner<LL>>) -> Self {
        LocalPeer { uuid, acceptor, learner }
    }
}

/// A log-corruption error detected while serving a local peer call is
/// fatal to this process: there is no remote to blame and no recovery
/// path, so it aborts the process rather than being reported as an
/// ordinary `PeerCallError`.
fn unwrap_local<T>(result: Result<T, crate::error::LeaderElectionError>) -> T {
    result.unwrap_or_else(|e| panic!("local durable log failure: {}", e))
}

impl<AL, LL> Peer for LocalPeer<AL, LL>
where
    AL: DurableLog<crate::acceptor::AcceptorRecord>,
    LL: DurableLog<PaxosValue>,
{
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn prepare(&self, seq: Seq, ballot: BallotNumber, _deadline: Duration) -> Result<PrepareResponse, PeerCallError> {
        Ok(unwrap_local(self.acceptor.prepare(seq, ballot)))
    }

    fn accept(
        &self,
        seq: Seq,
        ballot: BallotNumber,
        value: PaxosValue,
        _deadline: Duration,
    ) -> Result<AcceptResponse, PeerCallError> {
        Ok(unwrap_local(self.acceptor.accept(seq, ballot, value)))
    }

    fn learn(&self, seq: Seq, value: PaxosValue, _deadline: Duration) -> Result<(), PeerCallError> {
        unwrap_local(self.learner.learn(seq, value));
        Ok(())
    }

    fn learned_values_since(&self, seq: Seq, _deadline: Duration) -> Result<Vec<PaxosValue>, PeerCallError> {
        Ok(unwrap_local(self.learner.get_learned_values_since(seq)))
    }

    fn latest_sequence_prepared_or_accepted(&self, _deadline: Duration) -> Result<Option<Seq>, PeerCallError> {
        Ok(self.acceptor.latest_sequence_prepared_or_accepted())
    }

    fn ping(&self, _deadline: Duration) -> Result<bool, PeerCallError> {
        let greatest = unwrap_local(self.learner.get_greatest_learned_value());
        Ok(matches!(greatest, Some(v) if v.leader_uuid == self.uuid))
    }

    fn get_uuid(&self, _deadline: Duration) -> Result<Uuid, PeerCallError> {
        Ok(self.uuid)
    }
}

/// A peer reached over a `Transport`. The remote's UUID is learned lazily
/// (via `get_uuid`/the initial probe) if not supplied by configuration.
pub struct RemotePeer {
    address: PeerAddress,
    uuid: Uuid,
    transport: Arc<dyn Transport>,
}

impl RemotePeer {
    pub fn new(address: PeerAddress, uuid: Uuid, transport: Arc<dyn Transport>) -> Self {
        RemotePeer { address, uuid, transport }
    }

    fn call(&self, request: RpcRequest, deadline: Duration) -> Result<RpcResponse, PeerCallError> {
        self.transport.call(&self.address, request, deadline)
    }
}

macro_rules! expect_variant {
    ($response:expr, $variant:path) => {
        match $response {
            $variant(inner) => Ok(inner),
            other => Err(PeerCallError::Transport(format!(
                "unexpected response variant: {:?}",
                other
            ))),
        }
    };
}

impl Peer for RemotePeer {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn prepare(&self, seq: Seq, ballot: BallotNumber, deadline: Duration) -> Result<PrepareResponse, PeerCallError> {
        let response = self.call(RpcRequest::Prepare { seq, ballot }, deadline)?;
        expect_variant!(response, RpcResponse::Prepare)
    }

    fn accept(
        &self,
        seq: Seq,
        ballot: BallotNumber,
        value: PaxosValue,
        deadline: Duration,
    ) -> Result<AcceptResponse, PeerCallError> {
        let response = self.call(RpcRequest::Accept { seq, ballot, value }, deadline)?;
        expect_variant!(response, RpcResponse::Accept)
    }

    fn learn(&self, seq: Seq, value: PaxosValue, deadline: Duration) -> Result<(), PeerCallError> {
        self.call(RpcRequest::Learn { seq, value }, deadline)?;
        Ok(())
    }

    fn learned_values_since(&self, seq: Seq, deadline: Duration) -> Result<Vec<PaxosValue>, PeerCallError> {
        let response = self.call(RpcRequest::LearnedSince { seq }, deadline)?;
        expect_variant!(response, RpcResponse::LearnedSince)
    }

    fn latest_sequence_prepared_or_accepted(&self, deadline: Duration) -> Result<Option<Seq>, PeerCallError> {
        let response = self.call(RpcRequest::LatestSequence, deadline)?;
        expect_variant!(response, RpcResponse::LatestSequence)
    }

    fn ping(&self, deadline: Duration) -> Result<bool, PeerCallError> {
        let response = self.call(RpcRequest::Ping, deadline)?;
        expect_variant!(response, RpcResponse::Ping)
    }

    fn get_uuid(&self, deadline: Duration) -> Result<Uuid, PeerCallError> {
        let response = self.call(RpcRequest::GetUuid, deadline)?;
        expect_variant!(response, RpcResponse::Uuid)
    }
}
