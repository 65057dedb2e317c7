//! The wire protocol for the peer RPC surface: one enum, one variant per
//! phase, as a request/response pair suited to point-to-point per-peer
//! calls.

use crate::acceptor::{AcceptResponse, PrepareResponse};
use crate::types::{BallotNumber, PaxosValue, Seq};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RpcRequest {
    Prepare { seq: Seq, ballot: BallotNumber },
    Accept { seq: Seq, ballot: BallotNumber, value: PaxosValue },
    Learn { seq: Seq, value: PaxosValue },
    LearnedSince { seq: Seq },
    LatestSequence,
    Ping,
    GetUuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RpcResponse {
    Prepare(PrepareResponse),
    Accept(AcceptResponse),
    Learn,
    LearnedSince(Vec<PaxosValue>),
    LatestSequence(Option<Seq>),
    Ping(bool),
    Uuid(uuid::Uuid),
}
