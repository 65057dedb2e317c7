//! The two-phase proposer: the classic Paxos shape, gather promises, then
//! gather acceptances, counting against a majority before moving on, as a
//! single blocking call that drives the quorum fan-out itself through
//! `network::collect_until`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::acceptor::{AcceptResponse, PrepareResponse};
use crate::error::{Phase, RoundFailure};
use crate::network::{self, quorum_size};
use crate::peer::Peer;
use crate::types::{BallotNumber, PaxosValue, Seq};

pub struct Proposer {
    local_uuid: Uuid,
    next_ballot_number: AtomicU64,
}

impl Proposer {
    pub fn new(local_uuid: Uuid) -> Self {
        Proposer {
            local_uuid,
            next_ballot_number: AtomicU64::new(1),
        }
    }

    fn next_ballot(&self) -> BallotNumber {
        BallotNumber {
            number: self.next_ballot_number.fetch_add(1, Ordering::SeqCst),
            proposer_uuid: self.local_uuid,
        }
    }

    /// Drives one Paxos round for `seq`, proposing `own_value` if no
    /// acceptor has already accepted something for this round. `peers`
    /// must include the local node's own `LocalPeer` entry, so that local
    /// promise/accept bookkeeping happens through the same quorum path
    /// as remote peers (section 9's cyclic-ownership note).
    pub fn propose(
        &self,
        seq: Seq,
        own_value: PaxosValue,
        peers: &[Arc<dyn Peer>],
        round_deadline: Duration,
    ) -> Result<PaxosValue, RoundFailure> {
        let quorum = quorum_size(peers.len());
        let deadline = Instant::now() + round_deadline;
        let ballot = self.next_ballot();

        let prepare_responses = network::collect_until(
            peers,
            deadline,
            move |peer, remaining| peer.prepare(seq, ballot, remaining),
            |successes: &[(Uuid, PrepareResponse)]| {
                successes
                    .iter()
                    .filter(|(_, r)| matches!(r, PrepareResponse::Promise { .. }))
                    .count()
                    >= quorum
            },
        );

        let promises: Vec<_> = prepare_responses
            .successes
            .iter()
            .filter_map(|(_, r)| match r {
                PrepareResponse::Promise { previously_accepted, .. } => Some(previously_accepted.clone()),
                PrepareResponse::Nack { .. } => None,
            })
            .collect();

        // A minority Nack alongside an already-reached quorum of promises
        // must not abort the round: only treat a Nack as disqualifying once
        // quorum has failed to materialize.
        if promises.len() < quorum {
            if let Some((_, PrepareResponse::Nack { promised })) = prepare_responses
                .successes
                .iter()
                .find(|(_, r)| matches!(r, PrepareResponse::Nack { .. }))
            {
                return Err(RoundFailure::Preempted {
                    phase: Phase::Prepare,
                    rival: *promised,
                });
            }
            return Err(RoundFailure::NoQuorum {
                phase: Phase::Prepare,
                successes: promises.len(),
                quorum_size: quorum,
            });
        }

        let value_to_propose = promises
            .into_iter()
            .flatten()
            .max_by_key(|(ballot, _)| *ballot)
            .map(|(_, value)| value)
            .unwrap_or(own_value);

        let accept_responses = network::collect_until(
            peers,
            deadline,
            {
                let value_to_propose = value_to_propose.clone();
                move |peer, remaining| peer.accept(seq, ballot, value_to_propose.clone(), remaining)
            },
            |successes: &[(Uuid, AcceptResponse)]| {
                successes.iter().filter(|(_, r)| matches!(r, AcceptResponse::Ack { .. })).count() >= quorum
            },
        );

        let acks = accept_responses
            .successes
            .iter()
            .filter(|(_, r)| matches!(r, AcceptResponse::Ack { .. }))
            .count();

        if acks < quorum {
            if let Some((_, AcceptResponse::Nack { promised })) = accept_responses
                .successes
                .iter()
                .find(|(_, r)| matches!(r, AcceptResponse::Nack { .. }))
            {
                return Err(RoundFailure::Preempted {
                    phase: Phase::Accept,
                    rival: *promised,
                });
            }
            return Err(RoundFailure::NoQuorum {
                phase: Phase::Accept,
                successes: acks,
                quorum_size: quorum,
            });
        }

        // Best-effort: fire learn at everyone and don't wait for replies.
        // A learner that misses this will pick the value up via catch-up.
        for peer in peers {
            let peer = Arc::clone(peer);
            let value = value_to_propose.clone();
            std::thread::spawn(move || {
                let _ = peer.learn(seq, value, Duration::from_millis(500));
            });
        }

        Ok(value_to_propose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acceptor::Acceptor;
    use crate::durable_log::InMemoryLog;
    use crate::learner::Learner;
    use crate::peer::LocalPeer;
    use crate::types::NO_LOG_ENTRY;

    fn local_peer(uuid: Uuid) -> Arc<dyn Peer> {
        let acceptor = Arc::new(Acceptor::new(InMemoryLog::new()).unwrap());
        let learner = Arc::new(Learner::new(InMemoryLog::new()).unwrap());
        Arc::new(LocalPeer::new(uuid, acceptor, learner))
    }

    #[test]
    fn a_lone_proposer_wins_an_uncontested_round_against_a_quorum() {
        let my_uuid = Uuid::new_v4();
        let peers: Vec<Arc<dyn Peer>> = vec![
            local_peer(my_uuid),
            local_peer(Uuid::new_v4()),
            local_peer(Uuid::new_v4()),
        ];
        let proposer = Proposer::new(my_uuid);
        let seq = NO_LOG_ENTRY + 1;
        let value = proposer
            .propose(seq, PaxosValue::for_leader(seq, my_uuid), &peers, Duration::from_secs(1))
            .unwrap();
        assert_eq!(value.leader_uuid, my_uuid);
    }

    fn rival_peer(uuid: Uuid, rival_ballot: BallotNumber) -> Arc<dyn Peer> {
        let acceptor = Arc::new(Acceptor::new(InMemoryLog::new()).unwrap());
        acceptor.prepare(0, rival_ballot).unwrap();
        let learner = Arc::new(Learner::new(InMemoryLog::new()).unwrap());
        Arc::new(LocalPeer::new(uuid, acceptor, learner))
    }

    #[test]
    fn a_rival_ballot_preempts_the_round_when_quorum_cannot_be_reached() {
        let my_uuid = Uuid::new_v4();
        let rival_ballot = BallotNumber { number: 1000, proposer_uuid: Uuid::new_v4() };
        // Two of the three peers already promised a higher ballot, so only
        // one fresh peer is left and quorum (2) can never be reached.
        let peers: Vec<Arc<dyn Peer>> = vec![
            local_peer(my_uuid),
            rival_peer(Uuid::new_v4(), rival_ballot),
            rival_peer(Uuid::new_v4(), rival_ballot),
        ];
        let proposer = Proposer::new(my_uuid);
        let result = proposer.propose(0, PaxosValue::for_leader(0, my_uuid), &peers, Duration::from_secs(1));
        assert!(matches!(result, Err(RoundFailure::Preempted { phase: Phase::Prepare, .. })));
    }

    #[test]
    fn a_minority_nack_does_not_abort_a_round_that_still_reaches_quorum() {
        let my_uuid = Uuid::new_v4();
        let rival_ballot = BallotNumber { number: 1000, proposer_uuid: Uuid::new_v4() };
        // Only one of the three peers has a rival promise; the other two
        // fresh peers still let this round reach quorum (2).
        let peers: Vec<Arc<dyn Peer>> = vec![
            local_peer(my_uuid),
            rival_peer(Uuid::new_v4(), rival_ballot),
            local_peer(Uuid::new_v4()),
        ];
        let proposer = Proposer::new(my_uuid);
        let value = proposer
            .propose(0, PaxosValue::for_leader(0, my_uuid), &peers, Duration::from_secs(1))
            .unwrap();
        assert_eq!(value.leader_uuid, my_uuid);
    }
}
