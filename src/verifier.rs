//! The coalescing latest-round verifier: concurrent "is this round still
//! the latest?" queries for the same sequence number share one RPC wave
//! rather than each firing its own. A `Mutex<HashMap<Seq, Arc<Wave>>>` with
//! compute-if-absent under the lock and a `Condvar` signaling the wave's
//! result, matching the locking discipline used everywhere else in this
//! crate.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::network::{self, quorum_size};
use crate::peer::Peer;
use crate::types::{LeadershipStatus, Seq};

struct Wave {
    done: Mutex<Option<LeadershipStatus>>,
    condvar: Condvar,
}

impl Wave {
    fn new() -> Self {
        Wave {
            done: Mutex::new(None),
            condvar: Condvar::new(),
        }
    }

    fn finish(&self, status: LeadershipStatus) {
        let mut done = self.done.lock().expect("wave mutex poisoned");
        if done.is_none() {
            *done = Some(status);
            self.condvar.notify_all();
        }
    }

    fn wait(&self) -> LeadershipStatus {
        let mut done = self.done.lock().expect("wave mutex poisoned");
        while done.is_none() {
            done = self.condvar.wait(done).expect("wave mutex poisoned");
        }
        done.unwrap()
    }
}

/// Merges concurrent `is_latest_round(seq)` callers asking about the same
/// `seq` into a single in-flight RPC wave; callers for a different `seq`
/// start a new wave immediately. Results are never cached across waves --
/// every wave re-asks the quorum fresh.
pub struct LatestRoundVerifier {
    waves: Mutex<HashMap<Seq, Arc<Wave>>>,
    per_call_deadline: Duration,
}

impl LatestRoundVerifier {
    pub fn new(per_call_deadline: Duration) -> Self {
        LatestRoundVerifier {
            waves: Mutex::new(HashMap::new()),
            per_call_deadline,
        }
    }

    pub fn is_latest_round(&self, seq: Seq, peers: &[Arc<dyn Peer>]) -> LeadershipStatus {
        let (wave, is_leader) = {
            let mut waves = self.waves.lock().expect("wave table poisoned");
            match waves.get(&seq) {
                Some(wave) => (Arc::clone(wave), false),
                None => {
                    let wave = Arc::new(Wave::new());
                    waves.insert(seq, Arc::clone(&wave));
                    (wave, true)
                }
            }
        };

        if !is_leader {
            return wave.wait();
        }

        let status = self.run_wave(seq, peers);
        wave.finish(status);
        self.waves.lock().expect("wave table poisoned").remove(&seq);
        status
    }

    fn run_wave(&self, seq: Seq, peers: &[Arc<dyn Peer>]) -> LeadershipStatus {
        let quorum = quorum_size(peers.len());
        let deadline = Instant::now() + self.per_call_deadline;

        let responses = network::collect_until(
            peers,
            deadline,
            |peer, remaining| peer.latest_sequence_prepared_or_accepted(remaining),
            |successes: &[(Uuid, Option<Seq>)]| successes.len() >= quorum,
        );

        if !responses.has_quorum(quorum) {
            return LeadershipStatus::NoQuorum;
        }

        let anyone_ahead = responses
            .successes
            .iter()
            .any(|(_, reported)| reported.map_or(false, |reported_seq| reported_seq > seq));

        if anyone_ahead {
            LeadershipStatus::NotLeading
        } else {
            LeadershipStatus::Leading
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acceptor::{AcceptResponse, Acceptor, PrepareResponse};
    use crate::durable_log::InMemoryLog;
    use crate::error::PeerCallError;
    use crate::types::{BallotNumber, PaxosValue};
    use std::sync::Barrier;
    use std::thread;

    fn peer_with_latest(uuid: Uuid, latest: Option<Seq>) -> Arc<dyn Peer> {
        struct Stub {
            uuid: Uuid,
            latest: Option<Seq>,
        }
        impl Peer for Stub {
            fn uuid(&self) -> Uuid {
                self.uuid
            }
            fn prepare(&self, _: Seq, _: BallotNumber, _: Duration) -> Result<PrepareResponse, PeerCallError> {
                unimplemented!()
            }
            fn accept(&self, _: Seq, _: BallotNumber, _: PaxosValue, _: Duration) -> Result<AcceptResponse, PeerCallError> {
                unimplemented!()
            }
            fn learn(&self, _: Seq, _: PaxosValue, _: Duration) -> Result<(), PeerCallError> {
                unimplemented!()
            }
            fn learned_values_since(&self, _: Seq, _: Duration) -> Result<Vec<PaxosValue>, PeerCallError> {
                unimplemented!()
            }
            fn latest_sequence_prepared_or_accepted(&self, _: Duration) -> Result<Option<Seq>, PeerCallError> {
                Ok(self.latest)
            }
            fn ping(&self, _: Duration) -> Result<bool, PeerCallError> {
                unimplemented!()
            }
            fn get_uuid(&self, _: Duration) -> Result<Uuid, PeerCallError> {
                Ok(self.uuid)
            }
        }
        Arc::new(Stub { uuid, latest })
    }

    #[test]
    fn latest_when_no_peer_reports_a_higher_seq() {
        let verifier = LatestRoundVerifier::new(Duration::from_secs(1));
        let peers = vec![
            peer_with_latest(Uuid::new_v4(), Some(3)),
            peer_with_latest(Uuid::new_v4(), Some(3)),
            peer_with_latest(Uuid::new_v4(), None),
        ];
        assert_eq!(verifier.is_latest_round(3, &peers), LeadershipStatus::Leading);
    }

    #[test]
    fn not_latest_when_a_peer_reports_a_higher_seq() {
        let verifier = LatestRoundVerifier::new(Duration::from_secs(1));
        let peers = vec![
            peer_with_latest(Uuid::new_v4(), Some(3)),
            peer_with_latest(Uuid::new_v4(), Some(4)),
            peer_with_latest(Uuid::new_v4(), Some(3)),
        ];
        assert_eq!(verifier.is_latest_round(3, &peers), LeadershipStatus::NotLeading);
    }

    #[test]
    fn concurrent_callers_for_the_same_seq_share_one_wave() {
        let verifier = Arc::new(LatestRoundVerifier::new(Duration::from_secs(2)));
        let peers: Vec<Arc<dyn Peer>> = vec![
            peer_with_latest(Uuid::new_v4(), Some(5)),
            peer_with_latest(Uuid::new_v4(), Some(5)),
            peer_with_latest(Uuid::new_v4(), Some(5)),
        ];
        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let verifier = Arc::clone(&verifier);
                let peers = peers.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    verifier.is_latest_round(5, &peers)
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), LeadershipStatus::Leading);
        }
    }
}
