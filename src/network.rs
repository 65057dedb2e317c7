//! The network client and quorum checker: one mechanism, fan a request out
//! to every peer on its own thread, and return as soon as a predicate over
//! the accumulated responses holds, all peers have answered, or a deadline
//! elapses.
//!
//! One OS thread per peer plus `std::sync::mpsc`, no async runtime; a
//! late or unresponsive peer's thread is simply detached rather than
//! joined.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::error::PeerCallError;
use crate::peer::Peer;

/// The outcome of a `collect_until` call: every peer that answered, split
/// into successes and failures. Still-outstanding peers at the time the
/// predicate/deadline fired are simply absent from both lists -- their
/// worker threads are detached, never awaited (cancellation policy in
/// section 4.4/5).
pub struct CollectedResponses<R> {
    pub successes: Vec<(Uuid, R)>,
    pub failures: Vec<(Uuid, PeerCallError)>,
}

impl<R> CollectedResponses<R> {
    pub fn has_quorum(&self, quorum_size: usize) -> bool {
        self.successes.len() >= quorum_size
    }
}

/// Dispatches `request_fn` to every peer on its own thread, and returns
/// as soon as `predicate(successes_so_far)` holds, every peer has
/// responded (success or failure), or `deadline` elapses.
pub fn collect_until<R, F>(
    peers: &[Arc<dyn Peer>],
    deadline: Instant,
    request_fn: F,
    predicate: impl Fn(&[(Uuid, R)]) -> bool,
) -> CollectedResponses<R>
where
    R: Send + 'static,
    F: Fn(&dyn Peer, Duration) -> Result<R, PeerCallError> + Send + Sync + 'static,
{
    let total = peers.len();
    let (tx, rx) = mpsc::channel();
    let request_fn = Arc::new(request_fn);

    for peer in peers {
        let peer = Arc::clone(peer);
        let tx = tx.clone();
        let request_fn = Arc::clone(&request_fn);
        thread::spawn(move || {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let uuid = peer.uuid();
            let result = request_fn(peer.as_ref(), remaining);
            // The receiver may already be gone if collect_until returned;
            // a dropped late reply is exactly the "detached, never
            // awaited" cancellation policy.
            let _ = tx.send((uuid, result));
        });
    }
    drop(tx);

    let mut successes = Vec::new();
    let mut failures = Vec::new();
    loop {
        if successes.len() + failures.len() == total {
            break;
        }
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        match rx.recv_timeout(deadline - now) {
            Ok((uuid, Ok(response))) => {
                successes.push((uuid, response));
                if predicate(&successes) {
                    break;
                }
            }
            Ok((uuid, Err(e))) => failures.push((uuid, e)),
            Err(mpsc::RecvTimeoutError::Timeout) => break,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    CollectedResponses { successes, failures }
}

/// Majority size for a cluster of `peer_count` nodes (including self).
pub fn quorum_size(peer_count: usize) -> usize {
    peer_count / 2 + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acceptor::{AcceptResponse, PrepareResponse};
    use crate::types::{BallotNumber, PaxosValue, Seq};
    use std::time::Duration;

    struct StubPeer {
        uuid: Uuid,
        delay: Duration,
        fail: bool,
    }

    impl Peer for StubPeer {
        fn uuid(&self) -> Uuid {
            self.uuid
        }
        fn prepare(&self, _seq: Seq, _ballot: BallotNumber, _deadline: Duration) -> Result<PrepareResponse, PeerCallError> {
            thread::sleep(self.delay);
            if self.fail {
                Err(PeerCallError::Timeout(self.uuid))
            } else {
                Ok(PrepareResponse::Promise {
                    promised: BallotNumber::bottom(),
                    previously_accepted: None,
                })
            }
        }
        fn accept(
            &self,
            _seq: Seq,
            _ballot: BallotNumber,
            _value: PaxosValue,
            _deadline: Duration,
        ) -> Result<AcceptResponse, PeerCallError> {
            unimplemented!()
        }
        fn learn(&self, _seq: Seq, _value: PaxosValue, _deadline: Duration) -> Result<(), PeerCallError> {
            unimplemented!()
        }
        fn learned_values_since(&self, _seq: Seq, _deadline: Duration) -> Result<Vec<PaxosValue>, PeerCallError> {
            unimplemented!()
        }
        fn latest_sequence_prepared_or_accepted(&self, _deadline: Duration) -> Result<Option<Seq>, PeerCallError> {
            unimplemented!()
        }
        fn ping(&self, _deadline: Duration) -> Result<bool, PeerCallError> {
            unimplemented!()
        }
        fn get_uuid(&self, _deadline: Duration) -> Result<Uuid, PeerCallError> {
            Ok(self.uuid)
        }
    }

    #[test]
    fn stops_as_soon_as_quorum_predicate_holds() {
        let peers: Vec<Arc<dyn Peer>> = vec![
            Arc::new(StubPeer { uuid: Uuid::new_v4(), delay: Duration::from_millis(0), fail: false }),
            Arc::new(StubPeer { uuid: Uuid::new_v4(), delay: Duration::from_millis(0), fail: false }),
            Arc::new(StubPeer { uuid: Uuid::new_v4(), delay: Duration::from_secs(5), fail: false }),
        ];
        let deadline = Instant::now() + Duration::from_secs(2);
        let result = collect_until(
            &peers,
            deadline,
            |peer, deadline| peer.prepare(0, BallotNumber::bottom(), deadline),
            |successes| successes.len() >= 2,
        );
        assert_eq!(result.successes.len(), 2);
    }

    #[test]
    fn one_slow_peer_does_not_block_the_others() {
        let start = Instant::now();
        let peers: Vec<Arc<dyn Peer>> = vec![
            Arc::new(StubPeer { uuid: Uuid::new_v4(), delay: Duration::from_millis(0), fail: false }),
            Arc::new(StubPeer { uuid: Uuid::new_v4(), delay: Duration::from_secs(10), fail: false }),
        ];
        let deadline = Instant::now() + Duration::from_millis(200);
        let result = collect_until(
            &peers,
            deadline,
            |peer, deadline| peer.prepare(0, BallotNumber::bottom(), deadline),
            |successes| successes.len() >= 1,
        );
        assert_eq!(result.successes.len(), 1);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn failures_are_recorded_separately_from_successes() {
        let peers: Vec<Arc<dyn Peer>> = vec![
            Arc::new(StubPeer { uuid: Uuid::new_v4(), delay: Duration::from_millis(0), fail: true }),
            Arc::new(StubPeer { uuid: Uuid::new_v4(), delay: Duration::from_millis(0), fail: false }),
        ];
        let deadline = Instant::now() + Duration::from_secs(1);
        let result = collect_until(
            &peers,
            deadline,
            |peer, deadline| peer.prepare(0, BallotNumber::bottom(), deadline),
            |successes| successes.len() >= 2,
        );
        assert_eq!(result.successes.len(), 1);
        assert_eq!(result.failures.len(), 1);
    }
}
