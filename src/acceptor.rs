//! The acceptor: the Paxos Phase 1b/2b local state machine, reading and
//! writing its promises and accepted values through a `DurableLog`.

use std::sync::atomic::{AtomicI64, Ordering};

use crate::durable_log::DurableLog;
use crate::error::LeaderElectionError;
use crate::types::{BallotNumber, PaxosValue, Seq, NO_LOG_ENTRY};

/// The durable per-`seq` acceptor record: the highest ballot ever
/// promised, and the last accepted `(ballot, value)` pair if any.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AcceptorRecord {
    pub promised: Option<BallotNumber>,
    pub accepted: Option<(BallotNumber, PaxosValue)>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrepareResponse {
    Promise {
        promised: BallotNumber,
        previously_accepted: Option<(BallotNumber, PaxosValue)>,
    },
    Nack {
        promised: BallotNumber,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcceptResponse {
    Ack { accepted: BallotNumber },
    Nack { promised: BallotNumber },
}

pub struct Acceptor<L: DurableLog<AcceptorRecord>> {
    log: L,
    // Cached high-water mark so `latest_sequence_prepared_or_accepted`
    // does not have to scan the whole log on every call from the
    // coalescing verifier.
    high_water_mark: AtomicI64,
}

impl<L: DurableLog<AcceptorRecord>> Acceptor<L> {
    pub fn new(log: L) -> Result<Self, LeaderElectionError> {
        let high_water_mark = log.greatest_seq()?.unwrap_or(NO_LOG_ENTRY);
        Ok(Acceptor {
            log,
            high_water_mark: AtomicI64::new(high_water_mark),
        })
    }

    fn bump_high_water_mark(&self, seq: Seq) {
        self.high_water_mark.fetch_max(seq, Ordering::SeqCst);
    }

    pub fn prepare(&self, seq: Seq, n: BallotNumber) -> Result<PrepareResponse, LeaderElectionError> {
        let response = self.log.read_modify_write(seq, |existing| {
            let mut record = existing.unwrap_or_default();
            if record.promised.map_or(true, |promised| n > promised) {
                record.promised = Some(n);
                let previously_accepted = record.accepted.clone();
                (
                    Some(record),
                    PrepareResponse::Promise {
                        promised: n,
                        previously_accepted,
                    },
                )
            } else {
                let promised = record.promised.unwrap_or_else(BallotNumber::bottom);
                (None, PrepareResponse::Nack { promised })
            }
        })?;
        if let PrepareResponse::Promise { .. } = response {
            self.bump_high_water_mark(seq);
        }
        Ok(response)
    }

    pub fn accept(
        &self,
        seq: Seq,
        n: BallotNumber,
        value: PaxosValue,
    ) -> Result<AcceptResponse, LeaderElectionError> {
        let response = self.log.read_modify_write(seq, |existing| {
            let mut record = existing.unwrap_or_default();
            if record.promised.map_or(true, |promised| n >= promised) {
                record.promised = Some(n);
                record.accepted = Some((n, value));
                (Some(record), AcceptResponse::Ack { accepted: n })
            } else {
                let promised = record.promised.unwrap_or_else(BallotNumber::bottom);
                (None, AcceptResponse::Nack { promised })
            }
        })?;
        if let AcceptResponse::Ack { .. } = response {
            self.bump_high_water_mark(seq);
        }
        Ok(response)
    }

    pub fn latest_sequence_prepared_or_accepted(&self) -> Option<Seq> {
        match self.high_water_mark.load(Ordering::SeqCst) {
            NO_LOG_ENTRY => None,
            seq => Some(seq),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::durable_log::InMemoryLog;
    use uuid::Uuid;

    fn ballot(n: u64) -> BallotNumber {
        BallotNumber {
            number: n,
            proposer_uuid: Uuid::new_v4(),
        }
    }

    #[test]
    fn prepare_promises_increasing_ballots_and_nacks_others() {
        let acceptor = Acceptor::new(InMemoryLog::new()).unwrap();
        let low = ballot(1);
        let high = ballot(5);

        let resp = acceptor.prepare(0, high).unwrap();
        assert_eq!(
            resp,
            PrepareResponse::Promise {
                promised: high,
                previously_accepted: None
            }
        );

        let resp = acceptor.prepare(0, low).unwrap();
        assert_eq!(resp, PrepareResponse::Nack { promised: high });
    }

    #[test]
    fn accept_returns_previously_accepted_value_on_next_prepare() {
        let acceptor = Acceptor::new(InMemoryLog::new()).unwrap();
        let n = ballot(3);
        let value = PaxosValue::for_leader(0, Uuid::new_v4());

        acceptor.prepare(0, n).unwrap();
        let accept_resp = acceptor.accept(0, n, value.clone()).unwrap();
        assert_eq!(accept_resp, AcceptResponse::Ack { accepted: n });

        let higher = ballot(4);
        let resp = acceptor.prepare(0, higher).unwrap();
        assert_eq!(
            resp,
            PrepareResponse::Promise {
                promised: higher,
                previously_accepted: Some((n, value))
            }
        );
    }

    #[test]
    fn latest_sequence_tracks_the_high_water_mark() {
        let acceptor = Acceptor::new(InMemoryLog::new()).unwrap();
        assert_eq!(acceptor.latest_sequence_prepared_or_accepted(), None);
        acceptor.prepare(4, ballot(1)).unwrap();
        acceptor.prepare(2, ballot(1)).unwrap();
        assert_eq!(acceptor.latest_sequence_prepared_or_accepted(), Some(4));
    }

    #[test]
    fn concurrent_prepares_for_the_same_seq_never_let_the_promise_regress() {
        use std::sync::{Arc, Barrier};
        use std::thread;

        let acceptor = Arc::new(Acceptor::new(InMemoryLog::new()).unwrap());
        let n = 50;
        let barrier = Arc::new(Barrier::new(n));
        let handles: Vec<_> = (1..=n as u64)
            .map(|i| {
                let acceptor = Arc::clone(&acceptor);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    acceptor.prepare(0, ballot(i))
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        // The highest-numbered ballot raced in (n) must be the one left
        // standing. A non-atomic read-then-write can lose an update and
        // leave a lower ballot promised; probing with a ballot number
        // below all of them always Nacks and echoes back whatever is
        // actually stored.
        match acceptor.prepare(0, ballot(0)).unwrap() {
            PrepareResponse::Nack { promised } => assert_eq!(promised.number, n as u64),
            PrepareResponse::Promise { .. } => panic!("ballot 0 must never out-promise a concurrent higher ballot"),
        }
    }
}
