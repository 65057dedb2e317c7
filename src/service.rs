//! The leader election service: the orchestrator wiring together the
//! acceptor, learner, proposer, network quorum collector, and latest-round
//! verifier into a single state machine a node can block on.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use uuid::Uuid;

use crate::durable_log::DurableLog;
use crate::error::LeaderElectionError;
use crate::events::{Event, EventRecorder};
use crate::learner::Learner;
use crate::network::{self, quorum_size};
use crate::peer::Peer;
use crate::proposer::Proposer;
use crate::types::{LeadershipState, LeadershipStatus, PaxosValue, Token, NO_LOG_ENTRY};
use crate::verifier::LatestRoundVerifier;

/// The orchestrator. Generic over the learner's durable-log backend so
/// callers can plug in `InMemoryLog` for tests/demos or `FileLog` for a
/// real deployment, matching `Learner<L>`'s own genericity.
pub struct PaxosLeaderElectionService<L: DurableLog<PaxosValue>> {
    my_uuid: Uuid,
    peers: Vec<Arc<dyn Peer>>,
    learner: Arc<Learner<L>>,
    proposer: Proposer,
    verifier: LatestRoundVerifier,
    uuid_cache: Mutex<HashMap<Uuid, Arc<dyn Peer>>>,
    propose_lock: Mutex<()>,
    events: Arc<dyn EventRecorder>,
    shutdown: AtomicBool,

    update_polling_rate: Duration,
    random_wait_before_proposing_leadership: Duration,
    leader_ping_response_wait: Duration,
    round_deadline: Duration,
}

impl<L: DurableLog<PaxosValue>> PaxosLeaderElectionService<L> {
    /// `peers` must include exactly one entry whose `uuid()` equals
    /// `my_uuid` -- the distinguished `LocalPeer` short-circuit that
    /// breaks the local-node-is-also-a-peer ownership cycle.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        my_uuid: Uuid,
        peers: Vec<Arc<dyn Peer>>,
        learner: Arc<Learner<L>>,
        events: Arc<dyn EventRecorder>,
        update_polling_rate: Duration,
        random_wait_before_proposing_leadership: Duration,
        leader_ping_response_wait: Duration,
        round_deadline: Duration,
    ) -> Self {
        assert!(
            peers.iter().any(|p| p.uuid() == my_uuid),
            "peers must include a LocalPeer entry for this node's own UUID"
        );
        PaxosLeaderElectionService {
            my_uuid,
            peers,
            learner,
            proposer: Proposer::new(my_uuid),
            verifier: LatestRoundVerifier::new(leader_ping_response_wait),
            uuid_cache: Mutex::new(HashMap::new()),
            propose_lock: Mutex::new(()),
            events,
            shutdown: AtomicBool::new(false),
            update_polling_rate,
            random_wait_before_proposing_leadership,
            leader_ping_response_wait,
            round_deadline,
        }
    }

    pub fn get_uuid(&self) -> Uuid {
        self.my_uuid
    }

    /// Requests that any in-progress or future `block_on_becoming_leader`
    /// call stop and return `Interrupted`. Rust has no forced-thread
    /// interruption, so this cooperative flag is the stand-in.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Blocks until this node holds a confirmed leadership token.
    pub fn block_on_becoming_leader(&self) -> Result<Token, LeaderElectionError> {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return Err(LeaderElectionError::Interrupted);
            }
            let state = self.determine_leadership_state()?;
            match state.status {
                LeadershipStatus::Leading => {
                    return Ok(state
                        .confirmed_token
                        .expect("Leading status always carries a confirmed token"));
                }
                LeadershipStatus::NoQuorum => {
                    self.events.record(Event::NoQuorumObserved);
                    continue;
                }
                LeadershipStatus::NotLeading => {
                    self.events.record(Event::NotLeadingObserved);
                    self.propose_or_wait(&state)?;
                }
            }
        }
    }

    /// Non-blocking snapshot of `determine_leadership_state`.
    pub fn get_current_token_if_leading(&self) -> Result<Option<Token>, LeaderElectionError> {
        Ok(self.determine_leadership_state()?.confirmed_token)
    }

    pub fn is_still_leading(&self, token: &Token) -> Result<LeadershipStatus, LeaderElectionError> {
        self.determine_leadership_status(token.value())
    }

    /// True iff this node believes it is the leader for its own
    /// greatest-learned value. Used both as the public `ping()` operation
    /// and as the handler for an incoming `Ping` RPC from a peer.
    pub fn ping(&self) -> Result<bool, LeaderElectionError> {
        let greatest = self.learner.get_greatest_learned_value()?;
        Ok(matches!(greatest, Some(v) if v.leader_uuid == self.my_uuid))
    }

    /// If leading, proposes an anonymous value (one whose `leader_uuid`
    /// can never belong to a real peer) at the next `seq`, relinquishing
    /// leadership on quorum accept.
    pub fn step_down(&self) -> Result<bool, LeaderElectionError> {
        let state = self.determine_leadership_state()?;
        if state.status != LeadershipStatus::Leading {
            return Ok(false);
        }
        let round = state.greatest_learned.as_ref().map(|v| v.round).unwrap_or(NO_LOG_ENTRY);
        let seq = round + 1;
        let anonymous = PaxosValue::anonymous(seq);

        let _guard = self.propose_lock.lock().expect("propose lock poisoned");
        self.events.record(Event::ProposalAttempted { seq });
        match self.proposer.propose(seq, anonymous, &self.peers, self.round_deadline) {
            Ok(_) => Ok(true),
            Err(failure) => {
                self.events.record(Event::proposal_failed(seq, &failure));
                Err(LeaderElectionError::ServiceNotAvailable)
            }
        }
    }

    fn local_peer(&self) -> Arc<dyn Peer> {
        self.peers
            .iter()
            .find(|p| p.uuid() == self.my_uuid)
            .cloned()
            .expect("peers must include a LocalPeer entry for this node's own UUID")
    }

    fn determine_leadership_state(&self) -> Result<LeadershipState, LeaderElectionError> {
        let greatest = self.learner.get_greatest_learned_value()?;
        let status = match &greatest {
            None => LeadershipStatus::NotLeading,
            Some(value) => self.determine_leadership_status(value)?,
        };
        let confirmed_token = match (&status, &greatest) {
            (LeadershipStatus::Leading, Some(value)) => Some(Token::new(value.clone())),
            _ => None,
        };
        Ok(LeadershipState {
            greatest_learned: greatest,
            status,
            confirmed_token,
        })
    }

    /// `NotLeading` unless all of: the value's leader is us, the value
    /// matches our learner's current greatest-learned value, and the
    /// coalescing verifier confirms the round is still latest.
    fn determine_leadership_status(&self, value: &PaxosValue) -> Result<LeadershipStatus, LeaderElectionError> {
        if value.leader_uuid != self.my_uuid {
            return Ok(LeadershipStatus::NotLeading);
        }
        let local_latest = self.learner.get_greatest_learned_value()?;
        if local_latest.as_ref() != Some(value) {
            return Ok(LeadershipStatus::NotLeading);
        }
        Ok(self.verifier.is_latest_round(value.round, &self.peers))
    }

    fn propose_or_wait(&self, state: &LeadershipState) -> Result<(), LeaderElectionError> {
        if let Some(value) = &state.greatest_learned {
            if value.leader_uuid != self.my_uuid {
                if self.resolve_and_ping(value.leader_uuid)? {
                    std::thread::sleep(self.update_polling_rate);
                    return Ok(());
                }
            }
        }

        if self.update_learned_state_from_peers(state.greatest_learned.as_ref())? {
            return Ok(());
        }

        let jitter_bound_ms = self.random_wait_before_proposing_leadership.as_millis().max(1) as u64;
        let jitter_ms = rand::thread_rng().gen_range(0, jitter_bound_ms);
        std::thread::sleep(Duration::from_millis(jitter_ms));

        self.propose_leadership_after(state.greatest_learned.as_ref())
    }

    /// Resolves `leader_uuid` to a peer handle and pings it once. A ping
    /// timeout, a `false` response, or a transport failure are all
    /// reported via the event recorder and treated as "not confirmed",
    /// never surfaced as an error -- only misconfiguration discovered
    /// while resolving the peer's identity is fatal.
    fn resolve_and_ping(&self, leader_uuid: Uuid) -> Result<bool, LeaderElectionError> {
        let peer = match self.resolve_peer(leader_uuid)? {
            Some(peer) => peer,
            None => return Ok(false),
        };
        match peer.ping(self.leader_ping_response_wait) {
            Ok(true) => Ok(true),
            Ok(false) => {
                self.events.record(Event::PingReturnedFalse { leader: leader_uuid });
                Ok(false)
            }
            Err(crate::error::PeerCallError::Timeout(_)) => {
                self.events.record(Event::PingTimedOut { leader: leader_uuid });
                Ok(false)
            }
            Err(e) => {
                self.events.record(Event::PingFailed {
                    leader: leader_uuid,
                    cause: e.to_string(),
                });
                Ok(false)
            }
        }
    }

    /// Looks `leader_uuid` up in the peer-identity cache; on a miss,
    /// probes every peer's `get_uuid()` until one matches. A peer claiming
    /// our own UUID, or a UUID already bound to a *different* peer, is a
    /// fatal misconfiguration.
    fn resolve_peer(&self, leader_uuid: Uuid) -> Result<Option<Arc<dyn Peer>>, LeaderElectionError> {
        if leader_uuid == self.my_uuid {
            return Ok(Some(self.local_peer()));
        }
        if let Some(peer) = self
            .uuid_cache
            .lock()
            .expect("uuid cache poisoned")
            .get(&leader_uuid)
            .cloned()
        {
            return Ok(Some(peer));
        }

        // Exclude our own LocalPeer entry: we already know our own identity
        // via the short-circuit above, and asking ourselves would make our
        // own self-report indistinguishable from a peer claiming our UUID.
        let candidates: Vec<Arc<dyn Peer>> = self
            .peers
            .iter()
            .filter(|p| p.uuid() != self.my_uuid)
            .cloned()
            .collect();

        let deadline = std::time::Instant::now() + self.leader_ping_response_wait;
        let responses = network::collect_until(
            &candidates,
            deadline,
            |peer, remaining| peer.get_uuid(remaining),
            |successes: &[(Uuid, Uuid)]| successes.iter().any(|(_, reported)| *reported == leader_uuid),
        );

        for (address_tag, reported_uuid) in &responses.successes {
            if let Some(peer) = candidates.iter().find(|p| p.uuid() == *address_tag) {
                self.register_peer_uuid(*reported_uuid, Arc::clone(peer))?;
            }
        }

        Ok(self.uuid_cache.lock().expect("uuid cache poisoned").get(&leader_uuid).cloned())
    }

    fn register_peer_uuid(&self, reported_uuid: Uuid, peer: Arc<dyn Peer>) -> Result<(), LeaderElectionError> {
        if reported_uuid == self.my_uuid {
            return Err(LeaderElectionError::Misconfiguration(format!(
                "peer claims this node's own UUID {}",
                reported_uuid
            )));
        }
        let mut cache = self.uuid_cache.lock().expect("uuid cache poisoned");
        if let Some(existing) = cache.get(&reported_uuid) {
            if !Arc::ptr_eq(existing, &peer) {
                return Err(LeaderElectionError::Misconfiguration(format!(
                    "UUID {} is claimed by two different peers",
                    reported_uuid
                )));
            }
            return Ok(());
        }
        cache.insert(reported_uuid, peer);
        Ok(())
    }

    /// Fetches learned values at `seq' >= greatest_learned.round` (or
    /// from the sentinel if nothing has been learned yet) from every
    /// peer, learning any the local learner is still missing. Returns
    /// whether anything new was learned.
    fn update_learned_state_from_peers(
        &self,
        greatest_learned: Option<&PaxosValue>,
    ) -> Result<bool, LeaderElectionError> {
        let since = greatest_learned.map(|v| v.round).unwrap_or(NO_LOG_ENTRY);
        let quorum = quorum_size(self.peers.len());
        let deadline = std::time::Instant::now() + self.round_deadline;

        let responses = network::collect_until(
            &self.peers,
            deadline,
            move |peer, remaining| peer.learned_values_since(since, remaining),
            move |successes: &[(Uuid, Vec<PaxosValue>)]| successes.len() >= quorum,
        );

        let mut learned_new = false;
        for (_, values) in responses.successes {
            for value in values {
                if self.learner.get_learned_value(value.round)?.is_none() {
                    learned_new = true;
                }
                self.learner.learn(value.round, value)?;
            }
        }
        Ok(learned_new)
    }

    /// Re-checks staleness against the *local* learner only (cheap guard
    /// against the state having advanced during the jitter sleep in
    /// `propose_or_wait`), then drives one Paxos round at the next `seq`.
    /// Swallows `RoundFailure` -- it is recorded via C9 and the caller's
    /// loop will simply re-evaluate on its next iteration.
    fn propose_leadership_after(&self, greatest_learned: Option<&PaxosValue>) -> Result<(), LeaderElectionError> {
        let _guard = self.propose_lock.lock().expect("propose lock poisoned");

        let local_latest = self.learner.get_greatest_learned_value()?;
        if local_latest.as_ref() != greatest_learned {
            // State moved on while we were jittering; abort silently.
            return Ok(());
        }

        let round = greatest_learned.map(|v| v.round).unwrap_or(NO_LOG_ENTRY);
        let seq = round + 1;
        self.events.record(Event::ProposalAttempted { seq });
        let own_value = PaxosValue::for_leader(seq, self.my_uuid);
        if let Err(failure) = self.proposer.propose(seq, own_value, &self.peers, self.round_deadline) {
            self.events.record(Event::proposal_failed(seq, &failure));
        }
        Ok(())
    }
}
