//! Simulates a Paxos leader-election cluster on one machine: every node's
//! acceptor/learner/service lives in this one process, communicating
//! in-process (no sockets), and every node races to become leader.
//!
//! Run this example as follows
//!     RUST_LOG=paxos_leader_election=info cargo run --example simulate -- 5

extern crate env_logger;
#[macro_use]
extern crate log;
extern crate paxos_leader_election;
extern crate uuid;

use std::env;
use std::sync::{Arc, Barrier};
use std::thread;

use uuid::Uuid;

use paxos_leader_election::acceptor::Acceptor;
use paxos_leader_election::durable_log::InMemoryLog;
use paxos_leader_election::events::LoggingEventRecorder;
use paxos_leader_election::learner::Learner;
use paxos_leader_election::peer::{LocalPeer, Peer};
use paxos_leader_election::service::PaxosLeaderElectionService;
use paxos_leader_election::types::PaxosValue;
use std::time::Duration;

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let node_count: usize = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(5);
    info!("simulating a {}-node cluster", node_count);

    let uuids: Vec<Uuid> = (0..node_count).map(|_| Uuid::new_v4()).collect();
    let mut learners = Vec::new();
    let mut peers: Vec<Arc<dyn Peer>> = Vec::new();
    for uuid in &uuids {
        let acceptor = Arc::new(Acceptor::new(InMemoryLog::new()).unwrap());
        let learner = Arc::new(Learner::new(InMemoryLog::new()).unwrap());
        peers.push(Arc::new(LocalPeer::new(*uuid, acceptor, Arc::clone(&learner))));
        learners.push(learner);
    }

    let services: Vec<Arc<PaxosLeaderElectionService<InMemoryLog<PaxosValue>>>> = (0..node_count)
        .map(|i| {
            Arc::new(PaxosLeaderElectionService::new(
                uuids[i],
                peers.clone(),
                Arc::clone(&learners[i]),
                Arc::new(LoggingEventRecorder),
                Duration::from_millis(500),
                Duration::from_millis(200),
                Duration::from_millis(1_000),
                Duration::from_millis(2_000),
            ))
        })
        .collect();

    // Hold every node at the starting gate so they all start racing for
    // leadership at the same instant instead of staggered by spawn order.
    let barrier = Arc::new(Barrier::new(node_count));

    let handles: Vec<_> = services
        .into_iter()
        .map(|service| {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let token = service.block_on_becoming_leader().expect("election loop failed");
                info!(
                    "node {} observed leader {} at seq {}",
                    service.get_uuid(),
                    token.leader_uuid(),
                    token.round()
                );
                token
            })
        })
        .collect();

    let tokens: Vec<_> = handles.into_iter().map(|h| h.join().expect("node thread panicked")).collect();
    let leaders: std::collections::HashSet<Uuid> = tokens.iter().map(|t| t.leader_uuid()).collect();
    assert_eq!(leaders.len(), 1, "safety violated: more than one leader chosen");
    info!("cluster converged on a single leader: {:?}", leaders.into_iter().next().unwrap());
}
