//! Starts one node's leader election service against a TOML config file
//! and prints every state transition it observes.
//!
//! Run this example as follows
//!     RUST_LOG=paxos_leader_election=info cargo run --example start_node -- Config
//! where `Config` is a config file readable by the `config` crate (e.g.
//! `Config.toml` in the crate root).

extern crate env_logger;
#[macro_use]
extern crate log;
extern crate paxos_leader_election;

use std::env;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;

use paxos_leader_election::acceptor::Acceptor;
use paxos_leader_election::config_loader::LeaderElectionConfig;
use paxos_leader_election::durable_log::FileLog;
use paxos_leader_election::events::LoggingEventRecorder;
use paxos_leader_election::learner::Learner;
use paxos_leader_election::peer::{LocalPeer, Peer, RemotePeer};
use paxos_leader_election::service::PaxosLeaderElectionService;
use paxos_leader_election::transport::{RpcServer, UdpTransport};
use paxos_leader_election::types::PaxosValue;

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    info!("{:?}", args);
    let config_file_name = match args.len() {
        2 => &args[1],
        _ => {
            eprintln!("Expected 1 argument: the config file name");
            return;
        }
    };

    let config = LeaderElectionConfig::load(config_file_name).expect("could not load config");
    info!("loaded config for node {}", config.proposer_uuid);

    let acceptor_log_path = format!("{}.acceptor.log", config.proposer_uuid);
    let learner_log_path = format!("{}.learner.log", config.proposer_uuid);
    let acceptor = Arc::new(Acceptor::new(FileLog::open(acceptor_log_path).unwrap()).unwrap());
    let learner = Arc::new(Learner::new(FileLog::open(learner_log_path).unwrap()).unwrap());

    let transport: Arc<dyn paxos_leader_election::transport::Transport> = Arc::new(UdpTransport::new());
    let mut peers: Vec<Arc<dyn Peer>> = vec![Arc::new(LocalPeer::new(
        config.proposer_uuid,
        Arc::clone(&acceptor),
        Arc::clone(&learner),
    ))];
    for peer_config in &config.peers {
        let address = peer_config.socket_addr().unwrap();
        peers.push(Arc::new(RemotePeer::new(address, peer_config.uuid, Arc::clone(&transport))));
    }

    let local_addr = config.local_socket_addr().unwrap();
    let server = Arc::new(RpcServer::bind(local_addr).expect("could not bind RPC server"));
    let shutdown = Arc::new(AtomicBool::new(false));
    let local_peer: Arc<dyn Peer> = Arc::new(LocalPeer::new(config.proposer_uuid, Arc::clone(&acceptor), Arc::clone(&learner)));
    {
        let server = Arc::clone(&server);
        let shutdown = Arc::clone(&shutdown);
        let local_peer = Arc::clone(&local_peer);
        thread::spawn(move || server.serve(local_peer.as_ref(), shutdown.as_ref()));
    }

    let service = PaxosLeaderElectionService::<FileLog<PaxosValue>>::new(
        config.proposer_uuid,
        peers,
        learner,
        Arc::new(LoggingEventRecorder),
        config.update_polling_rate(),
        config.random_wait_before_proposing_leadership(),
        config.leader_ping_response_wait(),
        config.round_deadline(),
    );

    loop {
        info!("blocking until this node becomes leader...");
        let token = match service.block_on_becoming_leader() {
            Ok(token) => token,
            Err(e) => {
                error!("fatal error while electing a leader: {}", e);
                return;
            }
        };
        info!("became leader at seq {} with uuid {}", token.round(), token.leader_uuid());

        loop {
            thread::sleep(config.update_polling_rate());
            match service.is_still_leading(&token) {
                Ok(paxos_leader_election::types::LeadershipStatus::Leading) => info!("still leading"),
                Ok(status) => {
                    info!("no longer leading ({:?}); re-entering election", status);
                    break;
                }
                Err(e) => {
                    error!("fatal error while checking leadership: {}", e);
                    return;
                }
            }
        }
    }
}
