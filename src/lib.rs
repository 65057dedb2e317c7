//! A Paxos-based leader election core: acceptor, learner, proposer, a
//! coalescing latest-round verifier, and the orchestrating election
//! service, built over a pluggable durable log and network transport.
//!
//! See [`service::PaxosLeaderElectionService`] for the main entry point.

extern crate bincode;
extern crate config;
extern crate env_logger;
#[macro_use]
extern crate log;
extern crate net2;
extern crate rand;
extern crate serde;
#[macro_use]
extern crate serde_derive;
extern crate thiserror;
extern crate uuid;

pub mod acceptor;
pub mod config_loader;
pub mod durable_log;
pub mod error;
pub mod events;
pub mod learner;
pub mod message;
pub mod network;
pub mod peer;
pub mod proposer;
pub mod service;
pub mod transport;
pub mod types;
pub mod verifier;

pub use error::{LeaderElectionError, PeerCallError, RoundFailure};
pub use service::PaxosLeaderElectionService;
pub use types::{LeadershipState, LeadershipStatus, PaxosValue, Seq, Token, NO_LOG_ENTRY};
