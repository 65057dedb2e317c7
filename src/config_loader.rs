//! Configuration loading: a `config` + `toml` file-to-struct pipeline
//! producing a typed `LeaderElectionConfig`, since the election service
//! needs durations and a stable UUID identity, not bare socket triples.
//! The peer list is a table of sections, one per peer.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::str::FromStr;
use std::time::Duration;

use config::{Config, File};
use uuid::Uuid;

use crate::error::LeaderElectionError;

fn default_update_polling_rate_ms() -> u64 {
    2_000
}

fn default_random_wait_before_proposing_leadership_ms() -> u64 {
    1_000
}

fn default_leader_ping_response_wait_ms() -> u64 {
    1_000
}

fn default_round_deadline_ms() -> u64 {
    5_000
}

/// One remote peer as it appears in the config file: a `[peers.NAME]`
/// table with `uuid`, `host`, `port`.
#[derive(Debug, Clone, Deserialize)]
pub struct PeerConfig {
    pub uuid: Uuid,
    pub host: String,
    pub port: u16,
}

impl PeerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddrV4, LeaderElectionError> {
        let ip = Ipv4Addr::from_str(&self.host)
            .map_err(|e| LeaderElectionError::Config(format!("invalid peer host {:?}: {}", self.host, e)))?;
        Ok(SocketAddrV4::new(ip, self.port))
    }
}

/// The typed configuration for one node's election service.
#[derive(Debug, Clone, Deserialize)]
pub struct LeaderElectionConfig {
    /// Stable identity for this node; unique across peers, persisted
    /// across restarts (the config file is that persistence).
    pub proposer_uuid: Uuid,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub peers: Vec<PeerConfig>,

    #[serde(default = "default_update_polling_rate_ms")]
    pub update_polling_rate_ms: u64,
    #[serde(default = "default_random_wait_before_proposing_leadership_ms")]
    pub random_wait_before_proposing_leadership_ms: u64,
    #[serde(default = "default_leader_ping_response_wait_ms")]
    pub leader_ping_response_wait_ms: u64,
    #[serde(default = "default_round_deadline_ms")]
    pub round_deadline_ms: u64,
}

impl LeaderElectionConfig {
    pub fn load(file_name: &str) -> Result<Self, LeaderElectionError> {
        let mut raw = Config::default();
        raw.merge(File::with_name(file_name))
            .map_err(|e| LeaderElectionError::Config(format!("could not read {}: {}", file_name, e)))?;
        let config: LeaderElectionConfig = raw
            .try_into()
            .map_err(|e| LeaderElectionError::Config(format!("malformed config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), LeaderElectionError> {
        if self.proposer_uuid.is_nil() {
            return Err(LeaderElectionError::Misconfiguration(
                "proposer_uuid must not be the nil UUID (reserved for step_down's anonymous value)".into(),
            ));
        }
        for peer in &self.peers {
            if peer.uuid == self.proposer_uuid {
                return Err(LeaderElectionError::Misconfiguration(format!(
                    "peer entry {} claims this node's own UUID",
                    peer.host
                )));
            }
        }
        let mut seen = std::collections::HashSet::new();
        for peer in &self.peers {
            if !seen.insert(peer.uuid) {
                return Err(LeaderElectionError::Misconfiguration(format!(
                    "duplicate peer UUID {} in config",
                    peer.uuid
                )));
            }
        }
        Ok(())
    }

    pub fn local_socket_addr(&self) -> Result<SocketAddrV4, LeaderElectionError> {
        let ip = Ipv4Addr::from_str(&self.host)
            .map_err(|e| LeaderElectionError::Config(format!("invalid host {:?}: {}", self.host, e)))?;
        Ok(SocketAddrV4::new(ip, self.port))
    }

    /// Total cluster size, including self.
    pub fn cluster_size(&self) -> usize {
        self.peers.len() + 1
    }

    pub fn quorum_size(&self) -> usize {
        crate::network::quorum_size(self.cluster_size())
    }

    pub fn update_polling_rate(&self) -> Duration {
        Duration::from_millis(self.update_polling_rate_ms)
    }

    pub fn random_wait_before_proposing_leadership(&self) -> Duration {
        Duration::from_millis(self.random_wait_before_proposing_leadership_ms)
    }

    pub fn leader_ping_response_wait(&self) -> Duration {
        Duration::from_millis(self.leader_ping_response_wait_ms)
    }

    pub fn round_deadline(&self) -> Duration {
        Duration::from_millis(self.round_deadline_ms)
    }
}
