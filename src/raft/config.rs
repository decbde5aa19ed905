//! Raft-specific configuration (design doc §4.1, §4.3, §6).

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::Deserialize;

use crate::parsed_config;
use crate::server::ReplicaId;
use crate::utils::RaftError;

/// Timing and cluster-size knobs, overlaid on top of built-in defaults via
/// [`parsed_config!`](crate::parsed_config).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RaftConfig {
    pub population: u8,
    /// Base port for the peer/client address table (design doc §6); overlaid
    /// by tests that need several independent clusters to coexist on
    /// loopback without colliding on the production default.
    pub port_base: u16,
    pub election_check_frequency_ms: u64,
    pub leader_checkin_max_wait_ms: u64,
    pub heartbeat_period_ms: u64,
    pub broadcast_timeout_ms: u64,
    pub settle_delay_ms: u64,
}

impl Default for RaftConfig {
    fn default() -> Self {
        RaftConfig {
            population: 5,
            port_base: PEER_PORT_BASE,
            election_check_frequency_ms: 5_000,
            leader_checkin_max_wait_ms: 30_000,
            heartbeat_period_ms: 1_000,
            broadcast_timeout_ms: 500,
            settle_delay_ms: 200,
        }
    }
}

impl RaftConfig {
    /// Parses an optional TOML config string into a `RaftConfig`, overlaid
    /// on the defaults above.
    pub fn parse(config_str: Option<&str>) -> Result<Self, RaftError> {
        parsed_config!(
            config_str => RaftConfig;
            population,
            port_base,
            election_check_frequency_ms,
            leader_checkin_max_wait_ms,
            heartbeat_period_ms,
            broadcast_timeout_ms,
            settle_delay_ms,
        )
    }

    pub fn election_check_frequency(&self) -> Duration {
        Duration::from_millis(self.election_check_frequency_ms)
    }

    pub fn leader_checkin_max_wait(&self) -> Duration {
        Duration::from_millis(self.leader_checkin_max_wait_ms)
    }

    pub fn heartbeat_period(&self) -> Duration {
        Duration::from_millis(self.heartbeat_period_ms)
    }

    pub fn broadcast_timeout(&self) -> Duration {
        Duration::from_millis(self.broadcast_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// Base peer port for `Server_0`; peer `i` listens at `PEER_PORT_BASE +
/// 1000 * i`, covering the `14000..18000` range for up to 4 peers.
pub const PEER_PORT_BASE: u16 = 14000;

/// Offset added to a peer's port to get its client-facing port. Chosen so
/// that client ports never collide with the 1000-apart peer ports.
pub const CLIENT_PORT_OFFSET: u16 = 500;

/// Builds the fixed `ReplicaId -> SocketAddr` peer table for a cluster of
/// `population` replicas, all on localhost, using the production
/// [`PEER_PORT_BASE`] (design doc §6).
pub fn peer_table(population: u8) -> HashMap<ReplicaId, SocketAddr> {
    peer_table_with_base(population, PEER_PORT_BASE)
}

/// As [`peer_table`], but against an explicit `port_base` rather than the
/// production default, so that several independent test clusters can run
/// side by side on loopback without colliding on `14000..18000`.
pub fn peer_table_with_base(population: u8, port_base: u16) -> HashMap<ReplicaId, SocketAddr> {
    (0..population)
        .map(|i| {
            let port = port_base + 1000 * i as u16;
            (
                i,
                SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port),
            )
        })
        .collect()
}

/// The client-facing address for replica `id`, using the production
/// [`PEER_PORT_BASE`] (design doc §6).
pub fn client_addr(id: ReplicaId) -> SocketAddr {
    client_addr_with_base(id, PEER_PORT_BASE)
}

/// As [`client_addr`], but against an explicit `port_base`.
pub fn client_addr_with_base(id: ReplicaId, port_base: u16) -> SocketAddr {
    let port = port_base + 1000 * id as u16 + CLIENT_PORT_OFFSET;
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_documented_constants() {
        let cfg = RaftConfig::default();
        assert_eq!(cfg.population, 5);
        assert_eq!(cfg.election_check_frequency_ms, 5_000);
        assert_eq!(cfg.leader_checkin_max_wait_ms, 30_000);
        assert_eq!(cfg.heartbeat_period_ms, 1_000);
        assert_eq!(cfg.broadcast_timeout_ms, 500);
    }

    #[test]
    fn peer_and_client_ports_never_collide() {
        let peers = peer_table(5);
        let peer_ports: Vec<u16> = peers.values().map(|a| a.port()).collect();
        for id in 0..5u8 {
            let cport = client_addr(id).port();
            assert!(!peer_ports.contains(&cport));
        }
    }

    #[test]
    fn with_base_variant_offsets_every_port() {
        let peers = peer_table_with_base(3, 20000);
        assert_eq!(peers[&0].port(), 20000);
        assert_eq!(peers[&2].port(), 22000);
        assert_eq!(client_addr_with_base(1, 20000).port(), 21500);
    }

    #[test]
    fn overlay_from_config_string() -> Result<(), RaftError> {
        let cfg = RaftConfig::parse(Some("heartbeat_period_ms = 50"))?;
        assert_eq!(cfg.heartbeat_period_ms, 50);
        assert_eq!(cfg.population, 5);
        Ok(())
    }
}
