//! Leader-seeking client endpoint (design doc §4.7, §6, §9).
//!
//! A non-leader replica's answer has a concrete shape -- `"Not leader"` or
//! `"Not leader; try <addr>"` -- rather than an indefinite client-side
//! re-enqueue at whichever replica was first contacted. [`KvEndpoint`] is
//! the client-side half of that contract: it remembers the last replica it
//! believed was leader, follows a redirect hint when one is given, and
//! otherwise round-robins the known server list until one answers as leader
//! or the retry budget runs out.

use std::net::SocketAddr;

use crate::raft::peer_table;
use crate::server::ReplicaId;
use crate::utils::RaftError;

use super::handle::send_command;

const NOT_LEADER: &str = "Not leader";
const NOT_LEADER_REDIRECT_PREFIX: &str = "Not leader; try ";

/// How many hops (redirects plus round-robin retries) a single `request`
/// call will follow before giving up.
const MAX_HOPS: usize = 8;

/// Remembers a cluster's client-facing addresses and the last replica
/// believed to be leader, and retries a command across them until it is
/// applied.
pub struct KvEndpoint {
    servers: Vec<SocketAddr>,
    last_known_leader: Option<usize>,
}

impl KvEndpoint {
    /// Builds an endpoint against a `population`-sized cluster addressed the
    /// standard localhost way (design doc §6).
    pub fn new(population: u8) -> Self {
        let mut peers: Vec<(ReplicaId, SocketAddr)> = peer_table(population)
            .into_iter()
            .map(|(id, _peer_addr)| (id, crate::raft::client_addr(id)))
            .collect();
        peers.sort_by_key(|(id, _)| *id);
        KvEndpoint {
            servers: peers.into_iter().map(|(_, addr)| addr).collect(),
            last_known_leader: None,
        }
    }

    /// Builds an endpoint against an explicit list of client-facing
    /// addresses, for tests or non-standard deployments.
    pub fn with_addrs(servers: Vec<SocketAddr>) -> Self {
        KvEndpoint {
            servers,
            last_known_leader: None,
        }
    }

    /// Client-facing address of the replica this endpoint last believed was
    /// leader, if any `request` has succeeded yet.
    pub fn current_leader_addr(&self) -> Option<SocketAddr> {
        self.last_known_leader.map(|i| self.servers[i])
    }

    /// Sends `command`, following "not leader" redirects and round-robining
    /// across the known server list, until some replica answers with an
    /// applied result or the hop budget is exhausted.
    pub async fn request(&mut self, command: &str) -> Result<String, RaftError> {
        if self.servers.is_empty() {
            return Err(RaftError::msg("no servers configured".to_string()));
        }

        let mut next_addr = self
            .last_known_leader
            .map(|i| self.servers[i])
            .unwrap_or(self.servers[0]);
        let mut cursor = self.last_known_leader.unwrap_or(0);

        for _ in 0..MAX_HOPS {
            let reply = match send_command(next_addr, command).await {
                Ok(r) => r,
                Err(_) => {
                    cursor = (cursor + 1) % self.servers.len();
                    next_addr = self.servers[cursor];
                    continue;
                }
            };

            if let Some(addr_str) = reply.strip_prefix(NOT_LEADER_REDIRECT_PREFIX) {
                match addr_str.parse::<SocketAddr>() {
                    Ok(addr) => {
                        next_addr = addr;
                        if let Some(i) = self.servers.iter().position(|&a| a == addr) {
                            cursor = i;
                        }
                        continue;
                    }
                    Err(_) => {
                        return Err(RaftError::Decode(format!(
                            "malformed redirect address: {}",
                            addr_str
                        )));
                    }
                }
            }
            if reply == NOT_LEADER {
                cursor = (cursor + 1) % self.servers.len();
                next_addr = self.servers[cursor];
                continue;
            }

            self.last_known_leader = Some(cursor);
            return Ok(reply);
        }

        Err(RaftError::Timeout(format!(
            "gave up after {} hops without finding a leader",
            MAX_HOPS
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_builds_one_address_per_replica() {
        let endpoint = KvEndpoint::new(5);
        assert_eq!(endpoint.servers.len(), 5);
    }

    #[test]
    fn with_addrs_starts_with_no_known_leader() {
        let endpoint = KvEndpoint::with_addrs(vec!["127.0.0.1:16500".parse().unwrap()]);
        assert!(endpoint.last_known_leader.is_none());
        assert!(endpoint.current_leader_addr().is_none());
    }
}
