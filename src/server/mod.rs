//! Shared server-side types: replica identity, the command language
//! understood by the state machine, and the client request/reply envelopes
//! exchanged over the external API (design doc §4.6, §4.7, §6).

mod external_api;
mod statemachine;
mod transport;

pub use external_api::ExternalApi;
pub use statemachine::{Command, CommandResult, StateMachine};
pub use transport::{TransportHub, WaiterTable};

/// Replica identity. Five replicas numbered `0..population` make up a
/// cluster; this crate does not support reconfiguration (design doc
/// Non-goals).
pub type ReplicaId = u8;

/// Textual reply sent back to a connected client (design doc §6): either the
/// state machine's response, or a redirect hint when this replica is not the
/// leader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiReply {
    Result(String),
    NotLeader { leader: Option<ReplicaId> },
}

impl ApiReply {
    /// Renders the line-based wire form client-side code parses (design doc
    /// §6): `"Not leader; try <addr>"` when a last-known leader hint exists,
    /// else the bare `"Not leader"`.
    pub fn to_wire_string(&self) -> String {
        match self {
            ApiReply::Result(s) => s.clone(),
            ApiReply::NotLeader { leader: Some(id) } => {
                format!(
                    "Not leader; try {}",
                    crate::raft::client_addr(*id)
                )
            }
            ApiReply::NotLeader { leader: None } => "Not leader".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_leader_without_hint() {
        assert_eq!(
            ApiReply::NotLeader { leader: None }.to_wire_string(),
            "Not leader"
        );
    }

    #[test]
    fn not_leader_with_hint_names_client_address() {
        let wire = ApiReply::NotLeader { leader: Some(2) }.to_wire_string();
        assert!(wire.starts_with("Not leader; try "));
        assert!(wire.contains("16500"));
    }
}
