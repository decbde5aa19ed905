//! Public interface to the Raft-backed key-value store, linked by both the
//! server executable and the client library.

pub mod client;
pub mod raft;
pub mod server;
pub mod utils;

pub use raft::{client_addr, peer_table, RaftConfig, RaftReplica, Role};
pub use server::{ApiReply, Command, CommandResult, ReplicaId, StateMachine};
pub use utils::RaftError;
