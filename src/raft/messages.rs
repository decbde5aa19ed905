//! Message and log-entry types (design doc §3).

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::server::ReplicaId;

pub type Term = u64;

/// Log index type. `-1` is the sentinel for "no entry" (an empty log's
/// commit index, or a follower's rejection of an `AppendEntriesRequest`).
pub type LogIndex = i64;

/// Locally-unique message id, used to correlate a request with its response.
/// Correlation only ever happens between a sender and the one peer it
/// addressed, so a per-process monotonic counter is sufficient and avoids
/// pulling in a UUID dependency the rest of this codebase's stack does not
/// otherwise need.
pub type MsgId = u64;

/// One entry in the replicated log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub term: Term,
    /// Opaque to consensus -- tokenized and interpreted only by the state
    /// machine adapter (design doc §4.6).
    pub command: String,
    /// Diagnostic only; does not affect any consensus invariant.
    pub inserted_by: ReplicaId,
}

/// The peer-to-peer wire message body (design doc §3, §4.1). Serialized with
/// `bincode` and framed per [`crate::utils::send_frame`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PeerMsg {
    VoteRequest {
        candidate_term: Term,
        candidate_last_log_index: LogIndex,
        candidate_last_log_term: Term,
        candidate_log_len: usize,
    },
    VoteResponse {
        vote_granted: bool,
        peer_term: Term,
    },
    AppendEntriesRequest {
        leader_term: Term,
        leader_id: ReplicaId,
        prev_log_index: LogIndex,
        prev_log_term: Term,
        entries: Vec<LogEntry>,
        leader_commit_index: LogIndex,
    },
    AppendEntriesResponse {
        follower_term: Term,
        success: bool,
        match_index: LogIndex,
    },
}

impl PeerMsg {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            PeerMsg::VoteRequest { .. } => "VoteRequest",
            PeerMsg::VoteResponse { .. } => "VoteResponse",
            PeerMsg::AppendEntriesRequest { .. } => "AppendEntriesRequest",
            PeerMsg::AppendEntriesResponse { .. } => "AppendEntriesResponse",
        }
    }
}

/// Envelope carried on the wire: common fields plus the typed body (design
/// doc §3 -- "each message variant carries the common envelope by
/// composition" rather than through an inheritance hierarchy).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub id: MsgId,
    pub source: ReplicaId,
    pub destination: ReplicaId,
    /// Set on a response to correlate it with the request's `id`.
    pub ref_id: Option<MsgId>,
    pub body: PeerMsg,
}

/// Outcome of a client command, delivered back through the one-shot channel
/// registered when the command entered the log (design doc §4.7).
#[derive(Debug, Clone)]
pub enum ClientOutcome {
    /// The command reached its log position and was applied; this is the
    /// state machine's reply string.
    Applied(String),
    /// This replica is not (or no longer) the leader; retry elsewhere.
    NotLeader { leader: Option<ReplicaId> },
}

/// What the dispatcher actually consumes from its incoming queue. Unlike
/// `PeerMsg`, these are never serialized -- `HeartBeatTick` and
/// `ClientAppend` are purely local events (design doc §3: "HeartBeatTick
/// (internal, local only)").
pub enum Event {
    /// A message that arrived from (or was addressed to) a peer connection.
    Peer(Envelope),
    /// Self-scheduled by the heartbeat ticker while Leader.
    HeartBeatTick,
    /// Self-scheduled by the election-timeout checker while not Leader; the
    /// timer task itself never touches `current_term`/`voted_for`/`role`
    /// (design doc §5 -- those are dispatcher-only writes), so it reports
    /// the timeout as an event instead of acting on it directly.
    ElectionTimeout,
    /// A client command submitted at the front-end, carrying a reply channel.
    ClientAppend {
        command: String,
        respond_to: oneshot::Sender<ClientOutcome>,
    },
}
