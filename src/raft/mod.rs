//! The Raft consensus engine core (design doc §4.2-§4.5, §5).
//!
//! [`RaftReplica`] owns every piece of state a dispatcher is allowed to
//! mutate -- role, term, log, vote record, and the leader's per-peer
//! indices -- and [`RaftReplica::run`] is the single task that ever writes
//! to it. Everything else (the transport mesh's reader/writer tasks, the
//! heartbeat ticker, the election-timeout checker, the client front-end)
//! only ever reads this state indirectly or hands events to the dispatcher
//! through its incoming queue.

pub mod config;
pub mod election;
mod execution;
mod logstore;
pub mod messages;
pub mod replication;

pub use config::{client_addr, client_addr_with_base, peer_table, peer_table_with_base, RaftConfig};
pub use messages::{
    ClientOutcome, Envelope, Event, LogEntry, LogIndex, MsgId, PeerMsg, Term,
};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use logstore::Log;

use crate::server::{ExternalApi, ReplicaId, StateMachine, TransportHub, WaiterTable};
use crate::utils::{pf_debug, pf_info, pf_trace, ElectionTimer, LastContact, RaftError};

/// A replica's role in the current term (design doc §3). Encoded as a
/// tagged variant rather than scattered boolean/enum-field checks, per the
/// REDESIGN FLAGS: the dispatcher below matches on `(self.role, event)`
/// exhaustively, so an unhandled role x message combination is a compile
/// error rather than a silently-ignored runtime case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

/// The consensus engine for one replica. Construct with
/// [`RaftReplica::new_and_setup`], which also boots the peer transport
/// mesh, the client front-end listener, and the timer tasks; then drive it
/// forever with [`RaftReplica::run`].
pub struct RaftReplica {
    id: ReplicaId,
    population: u8,
    peer_ids: Vec<ReplicaId>,

    current_term: Term,
    role: Role,
    voted_for: HashMap<Term, ReplicaId>,
    log: Log,
    last_applied: LogIndex,

    // Leader-only bookkeeping (design doc §3); kept populated for every
    // peer at all times and simply unused while not Leader, reinitialized
    // wholesale on becoming leader rather than allocated on demand.
    next_index: HashMap<ReplicaId, LogIndex>,
    match_index: HashMap<ReplicaId, LogIndex>,

    /// Best known current leader, for `ApiReply::NotLeader` redirect hints
    /// (design doc §4.7, §9 -- an explicit refusal in place of an indefinite
    /// re-enqueue of client requests at a non-leader).
    current_leader: Option<ReplicaId>,

    /// Client commands submitted at this replica, awaiting application at
    /// their log index (design doc §4.7).
    pending_client: HashMap<LogIndex, oneshot::Sender<ClientOutcome>>,

    state_machine: StateMachine,

    transport: Arc<TransportHub>,
    waiters: WaiterTable,
    incoming_tx: mpsc::UnboundedSender<Event>,
    incoming_rx: mpsc::UnboundedReceiver<Event>,
    last_contact: Arc<LastContact>,

    /// Running while Leader only; spawned in [`Self::become_leader`] and
    /// aborted in [`Self::demote_to_follower`] (design doc §5).
    heartbeat_handle: Option<JoinHandle<()>>,
    /// Set by the heartbeat ticker right before it enqueues a tick, cleared
    /// by the dispatcher once it starts handling one; a tick due while the
    /// flag is already set is skipped rather than enqueued, so a leader
    /// whose replication rounds run long never accumulates an unbounded
    /// backlog of pending ticks (design doc §9).
    heartbeat_pending: Arc<AtomicBool>,
    /// Running whenever not Leader (Follower or Candidate); aborted in
    /// [`Self::become_leader`] and respawned on demotion (design doc §5).
    election_handle: Option<JoinHandle<()>>,

    config: RaftConfig,
}

impl RaftReplica {
    /// Boots the full peer set for replica `id`: binds and connects the
    /// peer transport mesh, binds the client front-end listener, and starts
    /// the election-timeout checker (every replica boots as Follower; the
    /// heartbeat ticker only ever runs while Leader, started in
    /// [`Self::become_leader`]). Returns a dispatcher ready to
    /// [`run`](Self::run).
    pub async fn new_and_setup(id: ReplicaId, config: RaftConfig) -> Result<Self, RaftError> {
        let peers = peer_table_with_base(config.population, config.port_base);
        let bind_addr = *peers
            .get(&id)
            .ok_or_else(|| RaftError::msg(format!("replica id {} is out of range", id)))?;

        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let waiters: WaiterTable = Arc::new(Mutex::new(HashMap::new()));
        let last_contact = Arc::new(LastContact::new());

        let transport = Arc::new(
            TransportHub::new_and_setup(
                id,
                bind_addr,
                &peers,
                config.settle_delay(),
                incoming_tx.clone(),
                waiters.clone(),
                last_contact.clone(),
            )
            .await?,
        );

        ExternalApi::new_and_setup(
            client_addr_with_base(id, config.port_base),
            incoming_tx.clone(),
        )
        .await?;

        let peer_ids: Vec<ReplicaId> = peers.keys().copied().filter(|&p| p != id).collect();
        let mut next_index = HashMap::new();
        let mut match_index = HashMap::new();
        for &p in &peer_ids {
            next_index.insert(p, 0);
            match_index.insert(p, -1);
        }

        let mut replica = RaftReplica {
            id,
            population: config.population,
            peer_ids,
            current_term: 0,
            role: Role::Follower,
            voted_for: HashMap::new(),
            log: Log::new(),
            last_applied: -1,
            next_index,
            match_index,
            current_leader: None,
            pending_client: HashMap::new(),
            state_machine: StateMachine::new(),
            transport,
            waiters,
            incoming_tx,
            incoming_rx,
            last_contact,
            heartbeat_handle: None,
            heartbeat_pending: Arc::new(AtomicBool::new(false)),
            election_handle: None,
            config,
        };
        replica.start_election_checker();
        Ok(replica)
    }

    /// Spawns the heartbeat ticker if it is not already running (design doc
    /// §5 -- "spawned while Leader"). A no-op if already running, so callers
    /// that are not certain of the prior state can call it unconditionally.
    fn start_heartbeat(&mut self) {
        if self.heartbeat_handle.is_some() {
            return;
        }
        self.heartbeat_pending.store(false, Ordering::SeqCst);
        let tx = self.incoming_tx.clone();
        let period = self.config.heartbeat_period();
        let pending = self.heartbeat_pending.clone();
        self.heartbeat_handle = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(period).await;
                // Coalesce: skip this tick if the previous one is still
                // sitting unhandled in the incoming queue, rather than
                // piling another one on (design doc §9).
                if pending.swap(true, Ordering::SeqCst) {
                    continue;
                }
                if tx.send(Event::HeartBeatTick).is_err() {
                    return;
                }
            }
        }));
    }

    /// Aborts the heartbeat ticker (design doc §5 -- "aborted on
    /// step-down").
    fn stop_heartbeat(&mut self) {
        if let Some(handle) = self.heartbeat_handle.take() {
            handle.abort();
        }
    }

    /// Spawns the election-timeout checker if it is not already running
    /// (design doc §5 -- "spawned while not Leader").
    fn start_election_checker(&mut self) {
        if self.election_handle.is_some() {
            return;
        }
        let tx = self.incoming_tx.clone();
        let last_contact = self.last_contact.clone();
        let timer = ElectionTimer::new(
            self.config.election_check_frequency(),
            self.config.leader_checkin_max_wait(),
        );
        self.election_handle = Some(tokio::spawn(async move {
            loop {
                if timer.tick(&last_contact).await && tx.send(Event::ElectionTimeout).is_err() {
                    return;
                }
            }
        }));
    }

    /// Aborts the election-timeout checker, on becoming Leader.
    fn stop_election_checker(&mut self) {
        if let Some(handle) = self.election_handle.take() {
            handle.abort();
        }
    }

    /// Drains the incoming queue forever, dispatching each event by its
    /// type and the current role (design doc §4.2). Returns only if the
    /// queue closes, which does not happen in ordinary operation -- every
    /// sender (transport, timers, the client front-end) is held by a task
    /// that outlives this loop.
    pub async fn run(mut self) {
        loop {
            match self.incoming_rx.recv().await {
                Some(event) => self.handle_event(event).await,
                None => {
                    pf_debug!("incoming queue closed, dispatcher exiting");
                    return;
                }
            }
        }
    }

    async fn handle_event(&mut self, event: Event) {
        match (self.role, event) {
            (Role::Leader, Event::HeartBeatTick) => {
                // Clear before handling, not after: the ticker may already be
                // waiting to enqueue the next one by the time a long
                // replication round finishes (design doc §9's coalescing).
                self.heartbeat_pending.store(false, Ordering::SeqCst);
                self.handle_heartbeat_tick().await;
            }
            (_, Event::HeartBeatTick) => {} // not leader: self-scheduled ticks are ignored

            (Role::Leader, Event::ElectionTimeout) => {} // leaders never time out an election
            (_, Event::ElectionTimeout) => self.start_election().await,

            (Role::Leader, Event::ClientAppend { command, respond_to }) => {
                self.leader_submit(command, Some(respond_to));
            }
            (_, Event::ClientAppend { respond_to, .. }) => {
                let _ = respond_to.send(ClientOutcome::NotLeader {
                    leader: self.current_leader,
                });
            }

            (_, Event::Peer(envelope)) => self.handle_peer(envelope).await,
        }
    }

    async fn handle_peer(&mut self, envelope: Envelope) {
        let Envelope {
            id: msg_id,
            source,
            body,
            ..
        } = envelope;
        match body {
            PeerMsg::VoteRequest {
                candidate_term,
                candidate_last_log_index: _,
                candidate_last_log_term,
                candidate_log_len,
            } => {
                self.handle_vote_request(
                    source,
                    msg_id,
                    candidate_term,
                    candidate_last_log_term,
                    candidate_log_len,
                );
            }
            PeerMsg::AppendEntriesRequest {
                leader_term,
                leader_id,
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit_index,
            } => {
                if self.role == Role::Leader {
                    if leader_term <= self.current_term {
                        // Same-or-lower term: two leaders in the same term
                        // should never coexist and a lower one is simply
                        // stale, so this is safe to ignore outright.
                        return;
                    }
                    // A higher-term AppendEntriesRequest means some other
                    // replica legitimately became leader in a later term
                    // without needing this replica's own quorum (design doc
                    // §7, §9: step down on any observed higher term before
                    // acting further). Fall through to handle_append_entries,
                    // which performs the term bump, demotion, and leader
                    // acceptance below.
                }
                self.handle_append_entries(
                    source,
                    msg_id,
                    leader_term,
                    leader_id,
                    prev_log_index,
                    prev_log_term,
                    entries,
                    leader_commit_index,
                );
            }
            PeerMsg::VoteResponse { .. } => {
                // The transport layer resolves these against the waiter
                // table directly (design doc §9's per-uuid waiter table);
                // one only reaches here if it arrived with no matching
                // waiter -- too late, or unsolicited. Nothing to do.
                pf_trace!("dropping stray VoteResponse from peer {}", source);
            }
            PeerMsg::AppendEntriesResponse { .. } => {
                pf_trace!("dropping stray AppendEntriesResponse from peer {}", source);
            }
        }
    }

    /// Grant policy for an incoming `VoteRequest` (design doc §4.4, §7).
    /// A higher candidate term always bumps `current_term` and steps this
    /// replica down to Follower before voting is even considered -- per §7,
    /// "the receiver updates its own term to the observed maximum ... before
    /// acting further". The freshness comparison itself, however, uses the
    /// term this replica held *before* that bump: §3's grant policy is
    /// phrased purely in terms of "the receiver's current term", a fixed
    /// snapshot of this replica's own state, not a moving target the
    /// candidate's own term just overwrote (see DESIGN.md for this reading
    /// of an otherwise-ambiguous ordering).
    fn handle_vote_request(
        &mut self,
        source: ReplicaId,
        msg_id: MsgId,
        candidate_term: Term,
        candidate_last_log_term: Term,
        candidate_log_len: usize,
    ) {
        let term_before_bump = self.current_term;
        if candidate_term > self.current_term {
            self.current_term = candidate_term;
            self.demote_to_follower();
            self.current_leader = None;
        }

        if self.role != Role::Follower {
            // Busy as Candidate or Leader at this-or-higher term: simply
            // never answer (design doc §4.2 dispatch table lists VoteRequest
            // as "handled if Follower" only); the requesting candidate's own
            // per-peer timeout treats silence as a withheld vote.
            return;
        }

        let granted = election::decide_vote(
            &mut self.voted_for,
            term_before_bump,
            candidate_term,
            source,
            candidate_last_log_term,
            candidate_log_len,
            self.log.len(),
        );
        pf_debug!(
            "vote request from {} in term {}: granted={}",
            source,
            candidate_term,
            granted
        );
        self.transport.send(
            source,
            Some(msg_id),
            PeerMsg::VoteResponse {
                vote_granted: granted,
                peer_term: self.current_term,
            },
        );
    }

    /// Follower/Candidate acceptance of an `AppendEntriesRequest` (design
    /// doc §4.5).
    #[allow(clippy::too_many_arguments)]
    fn handle_append_entries(
        &mut self,
        source: ReplicaId,
        msg_id: MsgId,
        leader_term: Term,
        leader_id: ReplicaId,
        prev_log_index: LogIndex,
        prev_log_term: Term,
        entries: Vec<LogEntry>,
        leader_commit_index: LogIndex,
    ) {
        if leader_term < self.current_term {
            self.transport.send(
                source,
                Some(msg_id),
                PeerMsg::AppendEntriesResponse {
                    follower_term: self.current_term,
                    success: false,
                    match_index: -1,
                },
            );
            return;
        }

        // A legitimate leader for this-or-a-higher term: recognize it and
        // step down from Candidate if we were racing an election (standard
        // Raft: a candidate seeing a current leader returns to Follower).
        if leader_term > self.current_term {
            self.current_term = leader_term;
        }
        self.demote_to_follower();
        self.current_leader = Some(leader_id);

        let entries_empty = entries.is_empty();
        if !self
            .log
            .consistency_check(prev_log_index, prev_log_term, entries_empty)
        {
            self.transport.send(
                source,
                Some(msg_id),
                PeerMsg::AppendEntriesResponse {
                    follower_term: self.current_term,
                    success: false,
                    match_index: -1,
                },
            );
            return;
        }

        let match_index = if entries_empty {
            // Redesigned per design doc §9: return the true last index
            // rather than a -1 sentinel, so a leader can advance a quiet
            // follower's match_index off heartbeat replies alone.
            self.log.last_index()
        } else {
            let appended = entries.len() as LogIndex;
            self.log.append_entries(prev_log_index, entries);
            prev_log_index + appended
        };

        self.transport.send(
            source,
            Some(msg_id),
            PeerMsg::AppendEntriesResponse {
                follower_term: self.current_term,
                success: true,
                match_index,
            },
        );

        if self.log.advance_commit_index(leader_commit_index) {
            self.apply_committed();
        }
    }

    /// Candidate role transition on election timeout (design doc §4.4).
    async fn start_election(&mut self) {
        self.role = Role::Candidate;
        self.current_term += 1;
        self.voted_for.insert(self.current_term, self.id);
        self.current_leader = None;
        pf_info!("election timeout, starting candidacy for term {}", self.current_term);

        let outcome = election::run_election(
            self.current_term,
            self.log.last_index(),
            self.log.last_term(),
            self.log.len(),
            self.peer_ids.clone(),
            self.population,
            self.transport.clone(),
            self.waiters.clone(),
            self.config.broadcast_timeout(),
        )
        .await;

        match outcome {
            election::ElectionOutcome::Won => self.become_leader(),
            election::ElectionOutcome::Lost => {
                // Open Question (design doc §9): rolling current_term back
                // on a failed candidacy risks granting a second vote in a
                // term already decided, so it stays at its incremented
                // value and a later timeout starts a fresh, higher term.
                pf_info!("lost election for term {}, reverting to follower", self.current_term);
                self.demote_to_follower();
            }
            election::ElectionOutcome::StaleTerm(term) => {
                pf_info!("observed higher term {} while candidating, stepping down", term);
                self.step_down(term);
            }
        }
    }

    /// Reinitializes per-peer indices and forces a no-op append so that
    /// entries left uncommitted by a prior leader get committed under this
    /// term (design doc §4.4 -- a leader may not advance commit_index based
    /// on match counts for entries from an earlier term without first
    /// replicating one of its own).
    fn become_leader(&mut self) {
        self.stop_election_checker();
        self.role = Role::Leader;
        self.current_leader = Some(self.id);
        self.start_heartbeat();
        let len = self.log.len() as LogIndex;
        for &p in &self.peer_ids {
            self.next_index.insert(p, len);
            self.match_index.insert(p, -1);
        }
        pf_info!("became leader for term {}", self.current_term);
        self.leader_submit("NO_OP".to_string(), None);
    }

    /// Appends one client (or internally-generated) command to the local
    /// log as the leader (design doc §4.5). `respond_to` is registered
    /// against the new entry's index so the client gets answered once it is
    /// applied; omitted for the leader's own post-election NO_OP.
    fn leader_submit(&mut self, command: String, respond_to: Option<oneshot::Sender<ClientOutcome>>) {
        let prev_index = self.log.last_index();
        let prev_term = self.log.last_term();
        let entry = LogEntry {
            term: self.current_term,
            command,
            inserted_by: self.id,
        };
        self.log.leader_append(prev_index, prev_term, entry);
        if let Some(tx) = respond_to {
            self.pending_client.insert(self.log.last_index(), tx);
        }
    }

    /// One heartbeat tick's replication round (design doc §4.5, §9):
    /// fans out concurrently to every follower, applies the returned
    /// next/match-index updates, steps down if any follower reports a
    /// higher term, and otherwise attempts to advance commit_index from the
    /// sorted-match-index rule.
    async fn handle_heartbeat_tick(&mut self) {
        let log_entries = Arc::new(self.log.entries().to_vec());
        let results = replication::replicate_round(
            self.current_term,
            self.id,
            log_entries,
            &self.next_index,
            self.log.commit_index,
            self.peer_ids.clone(),
            self.transport.clone(),
            self.waiters.clone(),
            self.config.broadcast_timeout(),
        )
        .await;

        let mut stale_term: Option<Term> = None;
        let mut caught_up_count: u8 = 1; // self is always caught up
        for result in results {
            if let Some(term) = result.stale_term {
                stale_term = Some(stale_term.map_or(term, |cur| cur.max(term)));
            }
            if let Some(match_idx) = result.match_index {
                caught_up_count += 1;
                self.match_index.insert(result.peer, match_idx);
                self.next_index.insert(result.peer, match_idx + 1);
            }
        }

        if let Some(term) = stale_term {
            pf_info!("follower reported higher term {}, stepping down", term);
            self.step_down(term);
            return;
        }

        if replication::quorum_reached(caught_up_count, self.population) {
            let mut match_indices: Vec<LogIndex> = vec![self.log.last_index()];
            match_indices.extend(self.peer_ids.iter().map(|p| self.match_index[p]));
            let new_commit =
                replication::commit_index_from_match_indices(&match_indices, self.population);
            if self.log.advance_commit_index(new_commit) {
                self.apply_committed();
            }
        }
    }

    /// Transitions to Follower, stopping the heartbeat ticker and (re)starting
    /// the election-timeout checker if we were Leader (design doc §5, §9).
    fn demote_to_follower(&mut self) {
        if self.role == Role::Leader {
            self.stop_heartbeat();
            self.start_election_checker();
        }
        self.role = Role::Follower;
    }

    fn step_down(&mut self, new_term: Term) {
        self.current_term = new_term;
        self.demote_to_follower();
        self.current_leader = None;
    }

    fn apply_committed(&mut self) {
        self.last_applied = execution::apply_committed(
            &self.log,
            self.last_applied,
            &mut self.state_machine,
            &mut self.pending_client,
        );
    }
}
