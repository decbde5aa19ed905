//! Leader-side replication: per-follower fan-out with backtracking, and
//! commit-index advancement from the sorted match-index rule (design doc
//! §4.5).
//!
//! The fan-out to each follower runs as its own concurrent task, rather than
//! a single one-peer-at-a-time loop within a heartbeat tick, so that one
//! slow or partitioned follower never delays progress to the others.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinSet;

use super::logstore::Log;
use super::messages::{LogEntry, LogIndex, PeerMsg, Term};
use crate::server::{ReplicaId, TransportHub, WaiterTable};
use crate::utils::pf_trace;

/// What one follower's replication attempt (possibly several retries with
/// backtracking) concluded with.
pub struct FollowerResult {
    pub peer: ReplicaId,
    /// `Some(n)` if the follower acknowledged success at `match_index = n`;
    /// `None` if no response arrived before the tick's deadline (the leader
    /// will simply retry this peer on the next heartbeat).
    pub match_index: Option<LogIndex>,
    /// Set if a response (or the retry loop running out of log to
    /// backtrack into) revealed a term higher than the leader's own; the
    /// leader must step down (design doc §9).
    pub stale_term: Option<Term>,
}

/// Drives the backtracking replication loop against one follower (design doc
/// §4.5 steps 1-7). `next_index` is this leader's current belief about
/// where `peer`'s log diverges; it is read-only here -- the dispatcher
/// applies the returned outcome to its own `next_index`/`match_index`
/// tables afterwards, since those are dispatcher-owned state (design doc
/// §5).
#[allow(clippy::too_many_arguments)]
async fn replicate_to_follower(
    peer: ReplicaId,
    leader_term: Term,
    leader_id: ReplicaId,
    log_entries: Arc<Vec<LogEntry>>,
    mut next_index: LogIndex,
    leader_commit_index: LogIndex,
    transport: Arc<TransportHub>,
    waiters: WaiterTable,
    per_attempt_timeout: Duration,
) -> FollowerResult {
    loop {
        if next_index == -1 {
            // Backtracked all the way to the start of the log with no
            // agreement found; nothing more to try this tick.
            return FollowerResult {
                peer,
                match_index: None,
                stale_term: None,
            };
        }

        let prev_index = next_index - 1;
        let prev_term = if prev_index >= 0 {
            log_entries[prev_index as usize].term
        } else {
            0
        };
        let entries = if (next_index as usize) <= log_entries.len() {
            log_entries[next_index as usize..].to_vec()
        } else {
            Vec::new()
        };

        let (tx, rx) = oneshot::channel();
        let msg_id = transport.send(
            peer,
            None,
            PeerMsg::AppendEntriesRequest {
                leader_term,
                leader_id,
                prev_log_index: prev_index,
                prev_log_term: prev_term,
                entries,
                leader_commit_index,
            },
        );
        waiters.lock().await.insert(msg_id, tx);
        let outcome = tokio::time::timeout(per_attempt_timeout, rx).await;
        waiters.lock().await.remove(&msg_id);

        match outcome {
            Ok(Ok(PeerMsg::AppendEntriesResponse {
                follower_term,
                success: true,
                match_index,
            })) => {
                return FollowerResult {
                    peer,
                    match_index: Some(match_index),
                    stale_term: (follower_term > leader_term).then_some(follower_term),
                };
            }
            Ok(Ok(PeerMsg::AppendEntriesResponse {
                follower_term,
                success: false,
                ..
            })) => {
                if follower_term > leader_term {
                    return FollowerResult {
                        peer,
                        match_index: None,
                        stale_term: Some(follower_term),
                    };
                }
                pf_trace!(
                    "peer {} rejected append at next_index {}, backtracking",
                    peer,
                    next_index
                );
                next_index -= 1;
                continue;
            }
            _ => {
                // timeout, or a mismatched message type (shouldn't happen
                // given the waiter table is keyed by msg_id) -- give up for
                // this tick, retry on the next one.
                return FollowerResult {
                    peer,
                    match_index: None,
                    stale_term: None,
                };
            }
        }
    }
}

/// Fans out one round of `AppendEntriesRequest`s to every peer concurrently
/// (design doc §4.5, §9) and collects their outcomes.
#[allow(clippy::too_many_arguments)]
pub async fn replicate_round(
    leader_term: Term,
    leader_id: ReplicaId,
    log_entries: Arc<Vec<LogEntry>>,
    next_index: &HashMap<ReplicaId, LogIndex>,
    leader_commit_index: LogIndex,
    peer_ids: Vec<ReplicaId>,
    transport: Arc<TransportHub>,
    waiters: WaiterTable,
    per_attempt_timeout: Duration,
) -> Vec<FollowerResult> {
    let mut joinset = JoinSet::new();
    for peer in peer_ids {
        let log_entries = log_entries.clone();
        let next = next_index[&peer];
        let transport = transport.clone();
        let waiters = waiters.clone();
        joinset.spawn(replicate_to_follower(
            peer,
            leader_term,
            leader_id,
            log_entries,
            next,
            leader_commit_index,
            transport,
            waiters,
            per_attempt_timeout,
        ));
    }

    let mut results = Vec::with_capacity(joinset.len());
    while let Some(joined) = joinset.join_next().await {
        if let Ok(result) = joined {
            results.push(result);
        }
    }
    results
}

/// The sorted-match-index commit rule (design doc §4.5, §8 scenario S5):
/// given every peer's `match_index` (the leader's own treated as
/// `log.last_index()`), the new commit index is the
/// `floor(population / 2)`-th smallest value -- i.e. the value that at
/// least a majority of peers have reached.
pub fn commit_index_from_match_indices(match_indices: &[LogIndex], population: u8) -> LogIndex {
    let mut sorted = match_indices.to_vec();
    sorted.sort_unstable();
    sorted[(population as usize) / 2]
}

/// Whether `log` should advance its commit index this round: counts how
/// many peers (including self, always caught up) responded successfully,
/// and requires a strict majority (design doc §4.5: "if response_array
/// counts strictly more than N/2 'true' including self").
pub fn quorum_reached(caught_up_count: u8, population: u8) -> bool {
    caught_up_count as u32 * 2 > population as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s5_majority_match_index() {
        // N=5, match_index=[0,8,4,5,6] -> sorted [0,4,5,6,8] -> index 2 -> 5
        assert_eq!(
            commit_index_from_match_indices(&[0, 8, 4, 5, 6], 5),
            5
        );
        assert_eq!(
            commit_index_from_match_indices(&[0, 4, 6, 4, 8], 5),
            4
        );
    }

    #[test]
    fn quorum_of_five_is_three() {
        assert!(!quorum_reached(2, 5));
        assert!(quorum_reached(3, 5));
    }

    #[test]
    fn log_consistency_unaffected_by_module_boundary() {
        // sanity: Log type is reachable from this module's imports
        let log = Log::new();
        assert_eq!(log.last_index(), -1);
    }
}
