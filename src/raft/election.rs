//! Leader election: vote grant policy and the candidate's fan-out to peers
//! (design doc §4.4).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinSet;

use super::messages::{LogIndex, PeerMsg, Term};
use crate::server::{ReplicaId, TransportHub, WaiterTable};
use crate::utils::pf_trace;

/// Decides whether to grant a vote to `candidate_id` in `candidate_term`,
/// recording the grant in `voted_for` the first time a term is decided.
/// Ported from the grant policy the consensus engine's log-completeness
/// check is based on: a candidate already voted for in this term gets the
/// same answer again; otherwise the receiver's own current term stands in
/// for "how fresh is my log", compared against the candidate's last log
/// term, with log length breaking the tie.
pub fn decide_vote(
    voted_for: &mut HashMap<Term, ReplicaId>,
    receiver_current_term: Term,
    candidate_term: Term,
    candidate_id: ReplicaId,
    candidate_last_log_term: Term,
    candidate_log_len: usize,
    own_log_len: usize,
) -> bool {
    if let Some(&recorded) = voted_for.get(&candidate_term) {
        return recorded == candidate_id;
    }
    let granted = if candidate_last_log_term < receiver_current_term {
        false
    } else if candidate_last_log_term > receiver_current_term {
        true
    } else {
        candidate_log_len >= own_log_len
    };
    if granted {
        voted_for.insert(candidate_term, candidate_id);
    }
    granted
}

/// Result of a completed candidacy.
pub enum ElectionOutcome {
    Won,
    Lost,
    /// A voter's response carried a term higher than the one being
    /// contested; the candidate must step down to Follower at that term.
    StaleTerm(Term),
}

/// Fans out a `VoteRequest` to every peer concurrently, collects responses
/// (each bounded by `broadcast_timeout`), and tallies the result. `self`'s
/// own vote is implicit.
#[allow(clippy::too_many_arguments)]
pub async fn run_election(
    candidate_term: Term,
    last_log_index: LogIndex,
    last_log_term: Term,
    log_len: usize,
    peer_ids: Vec<ReplicaId>,
    population: u8,
    transport: Arc<TransportHub>,
    waiters: WaiterTable,
    broadcast_timeout: Duration,
) -> ElectionOutcome {
    let mut joinset = JoinSet::new();
    for peer in peer_ids {
        let transport = transport.clone();
        let waiters = waiters.clone();
        joinset.spawn(async move {
            let (tx, rx) = oneshot::channel();
            let msg_id = transport.send(
                peer,
                None,
                PeerMsg::VoteRequest {
                    candidate_term,
                    candidate_last_log_index: last_log_index,
                    candidate_last_log_term: last_log_term,
                    candidate_log_len: log_len,
                },
            );
            waiters.lock().await.insert(msg_id, tx);
            let outcome = tokio::time::timeout(broadcast_timeout, rx).await;
            waiters.lock().await.remove(&msg_id);
            match outcome {
                Ok(Ok(PeerMsg::VoteResponse {
                    vote_granted,
                    peer_term,
                })) => Some((vote_granted, peer_term)),
                _ => None,
            }
        });
    }

    let mut votes_granted = 1u32; // self
    let mut highest_term_seen = candidate_term;
    while let Some(joined) = joinset.join_next().await {
        if let Ok(Some((granted, peer_term))) = joined {
            if peer_term > highest_term_seen {
                highest_term_seen = peer_term;
            }
            if granted {
                votes_granted += 1;
            }
        }
    }
    pf_trace!(
        "election for term {} gathered {} votes",
        candidate_term,
        votes_granted
    );

    if highest_term_seen > candidate_term {
        ElectionOutcome::StaleTerm(highest_term_seen)
    } else if votes_granted * 2 > population as u32 {
        ElectionOutcome::Won
    } else {
        ElectionOutcome::Lost
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_vote_in_term_is_granted_on_equal_log() {
        let mut voted_for = HashMap::new();
        assert!(decide_vote(&mut voted_for, 3, 3, 1, 3, 5, 5));
        assert_eq!(voted_for.get(&3), Some(&1));
    }

    #[test]
    fn repeat_request_from_same_candidate_regranted() {
        let mut voted_for = HashMap::new();
        assert!(decide_vote(&mut voted_for, 3, 3, 1, 3, 5, 5));
        assert!(decide_vote(&mut voted_for, 3, 3, 1, 3, 5, 5));
    }

    #[test]
    fn already_voted_for_other_candidate_refused() {
        let mut voted_for = HashMap::new();
        voted_for.insert(3, 1);
        assert!(!decide_vote(&mut voted_for, 3, 3, 2, 3, 5, 5));
    }

    #[test]
    fn stale_candidate_log_term_refused() {
        let mut voted_for = HashMap::new();
        assert!(!decide_vote(&mut voted_for, 5, 5, 1, 3, 100, 1));
    }

    #[test]
    fn fresher_candidate_log_term_granted_regardless_of_length() {
        let mut voted_for = HashMap::new();
        assert!(decide_vote(&mut voted_for, 3, 3, 1, 5, 0, 100));
    }

    #[test]
    fn equal_term_shorter_candidate_log_refused() {
        let mut voted_for = HashMap::new();
        assert!(!decide_vote(&mut voted_for, 4, 4, 1, 4, 2, 5));
    }

    #[test]
    fn equal_term_log_length_tie_breaks_toward_granting() {
        let mut voted_for = HashMap::new();
        assert!(decide_vote(&mut voted_for, 4, 4, 1, 4, 5, 5));
    }
}
