//! State-machine application adapter (design doc §4.6).
//!
//! Commits advance strictly in log-index order on every replica; this
//! module is the one place that walks a newly-committed range and applies
//! it, so that order is never at the mercy of call-site discipline
//! elsewhere in the dispatcher.

use std::collections::HashMap;

use tokio::sync::oneshot;

use super::logstore::Log;
use super::messages::{ClientOutcome, LogIndex};
use crate::server::StateMachine;
use crate::utils::pf_debug;

/// Applies every entry in `(last_applied, log.commit_index]` to `state`, in
/// order, advancing `last_applied` as it goes. Any entry whose index has a
/// waiter registered in `pending` (a client command submitted at this
/// replica, awaiting its result) is answered with the applied result;
/// entries replicated in from a leader with no local waiter are applied
/// silently.
///
/// Returns the new `last_applied` index.
pub fn apply_committed(
    log: &Log,
    last_applied: LogIndex,
    state: &mut StateMachine,
    pending: &mut HashMap<LogIndex, oneshot::Sender<ClientOutcome>>,
) -> LogIndex {
    if log.commit_index <= last_applied {
        return last_applied;
    }

    let mut applied = last_applied;
    let mut index = last_applied + 1;
    while index <= log.commit_index {
        let Some(entry) = log.entry_at(index) else {
            break; // should not happen: commit_index never exceeds the log
        };
        let result = state.apply(&entry.command);
        pf_debug!("applied entry at index {}: {:?}", index, result);
        if let Some(tx) = pending.remove(&index) {
            let _ = tx.send(ClientOutcome::Applied(result));
        }
        applied = index;
        index += 1;
    }
    applied
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raft::messages::LogEntry;

    fn entry(command: &str) -> LogEntry {
        LogEntry {
            term: 1,
            command: command.to_string(),
            inserted_by: 0,
        }
    }

    #[test]
    fn applies_in_order_up_to_commit_index() {
        let mut log = Log::new();
        log.append_entries(
            -1,
            vec![entry("SET x 1"), entry("SET x 2"), entry("GET x")],
        );
        log.advance_commit_index(1);
        let mut state = StateMachine::new();
        let mut pending = HashMap::new();
        let applied = apply_committed(&log, -1, &mut state, &mut pending);
        assert_eq!(applied, 1);
        assert_eq!(state.apply("GET x"), "2");
    }

    #[test]
    fn answers_a_pending_client_waiter() {
        let mut log = Log::new();
        log.append_entries(-1, vec![entry("SET x 5")]);
        log.advance_commit_index(0);
        let mut state = StateMachine::new();
        let mut pending = HashMap::new();
        let (tx, rx) = oneshot::channel();
        pending.insert(0, tx);
        apply_committed(&log, -1, &mut state, &mut pending);
        match rx.try_recv() {
            Ok(ClientOutcome::Applied(s)) => assert_eq!(s, "Ok"),
            other => panic!("unexpected outcome: {:?}", other.is_ok()),
        }
        assert!(pending.is_empty());
    }

    #[test]
    fn nothing_to_apply_is_a_no_op() {
        let log = Log::new();
        let mut state = StateMachine::new();
        let mut pending = HashMap::new();
        assert_eq!(apply_committed(&log, -1, &mut state, &mut pending), -1);
    }
}
