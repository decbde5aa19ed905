//! The replicated log: entry storage, the append-entries consistency check,
//! and truncate-on-divergence (design doc §3, §4.5).

use super::messages::{LogEntry, LogIndex, Term};

/// Ordered sequence of [`LogEntry`] plus the commit index, indexed from 0.
/// `commit_index` starts at `-1` (design doc §3): an empty log has nothing
/// committed.
#[derive(Debug, Default)]
pub struct Log {
    entries: Vec<LogEntry>,
    pub commit_index: LogIndex,
}

impl Log {
    pub fn new() -> Self {
        Log {
            entries: Vec::new(),
            commit_index: -1,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Index of the last entry, or `-1` if the log is empty.
    pub fn last_index(&self) -> LogIndex {
        self.entries.len() as LogIndex - 1
    }

    /// Term of the last entry, or `0` if the log is empty (design doc §4.4).
    pub fn last_term(&self) -> Term {
        self.entries.last().map_or(0, |e| e.term)
    }

    /// Term at `index`, or `0` if `index` is `-1` (the sentinel for "before
    /// the log starts"). Panics if `index` is out of range otherwise -- a
    /// caller must have already bounds-checked against `len()`.
    pub fn term_at(&self, index: LogIndex) -> Term {
        if index < 0 {
            0
        } else {
            self.entries[index as usize].term
        }
    }

    /// All entries, for building a replication snapshot (design doc §5 --
    /// replication fan-out tasks work off an immutable copy of the log
    /// taken at the start of a heartbeat tick).
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn entry_at(&self, index: LogIndex) -> Option<&LogEntry> {
        if index < 0 {
            None
        } else {
            self.entries.get(index as usize)
        }
    }

    /// Entries starting at `from` (inclusive) to the end of the log, for use
    /// as an `AppendEntriesRequest` payload (design doc §4.5).
    pub fn suffix_from(&self, from: LogIndex) -> Vec<LogEntry> {
        if from < 0 || from as usize > self.entries.len() {
            return self.entries.clone();
        }
        self.entries[from as usize..].to_vec()
    }

    /// Appends one entry as the leader does for a freshly-submitted client
    /// command, after checking that `prev_index`/`prev_term` still describe
    /// the log's current tail (design doc §4.5 -- "if the local append's
    /// consistency check fails it is a fatal invariant violation").
    pub fn leader_append(&mut self, prev_index: LogIndex, prev_term: Term, entry: LogEntry) {
        assert_eq!(
            prev_index,
            self.last_index(),
            "leader log append: prev_index does not describe the current tail"
        );
        assert_eq!(
            prev_term,
            self.last_term(),
            "leader log append: prev_term does not describe the current tail"
        );
        self.entries.push(entry);
    }

    /// Runs the follower-side append-entries consistency check (design doc
    /// §4.5 step 2). Returns `true` iff the request's `prev_index`/
    /// `prev_term` are consistent with this log, i.e. the entries (if any)
    /// may be applied starting at `prev_index + 1`.
    pub fn consistency_check(&self, prev_index: LogIndex, prev_term: Term, entries_empty: bool) -> bool {
        if entries_empty {
            // heartbeat acknowledgment: success iff prev_index is within the
            // log (or the sentinel -1) and its term matches.
            if prev_index == -1 {
                return true;
            }
            if prev_index as usize >= self.entries.len() {
                return false;
            }
            self.entries[prev_index as usize].term == prev_term
        } else {
            if prev_index as usize >= self.entries.len() && prev_index != -1 {
                return false; // gap
            }
            if prev_index >= 0 && self.entries[prev_index as usize].term != prev_term {
                return false; // mismatch
            }
            true
        }
    }

    /// Applies `entries` starting at `prev_index + 1`, truncating the
    /// existing suffix at the first point of divergence (design doc §4.5
    /// step 3, the Log Matching truncate-before-append rule). Must only be
    /// called after [`Log::consistency_check`] has returned `true`.
    pub fn append_entries(&mut self, prev_index: LogIndex, entries: Vec<LogEntry>) {
        let start = (prev_index + 1) as usize;
        let mut write_at = start;
        let mut incoming = entries.into_iter();
        for entry in incoming.by_ref() {
            match self.entries.get(write_at) {
                Some(existing) if existing.term == entry.term => {
                    // already identical at this index; leave it in place
                    // (this loop still walks forward so that a later
                    // divergence is still caught).
                    debug_assert_eq!(*existing, entry);
                    write_at += 1;
                }
                Some(_) => {
                    // divergence: truncate here and append the remainder.
                    self.entries.truncate(write_at);
                    self.entries.push(entry);
                    write_at += 1;
                    break;
                }
                None => {
                    self.entries.push(entry);
                    write_at += 1;
                }
            }
        }
        for entry in incoming {
            self.entries.push(entry);
            write_at += 1;
        }
        let _ = write_at;
    }

    /// Advances `commit_index` to `min(leader_commit_index, last_index())`
    /// if that is strictly greater than the current value (design doc §4.5
    /// step 5). Returns `true` if it advanced.
    pub fn advance_commit_index(&mut self, leader_commit_index: LogIndex) -> bool {
        let candidate = leader_commit_index.min(self.last_index());
        if candidate > self.commit_index {
            self.commit_index = candidate;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(term: Term, command: &str) -> LogEntry {
        LogEntry {
            term,
            command: command.to_string(),
            inserted_by: 0,
        }
    }

    #[test]
    fn empty_log_sentinel_values() {
        let log = Log::new();
        assert_eq!(log.last_index(), -1);
        assert_eq!(log.last_term(), 0);
        assert_eq!(log.commit_index, -1);
    }

    #[test]
    fn heartbeat_consistency_check_on_empty_log() {
        let log = Log::new();
        assert!(log.consistency_check(-1, 0, true));
        assert!(!log.consistency_check(0, 1, true));
    }

    #[test]
    fn gap_is_rejected() {
        let mut log = Log::new();
        log.append_entries(-1, vec![entry(1, "SET x 1")]);
        assert!(!log.consistency_check(5, 1, false));
    }

    #[test]
    fn mismatch_is_rejected() {
        let mut log = Log::new();
        log.append_entries(-1, vec![entry(1, "SET x 1")]);
        assert!(!log.consistency_check(0, 2, false));
    }

    #[test]
    fn divergent_suffix_is_truncated_before_append() {
        // S2 from design doc §8.
        let mut log = Log::new();
        log.append_entries(
            -1,
            vec![
                entry(1, "set x 100"),
                entry(1, "set y 100"),
                entry(2, "set z 100"),
            ],
        );
        assert!(log.consistency_check(1, 1, false));
        log.append_entries(1, vec![entry(2, "set z 105"), entry(2, "set m 65")]);
        assert_eq!(log.len(), 4);
        assert_eq!(log.entry_at(2).unwrap().command, "set z 105");
        assert_eq!(log.entry_at(3).unwrap().command, "set m 65");
        assert_eq!(log.last_index(), 3);
    }

    #[test]
    fn identical_prefix_is_not_truncated() {
        let mut log = Log::new();
        log.append_entries(-1, vec![entry(1, "a"), entry(1, "b")]);
        // Re-sending the same entries (at-least-once delivery) must not
        // disturb anything.
        log.append_entries(-1, vec![entry(1, "a"), entry(1, "b")]);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn commit_index_advances_but_never_past_log_tail() {
        let mut log = Log::new();
        log.append_entries(-1, vec![entry(1, "a")]);
        assert!(log.advance_commit_index(5)); // clamped to last_index() == 0
        assert_eq!(log.commit_index, 0);
        assert!(!log.advance_commit_index(0)); // no strict increase
    }

    #[test]
    fn commit_index_never_decreases() {
        let mut log = Log::new();
        log.append_entries(-1, vec![entry(1, "a"), entry(1, "b")]);
        log.advance_commit_index(1);
        assert!(!log.advance_commit_index(0));
        assert_eq!(log.commit_index, 1);
    }
}
