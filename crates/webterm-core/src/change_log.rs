//! Bounded, sequenced log of per-line screen changes.
//!
//! Clients that fall behind replay the retained suffix instead of fetching the
//! whole screen. Once a sequence number has been evicted the client has to
//! resync from a full screen.

use std::collections::{BTreeMap, VecDeque};
use webterm_types::{ChangeRecord, Line};

/// Default number of changes retained.
pub const DEFAULT_MAX_CHANGES: usize = 1024;

/// FIFO of the most recent `max_changes` line changes.
///
/// `offset` counts evicted records, so `offset + len == next_seq` always holds
/// and the record at index `i` has sequence number `offset + i`.
#[derive(Debug)]
pub struct ChangeLog {
    changes: VecDeque<ChangeRecord>,
    max_changes: usize,
    offset: u64,
}

impl ChangeLog {
    /// Create an empty log. A capacity of zero is treated as one.
    pub fn new(max_changes: usize) -> Self {
        let max_changes = max_changes.max(1);
        Self {
            changes: VecDeque::with_capacity(max_changes.min(DEFAULT_MAX_CHANGES)),
            max_changes,
            offset: 0,
        }
    }

    /// Append a change, evicting the oldest one when full.
    /// Returns the sequence number assigned to the new record.
    pub fn add_change(&mut self, line_number: u32, line: Line) -> u64 {
        if self.changes.len() == self.max_changes {
            self.changes.pop_front();
            self.offset += 1;
        }
        let seq = self.next_seq();
        self.changes.push_back(ChangeRecord {
            seq,
            line_number,
            line,
        });
        seq
    }

    /// Whether the record with this sequence number is still retained.
    /// The lower bound is inclusive: `offset` itself is the oldest kept record.
    pub fn has_change(&self, seq: u64) -> bool {
        seq >= self.offset && seq < self.next_seq()
    }

    /// Records from `seq` (inclusive) to the newest. Empty when `seq` is not retained.
    pub fn changes_after(&self, seq: u64) -> impl Iterator<Item = &ChangeRecord> {
        let start = if self.has_change(seq) {
            (seq - self.offset) as usize
        } else {
            self.changes.len()
        };
        self.changes.range(start..)
    }

    /// The sequence number the next appended record will get.
    pub fn next_seq(&self) -> u64 {
        self.offset + self.changes.len() as u64
    }

    /// Number of records evicted so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn max_changes(&self) -> usize {
        self.max_changes
    }
}

impl Default for ChangeLog {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CHANGES)
    }
}

/// Keep only the newest record per line, ordered by ascending line number.
///
/// Sequence numbers are reported as recorded, so a batch may skip numbers.
pub fn latest_per_line<'a>(changes: impl IntoIterator<Item = &'a ChangeRecord>) -> Vec<ChangeRecord> {
    let mut latest: BTreeMap<u32, &ChangeRecord> = BTreeMap::new();
    for change in changes {
        latest.insert(change.line_number, change);
    }
    latest.into_values().cloned().collect()
}
