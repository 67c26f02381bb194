//! Batch tracking: one start-transfer invocation and what it produced.

use std::collections::HashSet;

use crate::grammar::ParsedName;
use crate::types::{ChannelId, PageNumber};

/// Resolution of one transferred item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    /// Transfer started, nothing landed yet.
    Pending,
    /// Landed, organized and committed.
    Saved,
    /// Already retrieved (ledger or organized tree); discarded.
    SkippedDuplicate,
    /// Zero bytes, aborted, or could not be moved.
    Failed,
    /// Landed under a name no grammar understands.
    Unparsable,
}

impl FileState {
    /// Whether the item counts toward "items landed" for completion arithmetic.
    #[must_use]
    pub const fn counts_as_landed(self) -> bool {
        matches!(self, Self::Saved | Self::SkippedDuplicate | Self::Unparsable)
    }
}

/// One observed item of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub channel: ChannelId,
    pub page: PageNumber,
    pub filename: String,
    pub parsed: Option<ParsedName>,
    pub byte_size: u64,
    pub state: FileState,
}

/// Tallies by state, used for page and channel summaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordTally {
    pub saved: usize,
    pub skipped: usize,
    pub failed: usize,
    pub unparsable: usize,
    pub bytes: u64,
}

impl RecordTally {
    pub fn add(&mut self, other: &Self) {
        self.saved += other.saved;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.unparsable += other.unparsable;
        self.bytes += other.bytes;
    }
}

/// In-memory state of the single in-flight batch.
#[derive(Debug, Default)]
pub struct BatchTracker {
    expected: Option<(u32, u32)>,
    landed: Vec<String>,
    seen: HashSet<String>,
    pending: HashSet<String>,
    records: Vec<FileRecord>,
    completed: bool,
}

impl BatchTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A transfer began. Ignored if the item already resolved.
    pub fn mark_started(&mut self, filename: &str) {
        if !self.seen.contains(filename) {
            self.pending.insert(filename.to_string());
        }
    }

    /// Returns true if `filename` was already resolved in this batch.
    #[must_use]
    pub fn has_seen(&self, filename: &str) -> bool {
        self.seen.contains(filename)
    }

    /// Resolves an item. Returns false (and changes nothing) if the filename
    /// was already resolved in this batch.
    pub fn resolve(&mut self, record: FileRecord) -> bool {
        if !self.seen.insert(record.filename.clone()) {
            return false;
        }
        self.pending.remove(&record.filename);
        if record.state.counts_as_landed() {
            self.landed.push(record.filename.clone());
        }
        self.records.push(record);
        true
    }

    /// Records the device's reported tallies.
    pub fn set_expected(&mut self, success: u32, failure: u32) {
        self.expected = Some((success, failure));
    }

    #[must_use]
    pub const fn expected(&self) -> Option<(u32, u32)> {
        self.expected
    }

    /// Filenames landed so far, in arrival order.
    #[must_use]
    pub fn items_landed(&self) -> &[String] {
        &self.landed
    }

    #[must_use]
    pub fn landed_count(&self) -> usize {
        self.landed.len()
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// True once at least `target` items landed and nothing is in flight.
    #[must_use]
    pub fn is_settled(&self, target: usize) -> bool {
        self.landed.len() >= target && self.pending.is_empty()
    }

    pub fn mark_completed(&mut self) {
        self.completed = true;
    }

    #[must_use]
    pub const fn is_completed(&self) -> bool {
        self.completed
    }

    #[must_use]
    pub fn records(&self) -> &[FileRecord] {
        &self.records
    }

    /// Tallies records by state.
    #[must_use]
    pub fn tally(&self) -> RecordTally {
        self.records
            .iter()
            .fold(RecordTally::default(), |mut tally, record| {
                match record.state {
                    FileState::Saved => {
                        tally.saved += 1;
                        tally.bytes += record.byte_size;
                    }
                    FileState::SkippedDuplicate => tally.skipped += 1,
                    FileState::Failed => tally.failed += 1,
                    FileState::Unparsable => tally.unparsable += 1,
                    FileState::Pending => {}
                }
                tally
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, state: FileState) -> FileRecord {
        FileRecord {
            channel: 1,
            page: 1,
            filename: name.to_string(),
            parsed: None,
            byte_size: 10,
            state,
        }
    }

    #[test]
    fn duplicate_resolution_is_ignored() {
        let mut batch = BatchTracker::new();
        assert!(batch.resolve(record("a.mp4", FileState::Saved)));
        assert!(!batch.resolve(record("a.mp4", FileState::Saved)));
        assert_eq!(batch.landed_count(), 1);
        assert_eq!(batch.records().len(), 1);
    }

    #[test]
    fn failed_items_do_not_count_as_landed() {
        let mut batch = BatchTracker::new();
        batch.resolve(record("a.mp4", FileState::Saved));
        batch.resolve(record("b.mp4", FileState::Failed));
        batch.resolve(record("c.mp4", FileState::SkippedDuplicate));
        batch.resolve(record("d.bin", FileState::Unparsable));

        assert_eq!(batch.items_landed(), ["a.mp4", "c.mp4", "d.bin"]);
        let tally = batch.tally();
        assert_eq!(
            (tally.saved, tally.skipped, tally.failed, tally.unparsable),
            (1, 1, 1, 1)
        );
        assert_eq!(tally.bytes, 10);
    }

    #[test]
    fn settles_only_without_pending() {
        let mut batch = BatchTracker::new();
        batch.mark_started("a.mp4");
        batch.mark_started("b.mp4");
        batch.resolve(record("a.mp4", FileState::Saved));
        assert_eq!(batch.pending_count(), 1);
        assert!(!batch.is_settled(1));

        batch.resolve(record("b.mp4", FileState::Saved));
        assert!(batch.is_settled(2));
    }

    #[test]
    fn completion_is_explicit() {
        let mut batch = BatchTracker::new();
        batch.resolve(record("a.mp4", FileState::Saved));
        assert!(batch.is_settled(1));
        assert!(!batch.is_completed());

        batch.mark_completed();
        assert!(batch.is_completed());
    }

    #[test]
    fn late_start_for_resolved_item_is_ignored() {
        let mut batch = BatchTracker::new();
        batch.resolve(record("a.mp4", FileState::Saved));
        batch.mark_started("a.mp4");
        assert_eq!(batch.pending_count(), 0);
    }

    #[test]
    fn tallies_accumulate() {
        let mut total = RecordTally::default();
        total.add(&RecordTally {
            saved: 2,
            bytes: 100,
            ..RecordTally::default()
        });
        total.add(&RecordTally {
            failed: 1,
            ..RecordTally::default()
        });
        assert_eq!(total.saved, 2);
        assert_eq!(total.failed, 1);
        assert_eq!(total.bytes, 100);
    }
}
