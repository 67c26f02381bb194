//! Run statistics types.

use std::time::Duration;

use chrono::NaiveDate;
use tokio::time::Instant;

use crate::batch::RecordTally;
use crate::retry::PageOutcome;
use crate::types::{ChannelId, ChannelInfo, PageNumber};

/// Statistics for one channel of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelStats {
    /// Channel number shown in the label.
    pub channel: ChannelId,
    /// Label as listed by the remote.
    pub label: String,
    /// Pages reported by the query.
    pub pages_total: PageNumber,
    /// Pages that reached `Done`.
    pub pages_done: usize,
    /// Pages given up on.
    pub pages_abandoned: usize,
    /// Pages skipped because the ledger already covered every row.
    pub pages_already_retrieved: usize,
    /// Transfer attempts across all pages.
    pub attempts: u32,
    /// File tallies across all pages.
    pub tally: RecordTally,
    /// Why the channel could not be opened, if it could not.
    pub error: Option<String>,
    /// Time spent on the channel.
    pub elapsed: Duration,
}

impl ChannelStats {
    /// Creates empty statistics for a channel.
    #[must_use]
    pub fn new(channel: &ChannelInfo) -> Self {
        Self {
            channel: channel.number(),
            label: channel.label.clone(),
            pages_total: 0,
            pages_done: 0,
            pages_abandoned: 0,
            pages_already_retrieved: 0,
            attempts: 0,
            tally: RecordTally::default(),
            error: None,
            elapsed: Duration::ZERO,
        }
    }

    /// Folds a finished page into the channel totals.
    pub fn record_page(&mut self, outcome: &PageOutcome) {
        if outcome.is_done() {
            self.pages_done += 1;
        } else {
            self.pages_abandoned += 1;
        }
        if outcome.already_retrieved {
            self.pages_already_retrieved += 1;
        }
        self.attempts += outcome.attempts;
        self.tally.add(&outcome.tally);
    }
}

/// Statistics for an entire run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunStats {
    /// Date the run queried.
    pub date: NaiveDate,
    /// Per-channel results in processing order.
    pub channels: Vec<ChannelStats>,
    /// Total elapsed time for the run.
    pub elapsed: Duration,
    /// Whether an interrupt cut the run short.
    pub cancelled: bool,
}

impl RunStats {
    /// File tallies summed over every channel.
    #[must_use]
    pub fn totals(&self) -> RecordTally {
        self.channels
            .iter()
            .fold(RecordTally::default(), |mut total, channel| {
                total.add(&channel.tally);
                total
            })
    }

    #[must_use]
    pub fn pages_done(&self) -> usize {
        self.channels.iter().map(|c| c.pages_done).sum()
    }

    #[must_use]
    pub fn pages_abandoned(&self) -> usize {
        self.channels.iter().map(|c| c.pages_abandoned).sum()
    }

    /// Average throughput of saved bytes per second.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn average_speed(&self) -> u64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            (self.totals().bytes as f64 / secs) as u64
        } else {
            0
        }
    }
}

/// Accumulates run statistics while channels are processed.
#[derive(Debug)]
pub struct RunStatsBuilder {
    date: NaiveDate,
    channels: Vec<ChannelStats>,
    start_time: Instant,
}

impl RunStatsBuilder {
    /// Starts timing a run for `date`.
    #[must_use]
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            channels: Vec::new(),
            start_time: Instant::now(),
        }
    }

    /// Records a finished channel.
    pub fn add_channel(&mut self, stats: ChannelStats) {
        self.channels.push(stats);
    }

    /// Builds the final run statistics.
    #[must_use]
    pub fn build(self, cancelled: bool) -> RunStats {
        RunStats {
            date: self.date,
            channels: self.channels,
            elapsed: self.start_time.elapsed(),
            cancelled,
        }
    }
}
