//! Signal reconciliation for one batch.
//!
//! Completion of a batch is decided from three independent, unordered
//! sources: the polled progress text, the terminal alert, and transfer
//! events. Each tick drains the event channel first, then polls status.
//!
//! A batch completes through exactly one path:
//!
//! 1. **Alert** - the alert reports `Success N` / `Failure M`; wait until
//!    `N` items landed with nothing in flight.
//! 2. **Queued** - progress reads `(k/k)`; wait for the alert, then as (1).
//!    Without an alert the batch completes with zero tallies.
//! 3. **Stalled** - progress text unchanged for more than `stall_ticks`
//!    ticks and `stall_duration`, with no stop indicator.
//! 4. **Stop indicator gone** - neither progress text nor stop indicator;
//!    wait `stop_grace`, drain, and complete.
//!
//! Every sub-wait is bounded by `min(now + settle_timeout, batch deadline)`.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::batch::{BatchTracker, FileRecord, FileState, RecordTally};
use crate::config::{PathConfig, TimingConfig};
use crate::error::Error;
use crate::fs::FileSystem;
use crate::grammar::{self, GrammarVariant, ParsedName};
use crate::ledger::Ledger;
use crate::remote::{EventReceiver, RemoteInterface, TransferEvent};
use crate::session::SessionGuard;
use crate::shutdown::sleep_until_or_cancel;
use crate::types::{ChannelId, PageNumber, RowInfo};

static SUCCESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Success\s*(\d+)").expect("valid regex"));
static FAILURE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Failure\s*(\d+)").expect("valid regex"));
static PROGRESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\((\d+)\s*/\s*(\d+)\)").expect("valid regex"));

/// Extracts `(success, failure)` from alert text. Both must be present.
#[must_use]
pub fn parse_alert(text: &str) -> Option<(u32, u32)> {
    let success = SUCCESS_RE.captures(text)?[1].parse().ok()?;
    let failure = FAILURE_RE.captures(text)?[1].parse().ok()?;
    Some((success, failure))
}

/// Extracts `(current, total)` from progress text like `"(3/10)"`.
#[must_use]
pub fn parse_progress(text: &str) -> Option<(u32, u32)> {
    let caps = PROGRESS_RE.captures(text)?;
    Some((caps[1].parse().ok()?, caps[2].parse().ok()?))
}

/// How a completed batch was recognised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionPath {
    Alert,
    QueuedWithoutAlert,
    Stalled,
    StopIndicatorGone,
}

/// Result category of one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Completed(CompletionPath),
    /// The batch budget ran out.
    TimedOut,
    /// The session was lost mid-batch; the outcome is unknown.
    Inconclusive,
    Cancelled,
}

/// What one batch produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    pub verdict: Verdict,
    completed: bool,
    pub success: u32,
    pub failure: u32,
    pub items_landed: Vec<String>,
    pub tally: RecordTally,
    pub elapsed: Duration,
}

impl BatchOutcome {
    #[must_use]
    pub const fn completed(&self) -> bool {
        self.completed
    }
}

/// Location and listing of the batch being reconciled.
#[derive(Debug, Clone, Copy)]
pub struct BatchContext<'a> {
    pub channel: ChannelId,
    /// Channel number as it appears in recording filenames.
    pub number: ChannelId,
    pub page: PageNumber,
    /// Rows of the page. Landed items must match one of them, and start-only
    /// names take their end time from the matching row.
    pub rows: &'a [RowInfo],
}

/// Borrowed engine state needed to reconcile one batch.
pub struct Reconciler<'a, R: ?Sized, F: ?Sized> {
    pub remote: &'a R,
    pub fs: &'a F,
    pub guard: &'a mut SessionGuard,
    pub ledger: &'a mut Ledger,
    pub events: &'a mut EventReceiver,
    pub timing: &'a TimingConfig,
    pub paths: &'a PathConfig,
    pub cancel: &'a CancellationToken,
}

impl<R, F> Reconciler<'_, R, F>
where
    R: RemoteInterface + ?Sized,
    F: FileSystem + ?Sized,
{
    /// Waits for the current batch to complete and ingests what it lands.
    ///
    /// The ledger is flushed on every exit path.
    pub async fn run(mut self, ctx: &BatchContext<'_>) -> BatchOutcome {
        let started = Instant::now();
        let deadline = started + self.timing.batch_timeout;
        let mut batch = BatchTracker::new();

        let verdict = self.drive(ctx, &mut batch, deadline).await;
        if verdict != Verdict::Cancelled {
            self.drain(ctx, &mut batch).await;
        }
        if let Err(e) = self.ledger.flush() {
            log::error!("Ledger flush failed after batch: {e}");
        }
        if matches!(verdict, Verdict::Completed(_)) {
            batch.mark_completed();
        }

        let landed = u32::try_from(batch.landed_count()).unwrap_or(u32::MAX);
        let (success, failure) = match verdict {
            Verdict::Completed(CompletionPath::Alert) => batch.expected().unwrap_or((landed, 0)),
            Verdict::Completed(CompletionPath::QueuedWithoutAlert) => (0, 0),
            Verdict::Completed(_) => (landed, 0),
            _ => (landed, batch.expected().map_or(0, |(_, failure)| failure)),
        };

        let outcome = BatchOutcome {
            verdict,
            completed: batch.is_completed(),
            success,
            failure,
            items_landed: batch.items_landed().to_vec(),
            tally: batch.tally(),
            elapsed: started.elapsed(),
        };
        log::debug!(
            "Batch on channel {} page {} ended {:?}: {} success, {} failure, {} landed",
            ctx.channel,
            ctx.page,
            outcome.verdict,
            outcome.success,
            outcome.failure,
            outcome.items_landed.len()
        );
        outcome
    }

    async fn drive(
        &mut self,
        ctx: &BatchContext<'_>,
        batch: &mut BatchTracker,
        deadline: Instant,
    ) -> Verdict {
        if !self.pause(self.timing.initial_delay, deadline).await {
            return Verdict::Cancelled;
        }

        let mut last_progress: Option<String> = None;
        let mut unchanged_ticks = 0u32;
        let mut last_change = Instant::now();

        while Instant::now() < deadline {
            if self.cancel.is_cancelled() {
                return Verdict::Cancelled;
            }
            if !self.guard.check_valid(self.remote).await {
                return Verdict::Inconclusive;
            }
            self.drain(ctx, batch).await;

            let status = match self.remote.poll_status().await {
                Ok(status) => status,
                Err(e) => {
                    log::warn!("Status poll failed: {e}");
                    if !self.pause(self.timing.poll_interval, deadline).await {
                        return Verdict::Cancelled;
                    }
                    continue;
                }
            };

            if status.alert_visible {
                let text = status.alert_text.as_deref().unwrap_or_default();
                log::info!("Transfer alert: {text}");
                if let Some((success, failure)) = parse_alert(text) {
                    batch.set_expected(success, failure);
                    return self
                        .settle(ctx, batch, success, deadline, CompletionPath::Alert)
                        .await;
                }
            }

            if let Some(text) = status.progress_text.as_deref() {
                if last_progress.as_deref() == Some(text) {
                    unchanged_ticks += 1;
                } else {
                    log::info!("Transfer progress: {text}");
                    last_progress = Some(text.to_string());
                    unchanged_ticks = 0;
                    last_change = Instant::now();
                }

                if let Some((current, total)) = parse_progress(text)
                    && total > 0
                    && current == total
                {
                    log::info!("All {total} item(s) queued, waiting for the alert");
                    return self.await_alert(ctx, batch, total, deadline).await;
                }

                if unchanged_ticks > self.timing.stall_ticks
                    && last_change.elapsed() > self.timing.stall_duration
                    && !status.stop_indicator_active
                {
                    log::warn!(
                        "Progress unchanged for {unchanged_ticks} polls ({}s), treating batch as complete",
                        last_change.elapsed().as_secs()
                    );
                    return Verdict::Completed(CompletionPath::Stalled);
                }
            } else if !status.stop_indicator_active {
                log::info!("Stop indicator gone, letting transfers settle");
                if !self.pause(self.timing.stop_grace, deadline).await {
                    return Verdict::Cancelled;
                }
                self.drain(ctx, batch).await;
                return Verdict::Completed(CompletionPath::StopIndicatorGone);
            }

            if !self.pause(self.timing.poll_interval, deadline).await {
                return Verdict::Cancelled;
            }
        }

        log::warn!(
            "Batch on channel {} page {} timed out after {}s",
            ctx.channel,
            ctx.page,
            self.timing.batch_timeout.as_secs()
        );
        Verdict::TimedOut
    }

    /// Every item is queued; waits for the alert that reports the tallies.
    async fn await_alert(
        &mut self,
        ctx: &BatchContext<'_>,
        batch: &mut BatchTracker,
        queued: u32,
        deadline: Instant,
    ) -> Verdict {
        let sub_deadline = (Instant::now() + self.timing.settle_timeout).min(deadline);

        loop {
            if self.cancel.is_cancelled() {
                return Verdict::Cancelled;
            }
            if !self.guard.check_valid(self.remote).await {
                return Verdict::Inconclusive;
            }
            self.drain(ctx, batch).await;

            match self.remote.poll_status().await {
                Ok(status) if status.alert_visible => {
                    let text = status.alert_text.unwrap_or_default();
                    log::info!("Transfer alert: {text}");
                    if let Some((success, failure)) = parse_alert(&text) {
                        batch.set_expected(success, failure);
                        return self
                            .settle(ctx, batch, success, deadline, CompletionPath::Alert)
                            .await;
                    }
                    return self
                        .settle(
                            ctx,
                            batch,
                            queued,
                            deadline,
                            CompletionPath::QueuedWithoutAlert,
                        )
                        .await;
                }
                Ok(_) => {}
                Err(e) => log::warn!("Status poll failed: {e}"),
            }

            if Instant::now() >= sub_deadline {
                log::warn!(
                    "No alert after {queued} item(s) queued; completing with {} landed and zero tallies",
                    batch.landed_count()
                );
                return Verdict::Completed(CompletionPath::QueuedWithoutAlert);
            }
            if !self.pause(self.timing.settle_interval, sub_deadline).await {
                return Verdict::Cancelled;
            }
        }
    }

    /// Waits until `target` items landed with nothing in flight, or the
    /// settling budget expires. Either way the batch counts as complete,
    /// unless the session is lost first.
    async fn settle(
        &mut self,
        ctx: &BatchContext<'_>,
        batch: &mut BatchTracker,
        target: u32,
        deadline: Instant,
        path: CompletionPath,
    ) -> Verdict {
        let target = usize::try_from(target).unwrap_or(usize::MAX);
        let sub_deadline = (Instant::now() + self.timing.settle_timeout).min(deadline);

        loop {
            self.drain(ctx, batch).await;
            if batch.is_settled(target) {
                log::info!("All {target} item(s) landed");
                return Verdict::Completed(path);
            }
            if !self.guard.check_valid(self.remote).await {
                return Verdict::Inconclusive;
            }
            if Instant::now() >= sub_deadline {
                log::warn!(
                    "Settling wait expired with {}/{target} landed, {} in flight",
                    batch.landed_count(),
                    batch.pending_count()
                );
                return Verdict::Completed(path);
            }
            if !self.pause(self.timing.settle_interval, sub_deadline).await {
                return Verdict::Cancelled;
            }
        }
    }

    /// Sleeps for `duration`, clipped to `deadline`. False if cancelled.
    async fn pause(&self, duration: Duration, deadline: Instant) -> bool {
        let until = (Instant::now() + duration).min(deadline);
        sleep_until_or_cancel(self.cancel, until).await
    }

    /// Applies every event queued so far.
    async fn drain(&mut self, ctx: &BatchContext<'_>, batch: &mut BatchTracker) {
        while let Ok(event) = self.events.try_recv() {
            self.apply(ctx, batch, event).await;
        }
    }

    async fn apply(&mut self, ctx: &BatchContext<'_>, batch: &mut BatchTracker, event: TransferEvent) {
        match event {
            TransferEvent::Started { filename } => batch.mark_started(&filename),
            TransferEvent::Aborted { filename, reason } => {
                if batch.has_seen(&filename) {
                    return;
                }
                log::warn!("Transfer of {filename} aborted: {reason}");
                batch.resolve(FileRecord {
                    channel: ctx.channel,
                    page: ctx.page,
                    filename,
                    parsed: None,
                    byte_size: 0,
                    state: FileState::Failed,
                });
            }
            TransferEvent::Landed {
                filename,
                byte_size,
            } => {
                if batch.has_seen(&filename) {
                    log::debug!("Ignoring repeated landing of {filename}");
                    return;
                }
                let (state, parsed) = self.ingest(ctx, &filename, byte_size).await;
                batch.resolve(FileRecord {
                    channel: ctx.channel,
                    page: ctx.page,
                    filename,
                    parsed,
                    byte_size,
                    state,
                });
            }
        }
    }

    /// Organizes one landed item and commits it to the ledger.
    async fn ingest(
        &mut self,
        ctx: &BatchContext<'_>,
        filename: &str,
        byte_size: u64,
    ) -> (FileState, Option<ParsedName>) {
        let landing = self.paths.landing_dir.join(filename);

        let on_disk = self.fs.file_size(&landing).await;
        if on_disk.is_none() {
            log::warn!(
                "{filename} reported as landed but not found in {}",
                self.paths.landing_dir.display()
            );
            return (FileState::Failed, None);
        }
        if byte_size == 0 || on_disk == Some(0) {
            log::warn!("{}", Error::ZeroByteTransfer(filename.to_string()));
            self.discard(&landing).await;
            return (FileState::Failed, None);
        }

        if self.ledger.is_committed(ctx.channel, ctx.page, filename) {
            log::info!("Skipping {filename}: already retrieved");
            self.discard(&landing).await;
            return (FileState::SkippedDuplicate, grammar::parse(filename).ok());
        }

        let parsed = match grammar::parse(filename) {
            Ok(parsed) if parsed.variant == GrammarVariant::StartOnly => {
                let end = end_from_rows(ctx.rows, &parsed);
                parsed.with_end(end)
            }
            Ok(parsed) => parsed,
            Err(e) => {
                log::warn!("{e}; leaving it in {}", self.paths.landing_dir.display());
                return (FileState::Unparsable, None);
            }
        };

        if let Some(reason) = mismatch(ctx, &parsed) {
            log::warn!("Rejecting {filename}: {reason}");
            self.discard(&landing).await;
            return (FileState::Failed, Some(parsed));
        }

        let target = self.paths.organized_dir.join(grammar::organize(&parsed));
        if self.fs.file_exists(&target).await {
            log::info!(
                "Skipping {filename}: {} already exists",
                target.display()
            );
            self.discard(&landing).await;
            self.ledger.commit(ctx.channel, ctx.page, filename);
            return (FileState::SkippedDuplicate, Some(parsed));
        }

        if let Some(dir) = target.parent()
            && let Err(e) = self.fs.create_dir_all(dir).await
        {
            log::error!("Could not create {}: {e}", dir.display());
            return (FileState::Failed, Some(parsed));
        }

        match self.fs.rename_file(&landing, &target).await {
            Ok(()) => {
                self.ledger.commit(ctx.channel, ctx.page, filename);
                log::info!("Saved {filename} as {}", target.display());
                (FileState::Saved, Some(parsed))
            }
            Err(e) => {
                log::error!("Could not move {filename} to {}: {e}", target.display());
                (FileState::Failed, Some(parsed))
            }
        }
    }

    async fn discard(&self, path: &std::path::Path) {
        if let Err(e) = self.fs.remove_file(path).await {
            log::debug!("Could not remove {}: {e}", path.display());
        }
    }
}

/// Why a landed item cannot belong to the batch, if it cannot.
fn mismatch(ctx: &BatchContext<'_>, parsed: &ParsedName) -> Option<String> {
    if parsed.channel != ctx.number {
        return Some(format!(
            "recorded on channel {}, batch is channel {}",
            parsed.channel, ctx.number
        ));
    }
    let mut starts = ctx.rows.iter().filter_map(RowInfo::start).peekable();
    if starts.peek().is_some() && !starts.any(|start| start == parsed.start) {
        return Some(format!(
            "no row on page {} starts at {}",
            ctx.page, parsed.start
        ));
    }
    None
}

/// End time of the row whose start matches the parsed start.
fn end_from_rows(rows: &[RowInfo], parsed: &ParsedName) -> Option<chrono::NaiveDateTime> {
    rows.iter()
        .find(|row| row.start() == Some(parsed.start))
        .and_then(RowInfo::end)
}
