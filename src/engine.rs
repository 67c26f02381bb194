//! Run orchestration: login, channel discovery and the channel/page walk.

use tokio_util::sync::CancellationToken;

use crate::config::{PathConfig, TimingConfig};
use crate::error::{Error, Result};
use crate::fs::{FileSystem, TokioFileSystem};
use crate::ledger::Ledger;
use crate::reconcile::Reconciler;
use crate::remote::{EventReceiver, RemoteInterface};
use crate::retry::PageOutcome;
use crate::session::{Position, ResumeController, SessionGuard, SessionStore};
use crate::stats::{ChannelStats, RunStats, RunStatsBuilder};
use crate::types::{
    ChannelFilter, ChannelId, ChannelInfo, Credentials, DateRange, PageNumber, Pagination,
};

/// Callbacks for reporting run progress.
///
/// Implement this trait to receive updates as channels and pages finish.
/// All methods have default no-op implementations.
pub trait RunProgress: Send + Sync {
    /// Called once the channel list has been filtered.
    fn on_channels(&self, _channels: &[ChannelInfo]) {}

    /// Called when a channel's query returned `pages` pages.
    fn on_channel_start(&self, _channel: &ChannelInfo, _pages: PageNumber) {}

    /// Called after each page reaches `Done` or `Abandoned`.
    fn on_page_finished(&self, _outcome: &PageOutcome) {}

    /// Called when every page of a channel has been handled.
    fn on_channel_finished(&self, _stats: &ChannelStats) {}
}

/// A null progress implementation that ignores all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl RunProgress for NoProgress {}

/// Everything the engine needs besides the remote and the file system.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub credentials: Credentials,
    pub timing: TimingConfig,
    pub paths: PathConfig,
    pub range: DateRange,
}

/// Drives one run over every active channel for one date range.
pub struct Engine<R, F: FileSystem = TokioFileSystem> {
    pub(crate) remote: R,
    pub(crate) fs: F,
    pub(crate) events: EventReceiver,
    pub(crate) ledger: Ledger,
    pub(crate) guard: SessionGuard,
    pub(crate) resume: ResumeController,
    pub(crate) timing: TimingConfig,
    pub(crate) paths: PathConfig,
    pub(crate) range: DateRange,
    pub(crate) cancel: CancellationToken,
}

impl<R: RemoteInterface> Engine<R, TokioFileSystem> {
    /// Creates an engine on the real file system.
    ///
    /// The ledger for `settings.range` is loaded from the state directory,
    /// which also holds the saved device session.
    #[must_use]
    pub fn new(
        remote: R,
        events: EventReceiver,
        settings: EngineSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self::with_fs(remote, events, settings, cancel, TokioFileSystem)
    }
}

impl<R: RemoteInterface, F: FileSystem> Engine<R, F> {
    /// Creates an engine with a custom file system implementation.
    #[must_use]
    pub fn with_fs(
        remote: R,
        events: EventReceiver,
        settings: EngineSettings,
        cancel: CancellationToken,
        fs: F,
    ) -> Self {
        let ledger = Ledger::load(Ledger::path_for(
            &settings.paths.state_dir,
            settings.range.date(),
        ));
        let resume = ResumeController::new(
            settings.credentials,
            settings.timing.clone(),
            SessionStore::new(SessionStore::path_for(&settings.paths.state_dir)),
            cancel.clone(),
        );

        Self {
            remote,
            fs,
            events,
            ledger,
            guard: SessionGuard::new(),
            resume,
            timing: settings.timing,
            paths: settings.paths,
            range: settings.range,
            cancel,
        }
    }

    #[must_use]
    pub const fn remote(&self) -> &R {
        &self.remote
    }

    #[must_use]
    pub const fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Borrows the state a batch reconciliation needs.
    pub(crate) fn reconciler(&mut self) -> Reconciler<'_, R, F> {
        Reconciler {
            remote: &self.remote,
            fs: &self.fs,
            guard: &mut self.guard,
            ledger: &mut self.ledger,
            events: &mut self.events,
            timing: &self.timing,
            paths: &self.paths,
            cancel: &self.cancel,
        }
    }

    /// Processes every channel accepted by `filter`.
    ///
    /// # Errors
    ///
    /// Only failures that make the whole run impossible are returned: login
    /// exhausted its attempts, or the channel list could not be read.
    pub async fn run<P: RunProgress + ?Sized>(
        &mut self,
        filter: ChannelFilter,
        progress: &P,
    ) -> Result<RunStats> {
        let mut stats = RunStatsBuilder::new(self.range.date());

        self.resume.establish(&self.remote, &mut self.guard).await?;
        self.remote.enter_download_view().await?;

        let listed = self.remote.list_channels().await?;
        let listed_count = listed.len();
        let channels: Vec<ChannelInfo> = listed
            .into_iter()
            .filter(|c| filter.contains(c.number()))
            .collect();
        log::info!(
            "Processing {} of {listed_count} channel(s) ({filter}) for {}",
            channels.len(),
            self.range.date()
        );
        progress.on_channels(&channels);

        for channel in &channels {
            if self.cancel.is_cancelled() {
                log::warn!("Interrupted, skipping remaining channels");
                break;
            }
            let channel_stats = self.run_channel(channel, progress).await;
            progress.on_channel_finished(&channel_stats);
            stats.add_channel(channel_stats);
        }

        if let Err(e) = self.ledger.flush() {
            log::error!("Final ledger flush failed: {e}");
        }

        let run = stats.build(self.cancel.is_cancelled());
        let totals = run.totals();
        log::info!(
            "Run finished: {} saved, {} skipped, {} failed, {} unparsable; {} page(s) done, {} abandoned",
            totals.saved,
            totals.skipped,
            totals.failed,
            totals.unparsable,
            run.pages_done(),
            run.pages_abandoned()
        );
        Ok(run)
    }

    async fn run_channel<P: RunProgress + ?Sized>(
        &mut self,
        channel: &ChannelInfo,
        progress: &P,
    ) -> ChannelStats {
        let started = tokio::time::Instant::now();
        let mut stats = ChannelStats::new(channel);
        log::info!("Channel {}: {}", channel.number(), channel.label);

        let pagination = match self.open_channel(channel.id).await {
            Ok(Some(pagination)) => pagination,
            Ok(None) => {
                log::info!("Channel {}: no recordings", channel.number());
                stats.elapsed = started.elapsed();
                return stats;
            }
            Err(e) => {
                log::error!("Channel {}: skipped, {e}", channel.number());
                stats.error = Some(e.to_string());
                stats.elapsed = started.elapsed();
                return stats;
            }
        };

        let mut total = pagination.total;
        stats.pages_total = total;
        progress.on_channel_start(channel, total);

        let mut page: PageNumber = 1;
        while page <= total {
            if self.cancel.is_cancelled() {
                break;
            }

            if page > 1
                && let Err(e) = self.remote.goto_page(page).await
                && self.guard.check_valid(&self.remote).await
            {
                log::error!("Channel {} page {page}: {e}", channel.number());
                let outcome = PageOutcome::abandoned(channel.id, page, e);
                progress.on_page_finished(&outcome);
                stats.record_page(&outcome);
                page += 1;
                continue;
            }

            let outcome = self.run_page_bounded(channel, page).await;
            if outcome.resumes > 0
                && let Ok(refreshed) = self.remote.pagination().await
            {
                total = refreshed.total.max(page);
                stats.pages_total = total;
            }

            log_page(&outcome, total);
            progress.on_page_finished(&outcome);
            stats.record_page(&outcome);
            page += 1;
        }

        stats.elapsed = started.elapsed();
        log::info!(
            "Channel {}: {} saved, {} skipped, {} failed; {}/{} page(s) done; {} recording(s) in ledger",
            stats.channel,
            stats.tally.saved,
            stats.tally.skipped,
            stats.tally.failed,
            stats.pages_done,
            stats.pages_total,
            self.ledger.channel_total(channel.id)
        );
        stats
    }

    /// Runs the query for a channel. `None` means no result table.
    async fn open_channel(&mut self, channel: ChannelId) -> Result<Option<Pagination>> {
        if !self.guard.check_valid(&self.remote).await {
            let position = Position {
                channel,
                page: 1,
                range: self.range,
            };
            if !self
                .resume
                .resume(&self.remote, &mut self.guard, &position)
                .await
            {
                return Err(Error::SessionExpired { channel, page: 1 });
            }
            return Ok(Some(self.remote.pagination().await?));
        }

        self.remote.select_channel(channel).await?;
        self.remote.set_date_range(&self.range).await?;
        if !self.remote.run_query().await? {
            return Ok(None);
        }
        Ok(Some(self.remote.pagination().await?))
    }

    /// Runs a page, bounded by the optional per-page timeout.
    async fn run_page_bounded(&mut self, info: &ChannelInfo, page: PageNumber) -> PageOutcome {
        let Some(limit) = self.timing.page_timeout else {
            return self.run_page(info, page).await;
        };

        if let Ok(outcome) = tokio::time::timeout(limit, self.run_page(info, page)).await {
            outcome
        } else {
            let channel = info.id;
            log::error!(
                "Channel {channel} page {page}: exceeded the page budget of {}s",
                limit.as_secs()
            );
            if let Err(e) = self.ledger.flush() {
                log::error!("Ledger flush failed: {e}");
            }
            PageOutcome::abandoned(
                channel,
                page,
                Error::TransferTimeout {
                    channel,
                    page,
                    elapsed_secs: limit.as_secs(),
                },
            )
        }
    }

    /// Flushes the ledger and releases the remote.
    ///
    /// # Errors
    ///
    /// Returns the first failure; the remote is closed even if the flush fails.
    pub async fn shutdown(&mut self) -> Result<()> {
        let flushed = self.ledger.flush();
        if let Err(e) = &flushed {
            log::error!("Ledger flush on shutdown failed: {e}");
        }
        let closed = self.remote.close().await;
        if let Err(e) = &closed {
            log::warn!("Closing the remote failed: {e}");
        }
        flushed.and(closed)
    }
}

fn log_page(outcome: &PageOutcome, total: PageNumber) {
    match &outcome.reason {
        None => log::info!(
            "Channel {} page {}/{total}: done, {} saved, {} skipped",
            outcome.channel,
            outcome.page,
            outcome.tally.saved,
            outcome.tally.skipped
        ),
        Some(reason) => log::warn!(
            "Channel {} page {}/{total}: abandoned after {} attempt(s), {reason}",
            outcome.channel,
            outcome.page,
            outcome.attempts
        ),
    }
}
