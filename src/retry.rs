//! Per-page retry loop.
//!
//! Each page walks an explicit state machine:
//!
//! ```text
//! Selecting -> Transferring -> Reconciling -> Done
//!     ^                            |
//!     +-------- Retrying <---------+--> Abandoned
//! ```
//!
//! A session loss before or during a transfer routes back to `Selecting`
//! through a resume without consuming an attempt.

use std::time::Duration;

use tokio::time::Instant;

use crate::batch::RecordTally;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::fs::FileSystem;
use crate::reconcile::{BatchContext, BatchOutcome, Verdict};
use crate::remote::RemoteInterface;
use crate::session::Position;
use crate::shutdown::sleep_or_cancel;
use crate::types::{ChannelId, ChannelInfo, PageNumber, RowInfo};

/// Where a page stands in its retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    Selecting,
    Transferring,
    Reconciling,
    Retrying,
    Done,
    Abandoned,
}

/// Final result of one page.
#[derive(Debug)]
pub struct PageOutcome {
    pub channel: ChannelId,
    pub page: PageNumber,
    /// `Done` or `Abandoned`.
    pub state: PageState,
    /// Transfers started, excluding those interrupted by a session loss.
    pub attempts: u32,
    pub resumes: u32,
    /// Device tallies of the last reconciled batch.
    pub success: u32,
    pub failure: u32,
    /// Nothing was transferred because the ledger covered every row.
    pub already_retrieved: bool,
    /// File tallies across every attempt.
    pub tally: RecordTally,
    pub reason: Option<Error>,
    pub elapsed: Duration,
}

impl PageOutcome {
    const fn new(channel: ChannelId, page: PageNumber) -> Self {
        Self {
            channel,
            page,
            state: PageState::Selecting,
            attempts: 0,
            resumes: 0,
            success: 0,
            failure: 0,
            already_retrieved: false,
            tally: RecordTally {
                saved: 0,
                skipped: 0,
                failed: 0,
                unparsable: 0,
                bytes: 0,
            },
            reason: None,
            elapsed: Duration::ZERO,
        }
    }

    /// An abandoned page that never started a transfer.
    #[must_use]
    pub fn abandoned(channel: ChannelId, page: PageNumber, reason: Error) -> Self {
        Self {
            state: PageState::Abandoned,
            reason: Some(reason),
            ..Self::new(channel, page)
        }
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.state == PageState::Done
    }
}

/// What selecting a page found.
enum Selection {
    Empty,
    AlreadyRetrieved(usize),
    Started(Vec<RowInfo>),
}

impl<R: RemoteInterface, F: FileSystem> Engine<R, F> {
    /// Runs the retry loop for the page currently shown by the remote.
    pub async fn run_page(&mut self, channel: &ChannelInfo, page: PageNumber) -> PageOutcome {
        let started = Instant::now();
        let number = channel.number();
        let channel = channel.id;
        let position = Position {
            channel,
            page,
            range: self.range,
        };
        let max_attempts = self.timing.max_attempts.max(1);
        let mut outcome = PageOutcome::new(channel, page);

        let mut rows = Vec::new();
        let mut batch: Option<BatchOutcome> = None;
        let mut state = PageState::Selecting;

        loop {
            log::debug!("Channel {channel} page {page}: {state:?}");
            state = match state {
                PageState::Selecting => {
                    if self.cancel.is_cancelled() {
                        outcome.reason = Some(Error::Cancelled);
                        PageState::Abandoned
                    } else if !self.guard.check_valid(&self.remote).await {
                        self.recover(&position, &mut outcome).await
                    } else {
                        match self.select(channel, page).await {
                            Ok(Selection::Empty) => {
                                log::info!("Channel {channel} page {page}: no recordings");
                                PageState::Done
                            }
                            Ok(Selection::AlreadyRetrieved(count)) => {
                                log::info!(
                                    "Channel {channel} page {page}: all {count} recording(s) already retrieved"
                                );
                                outcome.already_retrieved = true;
                                PageState::Done
                            }
                            Ok(Selection::Started(listed)) => {
                                rows = listed;
                                outcome.attempts += 1;
                                log::info!(
                                    "Channel {channel} page {page}: transferring {} recording(s), attempt {}/{max_attempts}",
                                    rows.len(),
                                    outcome.attempts
                                );
                                PageState::Transferring
                            }
                            Err(e) => {
                                if self.guard.check_valid(&self.remote).await {
                                    log::error!("Channel {channel} page {page}: {e}");
                                    outcome.reason = Some(e);
                                    PageState::Abandoned
                                } else {
                                    log::warn!(
                                        "Channel {channel} page {page}: {e} after session loss"
                                    );
                                    self.recover(&position, &mut outcome).await
                                }
                            }
                        }
                    }
                }
                PageState::Transferring => {
                    let result = self
                        .reconciler()
                        .run(&BatchContext {
                            channel,
                            number,
                            page,
                            rows: &rows,
                        })
                        .await;
                    outcome.tally.add(&result.tally);
                    batch = Some(result);
                    PageState::Reconciling
                }
                PageState::Reconciling => match batch.take() {
                    Some(result) => {
                        outcome.success = result.success;
                        outcome.failure = result.failure;
                        self.judge(&result, &position, max_attempts, &mut outcome)
                            .await
                    }
                    None => PageState::Selecting,
                },
                PageState::Retrying => {
                    let delay = self.timing.retry_delay(outcome.attempts);
                    log::warn!(
                        "Channel {channel} page {page}: retrying in {}s",
                        delay.as_secs()
                    );
                    if sleep_or_cancel(&self.cancel, delay).await {
                        PageState::Selecting
                    } else {
                        outcome.reason = Some(Error::Cancelled);
                        PageState::Abandoned
                    }
                }
                PageState::Done | PageState::Abandoned => break,
            };
        }

        outcome.state = state;
        outcome.elapsed = started.elapsed();
        outcome
    }

    /// Decides what follows a reconciled batch.
    async fn judge(
        &mut self,
        result: &BatchOutcome,
        position: &Position,
        max_attempts: u32,
        outcome: &mut PageOutcome,
    ) -> PageState {
        let (channel, page) = (position.channel, position.page);

        let failure = match result.verdict {
            Verdict::Cancelled => {
                outcome.reason = Some(Error::Cancelled);
                return PageState::Abandoned;
            }
            Verdict::Inconclusive => {
                outcome.attempts = outcome.attempts.saturating_sub(1);
                log::warn!("Channel {channel} page {page}: session lost mid-transfer");
                return self.recover(position, outcome).await;
            }
            Verdict::Completed(_) if result.failure == 0 => {
                log::info!(
                    "Channel {channel} page {page}: {} succeeded, {} saved",
                    result.success,
                    result.tally.saved
                );
                return PageState::Done;
            }
            Verdict::Completed(_) => Error::PartialFailure {
                success: result.success,
                failure: result.failure,
                attempts: outcome.attempts,
            },
            Verdict::TimedOut => Error::TransferTimeout {
                channel,
                page,
                elapsed_secs: result.elapsed.as_secs(),
            },
        };

        if outcome.attempts < max_attempts {
            log::warn!("Channel {channel} page {page}: {failure}");
            PageState::Retrying
        } else {
            log::error!("Channel {channel} page {page}: giving up, {failure}");
            outcome.reason = Some(failure);
            PageState::Abandoned
        }
    }

    /// Resumes after a session loss. Abandons the page when resuming fails
    /// or the page keeps losing its session.
    async fn recover(&mut self, position: &Position, outcome: &mut PageOutcome) -> PageState {
        let expired = Error::SessionExpired {
            channel: position.channel,
            page: position.page,
        };
        if outcome.resumes >= self.timing.max_attempts.max(1) {
            log::error!("{expired}: too many session losses on this page");
            outcome.reason = Some(expired);
            return PageState::Abandoned;
        }

        outcome.resumes += 1;
        if self
            .resume
            .resume(&self.remote, &mut self.guard, position)
            .await
        {
            PageState::Selecting
        } else {
            outcome.reason = Some(if self.cancel.is_cancelled() {
                Error::Cancelled
            } else {
                expired
            });
            PageState::Abandoned
        }
    }

    /// Lists the page and starts a transfer unless there is nothing to do.
    async fn select(&mut self, channel: ChannelId, page: PageNumber) -> Result<Selection> {
        let rows = self.remote.list_rows().await?;
        if rows.is_empty() {
            return Ok(Selection::Empty);
        }

        let committed = self.ledger.stats_for(channel, page).count;
        if committed >= rows.len() {
            return Ok(Selection::AlreadyRetrieved(committed));
        }

        self.remote.select_all_rows().await?;
        self.discard_stale_events();
        self.remote.start_transfer().await?;
        Ok(Selection::Started(rows))
    }

    /// Drops events left over from an earlier batch so they cannot be
    /// attributed to the one about to start.
    fn discard_stale_events(&mut self) {
        let mut stale = 0usize;
        while let Ok(event) = self.events.try_recv() {
            log::debug!("Discarding stale transfer event {event:?}");
            stale += 1;
        }
        if stale > 0 {
            log::warn!("Discarded {stale} transfer event(s) from an earlier batch");
        }
    }
}
