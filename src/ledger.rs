//! Per-date ledger of recordings already retrieved.
//!
//! One JSON document per queried date, keyed by channel and page:
//!
//! ```json
//! {"channels": {"3": {"pages": {"1": ["a.mp4", "b.mp4"]}}}}
//! ```
//!
//! The ledger is the source of truth for "already retrieved": a filename
//! present for `(channel, page)` is never transferred again for that
//! location. Every new commit is saved atomically (write tmp + rename); a
//! failed save leaves the in-memory state intact and is retried on the next
//! commit or flush.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{ChannelId, PageNumber};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct ChannelPages {
    #[serde(default)]
    pages: BTreeMap<PageNumber, BTreeSet<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct LedgerDocument {
    #[serde(default)]
    channels: BTreeMap<ChannelId, ChannelPages>,
}

/// Committed filenames for one page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageStats {
    pub count: usize,
    pub filenames: Vec<String>,
}

/// Durable record of committed filenames for one date's run.
#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    doc: LedgerDocument,
    dirty: bool,
}

impl Ledger {
    /// Ledger file name for a queried date: `ledger-YYYY-MM-DD.json`.
    #[must_use]
    pub fn path_for(state_dir: &Path, date: NaiveDate) -> PathBuf {
        state_dir.join(format!("ledger-{}.json", date.format("%Y-%m-%d")))
    }

    /// Loads the ledger at `path`.
    ///
    /// A missing or corrupt file yields an empty ledger; the anomaly is
    /// logged but never fatal.
    #[must_use]
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let doc = match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<LedgerDocument>(&contents) {
                Ok(doc) => {
                    log::info!(
                        "Loaded ledger {} ({} file(s) across {} channel(s))",
                        path.display(),
                        doc.channels
                            .values()
                            .flat_map(|c| c.pages.values())
                            .map(BTreeSet::len)
                            .sum::<usize>(),
                        doc.channels.len()
                    );
                    doc
                }
                Err(e) => {
                    log::warn!("Ledger {} is corrupt, starting empty: {e}", path.display());
                    LedgerDocument::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No ledger at {}, starting empty", path.display());
                LedgerDocument::default()
            }
            Err(e) => {
                log::warn!("Ledger {} unreadable, starting empty: {e}", path.display());
                LedgerDocument::default()
            }
        };

        Self {
            path,
            doc,
            dirty: false,
        }
    }

    /// Returns the ledger file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if `filename` was already committed for `(channel, page)`.
    #[must_use]
    pub fn is_committed(&self, channel: ChannelId, page: PageNumber, filename: &str) -> bool {
        self.doc
            .channels
            .get(&channel)
            .and_then(|c| c.pages.get(&page))
            .is_some_and(|files| files.contains(filename))
    }

    /// Records `filename` under `(channel, page)` and saves.
    ///
    /// Idempotent. Returns true if the filename was new. A save failure is
    /// logged and retried on the next commit or flush.
    pub fn commit(&mut self, channel: ChannelId, page: PageNumber, filename: &str) -> bool {
        let inserted = self
            .doc
            .channels
            .entry(channel)
            .or_default()
            .pages
            .entry(page)
            .or_default()
            .insert(filename.to_string());

        if inserted {
            self.dirty = true;
        }
        if self.dirty
            && let Err(e) = self.save()
        {
            log::warn!("Ledger save deferred: {e}");
        }
        inserted
    }

    /// Committed filenames for one page.
    #[must_use]
    pub fn stats_for(&self, channel: ChannelId, page: PageNumber) -> PageStats {
        let filenames: Vec<String> = self
            .doc
            .channels
            .get(&channel)
            .and_then(|c| c.pages.get(&page))
            .map(|files| files.iter().cloned().collect())
            .unwrap_or_default();
        PageStats {
            count: filenames.len(),
            filenames,
        }
    }

    /// Number of committed filenames across all pages of a channel.
    #[must_use]
    pub fn channel_total(&self, channel: ChannelId) -> usize {
        self.doc
            .channels
            .get(&channel)
            .map_or(0, |c| c.pages.values().map(BTreeSet::len).sum())
    }

    /// Returns true if there are commits not yet on disk.
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Forces a synchronous durable write of any pending commits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LedgerIo`] if the file cannot be written; in-memory
    /// state is kept and the write is retried later.
    pub fn flush(&mut self) -> Result<()> {
        if self.dirty { self.save() } else { Ok(()) }
    }

    fn save(&mut self) -> Result<()> {
        self.write_atomic().map_err(Error::LedgerIo)?;
        self.dirty = false;
        Ok(())
    }

    fn write_atomic(&self) -> std::io::Result<()> {
        if let Some(dir) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let body = serde_json::to_string_pretty(&self.doc)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, body)?;
        std::fs::rename(&tmp_path, &self.path)
    }
}
