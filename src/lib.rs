//! playback-dl - Retrieve a day of recordings from a network video recorder.
//!
//! The recorder only exposes an interactive web UI, so every operation goes
//! through a [`RemoteInterface`]. Completion of each transfer batch is
//! reconciled from the polled progress text, the terminal alert and the
//! transfer events, and every landed file is filed under
//! `channel{n}/YYYY-MM-DD.HH-MM-SS[_HH-MM-SS].ext` and committed to a
//! per-date [`Ledger`] so later runs never fetch it again.
//!
//! # Example
//!
//! ```no_run
//! use playback_dl::{
//!     ChannelFilter, Credentials, DateRange, Engine, EngineSettings, HttpRemote, NoProgress,
//!     PathConfig, TimingConfig, event_channel,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> playback_dl::Result<()> {
//! let (events_tx, events_rx) = event_channel();
//! let remote = HttpRemote::connect("http://127.0.0.1:9730", "192.168.88.19", events_tx)?;
//!
//! let settings = EngineSettings {
//!     credentials: Credentials {
//!         username: "admin".into(),
//!         password: "secret".into(),
//!     },
//!     timing: TimingConfig::default(),
//!     paths: PathConfig::default(),
//!     range: DateRange::for_day(chrono::Local::now().date_naive()),
//! };
//! let mut engine = Engine::new(remote, events_rx, settings, CancellationToken::new());
//!
//! let stats = engine.run(ChannelFilter::default(), &NoProgress).await?;
//! println!("Saved {} recording(s)", stats.totals().saved);
//! engine.shutdown().await?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod batch;
pub mod config;
pub mod credentials;
pub mod engine;
pub mod error;
pub mod format;
pub mod fs;
pub mod grammar;
pub mod ledger;
pub mod reconcile;
pub mod remote;
pub mod retry;
pub mod session;
pub mod shutdown;
pub mod stats;
pub mod types;

#[cfg(feature = "cli")]
pub mod cli;

// Re-export main types for convenience
pub use batch::{BatchTracker, FileRecord, FileState, RecordTally};
pub use config::{AppConfig, CredentialsConfig, DeviceConfig, PathConfig, TimingConfig};
pub use engine::{Engine, EngineSettings, NoProgress, RunProgress};
pub use error::{Error, Result};
pub use format::{format_bytes, format_duration};
pub use fs::{FileSystem, TokioFileSystem};
pub use grammar::{GrammarVariant, ParsedName};
pub use ledger::{Ledger, PageStats};
pub use reconcile::{BatchOutcome, CompletionPath, Verdict};
pub use remote::{EventReceiver, EventSender, HttpRemote, RemoteInterface, TransferEvent, event_channel};
pub use retry::{PageOutcome, PageState};
pub use session::{ResumeController, SessionGuard, SessionState, SessionStore};
pub use shutdown::install_signal_handler;
pub use stats::{ChannelStats, RunStats};
pub use types::{
    ChannelFilter, ChannelId, ChannelInfo, Credentials, DateRange, PageNumber, Pagination,
    RowInfo, SessionSnapshot, StatusSnapshot,
};
