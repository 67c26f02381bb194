//! The remote device surface consumed by the engine.
//!
//! Implementations drive the device's interactive UI (or a bridge to it).
//! Transfer notifications do not come back through these calls; they are
//! delivered as [`TransferEvent`]s on an unbounded channel whose receiver the
//! engine owns, in no guaranteed order relative to [`RemoteInterface::poll_status`].

mod http;
#[cfg(test)]
pub(crate) mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::types::{
    ChannelId, ChannelInfo, Credentials, DateRange, PageNumber, Pagination, RowInfo,
    SessionSnapshot, StatusSnapshot,
};

pub use http::HttpRemote;

/// Asynchronous notification about one transferred item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransferEvent {
    /// The device started sending an item.
    Started { filename: String },
    /// The item finished writing into the landing directory.
    Landed { filename: String, byte_size: u64 },
    /// The item failed before landing.
    Aborted { filename: String, reason: String },
}

/// Sending half handed to remote implementations.
pub type EventSender = mpsc::UnboundedSender<TransferEvent>;

/// Receiving half owned by the engine.
pub type EventReceiver = mpsc::UnboundedReceiver<TransferEvent>;

/// Creates the transfer event channel.
#[must_use]
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Operations the engine needs from the device UI.
///
/// Every call is a suspension point. Navigation failures are reported as
/// [`crate::Error::Navigation`].
#[async_trait]
pub trait RemoteInterface: Send + Sync {
    /// Logs in. `Ok(false)` means the device rejected the attempt.
    async fn login(&self, credentials: &Credentials) -> Result<bool>;

    /// Reads whether the current context is authenticated. No side effects.
    async fn is_authenticated(&self) -> Result<bool>;

    /// Captures the current session so a later run can skip the login.
    async fn export_session(&self) -> Result<SessionSnapshot>;

    /// Installs a captured session. Whether it is still accepted is read
    /// afterwards through [`RemoteInterface::is_authenticated`].
    async fn import_session(&self, snapshot: &SessionSnapshot) -> Result<()>;

    /// Navigates from the post-login landing page to the download view.
    async fn enter_download_view(&self) -> Result<()>;

    /// Lists selectable channels.
    async fn list_channels(&self) -> Result<Vec<ChannelInfo>>;

    async fn select_channel(&self, channel: ChannelId) -> Result<()>;

    async fn set_date_range(&self, range: &DateRange) -> Result<()>;

    /// Runs the query. `Ok(false)` means no result table appeared.
    async fn run_query(&self) -> Result<bool>;

    async fn pagination(&self) -> Result<Pagination>;

    async fn goto_page(&self, page: PageNumber) -> Result<()>;

    async fn list_rows(&self) -> Result<Vec<RowInfo>>;

    async fn select_all_rows(&self) -> Result<()>;

    async fn select_rows(&self, indices: &[usize]) -> Result<()>;

    async fn start_transfer(&self) -> Result<()>;

    async fn poll_status(&self) -> Result<StatusSnapshot>;

    /// Releases the remote resource.
    async fn close(&self) -> Result<()>;
}
