//! `RemoteInterface` over an HTTP/JSON UI-automation bridge.
//!
//! The bridge process owns the browser session against the device and
//! exposes one endpoint per UI operation. Transfer notifications are
//! queued by the bridge and pulled by a background pump from
//! `GET /events?since=<cursor>`.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::{EventSender, RemoteInterface, TransferEvent};
use crate::error::{Error, Result};
use crate::types::{
    ChannelId, ChannelInfo, Credentials, DateRange, PageNumber, Pagination, RowInfo,
    SessionSnapshot, StatusSnapshot,
};

const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Deserialize)]
struct Ack {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    host: &'a str,
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct SessionResponse {
    authenticated: bool,
}

#[derive(Serialize)]
struct ChannelRequest {
    id: ChannelId,
}

#[derive(Serialize)]
struct RangeRequest {
    start: String,
    end: String,
}

#[derive(Serialize)]
struct PageRequest {
    page: PageNumber,
}

#[derive(Serialize)]
struct SelectRequest<'a> {
    indices: &'a [usize],
}

#[derive(Debug, Deserialize)]
struct EventBatch {
    cursor: u64,
    #[serde(default)]
    events: Vec<TransferEvent>,
}

fn build_http_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(60))
        .pool_idle_timeout(Duration::from_secs(60))
        .tcp_keepalive(Duration::from_secs(30))
        .build()
}

/// Remote device reached through the automation bridge.
#[derive(Debug)]
pub struct HttpRemote {
    http: reqwest::Client,
    base_url: String,
    host: String,
    pump: CancellationToken,
}

impl HttpRemote {
    /// Connects to the bridge and starts forwarding its transfer events.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn connect(base_url: &str, host: &str, events: EventSender) -> Result<Self> {
        let http = build_http_client()?;
        let base_url = base_url.trim_end_matches('/').to_string();
        let pump = CancellationToken::new();

        tokio::spawn(pump_events(
            http.clone(),
            base_url.clone(),
            events,
            pump.clone(),
        ));

        Ok(Self {
            http,
            base_url,
            host: host.to_string(),
            pump,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        Ok(self
            .http
            .get(self.url(path))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }

    async fn post<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<Ack> {
        Ok(self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }

    /// Posts a navigation step, turning a refusal into [`Error::Navigation`].
    async fn step<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<()> {
        let ack = self.post(path, body).await?;
        if ack.ok {
            Ok(())
        } else {
            Err(Error::Navigation(format!(
                "{path}: {}",
                ack.error.as_deref().unwrap_or("refused")
            )))
        }
    }
}

async fn pump_events(
    http: reqwest::Client,
    base_url: String,
    events: EventSender,
    stop: CancellationToken,
) {
    let mut cursor = 0u64;
    loop {
        tokio::select! {
            () = stop.cancelled() => break,
            () = tokio::time::sleep(EVENT_POLL_INTERVAL) => {}
        }

        let batch = async {
            http.get(format!("{base_url}/events?since={cursor}"))
                .send()
                .await?
                .error_for_status()?
                .json::<EventBatch>()
                .await
        }
        .await;

        match batch {
            Ok(batch) => {
                cursor = batch.cursor;
                for event in batch.events {
                    if events.send(event).is_err() {
                        log::debug!("Event receiver dropped, stopping pump");
                        return;
                    }
                }
            }
            Err(e) => log::debug!("Event poll failed: {e}"),
        }
    }
}

#[async_trait]
impl RemoteInterface for HttpRemote {
    async fn login(&self, credentials: &Credentials) -> Result<bool> {
        let ack = self
            .post(
                "/login",
                &LoginRequest {
                    host: &self.host,
                    username: &credentials.username,
                    password: &credentials.password,
                },
            )
            .await?;
        if let Some(error) = ack.error.filter(|_| !ack.ok) {
            log::warn!("Login refused: {error}");
        }
        Ok(ack.ok)
    }

    async fn is_authenticated(&self) -> Result<bool> {
        Ok(self.get::<SessionResponse>("/session").await?.authenticated)
    }

    async fn export_session(&self) -> Result<SessionSnapshot> {
        self.get("/session/state").await
    }

    async fn import_session(&self, snapshot: &SessionSnapshot) -> Result<()> {
        self.step("/session/state", snapshot).await
    }

    async fn enter_download_view(&self) -> Result<()> {
        self.step("/view/download", &()).await
    }

    async fn list_channels(&self) -> Result<Vec<ChannelInfo>> {
        self.get("/channels").await
    }

    async fn select_channel(&self, channel: ChannelId) -> Result<()> {
        self.step("/channel", &ChannelRequest { id: channel }).await
    }

    async fn set_date_range(&self, range: &DateRange) -> Result<()> {
        self.step(
            "/range",
            &RangeRequest {
                start: range.start_text(),
                end: range.end_text(),
            },
        )
        .await
    }

    async fn run_query(&self) -> Result<bool> {
        Ok(self.post("/query", &()).await?.ok)
    }

    async fn pagination(&self) -> Result<Pagination> {
        self.get("/pagination").await
    }

    async fn goto_page(&self, page: PageNumber) -> Result<()> {
        self.step("/page", &PageRequest { page }).await
    }

    async fn list_rows(&self) -> Result<Vec<RowInfo>> {
        self.get("/rows").await
    }

    async fn select_all_rows(&self) -> Result<()> {
        self.step("/select-all", &()).await
    }

    async fn select_rows(&self, indices: &[usize]) -> Result<()> {
        self.step("/select", &SelectRequest { indices }).await
    }

    async fn start_transfer(&self) -> Result<()> {
        self.step("/transfer", &()).await
    }

    async fn poll_status(&self) -> Result<StatusSnapshot> {
        self.get("/status").await
    }

    async fn close(&self) -> Result<()> {
        self.pump.cancel();
        self.step("/close", &()).await
    }
}

impl Drop for HttpRemote {
    fn drop(&mut self) {
        self.pump.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_tolerates_missing_error() {
        let ack: Ack = serde_json::from_str(r#"{"ok":true}"#).unwrap();
        assert!(ack.ok);
        assert!(ack.error.is_none());
    }

    #[test]
    fn event_batch_decodes() {
        let batch: EventBatch = serde_json::from_str(
            r#"{"cursor":7,"events":[{"kind":"started","filename":"a.mp4"},{"kind":"aborted","filename":"b.mp4","reason":"reset"}]}"#,
        )
        .unwrap();
        assert_eq!(batch.cursor, 7);
        assert_eq!(batch.events.len(), 2);
    }

    #[test]
    fn status_snapshot_uses_camel_case() {
        let status: StatusSnapshot = serde_json::from_str(
            r#"{"progressText":"(3/10)","stopIndicatorActive":true,"alertVisible":false,"alertText":null}"#,
        )
        .unwrap();
        assert_eq!(status.progress_text.as_deref(), Some("(3/10)"));
        assert!(status.stop_indicator_active);
    }

    #[tokio::test]
    async fn urls_are_joined_without_double_slash() {
        let (tx, _rx) = crate::remote::event_channel();
        let remote = HttpRemote::connect("http://127.0.0.1:9/", "10.0.0.5", tx).unwrap();
        assert_eq!(remote.url("/status"), "http://127.0.0.1:9/status");
        remote.pump.cancel();
    }
}
