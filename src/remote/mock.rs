//! Scripted `RemoteInterface` for engine tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{EventSender, RemoteInterface, TransferEvent};
use crate::error::{Error, Result};
use crate::types::{
    ChannelId, ChannelInfo, Credentials, DateRange, PageNumber, Pagination, RowInfo,
    SessionSnapshot, StatusSnapshot,
};

/// One scripted poll: the snapshot returned and events emitted alongside it.
#[derive(Debug, Clone, Default)]
pub struct Tick {
    pub status: StatusSnapshot,
    pub events: Vec<TransferEvent>,
}

impl Tick {
    pub fn progress(text: &str) -> Self {
        Self {
            status: StatusSnapshot {
                progress_text: Some(text.to_string()),
                stop_indicator_active: true,
                ..StatusSnapshot::default()
            },
            events: Vec::new(),
        }
    }

    pub fn alert(text: &str) -> Self {
        Self {
            status: StatusSnapshot {
                alert_visible: true,
                alert_text: Some(text.to_string()),
                ..StatusSnapshot::default()
            },
            events: Vec::new(),
        }
    }

    pub fn idle() -> Self {
        Self::default()
    }

    pub fn without_stop(mut self) -> Self {
        self.status.stop_indicator_active = false;
        self
    }

    pub fn with_events(mut self, events: Vec<TransferEvent>) -> Self {
        self.events = events;
        self
    }
}

/// What one `start_transfer` does: events emitted immediately, then a poll
/// script. The last tick repeats once the script runs out.
#[derive(Debug, Clone, Default)]
pub struct MockBatch {
    pub on_start: Vec<TransferEvent>,
    pub ticks: Vec<Tick>,
}

pub fn landed(filename: &str, byte_size: u64) -> TransferEvent {
    TransferEvent::Landed {
        filename: filename.to_string(),
        byte_size,
    }
}

pub fn started(filename: &str) -> TransferEvent {
    TransferEvent::Started {
        filename: filename.to_string(),
    }
}

#[derive(Debug, Default)]
struct State {
    authenticated: bool,
    auth_script: VecDeque<bool>,
    login_results: VecDeque<bool>,
    channels: Vec<ChannelInfo>,
    channel: Option<ChannelId>,
    range: Option<DateRange>,
    total_pages: PageNumber,
    page: PageNumber,
    rows: Vec<RowInfo>,
    batches: VecDeque<MockBatch>,
    ticks: VecDeque<Tick>,
    last_tick: Tick,
    failing: Vec<&'static str>,
    reject_imports: bool,
    imported: Option<SessionSnapshot>,
    calls: Vec<String>,
    closed: bool,
}

/// Records every call; all behaviour is scripted up front.
#[derive(Debug)]
pub struct MockRemote {
    state: Mutex<State>,
    events: EventSender,
}

impl MockRemote {
    pub fn new(events: EventSender) -> Self {
        Self {
            state: Mutex::new(State {
                authenticated: true,
                total_pages: 1,
                page: 1,
                ..State::default()
            }),
            events,
        }
    }

    fn with<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    pub fn set_authenticated(&self, value: bool) {
        self.with(|s| s.authenticated = value);
    }

    /// Upcoming `is_authenticated` answers, before falling back to the flag.
    pub fn script_auth(&self, answers: &[bool]) {
        self.with(|s| s.auth_script.extend(answers));
    }

    /// Upcoming `login` answers; defaults to success.
    pub fn script_logins(&self, answers: &[bool]) {
        self.with(|s| s.login_results.extend(answers));
    }

    /// Makes imported sessions count as expired.
    pub fn reject_imported_sessions(&self) {
        self.with(|s| s.reject_imports = true);
    }

    pub fn imported(&self) -> Option<SessionSnapshot> {
        self.with(|s| s.imported.clone())
    }

    pub fn set_channels(&self, channels: Vec<ChannelInfo>) {
        self.with(|s| s.channels = channels);
    }

    pub fn set_pages(&self, total: PageNumber) {
        self.with(|s| s.total_pages = total);
    }

    pub fn set_rows(&self, count: usize) {
        self.with(|s| {
            s.rows = (0..count)
                .map(|i| RowInfo {
                    channel: "1".into(),
                    start_time: format!("2025-01-29 {:02}:00:00", i % 24),
                    end_time: format!("2025-01-29 {:02}:30:00", i % 24),
                    kind: "Regular".into(),
                    lock_state: "Unlocked".into(),
                })
                .collect();
        });
    }

    pub fn set_row_list(&self, rows: Vec<RowInfo>) {
        self.with(|s| s.rows = rows);
    }

    /// Emits an event outside any scripted batch.
    pub fn send_event(&self, event: TransferEvent) {
        self.emit(vec![event]);
    }

    pub fn push_batch(&self, batch: MockBatch) {
        self.with(|s| s.batches.push_back(batch));
    }

    /// Makes the named operation fail with a navigation error.
    pub fn fail(&self, op: &'static str) {
        self.with(|s| s.failing.push(op));
    }

    pub fn calls(&self) -> Vec<String> {
        self.with(|s| s.calls.clone())
    }

    pub fn count(&self, op: &str) -> usize {
        self.with(|s| s.calls.iter().filter(|c| c.starts_with(op)).count())
    }

    pub fn position(&self) -> (Option<ChannelId>, PageNumber) {
        self.with(|s| (s.channel, s.page))
    }

    pub fn is_closed(&self) -> bool {
        self.with(|s| s.closed)
    }

    fn enter(&self, call: String, op: &'static str) -> Result<()> {
        self.with(|s| {
            s.calls.push(call);
            if s.failing.contains(&op) {
                Err(Error::Navigation(format!("{op} failed")))
            } else {
                Ok(())
            }
        })
    }

    fn emit(&self, events: Vec<TransferEvent>) {
        for event in events {
            let _ = self.events.send(event);
        }
    }
}

#[async_trait]
impl RemoteInterface for MockRemote {
    async fn login(&self, _credentials: &Credentials) -> Result<bool> {
        self.enter("login".into(), "login")?;
        Ok(self.with(|s| {
            let ok = s.login_results.pop_front().unwrap_or(true);
            s.authenticated = ok;
            ok
        }))
    }

    async fn is_authenticated(&self) -> Result<bool> {
        self.enter("is_authenticated".into(), "is_authenticated")?;
        Ok(self.with(|s| s.auth_script.pop_front().unwrap_or(s.authenticated)))
    }

    async fn export_session(&self) -> Result<SessionSnapshot> {
        self.enter("export_session".into(), "export_session")?;
        Ok(self.with(|s| SessionSnapshot {
            cookies: vec![serde_json::json!({ "name": "sid", "value": "mock" })],
            local_storage: [("loggedIn".to_string(), s.authenticated.to_string())].into(),
        }))
    }

    async fn import_session(&self, snapshot: &SessionSnapshot) -> Result<()> {
        self.enter("import_session".into(), "import_session")?;
        self.with(|s| {
            s.imported = Some(snapshot.clone());
            s.authenticated = !s.reject_imports && !snapshot.cookies.is_empty();
        });
        Ok(())
    }

    async fn enter_download_view(&self) -> Result<()> {
        self.enter("enter_download_view".into(), "enter_download_view")
    }

    async fn list_channels(&self) -> Result<Vec<ChannelInfo>> {
        self.enter("list_channels".into(), "list_channels")?;
        Ok(self.with(|s| s.channels.clone()))
    }

    async fn select_channel(&self, channel: ChannelId) -> Result<()> {
        self.enter(format!("select_channel {channel}"), "select_channel")?;
        self.with(|s| {
            s.channel = Some(channel);
            s.page = 1;
        });
        Ok(())
    }

    async fn set_date_range(&self, range: &DateRange) -> Result<()> {
        self.enter(format!("set_date_range {}", range.start_text()), "set_date_range")?;
        self.with(|s| s.range = Some(*range));
        Ok(())
    }

    async fn run_query(&self) -> Result<bool> {
        self.enter("run_query".into(), "run_query")?;
        Ok(self.with(|s| {
            s.page = 1;
            s.channel.is_some() && s.range.is_some()
        }))
    }

    async fn pagination(&self) -> Result<Pagination> {
        self.enter("pagination".into(), "pagination")?;
        Ok(self.with(|s| Pagination {
            current: s.page,
            total: s.total_pages,
        }))
    }

    async fn goto_page(&self, page: PageNumber) -> Result<()> {
        self.enter(format!("goto_page {page}"), "goto_page")?;
        self.with(|s| s.page = page.min(s.total_pages));
        Ok(())
    }

    async fn list_rows(&self) -> Result<Vec<RowInfo>> {
        self.enter("list_rows".into(), "list_rows")?;
        Ok(self.with(|s| s.rows.clone()))
    }

    async fn select_all_rows(&self) -> Result<()> {
        self.enter("select_all_rows".into(), "select_all_rows")
    }

    async fn select_rows(&self, indices: &[usize]) -> Result<()> {
        self.enter(format!("select_rows {indices:?}"), "select_rows")
    }

    async fn start_transfer(&self) -> Result<()> {
        self.enter("start_transfer".into(), "start_transfer")?;
        let on_start = self.with(|s| {
            let batch = s.batches.pop_front().unwrap_or_default();
            s.ticks = batch.ticks.into();
            s.last_tick = Tick::idle();
            batch.on_start
        });
        self.emit(on_start);
        Ok(())
    }

    async fn poll_status(&self) -> Result<StatusSnapshot> {
        self.enter("poll_status".into(), "poll_status")?;
        let tick = self.with(|s| match s.ticks.pop_front() {
            Some(tick) => {
                s.last_tick = Tick {
                    status: tick.status.clone(),
                    events: Vec::new(),
                };
                tick
            }
            None => s.last_tick.clone(),
        });
        self.emit(tick.events);
        Ok(tick.status)
    }

    async fn close(&self) -> Result<()> {
        self.enter("close".into(), "close")?;
        self.with(|s| s.closed = true);
        Ok(())
    }
}
