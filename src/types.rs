//! Shared domain types: channels, pages, date ranges and remote snapshots.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Identifies a video source on the device. Stable across sessions.
pub type ChannelId = u32;

/// 1-based index into a paginated query result.
pub type PageNumber = u32;

/// Time format the device UI uses for date-range inputs and table cells.
pub const DEVICE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

static CHANNEL_LABEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[(\d+)\]").expect("valid regex"));

/// Inclusive time window used for a playback query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl DateRange {
    /// Covers a whole calendar day, `00:00:00` through `23:59:59`.
    #[must_use]
    pub fn for_day(date: NaiveDate) -> Self {
        Self {
            start: date.and_time(NaiveTime::MIN),
            end: date.and_hms_opt(23, 59, 59).unwrap_or(date.and_time(NaiveTime::MIN)),
        }
    }

    /// The calendar date the range starts on (the ledger's date).
    #[must_use]
    pub fn date(&self) -> NaiveDate {
        self.start.date()
    }

    #[must_use]
    pub fn start_text(&self) -> String {
        self.start.format(DEVICE_TIME_FORMAT).to_string()
    }

    #[must_use]
    pub fn end_text(&self) -> String {
        self.end.format(DEVICE_TIME_FORMAT).to_string()
    }
}

/// Inclusive range of channel numbers to process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelFilter {
    pub min: ChannelId,
    pub max: ChannelId,
}

impl Default for ChannelFilter {
    fn default() -> Self {
        Self { min: 1, max: 21 }
    }
}

impl ChannelFilter {
    #[must_use]
    pub const fn contains(&self, channel: ChannelId) -> bool {
        channel >= self.min && channel <= self.max
    }
}

impl fmt::Display for ChannelFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.min, self.max)
    }
}

impl FromStr for ChannelFilter {
    type Err = String;

    /// Accepts `N` or `MIN-MAX`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |v: &str| {
            v.trim()
                .parse::<ChannelId>()
                .map_err(|e| format!("invalid channel number '{v}': {e}"))
        };
        let (min, max) = match s.split_once('-') {
            Some((lo, hi)) => (parse(lo)?, parse(hi)?),
            None => {
                let n = parse(s)?;
                (n, n)
            }
        };
        if min > max {
            return Err(format!("channel range {min}-{max} is empty"));
        }
        Ok(Self { min, max })
    }
}

/// A selectable channel as listed by the remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    /// Value used to select the channel.
    pub id: ChannelId,
    /// Human label, typically `[n] Name`.
    pub label: String,
}

impl ChannelInfo {
    /// Channel number shown in the label, falling back to the id.
    #[must_use]
    pub fn number(&self) -> ChannelId {
        CHANNEL_LABEL_RE
            .captures(&self.label)
            .and_then(|c| c[1].parse().ok())
            .unwrap_or(self.id)
    }
}

/// Current and total page of the active query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub current: PageNumber,
    pub total: PageNumber,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            current: 1,
            total: 1,
        }
    }
}

/// One recording row of the result table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowInfo {
    pub channel: String,
    pub start_time: String,
    pub end_time: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub lock_state: String,
}

impl RowInfo {
    #[must_use]
    pub fn start(&self) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(self.start_time.trim(), DEVICE_TIME_FORMAT).ok()
    }

    #[must_use]
    pub fn end(&self) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(self.end_time.trim(), DEVICE_TIME_FORMAT).ok()
    }
}

/// Polled transfer status observed on the remote.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub progress_text: Option<String>,
    pub stop_indicator_active: bool,
    pub alert_visible: bool,
    pub alert_text: Option<String>,
}

/// Browser-side session captured after a login: cookies and local storage.
///
/// Cookies are kept as opaque JSON objects; only the remote interprets them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    #[serde(default)]
    pub cookies: Vec<serde_json::Value>,
    #[serde(default)]
    pub local_storage: BTreeMap<String, String>,
}

impl SessionSnapshot {
    /// True when there is nothing worth restoring.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty() && self.local_storage.is_empty()
    }
}

/// Login credentials for the device.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"********")
            .finish()
    }
}
