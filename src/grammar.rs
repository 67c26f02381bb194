//! Recording filename grammar.
//!
//! Device firmware names exported recordings in one of two ways:
//!
//! - `<host>_<ch>_<YYYYMMDDhhmmss>_<YYYYMMDDhhmmss>[_<suffix>].<ext>`
//! - `<host>_<ch>_<YYYYMMDDhhmmss>[_<suffix>].<ext>`
//!
//! Variants are tried in order; the first match wins. Which firmware emits
//! which variant is not known, so neither is treated as canonical.

use std::path::PathBuf;
use std::sync::LazyLock;

use chrono::NaiveDateTime;
use regex::{Captures, Regex};

use crate::error::Error;
use crate::types::ChannelId;

const STAMP_FORMAT: &str = "%Y%m%d%H%M%S";

static START_END_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<host>\d+\.\d+\.\d+\.\d+)_(?P<ch>\d+)_(?P<start>\d{14})_(?P<end>\d{14})(?:_[0-9A-Za-z]{4,8})?\.(?P<ext>[0-9A-Za-z]+)$",
    )
    .expect("valid regex")
});

static START_ONLY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<host>\d+\.\d+\.\d+\.\d+)_(?P<ch>\d+)_(?P<start>\d{14})(?:_[0-9A-Za-z]{4,8})?\.(?P<ext>[0-9A-Za-z]+)$",
    )
    .expect("valid regex")
});

/// Which naming scheme a filename matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrammarVariant {
    StartEnd,
    StartOnly,
}

/// Identifying fields recovered from a recording's filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
    pub channel: ChannelId,
    pub start: NaiveDateTime,
    pub end: Option<NaiveDateTime>,
    pub extension: String,
    pub variant: GrammarVariant,
}

impl ParsedName {
    /// Fills in a missing end time.
    #[must_use]
    pub fn with_end(mut self, end: Option<NaiveDateTime>) -> Self {
        if self.end.is_none() {
            self.end = end;
        }
        self
    }
}

/// Parses a raw filename into its identifying fields.
///
/// # Errors
///
/// Returns [`Error::Unparsable`] if no variant matches or a timestamp is not
/// a real calendar instant.
pub fn parse(raw: &str) -> Result<ParsedName, Error> {
    let variants: [(&Regex, GrammarVariant); 2] = [
        (&START_END_RE, GrammarVariant::StartEnd),
        (&START_ONLY_RE, GrammarVariant::StartOnly),
    ];

    variants
        .iter()
        .find_map(|(re, variant)| re.captures(raw).and_then(|caps| from_captures(&caps, *variant)))
        .ok_or_else(|| Error::Unparsable(raw.to_string()))
}

fn from_captures(caps: &Captures<'_>, variant: GrammarVariant) -> Option<ParsedName> {
    let channel = caps["ch"].parse().ok()?;
    let start = NaiveDateTime::parse_from_str(&caps["start"], STAMP_FORMAT).ok()?;
    let end = match caps.name("end") {
        Some(m) => Some(NaiveDateTime::parse_from_str(m.as_str(), STAMP_FORMAT).ok()?),
        None => None,
    };
    Some(ParsedName {
        channel,
        start,
        end,
        extension: caps["ext"].to_ascii_lowercase(),
        variant,
    })
}

/// Canonical location of a recording relative to the organized root:
/// `channel<n>/<YYYY-MM-DD>.<hh-mm-ss>[_<hh-mm-ss>].<ext>`.
///
/// Pure: the same input always yields the same path, so it doubles as the
/// "already on disk" lookup.
#[must_use]
pub fn organize(parsed: &ParsedName) -> PathBuf {
    let mut name = format!(
        "{}.{}",
        parsed.start.format("%Y-%m-%d"),
        parsed.start.format("%H-%M-%S")
    );
    if let Some(end) = parsed.end {
        name.push('_');
        name.push_str(&end.format("%H-%M-%S").to_string());
    }
    name.push('.');
    name.push_str(&parsed.extension);

    PathBuf::from(format!("channel{}", parsed.channel)).join(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 1, 29)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn parses_start_end_name() {
        let parsed = parse("10.0.0.5_3_20250129143000_20250129144500.mp4").unwrap();
        assert_eq!(parsed.channel, 3);
        assert_eq!(parsed.start, at(14, 30, 0));
        assert_eq!(parsed.end, Some(at(14, 45, 0)));
        assert_eq!(parsed.variant, GrammarVariant::StartEnd);
        assert_eq!(
            organize(&parsed),
            PathBuf::from("channel3/2025-01-29.14-30-00_14-45-00.mp4")
        );
    }

    #[test]
    fn parses_start_end_name_with_suffix() {
        let parsed = parse("192.168.88.19_12_20250129000000_20250129001500_A7F3.mp4").unwrap();
        assert_eq!(parsed.channel, 12);
        assert_eq!(parsed.end, Some(at(0, 15, 0)));
        assert_eq!(parsed.variant, GrammarVariant::StartEnd);
    }

    #[test]
    fn parses_start_only_name() {
        let parsed = parse("192.168.88.19_1_20250129235959.mp4").unwrap();
        assert_eq!(parsed.channel, 1);
        assert_eq!(parsed.start, at(23, 59, 59));
        assert_eq!(parsed.end, None);
        assert_eq!(parsed.variant, GrammarVariant::StartOnly);
        assert_eq!(
            organize(&parsed),
            PathBuf::from("channel1/2025-01-29.23-59-59.mp4")
        );
    }

    #[test]
    fn end_time_fills_only_when_missing() {
        let parsed = parse("192.168.88.19_1_20250129143000.mp4")
            .unwrap()
            .with_end(Some(at(14, 40, 0)));
        assert_eq!(parsed.end, Some(at(14, 40, 0)));

        let parsed = parse("10.0.0.5_3_20250129143000_20250129144500.mp4")
            .unwrap()
            .with_end(Some(at(23, 0, 0)));
        assert_eq!(parsed.end, Some(at(14, 45, 0)));
    }

    #[test]
    fn rejects_unknown_and_impossible_names() {
        for raw in [
            "movie.mp4",
            "10.0.0.5_3_2025012914300.mp4",
            "10.0.0.5_3_20251329143000.mp4",
            "10.0.0.5_x_20250129143000.mp4",
            "",
        ] {
            assert!(
                matches!(parse(raw), Err(Error::Unparsable(ref s)) if s == raw),
                "{raw} should be unparsable"
            );
        }
    }

    #[test]
    fn extension_is_normalised() {
        let parsed = parse("10.0.0.5_3_20250129143000.MP4").unwrap();
        assert_eq!(parsed.extension, "mp4");
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn parse_never_panics(raw in "\\PC*") {
                let _ = parse(&raw);
            }

            #[test]
            fn organize_is_deterministic(ch in 1u32..64, h in 0u32..24, m in 0u32..60, s in 0u32..60) {
                let raw = format!("10.0.0.5_{ch}_20250129{h:02}{m:02}{s:02}_20250129235959.mp4");
                let a = organize(&parse(&raw).unwrap());
                let b = organize(&parse(&raw).unwrap());
                prop_assert_eq!(&a, &b);
                let prefix = format!("channel{ch}");
                prop_assert!(a.starts_with(&prefix));
            }
        }
    }
}
