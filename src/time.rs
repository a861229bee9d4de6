//! Normalization of heterogeneous timestamp tokens into region-offset instants.
//!
//! Source sites express dates in several shapes:
//!
//! - relative phrases such as `3小時前` ("3 hours ago") on forum threads
//! - ISO-8601 with `Z`, `+08:00`, or the colon-less `+0800`
//! - civil `YYYY-MM-DD HH:MM` strings in a `title` attribute
//! - a bare `HH:MM` on news listings for same-day items
//!
//! Every successful result is a [`NormalizedTimestamp`]: an aware instant
//! expressed in the source region's fixed offset. Naive values never leave
//! this module, so a timestamp cannot be localized twice.

use crate::error::UnparsableTime;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::borrow::Cow;

/// An instant pinned to the source region's fixed UTC offset.
pub type NormalizedTimestamp = DateTime<FixedOffset>;

/// Which rule a raw token must be normalized with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    /// `<N><unit>前`, resolved against the evaluation instant.
    Relative,
    /// ISO-8601 / RFC 3339, tolerant of `Z` and colon-less offsets.
    Iso8601,
    /// `YYYY-MM-DD HH:MM` wall-clock time in the region offset.
    CivilDateTime,
    /// `HH:MM` on the current region-local calendar date.
    TimeOfDay,
}

/// Relative units in match order, with their length in seconds.
/// Months and years are approximations (30 and 365 days).
static RELATIVE_UNITS: Lazy<Vec<(Regex, i64)>> = Lazy::new(|| {
    [
        ("秒", 1),
        ("(?:分鐘|分钟)", 60),
        ("(?:小時|小时)", 3_600),
        ("天", 86_400),
        ("(?:個月|个月)", 30 * 86_400),
        ("年", 365 * 86_400),
    ]
    .into_iter()
    .map(|(unit, secs)| {
        let pattern = format!(r"^\s*([0-9]+)\s*{unit}前");
        (Regex::new(&pattern).unwrap(), secs)
    })
    .collect()
});

static COMPACT_OFFSET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?P<time>\d{2}:\d{2}(?::\d{2}(?:\.\d+)?)?)(?P<hours>[+-]\d{2})(?P<minutes>\d{2})$")
        .unwrap()
});

const OFFSET_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M%:z",
    "%Y-%m-%d %H:%M%:z",
];

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Converts raw tokens into [`NormalizedTimestamp`]s for one region offset.
///
/// The offset is carried by value; two sources in different regions each
/// hold their own normalizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeNormalizer {
    offset: FixedOffset,
}

impl TimeNormalizer {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    /// Build a normalizer for a whole-hour offset such as `8` for UTC+8.
    pub fn from_hours(hours: i32) -> Option<Self> {
        hours
            .checked_mul(3_600)
            .and_then(FixedOffset::east_opt)
            .map(Self::new)
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// The current instant in the region offset, used as the policy fallback.
    pub fn now(&self) -> NormalizedTimestamp {
        Utc::now().with_timezone(&self.offset)
    }

    /// Normalize `token` against the current instant.
    ///
    /// # Arguments
    ///
    /// * `token` - Raw text taken from the page; surrounding whitespace is ignored
    /// * `kind` - The rule the token must match
    ///
    /// # Returns
    ///
    /// The instant in this normalizer's offset, or [`UnparsableTime`] when
    /// the token does not fit `kind`.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let hk = TimeNormalizer::from_hours(8).unwrap();
    /// let ts = hk.normalize("2024-05-01T10:00:00Z", TokenKind::Iso8601)?;
    /// assert_eq!(ts.to_rfc3339(), "2024-05-01T18:00:00+08:00");
    /// assert!(hk.normalize("yesterday", TokenKind::Relative).is_err());
    /// ```
    pub fn normalize(
        &self,
        token: &str,
        kind: TokenKind,
    ) -> Result<NormalizedTimestamp, UnparsableTime> {
        self.normalize_at(token, kind, Utc::now())
    }

    /// Normalize `token`, resolving relative and time-of-day tokens against `now`.
    pub fn normalize_at(
        &self,
        token: &str,
        kind: TokenKind,
        now: DateTime<Utc>,
    ) -> Result<NormalizedTimestamp, UnparsableTime> {
        let token = token.trim();
        let parsed = match kind {
            TokenKind::Relative => self.parse_relative(token, now),
            TokenKind::Iso8601 => self.parse_iso(token),
            TokenKind::CivilDateTime => NaiveDateTime::parse_from_str(token, "%Y-%m-%d %H:%M")
                .ok()
                .and_then(|naive| self.localize(naive)),
            TokenKind::TimeOfDay => self.parse_time_of_day(token, now),
        };
        parsed.ok_or_else(|| UnparsableTime::new(token))
    }

    fn parse_relative(&self, token: &str, now: DateTime<Utc>) -> Option<NormalizedTimestamp> {
        let (caps, unit_secs) = RELATIVE_UNITS
            .iter()
            .find_map(|(re, secs)| re.captures(token).map(|caps| (caps, *secs)))?;
        let count: i64 = caps[1].parse().ok()?;
        let delta = TimeDelta::try_seconds(count.checked_mul(unit_secs)?)?;
        now.checked_sub_signed(delta)
            .map(|instant| instant.with_timezone(&self.offset))
    }

    fn parse_iso(&self, token: &str) -> Option<NormalizedTimestamp> {
        let rewritten = rewrite_offset(token);

        let aware = DateTime::parse_from_rfc3339(&rewritten).ok().or_else(|| {
            OFFSET_FORMATS
                .iter()
                .find_map(|fmt| DateTime::parse_from_str(&rewritten, fmt).ok())
        });
        if let Some(instant) = aware {
            return Some(instant.with_timezone(&self.offset));
        }

        NAIVE_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(&rewritten, fmt).ok())
            .or_else(|| {
                NaiveDate::parse_from_str(&rewritten, "%Y-%m-%d")
                    .ok()
                    .and_then(|date| date.and_hms_opt(0, 0, 0))
            })
            .and_then(|naive| self.localize(naive))
    }

    fn parse_time_of_day(&self, token: &str, now: DateTime<Utc>) -> Option<NormalizedTimestamp> {
        let time = NaiveTime::parse_from_str(token, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(token, "%H:%M:%S"))
            .ok()?;
        let today = now.with_timezone(&self.offset).date_naive();
        self.localize(today.and_time(time))
    }

    fn localize(&self, naive: NaiveDateTime) -> Option<NormalizedTimestamp> {
        naive.and_local_timezone(self.offset).single()
    }
}

/// Rewrite `Z` and `+HHMM` suffixes into the `+HH:MM` form RFC 3339 requires.
/// Tokens that already carry a colon offset are returned unchanged.
fn rewrite_offset(token: &str) -> Cow<'_, str> {
    if let Some(stripped) = token.strip_suffix(['Z', 'z']) {
        return Cow::Owned(format!("{stripped}+00:00"));
    }
    COMPACT_OFFSET.replace(token, "${time}${hours}:${minutes}")
}
