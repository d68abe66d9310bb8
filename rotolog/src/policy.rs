//! Rotation policy: size thresholds and calendar-correct time boundaries.
//!
//! Time granularities are a closed enum. Each variant answers two pure
//! questions: given `now`, when is the next boundary; and given a boundary,
//! when did the period ending there begin. Calendar units use true calendar
//! arithmetic (next month, not +30 days); only [`Granularity::Interval`]
//! falls back to fixed-duration math.

use std::time::Duration;

use chrono::{
    DateTime, Datelike, Duration as ChronoDuration, Local, NaiveDate, NaiveDateTime, NaiveTime,
    TimeZone, Timelike,
};

use rotolog_sink::FilePattern;

use crate::error::RotationError;

/// How often a time-based rule rotates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Yearly,
    Monthly,
    /// Boundary is the next Sunday at local midnight.
    Weekly,
    Daily,
    Hourly,
    EveryMinute,
    EverySecond,
    Every3Seconds,
    /// Raw interval; fixed-duration arithmetic, no calendar alignment.
    Interval(Duration),
}

impl Granularity {
    /// Parse one of the named granularities.
    pub fn parse_named(name: &str) -> Option<Self> {
        match name {
            "yearly" => Some(Self::Yearly),
            "monthly" => Some(Self::Monthly),
            "weekly" => Some(Self::Weekly),
            "daily" => Some(Self::Daily),
            "hourly" => Some(Self::Hourly),
            "everyminute" => Some(Self::EveryMinute),
            "everysecond" => Some(Self::EverySecond),
            "every3seconds" => Some(Self::Every3Seconds),
            _ => None,
        }
    }

    /// Start of the next calendar unit strictly after `now`.
    pub fn next_boundary(&self, now: DateTime<Local>) -> DateTime<Local> {
        let naive = now.naive_local();
        match self {
            Self::Yearly => resolve_local(first_of_year(naive.year() + 1), now),
            Self::Monthly => {
                let (year, month) = next_month(naive.year(), naive.month());
                resolve_local(first_of_month(year, month), now)
            }
            Self::Weekly => {
                let days_ahead = 7 - i64::from(naive.weekday().num_days_from_sunday());
                let date = naive.date() + ChronoDuration::days(days_ahead);
                resolve_local(date.and_time(NaiveTime::MIN), now)
            }
            Self::Daily => {
                let date = naive.date() + ChronoDuration::days(1);
                resolve_local(date.and_time(NaiveTime::MIN), now)
            }
            Self::Hourly => truncated(now, naive.with_minute(0), 3600),
            Self::EveryMinute => truncated(now, naive.with_second(0), 60),
            Self::EverySecond => truncated(now, Some(naive), 1),
            Self::Every3Seconds => {
                let step = 3 - i64::from(naive.second() % 3);
                truncated(now, Some(naive), step)
            }
            Self::Interval(interval) => now + interval_delta(*interval),
        }
    }

    /// Start of the unit that ends at `boundary`. This instant, not the
    /// moment rotation actually runs, is what archive names embed.
    pub fn period_start(&self, boundary: DateTime<Local>) -> DateTime<Local> {
        let naive = boundary.naive_local();
        match self {
            Self::Yearly => resolve_local(first_of_year(naive.year() - 1), boundary),
            Self::Monthly => {
                let (year, month) = prev_month(naive.year(), naive.month());
                resolve_local(first_of_month(year, month), boundary)
            }
            Self::Weekly => {
                let date = naive.date() - ChronoDuration::days(7);
                resolve_local(date.and_time(naive.time()), boundary)
            }
            Self::Daily => {
                let date = naive.date() - ChronoDuration::days(1);
                resolve_local(date.and_time(naive.time()), boundary)
            }
            Self::Hourly => boundary - ChronoDuration::hours(1),
            Self::EveryMinute => boundary - ChronoDuration::minutes(1),
            Self::EverySecond => boundary - ChronoDuration::seconds(1),
            Self::Every3Seconds => boundary - ChronoDuration::seconds(3),
            Self::Interval(interval) => boundary - interval_delta(*interval),
        }
    }

    /// Default archive date format; chosen so names sort lexicographically
    /// in chronological order.
    pub fn default_date_format(&self) -> &'static str {
        match self {
            Self::Yearly => "%Y",
            Self::Monthly => "%Y%m",
            Self::Weekly | Self::Daily => "%Y%m%d",
            Self::Hourly => "%Y%m%d%H",
            Self::EveryMinute => "%Y%m%d%H%M",
            Self::EverySecond | Self::Every3Seconds | Self::Interval(_) => "%Y%m%d%H%M%S",
        }
    }
}

/// Which rule governs rotation for one handler. Immutable after construction.
#[derive(Debug, Clone)]
pub enum RotationRule {
    Size { max_bytes: u64 },
    Time { granularity: Granularity, pattern: FilePattern },
}

/// Parse a size threshold: one or more `<digits><b|kb|mb|gb>` tokens
/// (binary powers), summed. Whitespace between tokens is allowed.
///
/// # Errors
/// [`RotationError::Config`] on malformed input or zero tokens.
pub fn parse_size(text: &str) -> Result<u64, RotationError> {
    let mut total: u64 = 0;
    let mut tokens = 0;
    let mut rest = text.trim();

    while !rest.is_empty() {
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        if digits_end == 0 {
            return Err(bad_size(text));
        }
        let value: u64 = rest[..digits_end].parse().map_err(|_| bad_size(text))?;
        rest = &rest[digits_end..];

        let (multiplier, consumed) = if let Some(r) = rest.strip_prefix("kb") {
            (1u64 << 10, r)
        } else if let Some(r) = rest.strip_prefix("mb") {
            (1u64 << 20, r)
        } else if let Some(r) = rest.strip_prefix("gb") {
            (1u64 << 30, r)
        } else if let Some(r) = rest.strip_prefix('b') {
            (1, r)
        } else {
            return Err(bad_size(text));
        };
        rest = consumed.trim_start();

        total = value
            .checked_mul(multiplier)
            .and_then(|v| total.checked_add(v))
            .ok_or_else(|| bad_size(text))?;
        tokens += 1;
    }

    if tokens == 0 {
        return Err(bad_size(text));
    }
    Ok(total)
}

fn bad_size(text: &str) -> RotationError {
    RotationError::Config(format!(
        "invalid size '{text}': expected tokens like 10mb, 512kb, 100b"
    ))
}

fn first_of_year(year: i32) -> NaiveDateTime {
    // January 1st is valid for every year chrono can represent.
    NaiveDate::from_ymd_opt(year, 1, 1)
        .unwrap_or(NaiveDate::MIN)
        .and_time(NaiveTime::MIN)
}

fn first_of_month(year: i32, month: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, month, 1)
        .unwrap_or(NaiveDate::MIN)
        .and_time(NaiveTime::MIN)
}

fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}

fn prev_month(year: i32, month: u32) -> (i32, u32) {
    if month == 1 {
        (year - 1, 12)
    } else {
        (year, month - 1)
    }
}

/// Raw intervals clamp to a century so the schedule arithmetic can never
/// overflow or wrap into the past.
fn interval_delta(interval: Duration) -> ChronoDuration {
    const MAX_INTERVAL_MS: u128 = 1000 * 60 * 60 * 24 * 365 * 100;
    ChronoDuration::milliseconds(interval.as_millis().min(MAX_INTERVAL_MS) as i64)
}

/// Truncate to the unit floor (nanoseconds always dropped) and step forward
/// by `seconds` in absolute time.
fn truncated(
    now: DateTime<Local>,
    floored: Option<NaiveDateTime>,
    seconds: i64,
) -> DateTime<Local> {
    let floor = floored
        .and_then(|n| n.with_second(if seconds >= 60 { 0 } else { n.second() }))
        .and_then(|n| n.with_nanosecond(0))
        .map(|n| resolve_local(n, now))
        .unwrap_or(now);
    floor + ChronoDuration::seconds(seconds)
}

/// Resolve a naive local datetime against the local timezone. An instant in
/// a DST gap resolves to the earliest valid time at or after it.
fn resolve_local(naive: NaiveDateTime, fallback_anchor: DateTime<Local>) -> DateTime<Local> {
    match Local.from_local_datetime(&naive) {
        chrono::LocalResult::Single(dt) => dt,
        chrono::LocalResult::Ambiguous(earliest, _) => earliest,
        chrono::LocalResult::None => Local
            .from_local_datetime(&(naive + ChronoDuration::hours(1)))
            .earliest()
            .unwrap_or(fallback_anchor + ChronoDuration::hours(1)),
    }
}
