//! Fetch interval and release-window scheduling.
//!
//! All day arithmetic is done on UTC calendar days.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use core_library::{Episode, LibraryEntry};

/// Upper bound of a computed interval, in days.
pub const MAX_FETCH_INTERVAL: i32 = 28;

/// Interval used when too few distinct release days are known.
pub const DEFAULT_FETCH_INTERVAL: i32 = 7;

const GRACE_PERIOD_DAYS: i64 = 1;
const MISSED_CYCLES_BEFORE_BACKOFF: i64 = 10;

/// Range of timestamps (Unix millis) considered "due now".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub lower: i64,
    pub upper: i64,
}

impl FetchWindow {
    /// Whether a next-update timestamp is already inside the window.
    ///
    /// The upper bound is inclusive of the first millisecond past it.
    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.lower && timestamp <= self.upper + 1
    }
}

/// Window of today ± the grace period.
pub fn fetch_window(now: DateTime<Utc>) -> FetchWindow {
    let today = start_of_day(now.date_naive());
    let lower = today - Duration::days(GRACE_PERIOD_DAYS);
    let upper = today + Duration::days(GRACE_PERIOD_DAYS);
    FetchWindow {
        lower: lower.timestamp_millis(),
        upper: upper.timestamp_millis() - 1,
    }
}

/// Mean gap in days between the most recent distinct release days.
///
/// Uses upload dates when at least three distinct days are known, else fetch
/// dates, else [`DEFAULT_FETCH_INTERVAL`]. The result is clamped to
/// `1..=MAX_FETCH_INTERVAL`.
pub fn calculate_interval(episodes: &[Episode]) -> i32 {
    let sample = if episodes.len() <= 8 { 3 } else { 10 };

    let upload_days = distinct_recent_days(
        episodes
            .iter()
            .map(|e| e.date_upload)
            .filter(|ts| *ts > 0),
        sample,
    );
    let fetch_days = distinct_recent_days(episodes.iter().map(|e| e.date_fetch), sample);

    let interval = mean_gap(&upload_days)
        .or_else(|| mean_gap(&fetch_days))
        .unwrap_or(DEFAULT_FETCH_INTERVAL as i64);

    interval.clamp(1, MAX_FETCH_INTERVAL as i64) as i32
}

/// Next expected update of an entry, in Unix millis.
///
/// A stored next-update already inside `window` is kept. Otherwise the next
/// update lands on the first interval boundary after today, counted from the
/// day of the last sync. Positive intervals double while more than ten cycles
/// were missed; negative intervals are user overrides and used as-is.
pub fn next_update(entry: &LibraryEntry, interval: i32, now: DateTime<Utc>, window: FetchWindow) -> i64 {
    if window.contains(entry.next_sync_at) {
        return entry.next_sync_at;
    }

    let latest = if entry.last_synced_at > 0 {
        DateTime::<Utc>::from_timestamp_millis(entry.last_synced_at).unwrap_or(now)
    } else {
        now
    };
    let latest_day = start_of_day(latest.date_naive());
    let days_since_latest = (now - latest_day).num_days();

    let step = i64::from(interval.unsigned_abs().max(1));
    let divisor = if interval < 0 {
        step
    } else {
        backoff_interval(step, days_since_latest)
    };
    let cycle = days_since_latest.div_euclid(divisor);

    (latest_day + Duration::days((cycle + 1) * step)).timestamp_millis()
}

/// Recompute `(next_sync_at, fetch_interval)` for an entry after a content sync.
pub fn reschedule(entry: &LibraryEntry, episodes: &[Episode], now: DateTime<Utc>) -> (i64, i32) {
    let interval = if entry.fetch_interval < 0 {
        entry.fetch_interval
    } else {
        calculate_interval(episodes)
    };
    let next = next_update(entry, interval, now, fetch_window(now));
    (next, interval)
}

fn backoff_interval(delta: i64, days_since_latest: i64) -> i64 {
    let mut delta = delta;
    loop {
        if delta >= MAX_FETCH_INTERVAL as i64 {
            return MAX_FETCH_INTERVAL as i64;
        }
        let cycle = days_since_latest.div_euclid(delta) + 1;
        if cycle > MISSED_CYCLES_BEFORE_BACKOFF {
            delta *= 2;
        } else {
            return delta;
        }
    }
}

fn distinct_recent_days(timestamps: impl Iterator<Item = i64>, take: usize) -> Vec<NaiveDate> {
    let mut sorted: Vec<i64> = timestamps.collect();
    sorted.sort_unstable_by(|a, b| b.cmp(a));

    let mut days: Vec<NaiveDate> = Vec::with_capacity(take);
    for ts in sorted {
        let Some(day) = DateTime::<Utc>::from_timestamp_millis(ts).map(|dt| dt.date_naive()) else {
            continue;
        };
        if days.last() != Some(&day) {
            days.push(day);
        }
        if days.len() == take {
            break;
        }
    }
    days
}

fn mean_gap(days: &[NaiveDate]) -> Option<i64> {
    if days.len() < 3 {
        return None;
    }
    let first = days[0];
    let last = days[days.len() - 1];
    let periods = (days.len() - 1) as i64;
    Some((first - last).num_days().div_euclid(periods))
}

fn start_of_day(day: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&day.and_time(chrono::NaiveTime::MIN))
}
