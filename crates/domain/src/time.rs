//! Time and timestamp helpers.

use chrono::{DateTime, Local, TimeDelta, Timelike, Utc};

/// UTC timestamp used for `last_checked`, `last_changed`, rule runs, etc.
pub type Timestamp = DateTime<Utc>;

/// Return the current UTC time.
#[must_use]
pub fn now() -> Timestamp {
    Utc::now()
}

/// Convert a timestamp into local wall-clock time.
///
/// Schedules and time conditions are written in local time.
#[must_use]
pub fn to_local(ts: Timestamp) -> DateTime<Local> {
    ts.with_timezone(&Local)
}

/// Minutes elapsed since local midnight.
#[must_use]
pub fn minute_of_day(t: &impl Timelike) -> u32 {
    t.hour() * 60 + t.minute()
}

/// Elapsed time as fractional seconds.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn seconds(delta: TimeDelta) -> f64 {
    delta.num_milliseconds() as f64 / 1000.0
}
