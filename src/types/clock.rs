//! Minute-relative tick counters used by latency probes
//!
//! A tick value is `seconds * 1_000_000 + microseconds` within the current
//! wall-clock minute, so it wraps every 60,000,000 ticks.

use chrono::{DateTime, Local, TimeZone, Timelike};

/// Ticks in one minute.
pub const MINUTE_WRAP: u32 = 60_000_000;

/// Tick value for `at`.
pub fn minute_ticks<Tz: TimeZone>(at: &DateTime<Tz>) -> u32 {
    // Leap seconds report up to 1_999_999 micros.
    let micros = at.timestamp_subsec_micros().min(999_999);
    at.second() * 1_000_000 + micros
}

/// Tick value for the current local time.
pub fn now_ticks() -> u32 {
    minute_ticks(&Local::now())
}

/// Elapsed ticks from `earlier` to `later`, unwrapping one minute rollover.
pub fn tick_delta(later: u32, earlier: u32) -> i64 {
    let delta = later as i64 - earlier as i64;
    if delta < 0 { delta + MINUTE_WRAP as i64 } else { delta }
}
