use std::sync::LazyLock;

use chrono::{DateTime, Duration, Local, NaiveTime, TimeZone, Utc};
use regex::Regex;

static LEADING_CLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[(\d{1,2}:\d{2}:\d{2})\]").unwrap());

/// `[HH:MM:SS]` in 24-hour local time.
pub fn clock_tag(at: DateTime<Local>) -> String {
    format!("[{}]", at.format("%H:%M:%S"))
}

/// Reads the `[HH:MM:SS]` prefix worker lines start with and pins it to
/// the most recent local date on which that clock time has passed.
pub fn extract_timestamp(input: &str) -> Option<DateTime<Utc>> {
    timestamp_relative_to(input, Local::now())
}

fn timestamp_relative_to(input: &str, now: DateTime<Local>) -> Option<DateTime<Utc>> {
    let time_s = LEADING_CLOCK.captures(input)?.get(1)?.as_str();
    let time = NaiveTime::parse_from_str(time_s, "%H:%M:%S").ok()?;

    let mut date = now.date_naive();
    // A line written before midnight and read after it belongs to yesterday.
    if date.and_time(time) > now.naive_local() + Duration::minutes(1) {
        date = date.pred_opt()?;
    }
    let local_dt = Local.from_local_datetime(&date.and_time(time)).earliest()?;

    Some(local_dt.with_timezone(&Utc))
}
