use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta, TimeZone};

/// This is the standard way of converting a date to a string in punchclock.
pub fn date_to_record_name(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Returns the last moment (23:59:59.999999999) of the calendar day `moment` falls into.
pub fn day_end<Tz: TimeZone>(moment: &DateTime<Tz>) -> DateTime<Tz> {
    let naive_end = moment.date_naive().and_time(NaiveTime::MIN) + TimeDelta::days(1)
        - TimeDelta::nanoseconds(1);
    moment
        .timezone()
        .from_local_datetime(&naive_end)
        .latest()
        .unwrap_or_else(|| moment.clone() + (naive_end - moment.naive_local()))
}

/// Converts a duration into fractional seconds.
pub fn as_seconds(duration: TimeDelta) -> f64 {
    duration.num_seconds() as f64 + duration.subsec_nanos() as f64 / 1e9
}

/// Converts fractional seconds into a duration with microsecond precision.
pub fn from_seconds(seconds: f64) -> TimeDelta {
    TimeDelta::microseconds((seconds * 1e6).round() as i64)
}
