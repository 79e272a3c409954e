use std::fmt::Display;

use chrono::{NaiveDate, TimeDelta};

use crate::utils::time::{as_seconds, date_to_record_name};

/// Totals persisted for a single calendar day.
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct DailyTotalRow {
    pub date: NaiveDate,
    pub work: TimeDelta,
    pub rest: TimeDelta,
}

impl Display for DailyTotalRow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {:.2} {:.2}",
            date_to_record_name(self.date),
            as_seconds(self.work),
            as_seconds(self.rest)
        )
    }
}
