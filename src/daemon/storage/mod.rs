//!  Persistence of daily totals is organized through [daily_store::DailyTotalsStore].
//!  The basic idea is:
//!   - There is one row per calendar day, keyed by its `YYYY-MM-DD` date.
//!   - A row holds the work and rest totals of that day in seconds.
//!   - A row is only written when its totals differ from the most recent earlier day.

pub mod daily_store;
pub mod entities;
