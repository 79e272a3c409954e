use std::{
    path::Path,
    sync::{Mutex, MutexGuard, PoisonError},
};

use anyhow::{Context, Result};
use chrono::{NaiveDate, TimeDelta};
#[cfg(test)]
use mockall::automock;
use rusqlite::{params, Connection};
use tracing::{debug, info};

use crate::utils::time::{as_seconds, date_to_record_name, from_seconds};

use super::entities::DailyTotalRow;

/// Interface for abstracting storage of daily totals.
#[cfg_attr(test, automock)]
pub trait DailyTotalsStore: Send + Sync {
    /// Writes the totals of `date`, unless the most recent earlier day already holds exactly the
    /// same totals. Returns whether a row was written.
    fn upsert_if_different(&self, date: NaiveDate, work: TimeDelta, rest: TimeDelta)
        -> Result<bool>;

    /// All rows with `start <= date <= end`, newest first.
    fn read_range(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<DailyTotalRow>>;

    fn days_count(&self) -> Result<u64>;
}

/// The main realization of [DailyTotalsStore], backed by a single SQLite database.
pub struct SqliteDailyStore {
    connection: Mutex<Connection>,
}

impl SqliteDailyStore {
    /// Opens an existing database or creates a new one at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let connection = Connection::open(path)
            .with_context(|| format!("Can't open database {}", path.display()))?;
        Self::from_connection(connection)
    }

    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(connection: Connection) -> Result<Self> {
        let version: String =
            connection.query_row("select sqlite_version()", [], |row| row.get(0))?;
        info!("Database version {version}");

        connection
            .execute(
                "create table if not exists days (
                    date text primary key,
                    work real not null,
                    rest real not null
                )",
                [],
            )
            .context("Failed to create tables")?;

        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    fn connection(&self) -> MutexGuard<'_, Connection> {
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl DailyTotalsStore for SqliteDailyStore {
    fn upsert_if_different(
        &self,
        date: NaiveDate,
        work: TimeDelta,
        rest: TimeDelta,
    ) -> Result<bool> {
        let date = date_to_record_name(date);
        let (work, rest) = (as_seconds(work), as_seconds(rest));
        info!(%date, work, rest, "Updating the daily total");

        // Only the most recent earlier row is compared, not an existing row for the same date.
        let changed = self.connection().execute(
            "insert or replace into days(date, work, rest) select ?1, ?2, ?3
            where not exists (
                select 1 from (select work, rest from days where date < ?1 order by date desc limit 1) as a
                where a.work = ?2 and a.rest = ?3
            )",
            params![date, work, rest],
        )?;

        if changed == 0 {
            debug!(%date, "Totals match the previous day, nothing written");
        }
        Ok(changed > 0)
    }

    fn read_range(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<DailyTotalRow>> {
        let connection = self.connection();
        let mut statement = connection.prepare(
            "select date, work, rest from days where date >= ?1 and date <= ?2 order by date desc",
        )?;
        let rows = statement.query_map(
            params![date_to_record_name(start), date_to_record_name(end)],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, f64>(2)?,
                ))
            },
        )?;

        let mut result = Vec::new();
        for row in rows {
            let (date, work, rest) = row?;
            result.push(DailyTotalRow {
                date: NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                    .with_context(|| format!("Stored date {date:?} is malformed"))?,
                work: from_seconds(work),
                rest: from_seconds(rest),
            });
        }
        Ok(result)
    }

    fn days_count(&self) -> Result<u64> {
        let count: i64 = self
            .connection()
            .query_row("select count(*) from days", [], |row| row.get(0))?;
        Ok(count.try_into()?)
    }
}
