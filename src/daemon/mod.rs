use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};
use engine::PunchClock;
use instance_lock::InstanceLock;
use scheduler::{flush_daily_totals, DailyScheduler};
use server::AppState;
use storage::daily_store::{DailyTotalsStore, SqliteDailyStore};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    tracker::Tracker,
    utils::clock::{Clock, DefaultClock},
};

pub mod args;
pub mod engine;
pub mod instance_lock;
pub mod scheduler;
pub mod server;
pub mod shutdown;
pub mod storage;

/// Represents the starting point for the daemon
pub async fn start_daemon(dir: &Path, port: u16, db: Option<&Path>) -> Result<()> {
    let _lock = InstanceLock::acquire(dir).await?;

    let store = match db {
        Some(path) => {
            let path = path.to_owned();
            Some(tokio::task::spawn_blocking(move || open_store(&path)).await??)
        }
        None => None,
    };

    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Can't listen on port {port}"))?;

    run(listener, store, Arc::new(DefaultClock), CancellationToken::new()).await
}

fn open_store(path: &Path) -> Result<Arc<dyn DailyTotalsStore>> {
    let store = SqliteDailyStore::open(path)?;
    info!("Logged days: {}", store.days_count()?);
    Ok(Arc::new(store))
}

/// Serves until `shutdown` is cancelled, by a signal or a server failure, then stops the
/// scheduler and writes the totals one last time.
async fn run(
    listener: TcpListener,
    store: Option<Arc<dyn DailyTotalsStore>>,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
) -> Result<()> {
    let tracker = Arc::new(Tracker::new(clock.clone()));
    let engine = Arc::new(PunchClock::new(tracker.clone()));

    let scheduler = store
        .clone()
        .map(|store| DailyScheduler::new(tracker.clone(), store, clock.clone()).start());

    let state = AppState {
        engine,
        store: store.clone(),
        shutdown: shutdown.clone(),
    };

    let (server_result, ()) = tokio::join!(server::serve(listener, state), async {
        shutdown::detect_shutdown(shutdown.clone()).await;

        if let Some(scheduler) = scheduler {
            scheduler.stop().await;
        }
        // Fold the running segment into the totals.
        tracker.reset_mode_start();
        info!(mode = %tracker.mode(), "Stopped tracking");
        if let Some(store) = &store {
            match flush_daily_totals(tracker.clone(), store.clone(), clock.now()).await {
                Ok(_) => info!("Final daily total flushed"),
                Err(e) => error!("Failed to flush the final daily total: {e:?}"),
            }
        }
    });

    if let Err(server_result) = &server_result {
        error!("Server got an error {server_result:?}");
    }
    server_result
}

#[cfg(test)]
mod daemon_tests {
    use std::{sync::Arc, time::Duration};

    use anyhow::Result;
    use chrono::{Local, NaiveDate, TimeDelta, TimeZone};
    use tempfile::tempdir;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::{TcpListener, TcpStream},
        time::timeout,
    };
    use tokio_util::sync::CancellationToken;

    use crate::{
        daemon::{
            run, start_daemon,
            storage::daily_store::{DailyTotalsStore, SqliteDailyStore},
        },
        utils::{clock::ManualClock, logging::TEST_LOGGING},
    };

    async fn post(address: std::net::SocketAddr, body: &str) -> Result<String> {
        let mut stream = TcpStream::connect(address).await?;
        stream
            .write_all(
                format!(
                    "POST / HTTP/1.1\r\nHost: localhost\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                )
                .as_bytes(),
            )
            .await?;
        let mut response = String::new();
        timeout(Duration::from_secs(5), stream.read_to_string(&mut response)).await??;
        Ok(response)
    }

    /// Runs the whole daemon against an on-disk database and checks that shutting down
    /// flushes the day's totals.
    #[tokio::test]
    async fn smoke_test_daemon() -> Result<()> {
        *TEST_LOGGING;
        let dir = tempdir()?;
        let store = Arc::new(SqliteDailyStore::open(&dir.path().join("punchclock.db"))?);
        let clock = Arc::new(ManualClock::new(
            Local.with_ymd_and_hms(2025, 5, 31, 23, 0, 0).unwrap(),
        ));
        let shutdown = CancellationToken::new();
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let address = listener.local_addr()?;

        let daemon = tokio::spawn(run(
            listener,
            Some(store.clone() as Arc<dyn DailyTotalsStore>),
            clock.clone(),
            shutdown.clone(),
        ));

        let response = post(address, r#"{"Mode": "work"}"#).await?;
        assert!(response.starts_with("HTTP/1.1 200"));
        clock.advance(TimeDelta::minutes(30));

        shutdown.cancel();
        timeout(Duration::from_secs(5), daemon).await???;

        let day = NaiveDate::from_ymd_opt(2025, 5, 31).unwrap();
        let rows = store.read_range(day, day)?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].to_string(), "2025-05-31 1800.00 0.00");
        Ok(())
    }

    #[tokio::test]
    async fn test_startup_fails_without_database_directory() -> Result<()> {
        *TEST_LOGGING;
        let dir = tempdir()?;
        let db = dir.path().join("missing").join("punchclock.db");
        assert!(start_daemon(dir.path(), 0, Some(db.as_path())).await.is_err());
        Ok(())
    }
}
