use std::{sync::Arc, time::Duration};

use anyhow::Result;
use chrono::{DateTime, Local, TimeDelta};
use tokio::{sync::oneshot, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::{
    tracker::Tracker,
    utils::{
        clock::Clock,
        time::{date_to_record_name, day_end},
    },
};

use super::storage::daily_store::DailyTotalsStore;

/// Pause after each tick so that the next iteration's "now" is already in the new day.
const DAY_ROLLOVER_PAUSE: Duration = Duration::from_secs(2);

/// Records the totals of the day `cutoff` belongs to, as of `cutoff`. Days without any accrued
/// time are skipped. Returns whether a row was written.
pub fn store_daily_totals(
    tracker: &Tracker,
    store: &dyn DailyTotalsStore,
    cutoff: DateTime<Local>,
) -> Result<bool> {
    let (work, rest) = tracker.total_durations(cutoff);
    if work == TimeDelta::zero() && rest == TimeDelta::zero() {
        debug!("Nothing accrued, skipping the daily total");
        return Ok(false);
    }
    store.upsert_if_different(cutoff.date_naive(), work, rest)
}

/// [store_daily_totals] on the blocking thread pool, so the database never stalls the runtime.
pub async fn flush_daily_totals(
    tracker: Arc<Tracker>,
    store: Arc<dyn DailyTotalsStore>,
    cutoff: DateTime<Local>,
) -> Result<bool> {
    tokio::task::spawn_blocking(move || store_daily_totals(&tracker, store.as_ref(), cutoff))
        .await?
}

/// Background loop persisting the daily totals at the end of every calendar day.
pub struct DailyScheduler {
    tracker: Arc<Tracker>,
    store: Arc<dyn DailyTotalsStore>,
    clock: Arc<dyn Clock>,
}

/// Handle of a running [DailyScheduler]. Stopping consumes it, so a scheduler can only be
/// stopped once.
pub struct SchedulerHandle {
    stop: CancellationToken,
    stopped: oneshot::Receiver<()>,
    task: JoinHandle<()>,
}

impl DailyScheduler {
    pub fn new(
        tracker: Arc<Tracker>,
        store: Arc<dyn DailyTotalsStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tracker,
            store,
            clock,
        }
    }

    pub fn start(self) -> SchedulerHandle {
        let stop = CancellationToken::new();
        let (acknowledge, stopped) = oneshot::channel();
        let task = tokio::spawn(
            self.run(stop.clone(), acknowledge)
                .instrument(info_span!("daily_scheduler")),
        );
        SchedulerHandle {
            stop,
            stopped,
            task,
        }
    }

    async fn run(self, stop: CancellationToken, acknowledge: oneshot::Sender<()>) {
        loop {
            let now = self.clock.now();
            let boundary = day_end(&now);
            info!(%boundary, day = %date_to_record_name(now.date_naive()), "Next daily totals tick");

            // Already past the boundary means firing right away.
            let wait = (boundary - now).to_std().unwrap_or_default();
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = self.clock.sleep(wait) => (),
            }

            // Runs to completion before a stop is looked at again.
            match flush_daily_totals(self.tracker.clone(), self.store.clone(), boundary).await {
                Ok(true) => info!("Stored the daily total"),
                Ok(false) => debug!("Daily total unchanged"),
                Err(e) => error!("Failed to update the daily total: {e:?}"),
            }

            tokio::select! {
                _ = stop.cancelled() => break,
                _ = self.clock.sleep(DAY_ROLLOVER_PAUSE) => (),
            }
        }

        info!("Daily scheduler stopped");
        if acknowledge.send(()).is_err() {
            debug!("Nobody is waiting for the stop acknowledgment");
        }
    }
}

impl SchedulerHandle {
    /// Requests the loop to stop and waits until it has. A write already in progress completes
    /// first.
    pub async fn stop(self) {
        self.stop.cancel();
        if self.stopped.await.is_err() {
            warn!("Daily scheduler exited without acknowledging the stop");
        }
        if let Err(e) = self.task.await {
            error!("Daily scheduler task failed: {e:?}");
        }
        info!("Daily scheduler has quiesced");
    }
}
