use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeDelta};
use tokio::sync::watch;

/// Represents an entity responsible for providing time across application. Everything that reads
/// "now" or waits for a moment goes through it, so tests can substitute a [ManualClock].
#[async_trait]
pub trait Clock: Sync + Send + 'static {
    fn now(&self) -> DateTime<Local>;

    async fn sleep(&self, duration: Duration);
}

pub struct DefaultClock;

#[async_trait]
impl Clock for DefaultClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Clock that only moves when told to. Sleepers are woken once the manual time reaches the moment
/// they are waiting for.
pub struct ManualClock {
    now: watch::Sender<DateTime<Local>>,
    sleeps: watch::Sender<u64>,
    sleeping: AtomicU64,
}

impl ManualClock {
    pub fn new(start: DateTime<Local>) -> Self {
        Self {
            now: watch::Sender::new(start),
            sleeps: watch::Sender::new(0),
            sleeping: AtomicU64::new(0),
        }
    }

    pub fn advance(&self, delta: TimeDelta) {
        self.now.send_modify(|now| *now += delta);
    }

    /// Moves the clock backwards. Sleepers keep waiting for their original target.
    pub fn rewind(&self, delta: TimeDelta) {
        self.now.send_modify(|now| *now -= delta);
    }

    pub fn set(&self, moment: DateTime<Local>) {
        self.now.send_replace(moment);
    }

    /// Number of sleeps currently waiting on this clock.
    pub fn sleeping(&self) -> u64 {
        self.sleeping.load(Ordering::SeqCst)
    }

    /// Resolves once at least `count` sleeps have been started on this clock since creation.
    pub async fn wait_for_sleeps(&self, count: u64) {
        let mut started = self.sleeps.subscribe();
        let _ = started.wait_for(|started| *started >= count).await;
    }
}

struct SleepGuard<'a>(&'a AtomicU64);

impl Drop for SleepGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Local> {
        *self.now.borrow()
    }

    async fn sleep(&self, duration: Duration) {
        let delta = TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX);
        let target = self.now().checked_add_signed(delta);
        let mut now = self.now.subscribe();

        self.sleeping.fetch_add(1, Ordering::SeqCst);
        let _guard = SleepGuard(&self.sleeping);
        self.sleeps.send_modify(|started| *started += 1);

        match target {
            Some(target) => {
                let _ = now.wait_for(|now| *now >= target).await;
            }
            None => std::future::pending::<()>().await,
        }
    }
}
