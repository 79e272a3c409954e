//! Time accounting. [AccountingState] is the pure state machine, [Tracker] owns the single
//! instance of it behind an exclusive lock together with the clock used to read "now".

pub mod command;
pub mod mode;
pub mod state;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Local, TimeDelta};
use tracing::{debug, warn};

use crate::utils::clock::Clock;

use command::Action;
use mode::Mode;
use state::{AccountingState, Snapshot};

pub struct Tracker {
    state: Mutex<AccountingState>,
    clock: Arc<dyn Clock>,
}

impl Tracker {
    /// Starts in [Mode::Off] with nothing accrued.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_state(AccountingState::new(clock.now()), clock)
    }

    pub fn with_state(state: AccountingState, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(state),
            clock,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    // Every mutation is a handful of arithmetic operations, so a panic while holding the lock
    // can't leave the state half updated.
    fn lock(&self) -> MutexGuard<'_, AccountingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn reset_mode_start(&self) {
        let now = self.clock.now();
        self.lock().reset_mode_start(now);
    }

    /// Changes the current mode if `mode` names a different one. Unknown names are ignored.
    pub fn change_mode(&self, mode: &str) {
        self.apply(&Action::ChangeMode(mode), |_| ());
    }

    pub fn patch_durations(&self, work: &str, rest: &str) {
        self.apply(&Action::PatchDurations { work, rest }, |_| ());
    }

    pub fn total_durations(&self, cutoff: DateTime<Local>) -> (TimeDelta, TimeDelta) {
        self.lock().total_durations(cutoff)
    }

    pub fn snapshot(&self) -> Snapshot {
        let state = self.lock();
        state.snapshot(self.clock.now())
    }

    pub fn mode(&self) -> Mode {
        self.lock().mode()
    }

    /// Applies `action` and hands the resulting snapshot to `publish` before the lock is released,
    /// so everything published observes mutations in the order they were applied. `publish` must
    /// not block.
    pub fn apply(&self, action: &Action<'_>, publish: impl FnOnce(&Snapshot)) -> Snapshot {
        let mut state = self.lock();
        let now = self.clock.now();

        match *action {
            Action::PatchDurations { work, rest } => state.patch_durations(work, rest, now),
            Action::ChangeMode(name) => match name.parse::<Mode>() {
                Ok(mode) => {
                    if state.change_mode(mode, now) {
                        debug!(%mode, "Mode changed");
                    }
                }
                Err(e) => warn!("{e}, ignoring"),
            },
            Action::Refresh => (),
        }

        let snapshot = state.snapshot(now);
        publish(&snapshot);
        snapshot
    }

    /// Runs `f` with the current snapshot while holding the lock.
    pub fn with_snapshot<T>(&self, f: impl FnOnce(&Snapshot) -> T) -> T {
        let state = self.lock();
        f(&state.snapshot(self.clock.now()))
    }
}
