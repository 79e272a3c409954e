use chrono::{DateTime, Local, TimeDelta};
use tracing::warn;

use crate::utils::{duration::SignedDuration, time::as_seconds};

use super::mode::Mode;

/// Full state of the punch clock. `work` and `rest` only hold completed segments; the segment in
/// progress since `mode_start` is added on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountingState {
    pub(crate) work: TimeDelta,
    pub(crate) rest: TimeDelta,
    pub(crate) mode: Mode,
    pub(crate) mode_start: DateTime<Local>,
}

/// Point in time view of [AccountingState] sent to viewers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub mode: Mode,
    pub work: TimeDelta,
    pub rest: TimeDelta,
    /// Age of the current segment. Exposed instead of the absolute start to stay independent of
    /// clock skew between server and viewer.
    pub mode_age: TimeDelta,
}

impl Snapshot {
    pub fn to_json(&self) -> String {
        format!(
            r#"{{"mode":"{}","work":{:.2},"rest":{:.2},"modeStart":{}}}"#,
            self.mode,
            as_seconds(self.work),
            as_seconds(self.rest),
            self.mode_age.num_milliseconds(),
        )
    }
}

impl AccountingState {
    /// Initial state: nothing accrued, `Off` since `now`.
    pub fn new(now: DateTime<Local>) -> Self {
        Self {
            work: TimeDelta::zero(),
            rest: TimeDelta::zero(),
            mode: Mode::Off,
            mode_start: now,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Time elapsed in the current segment, or `None` if `now` is before its start.
    fn elapsed(&self, now: DateTime<Local>) -> Option<TimeDelta> {
        let elapsed = now - self.mode_start;
        (elapsed >= TimeDelta::zero()).then_some(elapsed)
    }

    /// Folds the segment in progress into the accrued totals and starts a new segment at `now`.
    /// Moving backwards in time leaves the state untouched.
    pub fn reset_mode_start(&mut self, now: DateTime<Local>) {
        let Some(elapsed) = self.elapsed(now) else {
            warn!(%now, mode_start = %self.mode_start, "Resetting backwards in time, ignoring");
            return;
        };

        match self.mode {
            Mode::Work => self.work = accrue(self.work, elapsed),
            Mode::Rest => self.rest = accrue(self.rest, elapsed),
            Mode::Off => (),
        }
        self.mode_start = now;
    }

    /// Switches to `mode`. Returns false if it already was the current mode.
    pub fn change_mode(&mut self, mode: Mode, now: DateTime<Local>) -> bool {
        if self.mode == mode {
            return false;
        }
        self.reset_mode_start(now);
        self.mode = mode;
        true
    }

    /// Applies relative corrections to the accrued totals. An empty string leaves the field as is.
    pub fn patch_durations(&mut self, work: &str, rest: &str, now: DateTime<Local>) {
        self.reset_mode_start(now);
        patch_duration(&mut self.work, work);
        patch_duration(&mut self.rest, rest);
    }

    /// Totals as of `cutoff`, without mutating anything.
    pub fn total_durations(&self, cutoff: DateTime<Local>) -> (TimeDelta, TimeDelta) {
        let (work, rest) = (self.work, self.rest);
        let Some(elapsed) = self.elapsed(cutoff) else {
            warn!(%cutoff, mode_start = %self.mode_start, "Time goes backwards, ignoring");
            return (work, rest);
        };

        match self.mode {
            Mode::Work => (accrue(work, elapsed), rest),
            Mode::Rest => (work, accrue(rest, elapsed)),
            Mode::Off => (work, rest),
        }
    }

    pub fn snapshot(&self, now: DateTime<Local>) -> Snapshot {
        let (work, rest) = self.total_durations(now);
        Snapshot {
            mode: self.mode,
            work,
            rest,
            mode_age: self.elapsed(now).unwrap_or_else(TimeDelta::zero),
        }
    }
}

/// Adds an elapsed segment to a total, saturating instead of overflowing.
fn accrue(total: TimeDelta, elapsed: TimeDelta) -> TimeDelta {
    total.checked_add(&elapsed).unwrap_or(TimeDelta::MAX)
}

/// Adds a relative duration to `field`, never going below zero. Invalid strings and corrections
/// that would overflow are ignored.
fn patch_duration(field: &mut TimeDelta, delta: &str) {
    if delta.is_empty() {
        return;
    }
    let parsed = match delta.parse::<SignedDuration>() {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("Invalid duration string {delta:?}, ignoring: {e}");
            return;
        }
    };
    match field.checked_add(&parsed) {
        Some(patched) => *field = patched.max(TimeDelta::zero()),
        None => warn!("Duration {delta:?} overflows the total, ignoring"),
    }
}
