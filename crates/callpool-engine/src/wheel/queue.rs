//! Deadline-ordered schedule backing the wheel thread
//!
//! Entries live in a `BTreeMap` keyed by `(deadline, handle)`: the wheel
//! thread pops due entries from the front and the next deadline is just
//! the first key. A side index from handle to deadline makes
//! cancellation exact, removing the entry on the spot instead of
//! tombstoning it until poll time.
//!
//! Periodic entries go straight back in under the same handle, one
//! period out, so a single `cancel` stops every future occurrence.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::{deadline_after, WheelAction, WheelHandle};

struct ScheduledAction {
    period: Option<Duration>,
    action: WheelAction,
}

struct QueueState {
    /// Due-order schedule; the handle disambiguates equal deadlines
    schedule: BTreeMap<(Instant, WheelHandle), ScheduledAction>,

    /// Where each live handle currently sits in the schedule
    deadlines: HashMap<WheelHandle, Instant>,
}

/// Thread-safe deadline schedule; the lock is held briefly per operation.
pub(crate) struct DeadlineQueue {
    state: Mutex<QueueState>,
}

impl DeadlineQueue {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                schedule: BTreeMap::new(),
                deadlines: HashMap::new(),
            }),
        }
    }

    pub(crate) fn insert(
        &self,
        handle: WheelHandle,
        deadline: Instant,
        period: Option<Duration>,
        action: WheelAction,
    ) {
        let mut state = self.state.lock();
        state.deadlines.insert(handle, deadline);
        state
            .schedule
            .insert((deadline, handle), ScheduledAction { period, action });
    }

    /// Remove a scheduled entry.
    ///
    /// Returns `false` if the handle already fired (one-shot) or was
    /// cancelled before.
    pub(crate) fn cancel(&self, handle: WheelHandle) -> bool {
        let mut state = self.state.lock();
        match state.deadlines.remove(&handle) {
            Some(deadline) => state.schedule.remove(&(deadline, handle)).is_some(),
            None => false,
        }
    }

    /// Pop every entry due at `now`, rescheduling periodic ones in place
    pub(crate) fn poll_expired(&self, now: Instant) -> Vec<WheelAction> {
        let mut due = Vec::new();
        let mut state = self.state.lock();

        while let Some(entry) = state.schedule.first_entry() {
            let &(deadline, handle) = entry.key();
            if deadline > now {
                break;
            }

            let scheduled = entry.remove();
            match scheduled.period {
                Some(period) => {
                    due.push(scheduled.action.clone());
                    let next = deadline_after(period);
                    state.deadlines.insert(handle, next);
                    state.schedule.insert((next, handle), scheduled);
                }
                None => {
                    state.deadlines.remove(&handle);
                    due.push(scheduled.action);
                }
            }
        }

        due
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.state
            .lock()
            .schedule
            .keys()
            .next()
            .map(|&(deadline, _)| deadline)
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().schedule.len()
    }
}
