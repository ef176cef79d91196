//! Dispatch accounting for trigger objects
//!
//! Every trigger counts its scheduled-or-running dispatches so that
//! disarm paths can block until nothing is in flight. A dispatch is
//! counted from the moment it is handed to the worker pool until its job
//! returns, whether or not the generation check lets it invoke.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

/// Counter of scheduled-or-running dispatches with a blocking drain.
pub(crate) struct DispatchTracker {
    count: Mutex<usize>,
    cond: Condvar,
}

impl DispatchTracker {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            count: Mutex::new(0),
            cond: Condvar::new(),
        })
    }

    /// Account for one dispatch about to be scheduled
    pub(crate) fn begin(&self) {
        *self.count.lock() += 1;
    }

    /// Account for one dispatch that finished (or was dropped unscheduled)
    pub(crate) fn end(&self) {
        let mut count = self.count.lock();
        *count -= 1;
        if *count == 0 {
            self.cond.notify_all();
        }
    }

    /// Block until no dispatch is scheduled or running
    pub(crate) fn wait_idle(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.cond.wait(&mut count);
        }
    }

    /// Current number of scheduled-or-running dispatches
    pub(crate) fn in_flight(&self) -> usize {
        *self.count.lock()
    }
}

/// Guard calling `end` on drop.
///
/// Moved into the dispatch job so the count is released even if the job
/// body unwinds, and released by the channel if the job is never sent.
pub(crate) struct EndGuard {
    tracker: Arc<DispatchTracker>,
}

impl EndGuard {
    pub(crate) fn new(tracker: &Arc<DispatchTracker>) -> Self {
        Self {
            tracker: tracker.clone(),
        }
    }
}

impl Drop for EndGuard {
    fn drop(&mut self) {
        self.tracker.end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_begin_end() {
        let tracker = DispatchTracker::new();
        tracker.begin();
        assert_eq!(tracker.in_flight(), 1);
        tracker.end();
        assert_eq!(tracker.in_flight(), 0);
    }

    #[test]
    fn test_wait_idle_blocks_until_drained() {
        let tracker = DispatchTracker::new();
        tracker.begin();

        let t = tracker.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            t.end();
        });

        tracker.wait_idle();
        assert_eq!(tracker.in_flight(), 0);
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_idle_immediate_when_empty() {
        let tracker = DispatchTracker::new();
        tracker.wait_idle();
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let tracker = DispatchTracker::new();
        tracker.begin();
        {
            let _guard = EndGuard::new(&tracker);
        }
        assert_eq!(tracker.in_flight(), 0);
    }
}
