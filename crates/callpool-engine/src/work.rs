//! Work trigger
//!
//! A work trigger fans notifications out to the worker pool: every
//! `notify` schedules one run of the dispatch thunk. Cancelling pending
//! callbacks bumps an epoch so notifications that have not started yet
//! return without running the thunk; the thunk owner tolerates the
//! resulting empty pops.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use callpool_core::error::{PoolError, PoolResult};

use crate::cleanup::GroupMember;
use crate::environment::Environment;
use crate::tracker::{DispatchTracker, EndGuard};

/// Thunk run once per delivered notification
pub type WorkThunk = Arc<dyn Fn() + Send + Sync>;

/// Handle to an armed work dispatcher.
#[derive(Clone)]
pub struct WorkTrigger {
    inner: Arc<WorkTriggerInner>,
}

struct WorkTriggerInner {
    env: Arc<Environment>,
    thunk: WorkThunk,
    tracker: Arc<DispatchTracker>,
    epoch: AtomicU64,
    closed: AtomicBool,
}

impl WorkTrigger {
    pub fn new(env: &Arc<Environment>, thunk: WorkThunk) -> Self {
        Self {
            inner: Arc::new(WorkTriggerInner {
                env: env.clone(),
                thunk,
                tracker: DispatchTracker::new(),
                epoch: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Schedule one run of the dispatch thunk
    pub fn notify(&self) -> PoolResult<()> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::Acquire) {
            return Err(PoolError::InvalidHandle);
        }

        let epoch = inner.epoch.load(Ordering::Acquire);
        inner.tracker.begin();
        let guard = EndGuard::new(&inner.tracker);

        let job_inner = inner.clone();
        inner.env.submit(Box::new(move || {
            let _guard = guard;
            if job_inner.epoch.load(Ordering::Acquire) == epoch
                && !job_inner.closed.load(Ordering::Acquire)
            {
                (job_inner.thunk)();
            }
        }))
    }

    /// Wait for dispatches to finish.
    ///
    /// With `cancel_pending`, notifications that have not started are
    /// dropped first; running ones always complete.
    pub fn wait_callbacks(&self, cancel_pending: bool) {
        self.inner.wait_callbacks(cancel_pending);
    }

    /// Mark the trigger closed; later notifications fail
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }

    /// Cancel-or-join then close; the teardown every path converges on
    pub fn shutdown(&self, cancel_pending: bool) {
        self.inner.shutdown_member(cancel_pending);
    }

    /// Weak reference for cleanup-group enrollment
    pub fn member(&self) -> Weak<dyn GroupMember> {
        let as_dyn: Arc<dyn GroupMember> = self.inner.clone();
        Arc::downgrade(&as_dyn)
    }

    #[cfg(test)]
    fn in_flight(&self) -> usize {
        self.inner.tracker.in_flight()
    }
}

impl WorkTriggerInner {
    fn wait_callbacks(&self, cancel_pending: bool) {
        if cancel_pending {
            self.epoch.fetch_add(1, Ordering::AcqRel);
        }
        self.tracker.wait_idle();
    }
}

impl GroupMember for WorkTriggerInner {
    fn shutdown_member(&self, cancel_pending: bool) {
        self.wait_callbacks(cancel_pending);
        self.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    fn test_env() -> Arc<Environment> {
        Environment::new(EngineConfig::custom(2, 4)).unwrap()
    }

    #[test]
    fn test_notify_runs_thunk() {
        let env = test_env();
        let counter = Arc::new(AtomicUsize::new(0));

        let c = counter.clone();
        let trigger = WorkTrigger::new(
            &env,
            Arc::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        );

        for _ in 0..8 {
            trigger.notify().unwrap();
        }
        trigger.wait_callbacks(false);
        assert_eq!(counter.load(Ordering::SeqCst), 8);
        assert_eq!(trigger.in_flight(), 0);
    }

    #[test]
    fn test_cancel_pending_drops_unstarted() {
        let env = test_env();
        let gate = Arc::new(callpool_core::event::Event::manual());
        let counter = Arc::new(AtomicUsize::new(0));

        let c = counter.clone();
        let g = gate.clone();
        let trigger = WorkTrigger::new(
            &env,
            Arc::new(move || {
                g.wait();
                c.fetch_add(1, Ordering::SeqCst);
            }),
        );

        for _ in 0..64 {
            trigger.notify().unwrap();
        }

        // Let a few dispatches start, then cancel the rest
        std::thread::sleep(Duration::from_millis(20));
        gate.set();
        trigger.wait_callbacks(true);

        let ran = counter.load(Ordering::SeqCst);
        assert!(ran <= 64);

        // Nothing runs after the cancel returned
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(counter.load(Ordering::SeqCst), ran);
    }

    #[test]
    fn test_notify_after_close_fails() {
        let env = test_env();
        let trigger = WorkTrigger::new(&env, Arc::new(|| {}));
        trigger.shutdown(true);
        assert_eq!(trigger.notify(), Err(PoolError::InvalidHandle));
    }

    #[test]
    fn test_wait_callbacks_joins_running() {
        let env = test_env();
        let counter = Arc::new(AtomicUsize::new(0));

        let c = counter.clone();
        let trigger = WorkTrigger::new(
            &env,
            Arc::new(move || {
                std::thread::sleep(Duration::from_millis(30));
                c.fetch_add(1, Ordering::SeqCst);
            }),
        );

        trigger.notify().unwrap();
        let start = Instant::now();
        trigger.wait_callbacks(false);
        assert!(start.elapsed() >= Duration::from_millis(10));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
