//! Timer trigger
//!
//! Arms a wheel entry with `(delay, period)`. A zero period is a
//! one-shot; a non-zero period leaves the entry armed and the wheel
//! refires it. Disarm bumps the generation so dispatches already on the
//! worker pool return without invoking, then cancels the wheel entry.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use callpool_core::error::{PoolError, PoolResult};
use parking_lot::Mutex;

use crate::cleanup::GroupMember;
use crate::environment::Environment;
use crate::tracker::{DispatchTracker, EndGuard};
use crate::wheel::WheelHandle;

/// Thunk run on every timer expiration
pub type TimerThunk = Arc<dyn Fn() + Send + Sync>;

/// Handle to an armable timer dispatcher.
#[derive(Clone)]
pub struct TimerTrigger {
    inner: Arc<TimerTriggerInner>,
}

struct TimerTriggerInner {
    env: Arc<Environment>,
    thunk: TimerThunk,
    tracker: Arc<DispatchTracker>,
    gen: AtomicU64,
    closed: AtomicBool,
    armed: Mutex<Option<WheelHandle>>,
}

impl TimerTrigger {
    pub fn new(env: &Arc<Environment>, thunk: TimerThunk) -> Self {
        Self {
            inner: Arc::new(TimerTriggerInner {
                env: env.clone(),
                thunk,
                tracker: DispatchTracker::new(),
                gen: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                armed: Mutex::new(None),
            }),
        }
    }

    /// Arm with a first fire after `delay`, refiring every `period`
    /// thereafter when `period` is non-zero. Re-arming replaces the
    /// previous arm.
    pub fn arm(&self, delay: Duration, period: Duration) -> PoolResult<()> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::Acquire) {
            return Err(PoolError::InvalidHandle);
        }

        let mut armed = inner.armed.lock();
        inner.disarm_locked(&mut armed);

        let gen = inner.gen.load(Ordering::Acquire);
        let wheel_period = if period.is_zero() { None } else { Some(period) };

        let weak = Arc::downgrade(inner);
        let handle = inner.env.wheel().insert(
            delay,
            wheel_period,
            Arc::new(move || {
                if let Some(inner) = weak.upgrade() {
                    TimerTriggerInner::schedule(&inner, gen);
                }
            }),
        );
        *armed = Some(handle);

        Ok(())
    }

    /// Cancel the wheel entry; scheduled dispatches become no-ops
    pub fn disarm(&self) {
        let mut armed = self.inner.armed.lock();
        self.inner.disarm_locked(&mut armed);
    }

    /// Wait for dispatches; with `cancel_pending`, drop unstarted ones first
    pub fn wait_callbacks(&self, cancel_pending: bool) {
        self.inner.wait_callbacks(cancel_pending);
    }

    /// Disarm and mark closed without joining.
    ///
    /// Safe to call from inside the dispatch thunk.
    pub fn close(&self) {
        self.disarm();
        self.inner.closed.store(true, Ordering::Release);
    }

    /// Disarm, join, close
    pub fn shutdown(&self, cancel_pending: bool) {
        self.inner.shutdown_member(cancel_pending);
    }

    /// Weak reference for cleanup-group enrollment
    pub fn member(&self) -> Weak<dyn GroupMember> {
        let as_dyn: Arc<dyn GroupMember> = self.inner.clone();
        Arc::downgrade(&as_dyn)
    }
}

impl TimerTriggerInner {
    /// Invalidate the current arm. Called with the armed lock held.
    fn disarm_locked(&self, armed: &mut Option<WheelHandle>) {
        self.gen.fetch_add(1, Ordering::AcqRel);
        if let Some(handle) = armed.take() {
            self.env.wheel().cancel(handle);
        }
    }

    fn wait_callbacks(&self, cancel_pending: bool) {
        if cancel_pending {
            self.gen.fetch_add(1, Ordering::AcqRel);
        }
        self.tracker.wait_idle();
    }

    fn schedule(inner: &Arc<Self>, gen: u64) {
        inner.tracker.begin();
        let guard = EndGuard::new(&inner.tracker);

        let job_inner = inner.clone();
        let _ = inner.env.submit(Box::new(move || {
            let _guard = guard;
            if job_inner.gen.load(Ordering::Acquire) == gen
                && !job_inner.closed.load(Ordering::Acquire)
            {
                (job_inner.thunk)();
            }
        }));
    }
}

impl GroupMember for TimerTriggerInner {
    fn shutdown_member(&self, cancel_pending: bool) {
        {
            let mut armed = self.armed.lock();
            self.disarm_locked(&mut armed);
        }
        self.wait_callbacks(cancel_pending);
        self.closed.store(true, Ordering::Release);
    }
}
