//! Wait trigger
//!
//! Arms against an event handle with an optional timeout. The first of
//! signal/timeout wins via an atomic once-flag and schedules the
//! dispatch thunk with the corresponding outcome; the loser finds the
//! flag set and returns. A generation counter makes disarm final even
//! for dispatches already scheduled on the worker pool.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use callpool_core::error::{PoolError, PoolResult};
use callpool_core::event::{Event, WatchToken};

use crate::cleanup::GroupMember;
use crate::environment::Environment;
use crate::tracker::{DispatchTracker, EndGuard};
use crate::wheel::WheelHandle;

/// Outcome of an armed wait, passed to the dispatch thunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The waited-on event was signaled
    Signaled,
    /// The timeout elapsed before the event was signaled
    TimedOut,
}

/// Thunk run when the wait fires
pub type WaitThunk = Arc<dyn Fn(WaitOutcome) + Send + Sync>;

#[derive(Default)]
struct ArmedWait {
    event: Option<Arc<Event>>,
    watch: Option<WatchToken>,
    timeout: Option<WheelHandle>,
}

/// Handle to an armable wait dispatcher.
#[derive(Clone)]
pub struct WaitTrigger {
    inner: Arc<WaitTriggerInner>,
}

struct WaitTriggerInner {
    env: Arc<Environment>,
    thunk: WaitThunk,
    tracker: Arc<DispatchTracker>,
    gen: AtomicU64,
    closed: AtomicBool,
    armed: parking_lot::Mutex<ArmedWait>,
}

impl WaitTrigger {
    pub fn new(env: &Arc<Environment>, thunk: WaitThunk) -> Self {
        Self {
            inner: Arc::new(WaitTriggerInner {
                env: env.clone(),
                thunk,
                tracker: DispatchTracker::new(),
                gen: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                armed: parking_lot::Mutex::new(ArmedWait::default()),
            }),
        }
    }

    /// Arm against `event`, optionally bounded by `timeout`.
    ///
    /// Re-arming replaces the previous arm. An already-signaled event
    /// fires during this call.
    pub fn arm(&self, event: &Arc<Event>, timeout: Option<Duration>) -> PoolResult<()> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::Acquire) {
            return Err(PoolError::InvalidHandle);
        }

        let mut armed = inner.armed.lock();
        inner.disarm_locked(&mut armed);

        let gen = inner.gen.load(Ordering::Acquire);
        let won = Arc::new(AtomicBool::new(false));

        let watch_won = won.clone();
        let watch_inner = Arc::downgrade(inner);
        let token = event.watch(Arc::new(move || {
            if watch_won.swap(true, Ordering::AcqRel) {
                return;
            }
            if let Some(inner) = watch_inner.upgrade() {
                WaitTriggerInner::schedule(&inner, gen, WaitOutcome::Signaled);
            }
        }));

        armed.event = Some(event.clone());
        armed.watch = Some(token);

        if let Some(after) = timeout {
            let timeout_inner = Arc::downgrade(inner);
            let handle = inner.env.wheel().insert(
                after,
                None,
                Arc::new(move || {
                    if won.swap(true, Ordering::AcqRel) {
                        return;
                    }
                    if let Some(inner) = timeout_inner.upgrade() {
                        WaitTriggerInner::schedule(&inner, gen, WaitOutcome::TimedOut);
                    }
                }),
            );
            armed.timeout = Some(handle);
        }

        Ok(())
    }

    /// Unhook the watcher and timeout; scheduled dispatches become no-ops
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

impl WaitTriggerInner {
    /// Invalidate the current arm. Called with the armed lock held.
    fn disarm_locked(&self, armed: &mut ArmedWait) {
        self.gen.fetch_add(1, Ordering::AcqRel);
        if let (Some(event), Some(token)) = (armed.event.take(), armed.watch.take()) {
            event.unwatch(token);
        }
        if let Some(handle) = armed.timeout.take() {
            self.env.wheel().cancel(handle);
        }
    }

    fn wait_callbacks(&self, cancel_pending: bool) {
        if cancel_pending {
            self.gen.fetch_add(1, Ordering::AcqRel);
        }
        self.tracker.wait_idle();
    }

    fn schedule(inner: &Arc<Self>, gen: u64, outcome: WaitOutcome) {
        inner.tracker.begin();
        let guard = EndGuard::new(&inner.tracker);

        let job_inner = inner.clone();
        let _ = inner.env.submit(Box::new(move || {
            let _guard = guard;
            if job_inner.gen.load(Ordering::Acquire) == gen
                && !job_inner.closed.load(Ordering::Acquire)
            {
                (job_inner.thunk)(outcome);
            }
        }));
    }
}

impl GroupMember for WaitTriggerInner {
    fn shutdown_member(&self, cancel_pending: bool) {
        {
            let mut armed = self.armed.lock();
            self.disarm_locked(&mut armed);
        }
        self.wait_callbacks(cancel_pending);
        self.closed.store(true, Ordering::Release);
    }
}
