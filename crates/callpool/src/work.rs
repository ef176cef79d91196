//! Work manager
//!
//! One-shot immediate callbacks. Submitted wrappers go into a lock-free
//! queue and every submission notifies the work trigger once; a
//! notification that finds the queue empty returns without error (the
//! tolerated overshoot race).
//!
//! `wait_all` parks the heavy blocking wait on a separate worker when
//! possible so the caller's loop can keep consulting the cancel probe;
//! when no worker can be spared it degrades to an in-caller wait and
//! cooperative cancellation is unavailable for that call.

use std::sync::Arc;
use std::time::Duration;

use callpool_core::error::PoolResult;
use callpool_core::event::Event;
use callpool_core::logging::Severity;
use callpool_core::trace_event;
use callpool_engine::{CleanupGroup, Environment, WorkTrigger};
use crossbeam_queue::SegQueue;

use crate::callback::{invoke_guarded, Callback, Payload};

/// Polling interval between cancel-probe checks in `wait_all`
const TEST_CANCEL_TICK: Duration = Duration::from_millis(100);

pub(crate) struct WorkManager {
    env: Arc<Environment>,
    inner: Arc<WorkInner>,
    trigger: WorkTrigger,
}

struct WorkInner {
    queue: SegQueue<Box<dyn Callback>>,
    drained: Event,
}

impl WorkManager {
    pub(crate) fn new(env: &Arc<Environment>, cleanup: &Arc<CleanupGroup>) -> PoolResult<Self> {
        let inner = Arc::new(WorkInner {
            queue: SegQueue::new(),
            drained: Event::manual(),
        });

        let weak = Arc::downgrade(&inner);
        let trigger = WorkTrigger::new(
            env,
            Arc::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.dispatch();
                }
            }),
        );
        cleanup.enroll(trigger.member());

        Ok(Self {
            env: env.clone(),
            inner,
            trigger,
        })
    }

    /// Queue a wrapper and notify the engine of one more work slot
    pub(crate) fn submit(&self, wrapper: Box<dyn Callback>) -> PoolResult<()> {
        self.inner.queue.push(wrapper);
        if let Err(err) = self.trigger.notify() {
            // Unwind the enqueue; any one wrapper stands in for ours
            let _ = self.inner.queue.pop();
            return Err(err);
        }
        Ok(())
    }

    /// Block until all queued and executing work completes, or the
    /// cancel probe reports cancellation.
    ///
    /// Returns `true` if everything completed.
    pub(crate) fn wait_all(&self, test_cancel: &(dyn Fn() -> bool + Send + Sync)) -> bool {
        self.inner.drained.reset();

        let waiter_trigger = self.trigger.clone();
        let waiter_inner = self.inner.clone();
        let submitted = self.env.try_submit_long(Box::new(move || {
            trace_event!(Severity::Extended, "[WorkManager::wait_all]: wait started");
            waiter_trigger.wait_callbacks(false);
            waiter_inner.drained.set();
            trace_event!(Severity::Extended, "[WorkManager::wait_all]: wait finished");
        }));

        if !submitted {
            trace_event!(
                Severity::Error,
                "[WorkManager::wait_all]: cannot wait in separate thread, waiting in current one, cancellation is unavailable"
            );
            self.trigger.wait_callbacks(false);
            self.inner.drained.set();
        }

        let mut cancelled = false;
        while !self.inner.drained.wait_timeout(TEST_CANCEL_TICK) {
            if test_cancel() {
                self.cancel_all();
                cancelled = true;
            }
        }

        trace_event!(Severity::Extended, "[WorkManager::wait_all]: wait completed");

        !cancelled
    }

    /// Drop queued work and wait for in-flight callbacks to return
    pub(crate) fn cancel_all(&self) {
        self.trigger.wait_callbacks(true);
        self.inner.drained.set();

        let left_unprocessed = self.inner.clear_queue();
        trace_event!(
            Severity::Normal,
            "[WorkManager::cancel_all]: tasks cancelled and {} left unprocessed",
            left_unprocessed
        );
    }

    #[cfg(test)]
    pub(crate) fn queued(&self) -> usize {
        self.inner.queue.len()
    }
}

impl Drop for WorkManager {
    fn drop(&mut self) {
        self.trigger.shutdown(true);
        self.inner.drained.set();
        self.inner.clear_queue();
    }
}

impl WorkInner {
    /// Dispatch thunk: pop one wrapper; an empty pop is the benign
    /// overshoot case and simply returns.
    fn dispatch(&self) {
        if let Some(mut wrapper) = self.queue.pop() {
            invoke_guarded("WorkManager::dispatch", &mut *wrapper, Payload::Work);
        }
    }

    fn clear_queue(&self) -> usize {
        let mut cleared = 0;
        while self.queue.pop().is_some() {
            cleared += 1;
        }
        cleared
    }
}
