//! Timer manager
//!
//! Registry of armed timers with `(delay, period)`. A zero period is a
//! one-shot; a non-zero period repeats at that interval after the first
//! fire. `replace` swaps the wrapper in place with the parameters
//! preserved.

use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use callpool_core::error::{PoolError, PoolResult};
use callpool_core::logging::Severity;
use callpool_core::trace_event;
use callpool_engine::{now_steady, CleanupGroup, Environment, TimerTrigger};
use parking_lot::Mutex;

use crate::callback::{invoke_guarded, Callback, Payload};
use crate::registry::Registry;

/// Identifier for a submitted timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub(crate) u64);

pub(crate) struct TimerManager {
    inner: Arc<TimerInner>,
}

struct TimerInner {
    env: Arc<Environment>,
    cleanup: Arc<CleanupGroup>,
    registry: Registry<TimerContext>,
}

struct TimerContext {
    wrapper: Mutex<Box<dyn Callback>>,
    delay: Duration,
    period: Duration,
    trigger: OnceLock<TimerTrigger>,
}

impl TimerManager {
    pub(crate) fn new(env: &Arc<Environment>, cleanup: &Arc<CleanupGroup>) -> PoolResult<Self> {
        Ok(Self {
            inner: Arc::new(TimerInner {
                env: env.clone(),
                cleanup: cleanup.clone(),
                registry: Registry::new(),
            }),
        })
    }

    /// Register a timer and arm the engine with `(delay, period)`
    pub(crate) fn submit(
        &self,
        delay: Duration,
        period: Duration,
        wrapper: Box<dyn Callback>,
    ) -> PoolResult<TimerId> {
        let inner = &self.inner;

        let context = Arc::new(TimerContext {
            wrapper: Mutex::new(wrapper),
            delay,
            period,
            trigger: OnceLock::new(),
        });
        let key = inner.registry.insert(context.clone());

        let weak = Arc::downgrade(inner);
        let trigger = TimerTrigger::new(
            &inner.env,
            Arc::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.dispatch(key);
                }
            }),
        );
        inner.cleanup.enroll(trigger.member());
        let _ = context.trigger.set(trigger.clone());

        if let Err(err) = trigger.arm(delay, period) {
            inner.registry.remove(key);
            trigger.shutdown(true);
            return Err(err);
        }

        Ok(TimerId(key))
    }

    /// Register a timer against an absolute deadline.
    ///
    /// A deadline in the past fires immediately (delay coerced to zero).
    pub(crate) fn submit_deadline(
        &self,
        deadline: Instant,
        period: Duration,
        wrapper: Box<dyn Callback>,
    ) -> PoolResult<TimerId> {
        let delay = deadline.saturating_duration_since(now_steady());
        self.submit(delay, period, wrapper)
    }

    /// Swap the callback of an existing timer, preserving `(delay, period)`.
    ///
    /// The current callback is joined first: every invocation that
    /// started before this returns ran the old wrapper, every one after
    /// uses the new one. Re-arming restarts the delay clock, so a
    /// periodic timer's phase resets at replace time. Callers must not
    /// replace the same timer from two threads at once.
    pub(crate) fn replace(&self, id: TimerId, wrapper: Box<dyn Callback>) -> PoolResult<()> {
        let inner = &self.inner;

        let Some(context) = inner.registry.get(id.0) else {
            return Err(PoolError::NotFound);
        };
        let Some(trigger) = context.trigger.get() else {
            return Err(PoolError::InvalidHandle);
        };

        trigger.disarm();
        trigger.wait_callbacks(true);

        *context.wrapper.lock() = wrapper;

        trigger.arm(context.delay, context.period)
    }

    /// Disarm and remove one timer
    pub(crate) fn cancel(&self, id: TimerId) -> PoolResult<()> {
        self.inner.cancel(id.0)
    }

    /// Disarm and remove every timer
    pub(crate) fn cancel_all(&self) {
        self.inner.cancel_all();
    }

    #[cfg(test)]
    pub(crate) fn active(&self) -> usize {
        self.inner.registry.len()
    }
}

impl Drop for TimerManager {
    fn drop(&mut self) {
        self.inner.cancel_all();
    }
}

impl TimerInner {
    fn dispatch(&self, key: u64) {
        let Some(context) = self.registry.get(key) else {
            return;
        };

        {
            let mut wrapper = context.wrapper.lock();
            invoke_guarded("TimerManager::dispatch", &mut **wrapper, Payload::Timer);
        }

        // One-shot timers clean up after their single fire; periodic
        // ones stay armed until cancel or replace
        if context.period.is_zero() {
            if let Some(trigger) = context.trigger.get() {
                trigger.close();
            }
            self.registry.remove_if_permitted(key);
        }
    }

    fn cancel(&self, key: u64) -> PoolResult<()> {
        let Some(context) = self.registry.remove(key) else {
            return Err(PoolError::NotFound);
        };
        if let Some(trigger) = context.trigger.get() {
            trigger.shutdown(true);
        }
        Ok(())
    }

    fn cancel_all(&self) {
        let (_ban, contexts) = self.registry.drain_for_cancel();
        for context in &contexts {
            if let Some(trigger) = context.trigger.get() {
                trigger.shutdown(true);
            }
        }
        if !contexts.is_empty() {
            trace_event!(
                Severity::Extended,
                "[TimerManager::cancel_all]: {} timers cancelled",
                contexts.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::TimerCallback;
    use callpool_engine::EngineConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_manager() -> (Arc<Environment>, Arc<CleanupGroup>, TimerManager) {
        let env = Environment::new(EngineConfig::custom(2, 4)).unwrap();
        let cleanup = Arc::new(CleanupGroup::new());
        let manager = TimerManager::new(&env, &cleanup).unwrap();
        (env, cleanup, manager)
    }

    fn counting_wrapper() -> (Box<dyn Callback>, Arc<AtomicUsize>) {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let wrapper = Box::new(TimerCallback::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        (wrapper, counter)
    }

    fn wait_for<F: Fn() -> bool>(cond: F) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_one_shot_fires_once_and_self_removes() {
        let (_env, _cleanup, manager) = test_manager();
        let (wrapper, counter) = counting_wrapper();

        manager
            .submit(Duration::from_millis(2), Duration::ZERO, wrapper)
            .unwrap();

        wait_for(|| counter.load(Ordering::SeqCst) >= 1);
        wait_for(|| manager.active() == 0);

        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(manager.active(), 0);
    }

    #[test]
    fn test_periodic_fires_repeatedly() {
        let (_env, _cleanup, manager) = test_manager();
        let (wrapper, counter) = counting_wrapper();

        let id = manager
            .submit(Duration::from_millis(2), Duration::from_millis(2), wrapper)
            .unwrap();

        std::thread::sleep(Duration::from_millis(40));
        assert!(counter.load(Ordering::SeqCst) >= 2);
        assert_eq!(manager.active(), 1);

        manager.cancel(id).unwrap();
        let frozen = counter.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(counter.load(Ordering::SeqCst), frozen);
    }

    #[test]
    fn test_deadline_in_past_fires_immediately() {
        let (_env, _cleanup, manager) = test_manager();
        let (wrapper, counter) = counting_wrapper();

        manager
            .submit_deadline(
                Instant::now() - Duration::from_secs(1),
                Duration::ZERO,
                wrapper,
            )
            .unwrap();

        wait_for(|| counter.load(Ordering::SeqCst) >= 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_replace_swaps_callback() {
        let (_env, _cleanup, manager) = test_manager();
        let (wrapper_a, counter_a) = counting_wrapper();

        let id = manager
            .submit(Duration::from_millis(2), Duration::from_millis(2), wrapper_a)
            .unwrap();

        wait_for(|| counter_a.load(Ordering::SeqCst) >= 2);

        let (wrapper_b, counter_b) = counting_wrapper();
        manager.replace(id, wrapper_b).unwrap();
        let frozen_a = counter_a.load(Ordering::SeqCst);

        wait_for(|| counter_b.load(Ordering::SeqCst) >= 2);
        assert!(counter_b.load(Ordering::SeqCst) >= 2);
        // The old callback never runs after replace returned
        assert_eq!(counter_a.load(Ordering::SeqCst), frozen_a);

        manager.cancel(id).unwrap();
    }

    #[test]
    fn test_replace_unknown_id() {
        let (_env, _cleanup, manager) = test_manager();
        let (wrapper, _) = counting_wrapper();
        assert_eq!(
            manager.replace(TimerId(42), wrapper),
            Err(PoolError::NotFound)
        );
    }

    #[test]
    fn test_replace_after_one_shot_fired() {
        let (_env, _cleanup, manager) = test_manager();
        let (wrapper, counter) = counting_wrapper();

        let id = manager
            .submit(Duration::from_millis(2), Duration::ZERO, wrapper)
            .unwrap();
        wait_for(|| counter.load(Ordering::SeqCst) >= 1);
        wait_for(|| manager.active() == 0);

        let (replacement, _) = counting_wrapper();
        assert_eq!(manager.replace(id, replacement), Err(PoolError::NotFound));
    }

    #[test]
    fn test_cancel_unknown_id() {
        let (_env, _cleanup, manager) = test_manager();
        assert_eq!(manager.cancel(TimerId(7)), Err(PoolError::NotFound));
    }
}
