//! Wait manager
//!
//! Registry of armed waits. Each submission arms the engine with the
//! event handle and an optional timeout; the dispatch thunk invokes the
//! wrapper with the engine-reported outcome, closes the engine side and
//! erases its own slot unless a cancel-all holds the removal gate.
//!
//! Waits are one-shot per arm: a `Duration::MAX` timeout means the wait
//! never expires until the handle signals.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use callpool_core::error::{PoolError, PoolResult};
use callpool_core::event::Event;
use callpool_core::logging::Severity;
use callpool_core::trace_event;
use callpool_engine::{CleanupGroup, Environment, WaitOutcome, WaitTrigger};
use parking_lot::Mutex;

use crate::callback::{invoke_guarded, Callback, Payload};
use crate::registry::Registry;

/// Identifier for a submitted wait
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaitId(pub(crate) u64);

pub(crate) struct WaitManager {
    inner: Arc<WaitInner>,
}

struct WaitInner {
    env: Arc<Environment>,
    cleanup: Arc<CleanupGroup>,
    registry: Registry<WaitContext>,
}

struct WaitContext {
    wrapper: Mutex<Box<dyn Callback>>,
    trigger: OnceLock<WaitTrigger>,
}

impl WaitManager {
    pub(crate) fn new(env: &Arc<Environment>, cleanup: &Arc<CleanupGroup>) -> PoolResult<Self> {
        Ok(Self {
            inner: Arc::new(WaitInner {
                env: env.clone(),
                cleanup: cleanup.clone(),
                registry: Registry::new(),
            }),
        })
    }

    /// Register a wait on `handle` and arm the engine.
    ///
    /// `Duration::MAX` (or `None`) means no timeout.
    pub(crate) fn submit(
        &self,
        handle: &Arc<Event>,
        timeout: Option<Duration>,
        wrapper: Box<dyn Callback>,
    ) -> PoolResult<WaitId> {
        let inner = &self.inner;

        let context = Arc::new(WaitContext {
            wrapper: Mutex::new(wrapper),
            trigger: OnceLock::new(),
        });
        let key = inner.registry.insert(context.clone());

        let weak = Arc::downgrade(inner);
        let trigger = WaitTrigger::new(
            &inner.env,
            Arc::new(move |outcome| {
                if let Some(inner) = weak.upgrade() {
                    inner.dispatch(key, outcome);
                }
            }),
        );
        inner.cleanup.enroll(trigger.member());
        let _ = context.trigger.set(trigger.clone());

        let timeout = timeout.filter(|t| *t != Duration::MAX);
        if let Err(err) = trigger.arm(handle, timeout) {
            inner.registry.remove(key);
            trigger.shutdown(true);
            return Err(err);
        }

        Ok(WaitId(key))
    }

    /// Disarm and remove one wait
    pub(crate) fn cancel(&self, id: WaitId) -> PoolResult<()> {
        self.inner.cancel(id.0)
    }

    /// Disarm and remove every wait
    pub(crate) fn cancel_all(&self) {
        self.inner.cancel_all();
    }

    #[cfg(test)]
    pub(crate) fn active(&self) -> usize {
        self.inner.registry.len()
    }
}

impl Drop for WaitManager {
    fn drop(&mut self) {
        self.inner.cancel_all();
    }
}

impl WaitInner {
    fn dispatch(&self, key: u64, outcome: WaitOutcome) {
        let Some(context) = self.registry.get(key) else {
            return;
        };

        {
            let mut wrapper = context.wrapper.lock();
            invoke_guarded("WaitManager::dispatch", &mut **wrapper, Payload::Wait(outcome));
        }

        // One-shot: release the engine side, then erase our slot unless
        // a cancel-all owns the registry right now
        if let Some(trigger) = context.trigger.get() {
            trigger.close();
        }
        self.registry.remove_if_permitted(key);
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
                "[WaitManager::cancel_all]: {} waits cancelled",
                contexts.len()
            );
        }
    }
}
