//! IO manager
//!
//! Registry of I/O completion hooks. Submitting arms the engine against
//! the caller's completion port; the caller then initiates their own
//! asynchronous I/O. A completion drives the one-shot dispatch path;
//! an operation that failed to start synchronously must be torn down
//! with `abort`, which additionally discards latent engine-side state.

use std::sync::{Arc, OnceLock};

use callpool_core::error::{PoolError, PoolResult};
use callpool_core::logging::Severity;
use callpool_core::trace_event;
use callpool_engine::{CleanupGroup, CompletionPort, Environment, IoCompletion, IoTrigger};
use parking_lot::Mutex;

use crate::callback::{invoke_guarded, Callback, Payload};
use crate::registry::Registry;

/// Identifier for a submitted I/O hook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IoId(pub(crate) u64);

pub(crate) struct IoManager {
    inner: Arc<IoInner>,
}

struct IoInner {
    env: Arc<Environment>,
    cleanup: Arc<CleanupGroup>,
    registry: Registry<IoContext>,
}

struct IoContext {
    wrapper: Mutex<Box<dyn Callback>>,
    trigger: OnceLock<IoTrigger>,
}

impl IoManager {
    pub(crate) fn new(env: &Arc<Environment>, cleanup: &Arc<CleanupGroup>) -> PoolResult<Self> {
        Ok(Self {
            inner: Arc::new(IoInner {
                env: env.clone(),
                cleanup: cleanup.clone(),
                registry: Registry::new(),
            }),
        })
    }

    /// Register a completion hook and arm the engine against `port`
    pub(crate) fn submit(
        &self,
        port: &CompletionPort,
        wrapper: Box<dyn Callback>,
    ) -> PoolResult<IoId> {
        let inner = &self.inner;

        let context = Arc::new(IoContext {
            wrapper: Mutex::new(wrapper),
            trigger: OnceLock::new(),
        });
        let key = inner.registry.insert(context.clone());

        let weak = Arc::downgrade(inner);
        let trigger = IoTrigger::new(
            &inner.env,
            port,
            Arc::new(move |completion| {
                if let Some(inner) = weak.upgrade() {
                    inner.dispatch(key, completion);
                }
            }),
        );
        inner.cleanup.enroll(trigger.member());
        let _ = context.trigger.set(trigger.clone());

        if let Err(err) = trigger.arm() {
            inner.registry.remove(key);
            trigger.shutdown(true);
            return Err(err);
        }

        Ok(IoId(key))
    }

    /// Teardown after the asynchronous I/O was started successfully
    pub(crate) fn cancel(&self, id: IoId) -> PoolResult<()> {
        let Some(context) = self.inner.registry.remove(id.0) else {
            return Err(PoolError::NotFound);
        };
        if let Some(trigger) = context.trigger.get() {
            trigger.shutdown(true);
        }
        Ok(())
    }

    /// Teardown for an operation that never started: no completion will
    /// ever arrive, so latent engine-side state is discarded as well.
    pub(crate) fn abort(&self, id: IoId) -> PoolResult<()> {
        let Some(context) = self.inner.registry.remove(id.0) else {
            return Err(PoolError::NotFound);
        };
        if let Some(trigger) = context.trigger.get() {
            trigger.abort();
            trigger.shutdown(true);
        }
        Ok(())
    }

    /// Disarm and remove every hook
    pub(crate) fn cancel_all(&self) {
        self.inner.cancel_all();
    }

    #[cfg(test)]
    pub(crate) fn active(&self) -> usize {
        self.inner.registry.len()
    }
}

impl Drop for IoManager {
    fn drop(&mut self) {
        self.inner.cancel_all();
    }
}

impl IoInner {
    fn dispatch(&self, key: u64, completion: IoCompletion) {
        let Some(context) = self.registry.get(key) else {
            return;
        };

        {
            let mut wrapper = context.wrapper.lock();
            invoke_guarded("IoManager::dispatch", &mut **wrapper, Payload::Io(completion));
        }

        // One-shot: release the engine side and erase our slot unless a
        // cancel-all owns the registry right now
        if let Some(trigger) = context.trigger.get() {
            trigger.close();
        }
        self.registry.remove_if_permitted(key);
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
                "[IoManager::cancel_all]: {} io hooks cancelled",
                contexts.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::IoCallback;
    use callpool_engine::EngineConfig;
    use std::time::{Duration, Instant};

    fn test_manager() -> (Arc<Environment>, Arc<CleanupGroup>, IoManager) {
        let env = Environment::new(EngineConfig::custom(2, 4)).unwrap();
        let cleanup = Arc::new(CleanupGroup::new());
        let manager = IoManager::new(&env, &cleanup).unwrap();
        (env, cleanup, manager)
    }

    fn recording_wrapper() -> (Box<dyn Callback>, Arc<Mutex<Vec<IoCompletion>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let wrapper = Box::new(IoCallback::new(move |completion| {
            sink.lock().push(completion);
        }));
        (wrapper, seen)
    }

    fn wait_for<F: Fn() -> bool>(cond: F) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_completion_invokes_once_and_self_removes() {
        let (_env, _cleanup, manager) = test_manager();
        let port = CompletionPort::new();
        let (wrapper, seen) = recording_wrapper();

        manager.submit(&port, wrapper).unwrap();
        assert_eq!(manager.active(), 1);

        port.post(IoCompletion {
            token: 11,
            status: 0,
            bytes_transferred: 256,
        });

        wait_for(|| manager.active() == 0);
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].token, 11);
        assert_eq!(seen[0].bytes_transferred, 256);
        assert!(seen[0].is_success());
    }

    #[test]
    fn test_cancel_prevents_invocation() {
        let (_env, _cleanup, manager) = test_manager();
        let port = CompletionPort::new();
        let (wrapper, seen) = recording_wrapper();

        let id = manager.submit(&port, wrapper).unwrap();
        manager.cancel(id).unwrap();

        port.post(IoCompletion {
            token: 1,
            status: 0,
            bytes_transferred: 1,
        });

        std::thread::sleep(Duration::from_millis(50));
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_abort_discards_and_removes() {
        let (_env, _cleanup, manager) = test_manager();
        let port = CompletionPort::new();
        let (wrapper, seen) = recording_wrapper();

        let id = manager.submit(&port, wrapper).unwrap();
        manager.abort(id).unwrap();

        assert_eq!(manager.active(), 0);
        std::thread::sleep(Duration::from_millis(20));
        assert!(seen.lock().is_empty());

        // Both teardown paths report NotFound afterwards
        assert_eq!(manager.cancel(id), Err(PoolError::NotFound));
        assert_eq!(manager.abort(id), Err(PoolError::NotFound));
    }

    #[test]
    fn test_cancel_unknown_id() {
        let (_env, _cleanup, manager) = test_manager();
        assert_eq!(manager.cancel(IoId(404)), Err(PoolError::NotFound));
        assert_eq!(manager.abort(IoId(404)), Err(PoolError::NotFound));
    }

    #[test]
    fn test_cancel_all_clears_registry() {
        let (_env, _cleanup, manager) = test_manager();

        for _ in 0..3 {
            let port = CompletionPort::new();
            let (wrapper, _) = recording_wrapper();
            manager.submit(&port, wrapper).unwrap();
        }
        assert_eq!(manager.active(), 3);

        manager.cancel_all();
        assert_eq!(manager.active(), 0);
    }
}
