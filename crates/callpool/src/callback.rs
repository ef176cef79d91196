//! Callback wrappers
//!
//! A wrapper owns one user closure behind the single erased method
//! `invoke(payload)`. The payload is shaped per trigger kind so the
//! wrapper's internals stay strongly typed; one-shot kinds hold the
//! closure in an `Option` so a second invocation is structurally
//! impossible.
//!
//! User code is always invoked through `invoke_guarded`, which catches
//! unwinds, logs them, and lets the dispatch thunk proceed to cleanup.

use std::panic::AssertUnwindSafe;

use callpool_core::logging::Severity;
use callpool_core::trace_event;
use callpool_engine::{IoCompletion, WaitOutcome};

/// Trigger payload decoded per kind
pub(crate) enum Payload {
    Work,
    Timer,
    Wait(WaitOutcome),
    Io(IoCompletion),
}

/// Erased callback wrapper
pub(crate) trait Callback: Send {
    fn invoke(&mut self, payload: Payload);
}

/// One-shot work callback (no trigger arguments)
pub(crate) struct WorkCallback<F>(Option<F>);

impl<F: FnOnce() + Send> WorkCallback<F> {
    pub(crate) fn new(f: F) -> Self {
        Self(Some(f))
    }
}

impl<F: FnOnce() + Send> Callback for WorkCallback<F> {
    fn invoke(&mut self, _payload: Payload) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}

/// Timer callback; `FnMut` because periodic timers refire
pub(crate) struct TimerCallback<F>(F);

impl<F: FnMut() + Send> TimerCallback<F> {
    pub(crate) fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F: FnMut() + Send> Callback for TimerCallback<F> {
    fn invoke(&mut self, _payload: Payload) {
        (self.0)();
    }
}

/// One-shot wait callback receiving the wait outcome
pub(crate) struct WaitCallback<F>(Option<F>);

impl<F: FnOnce(WaitOutcome) + Send> WaitCallback<F> {
    pub(crate) fn new(f: F) -> Self {
        Self(Some(f))
    }
}

impl<F: FnOnce(WaitOutcome) + Send> Callback for WaitCallback<F> {
    fn invoke(&mut self, payload: Payload) {
        if let Payload::Wait(outcome) = payload {
            if let Some(f) = self.0.take() {
                f(outcome);
            }
        }
    }
}

/// One-shot I/O callback receiving the completion packet
pub(crate) struct IoCallback<F>(Option<F>);

impl<F: FnOnce(IoCompletion) + Send> IoCallback<F> {
    pub(crate) fn new(f: F) -> Self {
        Self(Some(f))
    }
}

impl<F: FnOnce(IoCompletion) + Send> Callback for IoCallback<F> {
    fn invoke(&mut self, payload: Payload) {
        if let Payload::Io(completion) = payload {
            if let Some(f) = self.0.take() {
                f(completion);
            }
        }
    }
}

/// Invoke a wrapper, containing any unwind from user code.
///
/// Panics with a string payload log at Error severity, anything else at
/// Critical; the manager is never poisoned and cleanup proceeds as if
/// the callback had returned.
pub(crate) fn invoke_guarded(site: &str, callback: &mut dyn Callback, payload: Payload) {
    let result = std::panic::catch_unwind(AssertUnwindSafe(|| callback.invoke(payload)));

    if let Err(panic) = result {
        if let Some(message) = panic.downcast_ref::<&str>() {
            trace_event!(Severity::Error, "[{}]: callback panicked: {}", site, message);
        } else if let Some(message) = panic.downcast_ref::<String>() {
            trace_event!(Severity::Error, "[{}]: callback panicked: {}", site, message);
        } else {
            trace_event!(Severity::Critical, "[{}]: unknown error", site);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_work_callback_runs_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let mut wrapper = WorkCallback::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        wrapper.invoke(Payload::Work);
        wrapper.invoke(Payload::Work);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_timer_callback_repeats() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let mut wrapper = TimerCallback::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        wrapper.invoke(Payload::Timer);
        wrapper.invoke(Payload::Timer);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_wait_callback_receives_outcome() {
        let seen = Arc::new(parking_lot::Mutex::new(None));
        let sink = seen.clone();
        let mut wrapper = WaitCallback::new(move |outcome| {
            *sink.lock() = Some(outcome);
        });

        wrapper.invoke(Payload::Wait(WaitOutcome::TimedOut));
        assert_eq!(*seen.lock(), Some(WaitOutcome::TimedOut));
    }

    #[test]
    fn test_io_callback_receives_completion() {
        let seen = Arc::new(parking_lot::Mutex::new(None));
        let sink = seen.clone();
        let mut wrapper = IoCallback::new(move |completion| {
            *sink.lock() = Some(completion);
        });

        let packet = IoCompletion {
            token: 3,
            status: 0,
            bytes_transferred: 16,
        };
        wrapper.invoke(Payload::Io(packet));
        assert_eq!(*seen.lock(), Some(packet));
    }

    #[test]
    fn test_guarded_invoke_contains_panic() {
        let mut wrapper = WorkCallback::new(|| panic!("exploded"));
        invoke_guarded("tests", &mut wrapper, Payload::Work);
        // Reaching here is the assertion
    }
}
