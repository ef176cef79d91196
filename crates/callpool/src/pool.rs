//! Pool façade
//!
//! Composes the environment, cleanup group and the four kind managers,
//! routes submissions and cancellations, and orchestrates teardown.
//!
//! Dropping the pool marks it draining (later submissions are refused
//! with `ResourceExhausted`), performs a single cancel-pending drain on
//! the cleanup group, and stops the engine. The drain is idempotent
//! against any per-kind cancellation that already ran.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use callpool_core::error::{PoolError, PoolResult};
use callpool_core::event::Event;
use callpool_engine::{
    CleanupGroup, CompletionPort, EngineConfig, Environment, IoCompletion, WaitOutcome,
};

use crate::callback::{IoCallback, TimerCallback, WaitCallback, WorkCallback};
use crate::io::{IoId, IoManager};
use crate::timer::{TimerId, TimerManager};
use crate::wait::{WaitId, WaitManager};
use crate::work::WorkManager;

/// Cancellation probe consulted inside `wait_works`
pub type CancelProbe = Box<dyn Fn() -> bool + Send + Sync>;

/// Builder for a [`Pool`].
pub struct PoolBuilder {
    custom: bool,
    min_threads: usize,
    max_threads: usize,
    probe: CancelProbe,
}

impl PoolBuilder {
    fn new() -> Self {
        Self {
            custom: false,
            min_threads: 0,
            max_threads: 0,
            probe: Box::new(|| false),
        }
    }

    /// Use a private pool with the given thread bounds.
    ///
    /// A zero minimum becomes 1; a zero (or inconsistent) maximum falls
    /// back to a hardware heuristic.
    pub fn threads(mut self, min_threads: usize, max_threads: usize) -> Self {
        self.custom = true;
        self.min_threads = min_threads;
        self.max_threads = max_threads;
        self
    }

    /// Install a cancellation probe consulted by `wait_works`
    pub fn cancel_probe<F>(mut self, probe: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.probe = Box::new(probe);
        self
    }

    /// Build the pool: environment, cleanup group, then the four
    /// managers. Any failure unwinds the already-built pieces.
    pub fn build(self) -> PoolResult<Pool> {
        let config = if self.custom {
            EngineConfig::custom(self.min_threads, self.max_threads)
        } else {
            EngineConfig::system()
        };

        let env = Environment::new(config)?;
        let cleanup = Arc::new(CleanupGroup::new());

        let work = WorkManager::new(&env, &cleanup)?;
        let waits = WaitManager::new(&env, &cleanup)?;
        let timers = TimerManager::new(&env, &cleanup)?;
        let io = IoManager::new(&env, &cleanup)?;

        Ok(Pool {
            work,
            waits,
            timers,
            io,
            cleanup,
            env,
            probe: self.probe,
            draining: AtomicBool::new(false),
        })
    }
}

/// Callback-dispatch thread pool.
///
/// Callers submit closures bound to one of four trigger kinds
/// (immediate work, event-signal wait, timer/deadline, I/O completion)
/// and the pool runs them on its worker threads. Callbacks are
/// fire-and-forget; results travel through whatever the closures
/// capture.
pub struct Pool {
    work: WorkManager,
    waits: WaitManager,
    timers: TimerManager,
    io: IoManager,
    cleanup: Arc<CleanupGroup>,
    env: Arc<Environment>,
    probe: CancelProbe,
    draining: AtomicBool,
}

impl Pool {
    /// Pool backed by default (system-flavor) thread counts
    pub fn system() -> PoolResult<Self> {
        Self::builder().build()
    }

    /// Pool with explicit thread bounds
    pub fn custom(min_threads: usize, max_threads: usize) -> PoolResult<Self> {
        Self::builder().threads(min_threads, max_threads).build()
    }

    pub fn builder() -> PoolBuilder {
        PoolBuilder::new()
    }

    fn ensure_open(&self) -> PoolResult<()> {
        if self.draining.load(Ordering::Acquire) {
            Err(PoolError::ResourceExhausted)
        } else {
            Ok(())
        }
    }

    // ------------------------------------------------------------------
    // Work
    // ------------------------------------------------------------------

    /// Enqueue a one-shot immediate callback
    pub fn submit_work<F>(&self, f: F) -> PoolResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.ensure_open()?;
        self.work.submit(Box::new(WorkCallback::new(f)))
    }

    /// Block until all queued and executing work completes, or the
    /// cancel probe reports cancellation.
    ///
    /// Returns `true` if all callbacks completed.
    pub fn wait_works(&self) -> bool {
        self.work.wait_all(&*self.probe)
    }

    /// Drop all queued work and wait for in-flight callbacks to return
    pub fn cancel_works(&self) {
        self.work.cancel_all();
    }

    // ------------------------------------------------------------------
    // Waits
    // ------------------------------------------------------------------

    /// Register a wait on `handle` that never times out
    pub fn submit_wait<F>(&self, handle: &Arc<Event>, f: F) -> PoolResult<WaitId>
    where
        F: FnOnce(WaitOutcome) + Send + 'static,
    {
        self.submit_wait_timeout(handle, Duration::MAX, f)
    }

    /// Register a wait on `handle` bounded by `timeout`.
    ///
    /// `Duration::MAX` means the wait never expires until the handle
    /// signals.
    pub fn submit_wait_timeout<F>(
        &self,
        handle: &Arc<Event>,
        timeout: Duration,
        f: F,
    ) -> PoolResult<WaitId>
    where
        F: FnOnce(WaitOutcome) + Send + 'static,
    {
        self.ensure_open()?;
        self.waits
            .submit(handle, Some(timeout), Box::new(WaitCallback::new(f)))
    }

    /// Cancel one wait; blocks until any in-flight callback returns
    pub fn cancel_wait(&self, id: WaitId) -> PoolResult<()> {
        self.waits.cancel(id)
    }

    /// Cancel every wait
    pub fn cancel_waits(&self) {
        self.waits.cancel_all();
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    /// Register a one-shot timer firing after `delay`
    pub fn submit_timer<F>(&self, delay: Duration, f: F) -> PoolResult<TimerId>
    where
        F: FnMut() + Send + 'static,
    {
        self.submit_periodic_timer(delay, Duration::ZERO, f)
    }

    /// Register a timer firing after `delay` and then every `period`.
    ///
    /// A zero period denotes a one-shot.
    pub fn submit_periodic_timer<F>(
        &self,
        delay: Duration,
        period: Duration,
        f: F,
    ) -> PoolResult<TimerId>
    where
        F: FnMut() + Send + 'static,
    {
        self.ensure_open()?;
        self.timers
            .submit(delay, period, Box::new(TimerCallback::new(f)))
    }

    /// Register a one-shot timer firing at `deadline`.
    ///
    /// A deadline in the past fires immediately.
    pub fn submit_timer_deadline<F>(&self, deadline: Instant, f: F) -> PoolResult<TimerId>
    where
        F: FnMut() + Send + 'static,
    {
        self.submit_periodic_timer_deadline(deadline, Duration::ZERO, f)
    }

    /// Register a timer firing at `deadline` and then every `period`
    pub fn submit_periodic_timer_deadline<F>(
        &self,
        deadline: Instant,
        period: Duration,
        f: F,
    ) -> PoolResult<TimerId>
    where
        F: FnMut() + Send + 'static,
    {
        self.ensure_open()?;
        self.timers
            .submit_deadline(deadline, period, Box::new(TimerCallback::new(f)))
    }

    /// Atomically swap a timer's callback, preserving `(delay, period)`.
    ///
    /// Every invocation started before this returns ran the old
    /// callback; every one after uses the new one. The delay clock
    /// restarts at replace time, so a periodic timer's phase resets.
    pub fn replace_timer<F>(&self, id: TimerId, f: F) -> PoolResult<()>
    where
        F: FnMut() + Send + 'static,
    {
        self.ensure_open()?;
        self.timers.replace(id, Box::new(TimerCallback::new(f)))
    }

    /// Cancel one timer; blocks until any in-flight callback returns
    pub fn cancel_timer(&self, id: TimerId) -> PoolResult<()> {
        self.timers.cancel(id)
    }

    /// Cancel every timer
    pub fn cancel_timers(&self) {
        self.timers.cancel_all();
    }

    // ------------------------------------------------------------------
    // IO
    // ------------------------------------------------------------------

    /// Register an I/O completion hook on `port`.
    ///
    /// After this returns, initiate the asynchronous I/O whose
    /// completion will be posted to `port`. If that initiation fails
    /// synchronously, call [`Pool::abort_io`]; without it the armed
    /// engine state lingers because no completion will ever arrive.
    pub fn submit_io<F>(&self, port: &CompletionPort, f: F) -> PoolResult<IoId>
    where
        F: FnOnce(IoCompletion) + Send + 'static,
    {
        self.ensure_open()?;
        self.io.submit(port, Box::new(IoCallback::new(f)))
    }

    /// Cancel a hook whose asynchronous I/O started successfully
    pub fn cancel_io(&self, id: IoId) -> PoolResult<()> {
        self.io.cancel(id)
    }

    /// Tear down a hook whose asynchronous I/O never started
    pub fn abort_io(&self, id: IoId) -> PoolResult<()> {
        self.io.abort(id)
    }

    /// Cancel every I/O hook
    pub fn cancel_ios(&self) {
        self.io.cancel_all();
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Cancel all pending callbacks of every kind
    pub fn cancel_all(&self) {
        self.work.cancel_all();
        self.waits.cancel_all();
        self.timers.cancel_all();
        self.io.cancel_all();
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.draining.store(true, Ordering::SeqCst);
        self.cleanup.drain(true);
        self.env.shutdown();
    }
}
