//! Shared deadline wheel
//!
//! A single polling thread serves every timed obligation in the engine:
//! timer-trigger arms and wait-trigger timeouts. Entries live in a
//! deadline-ordered schedule with exact cancellation; the thread sleeps
//! until the next deadline, bounded by a maximum poll interval.
//!
//! Periodic entries reschedule under their original handle so a single
//! `cancel` stops every future occurrence.

mod queue;

pub(crate) use queue::DeadlineQueue;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use callpool_core::error::{PoolError, PoolResult};
use parking_lot::Mutex;

/// Action fired when an entry expires; runs on the wheel thread and must
/// be fast (trigger actions only forward to the worker pool)
pub(crate) type WheelAction = Arc<dyn Fn() + Send + Sync>;

/// Handle for cancelling a scheduled entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct WheelHandle(u64);

impl WheelHandle {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        WheelHandle(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Configuration for the wheel thread
#[derive(Debug, Clone)]
pub(crate) struct WheelConfig {
    /// Maximum time between polls even when no entry is due
    pub(crate) max_poll_interval: Duration,

    /// Minimum sleep time, prevents busy-spinning
    pub(crate) min_sleep: Duration,

    /// Thread name
    pub(crate) thread_name: String,
}

impl Default for WheelConfig {
    fn default() -> Self {
        Self {
            max_poll_interval: Duration::from_millis(1),
            min_sleep: Duration::from_micros(50),
            thread_name: "callpool-wheel".into(),
        }
    }
}

/// Handle to the running wheel thread and its queue
pub(crate) struct DeadlineWheel {
    queue: Arc<DeadlineQueue>,
    shutdown: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl DeadlineWheel {
    /// Spawn the wheel thread
    pub(crate) fn start(config: WheelConfig) -> PoolResult<Self> {
        let queue = Arc::new(DeadlineQueue::new());
        let shutdown = Arc::new(AtomicBool::new(false));

        let loop_queue = queue.clone();
        let loop_shutdown = shutdown.clone();
        let handle = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || wheel_loop(loop_queue, loop_shutdown, config))
            .map_err(|_| PoolError::ResourceExhausted)?;

        Ok(Self {
            queue,
            shutdown,
            thread: Mutex::new(Some(handle)),
        })
    }

    /// Schedule an action after `delay`, repeating every `period` if given
    pub(crate) fn insert(
        &self,
        delay: Duration,
        period: Option<Duration>,
        action: WheelAction,
    ) -> WheelHandle {
        let handle = WheelHandle::next();
        self.queue.insert(handle, deadline_after(delay), period, action);
        handle
    }

    /// Cancel a scheduled entry (best-effort, it may already have fired)
    pub(crate) fn cancel(&self, handle: WheelHandle) -> bool {
        self.queue.cancel(handle)
    }

    /// Number of active entries
    #[cfg(test)]
    pub(crate) fn active(&self) -> usize {
        self.queue.len()
    }

    /// Request shutdown and join the wheel thread (idempotent)
    pub(crate) fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }
}

fn wheel_loop(queue: Arc<DeadlineQueue>, shutdown: Arc<AtomicBool>, config: WheelConfig) {
    while !shutdown.load(Ordering::Relaxed) {
        let now = Instant::now();

        for action in queue.poll_expired(now) {
            action();
        }

        let sleep = calculate_sleep(&queue, &config);
        if sleep > Duration::ZERO {
            thread::sleep(sleep);
        }
    }
}

/// `now + delay` saturated against `Instant` overflow; effectively-infinite
/// delays land far enough out to never fire
pub(crate) fn deadline_after(delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(delay)
        .unwrap_or_else(|| now + Duration::from_secs(86_400 * 365 * 30))
}

/// Sleep until the next deadline, bounded by the configured interval
#[inline]
fn calculate_sleep(queue: &Arc<DeadlineQueue>, config: &WheelConfig) -> Duration {
    match queue.next_deadline() {
        Some(deadline) => {
            let now = Instant::now();
            if deadline <= now {
                Duration::ZERO
            } else {
                (deadline - now)
                    .min(config.max_poll_interval)
                    .max(config.min_sleep)
            }
        }
        None => config.max_poll_interval,
    }
}
