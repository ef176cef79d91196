//! Worker thread management
//!
//! Workers are OS threads draining a shared job channel. The configured
//! minimum is spawned eagerly; the pool grows toward the maximum when a
//! submission finds no idle worker. Workers never shrink.
//!
//! Long-running jobs (such as the work manager's drain waiter) go through
//! `try_submit_long`, which refuses instead of queueing when it cannot
//! guarantee a thread will be free to make progress.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use callpool_core::error::{PoolError, PoolResult};
use callpool_core::logging::Severity;
use callpool_core::trace_event;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::config::EngineConfig;

/// A unit of work handed to the engine
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Pool of worker threads
pub(crate) struct WorkerPool {
    /// Sender side of the job channel; taken on shutdown to disconnect
    tx: Mutex<Option<Sender<Job>>>,

    /// Receiver template cloned into every worker
    rx: Receiver<Job>,

    /// Join handles for spawned workers
    handles: Mutex<Vec<JoinHandle<()>>>,

    /// Number of workers currently blocked on the channel
    idle: Arc<AtomicUsize>,

    /// Number of workers spawned so far
    spawned: AtomicUsize,

    /// Growth limit
    max_threads: usize,
}

impl WorkerPool {
    /// Spawn the configured minimum and return the pool
    pub(crate) fn start(config: &EngineConfig) -> PoolResult<Self> {
        let (tx, rx) = unbounded();
        let pool = Self {
            tx: Mutex::new(Some(tx)),
            rx,
            handles: Mutex::new(Vec::with_capacity(config.min_threads)),
            idle: Arc::new(AtomicUsize::new(0)),
            spawned: AtomicUsize::new(0),
            max_threads: config.max_threads,
        };

        for _ in 0..config.min_threads {
            pool.spawn_worker()?;
        }

        Ok(pool)
    }

    fn spawn_worker(&self) -> PoolResult<()> {
        let index = self.spawned.fetch_add(1, Ordering::SeqCst);
        let rx = self.rx.clone();
        let idle = self.idle.clone();

        let spawned = thread::Builder::new()
            .name(format!("callpool-worker-{}", index))
            .spawn(move || worker_loop(rx, idle));

        match spawned {
            Ok(handle) => {
                self.handles.lock().push(handle);
                Ok(())
            }
            Err(_) => {
                self.spawned.fetch_sub(1, Ordering::SeqCst);
                Err(PoolError::ResourceExhausted)
            }
        }
    }

    /// Enqueue a job, growing the pool if every worker is busy
    pub(crate) fn submit(&self, job: Job) -> PoolResult<()> {
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            return Err(PoolError::ResourceExhausted);
        };

        if self.idle.load(Ordering::Acquire) == 0
            && self.spawned.load(Ordering::Acquire) < self.max_threads
        {
            // Best-effort growth; the job still queues if this fails
            let _ = self.spawn_worker();
        }

        tx.send(job).map_err(|_| PoolError::ResourceExhausted)
    }

    /// Enqueue a job expected to block for a long time.
    ///
    /// Returns `false` when no worker can be guaranteed, so the caller
    /// can fall back to running in place.
    pub(crate) fn try_submit_long(&self, job: Job) -> bool {
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            return false;
        };

        // The long job will occupy one worker indefinitely. Accept only
        // if another worker stays available (or can be spawned) for the
        // short dispatch jobs, otherwise those would starve behind it.
        if self.idle.load(Ordering::Acquire) < 2 {
            if self.spawned.load(Ordering::Acquire) >= self.max_threads {
                return false;
            }
            if self.spawn_worker().is_err() {
                return false;
            }
        }

        tx.send(job).is_ok()
    }

    /// Disconnect the channel and join every worker
    pub(crate) fn shutdown(&self) {
        let tx = self.tx.lock().take();
        drop(tx);

        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            let _ = handle.join();
        }
    }

    #[cfg(test)]
    pub(crate) fn spawned_count(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }
}

fn worker_loop(rx: Receiver<Job>, idle: Arc<AtomicUsize>) {
    loop {
        idle.fetch_add(1, Ordering::SeqCst);
        let job = rx.recv();
        idle.fetch_sub(1, Ordering::SeqCst);

        match job {
            Ok(job) => {
                if std::panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    trace_event!(Severity::Critical, "[worker]: dispatch job panicked");
                }
            }
            Err(_) => break,
        }
    }
}
