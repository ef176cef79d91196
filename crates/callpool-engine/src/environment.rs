//! Engine environment
//!
//! Owns the worker pool and the shared deadline wheel. Triggers are
//! created against an `Arc<Environment>`; shutdown stops the wheel first
//! and then disconnects and joins the workers, and is idempotent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use callpool_core::error::{PoolError, PoolResult};

use crate::config::EngineConfig;
use crate::wheel::{DeadlineWheel, WheelConfig};
use crate::workers::{Job, WorkerPool};

/// Monotonic clock used for deadline computations
#[inline]
pub fn now_steady() -> Instant {
    Instant::now()
}

/// The worker engine: threads, deadline wheel, configuration.
pub struct Environment {
    config: EngineConfig,
    workers: WorkerPool,
    wheel: DeadlineWheel,
    down: AtomicBool,
}

impl Environment {
    /// Build an environment from a validated configuration
    pub fn new(config: EngineConfig) -> PoolResult<Arc<Self>> {
        config.validate()?;

        let workers = WorkerPool::start(&config)?;
        let wheel = DeadlineWheel::start(WheelConfig::default())?;

        Ok(Arc::new(Self {
            config,
            workers,
            wheel,
            down: AtomicBool::new(false),
        }))
    }

    /// The normalized configuration this environment runs with
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Enqueue a dispatch job on the worker pool
    pub fn submit(&self, job: Job) -> PoolResult<()> {
        if self.down.load(Ordering::Acquire) {
            return Err(PoolError::ResourceExhausted);
        }
        self.workers.submit(job)
    }

    /// Enqueue a long-blocking job, refusing when no worker can be spared
    pub fn try_submit_long(&self, job: Job) -> bool {
        if self.down.load(Ordering::Acquire) {
            return false;
        }
        self.workers.try_submit_long(job)
    }

    pub(crate) fn wheel(&self) -> &DeadlineWheel {
        &self.wheel
    }

    /// Stop the wheel thread and join every worker. Idempotent.
    pub fn shutdown(&self) {
        if self.down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.wheel.shutdown();
        self.workers.shutdown();
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("config", &self.config)
            .field("down", &self.down.load(Ordering::Relaxed))
            .finish()
    }
}
