//! Engine configuration
//!
//! Thread-count normalization follows the pool contract: a zero or
//! inconsistent maximum falls back to a hardware-derived heuristic, and
//! the minimum is never below one.
//!
//! # Environment overrides
//!
//! - `CALLPOOL_MIN_THREADS` - minimum worker threads
//! - `CALLPOOL_MAX_THREADS` - maximum worker threads

use callpool_core::env::env_get;
use callpool_core::error::{PoolError, PoolResult};

/// Hard cap protecting against absurd configurations
const MAX_SUPPORTED_THREADS: usize = 1024;

/// Worker-engine configuration.
///
/// Values are normalized at construction; `validate` only guards the
/// hard limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Minimum number of worker threads (spawned eagerly)
    pub min_threads: usize,
    /// Maximum number of worker threads (grown lazily)
    pub max_threads: usize,
}

impl EngineConfig {
    /// Configuration for the system-default flavor: thread counts are
    /// left unspecified and resolve to the hardware heuristic.
    pub fn system() -> Self {
        Self::custom(0, 0)
    }

    /// Configuration with explicit thread counts.
    ///
    /// If `min_threads` is 0 the minimum becomes 1. If `max_threads` is 0
    /// or less than the minimum, the maximum becomes the hardware
    /// heuristic, clamped to at least the minimum.
    pub fn custom(min_threads: usize, max_threads: usize) -> Self {
        let min = min_threads.max(1);
        let max = if max_threads == 0 || max_threads < min {
            hardware_threads()
        } else {
            max_threads
        };
        let max = max.max(min);
        Self {
            min_threads: min,
            max_threads: max,
        }
    }

    /// Configuration from environment variables, normalized as `custom`.
    pub fn from_env() -> Self {
        Self::custom(
            env_get("CALLPOOL_MIN_THREADS", 0usize),
            env_get("CALLPOOL_MAX_THREADS", 0usize),
        )
    }

    /// Validate hard limits.
    pub fn validate(&self) -> PoolResult<()> {
        if self.min_threads == 0 || self.max_threads < self.min_threads {
            return Err(PoolError::InvalidArgument);
        }
        if self.max_threads > MAX_SUPPORTED_THREADS {
            return Err(PoolError::InvalidArgument);
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::system()
    }
}

/// Number of threads to use as the default maximum.
///
/// Small machines get more headroom relative to their core count.
pub fn hardware_threads() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    if cores < 8 {
        cores * 4
    } else {
        cores * 2
    }
}
