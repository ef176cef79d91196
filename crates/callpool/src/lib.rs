//! # callpool - callback-dispatch thread pool
//!
//! An embeddable library for offloading closures onto pool-owned worker
//! threads. Callbacks bind to one of four trigger kinds:
//!
//! - **Work** - run as soon as a worker is free
//! - **Wait** - run when an [`Event`] handle signals (or a timeout expires)
//! - **Timer** - run after a delay, optionally repeating with a period
//! - **Io** - run when an I/O completion is posted to a [`CompletionPort`]
//!
//! ## Quick start
//!
//! ```ignore
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use std::time::Duration;
//! use callpool::Pool;
//!
//! let pool = Pool::system()?;
//!
//! let counter = Arc::new(AtomicUsize::new(0));
//! for _ in 0..10 {
//!     let counter = counter.clone();
//!     pool.submit_work(move || {
//!         counter.fetch_add(1, Ordering::SeqCst);
//!     })?;
//! }
//! assert!(pool.wait_works());
//!
//! let timer = pool.submit_periodic_timer(
//!     Duration::from_millis(5),
//!     Duration::from_millis(5),
//!     || println!("tick"),
//! )?;
//! pool.cancel_timer(timer)?;
//! # Ok::<(), callpool::PoolError>(())
//! ```
//!
//! ## Guarantees
//!
//! - A callback is invoked at most once per arm (replace counts as a
//!   new arm).
//! - After any `cancel_*` returns, no further invocation of that
//!   object's callback begins; in-flight invocations have completed.
//! - Dropping the pool cancels everything, waits for in-flight
//!   callbacks, and joins the worker threads.
//! - Panics in user callbacks are caught and logged; the pool keeps
//!   running.
//!
//! Within one wait/timer/io object, invocations are serialized. Across
//! objects they are unordered, and work-queue order is unspecified.
//!
//! ## Logging
//!
//! Internal events go to a process-wide sink installed with
//! [`set_log_sink`]; by default nothing is reported.

mod callback;
mod io;
mod pool;
mod registry;
mod timer;
mod wait;
mod work;

pub use io::IoId;
pub use pool::{CancelProbe, Pool, PoolBuilder};
pub use timer::TimerId;
pub use wait::WaitId;

// Re-exported collaborator types used in the public API
pub use callpool_core::error::{PoolError, PoolResult};
pub use callpool_core::event::Event;
pub use callpool_core::logging::{set_log_sink, LogSink, Severity};
pub use callpool_engine::{
    CompletionPort, EngineConfig, IoCompletion, OverlappedFile, WaitOutcome,
};
