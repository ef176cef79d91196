//! # callpool-core
//!
//! Core types and utilities for the callpool callback-dispatch thread pool.
//!
//! This crate is platform-agnostic and contains no engine-specific code.
//! The worker engine lives in `callpool-engine`, the dispatcher core and
//! public API in `callpool`.
//!
//! ## Modules
//!
//! - `error` - Error type shared by every crate in the workspace
//! - `event` - Manual/auto-reset event with watchers
//! - `gate` - Removal gate guarding registry self-erasure
//! - `logging` - Severity levels and the swappable message sink
//! - `env` - Environment variable utilities

pub mod env;
pub mod error;
pub mod event;
pub mod gate;
pub mod logging;

// Re-exports for convenience
pub use error::{PoolError, PoolResult};
pub use event::{Event, WatchToken};
pub use gate::{RemovalBan, RemovalGate};
pub use logging::{set_log_sink, LogSink, Severity};

pub use env::env_get;
