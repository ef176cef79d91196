//! Severity levels and the process-wide message sink
//!
//! The pool reports internal events through a single swappable sink
//! function. By default no sink is installed and tracing costs one atomic
//! load per call site. Installing a sink is process-wide; the sink itself
//! must be thread-safe.
//!
//! # Usage
//!
//! ```ignore
//! use callpool_core::logging::{set_log_sink, Severity};
//!
//! fn stderr_sink(severity: Severity, message: &str) {
//!     eprintln!("[{:?}] {}", severity, message);
//! }
//!
//! let previous = set_log_sink(Some(stderr_sink));
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};

/// Severity of a traced message
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Routine message
    Normal = 0,
    /// Verbose message
    Extended = 1,
    /// Error message
    Error = 2,
    /// Critical error message
    Critical = 3,
}

/// Sink function type
///
/// Receives the severity and the already-formatted message. Must be
/// callable from any thread.
pub type LogSink = fn(Severity, &str);

// The sink is stored as a usize so it can be exchanged atomically.
// Zero means "no sink installed".
static SINK: AtomicUsize = AtomicUsize::new(0);

/// Replaces the installed sink, returning the previous one.
///
/// Passing `None` uninstalls the sink.
pub fn set_log_sink(sink: Option<LogSink>) -> Option<LogSink> {
    let raw = match sink {
        Some(f) => f as usize,
        None => 0,
    };
    decode(SINK.swap(raw, Ordering::AcqRel))
}

/// Whether a sink is currently installed.
///
/// Call sites use this to skip message formatting entirely.
#[inline]
pub fn sink_installed() -> bool {
    SINK.load(Ordering::Acquire) != 0
}

fn decode(raw: usize) -> Option<LogSink> {
    if raw == 0 {
        None
    } else {
        // The only values ever stored are fn pointers produced above.
        Some(unsafe { std::mem::transmute::<usize, LogSink>(raw) })
    }
}

/// Internal: format and forward a message to the installed sink
#[doc(hidden)]
pub fn _emit(severity: Severity, args: std::fmt::Arguments<'_>) {
    if let Some(sink) = decode(SINK.load(Ordering::Acquire)) {
        sink(severity, &args.to_string());
    }
}

/// Trace a message to the installed sink.
///
/// Formatting is skipped when no sink is installed.
#[macro_export]
macro_rules! trace_event {
    ($severity:expr, $($arg:tt)*) => {{
        if $crate::logging::sink_installed() {
            $crate::logging::_emit($severity, format_args!($($arg)*));
        }
    }};
}
