//! Error types for the callpool workspace

use core::fmt;

/// Result type for pool operations
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors surfaced by pool operations.
///
/// Engine error codes are never exposed directly; they are folded into
/// the `Engine` variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// A resource (threads, memory, engine object) could not be acquired
    ResourceExhausted,

    /// A caller-supplied argument is invalid
    InvalidArgument,

    /// The referenced wait/timer/io object does not exist
    NotFound,

    /// The referenced engine object was already closed
    InvalidHandle,

    /// The engine reported a failure
    Engine {
        /// Raw engine error code
        code: i32,
    },
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::ResourceExhausted => write!(f, "resource exhausted"),
            PoolError::InvalidArgument => write!(f, "invalid argument"),
            PoolError::NotFound => write!(f, "object not found"),
            PoolError::InvalidHandle => write!(f, "invalid handle"),
            PoolError::Engine { code } => write!(f, "engine error: {}", code),
        }
    }
}

impl std::error::Error for PoolError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(PoolError::ResourceExhausted.to_string(), "resource exhausted");
        assert_eq!(PoolError::NotFound.to_string(), "object not found");
        assert_eq!(PoolError::Engine { code: 5 }.to_string(), "engine error: 5");
    }

    #[test]
    fn test_equality() {
        assert_eq!(PoolError::NotFound, PoolError::NotFound);
        assert_ne!(PoolError::NotFound, PoolError::InvalidHandle);
        assert_ne!(PoolError::Engine { code: 1 }, PoolError::Engine { code: 2 });
    }

    #[test]
    fn test_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PoolError>();
    }
}
