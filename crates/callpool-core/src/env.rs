//! Environment variable utilities
//!
//! Generic `env_get<T>` for parsing environment variables with defaults.

use std::str::FromStr;

/// Get environment variable parsed as type T, or return default
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
