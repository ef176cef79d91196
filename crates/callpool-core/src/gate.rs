//! Removal gate for registry iteration safety
//!
//! While any cancel-all holds the gate, dispatch thunks must not erase
//! their own registry slot; they skip the erase and leave the whole
//! registry to the holder.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Counted flag suppressing self-removal from dispatch thunks.
#[derive(Debug, Default)]
pub struct RemovalGate {
    holds: AtomicUsize,
}

impl RemovalGate {
    pub fn new() -> Self {
        Self {
            holds: AtomicUsize::new(0),
        }
    }

    /// Whether dispatch thunks may currently erase their registry slot
    #[inline]
    pub fn removal_allowed(&self) -> bool {
        self.holds.load(Ordering::Acquire) == 0
    }

    /// Suppress removals until the returned guard is dropped
    pub fn hold(&self) -> RemovalBan<'_> {
        self.holds.fetch_add(1, Ordering::AcqRel);
        RemovalBan { gate: self }
    }
}

/// RAII guard holding the gate closed
pub struct RemovalBan<'a> {
    gate: &'a RemovalGate,
}

impl Drop for RemovalBan<'_> {
    fn drop(&mut self) {
        self.gate.holds.fetch_sub(1, Ordering::AcqRel);
    }
}
