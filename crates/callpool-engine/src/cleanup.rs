//! Cleanup group
//!
//! Teardown barrier for trigger handles. Every trigger enrolls itself at
//! creation; draining the group shuts down every member still alive
//! (disarm, join, close) exactly once. Dead weak references are pruned
//! opportunistically as the group grows.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;

use parking_lot::Mutex;

/// Implemented by every trigger's shared state
pub trait GroupMember: Send + Sync {
    /// Disarm, wait for dispatches, close. Must be idempotent.
    fn shutdown_member(&self, cancel_pending: bool);
}

/// Teardown barrier over enrolled trigger handles.
pub struct CleanupGroup {
    members: Mutex<Vec<Weak<dyn GroupMember>>>,
    drained: AtomicBool,
}

impl CleanupGroup {
    pub fn new() -> Self {
        Self {
            members: Mutex::new(Vec::new()),
            drained: AtomicBool::new(false),
        }
    }

    /// Enroll a trigger. Enrollment after drain is accepted but the
    /// member will not be drained again; callers gate submissions
    /// separately.
    pub fn enroll(&self, member: Weak<dyn GroupMember>) {
        let mut members = self.members.lock();
        if members.len() % 64 == 0 {
            members.retain(|w| w.strong_count() > 0);
        }
        members.push(member);
    }

    /// Shut down every enrolled member. Only the first call drains;
    /// later calls are no-ops.
    pub fn drain(&self, cancel_pending: bool) {
        if self.drained.swap(true, Ordering::SeqCst) {
            return;
        }

        let members = std::mem::take(&mut *self.members.lock());
        for weak in members {
            if let Some(member) = weak.upgrade() {
                member.shutdown_member(cancel_pending);
            }
        }
    }

    /// Whether the group was already drained
    pub fn is_drained(&self) -> bool {
        self.drained.load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub(crate) fn enrolled(&self) -> usize {
        self.members.lock().len()
    }
}

impl Default for CleanupGroup {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    struct CountingMember {
        shutdowns: AtomicUsize,
    }

    impl GroupMember for CountingMember {
        fn shutdown_member(&self, _cancel_pending: bool) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_drain_shuts_down_members() {
        let group = CleanupGroup::new();
        let member = Arc::new(CountingMember {
            shutdowns: AtomicUsize::new(0),
        });

        let as_dyn: Arc<dyn GroupMember> = member.clone();
        group.enroll(Arc::downgrade(&as_dyn));

        group.drain(true);
        assert_eq!(member.shutdowns.load(Ordering::SeqCst), 1);
        assert!(group.is_drained());
    }

    #[test]
    fn test_drain_once() {
        let group = CleanupGroup::new();
        let member = Arc::new(CountingMember {
            shutdowns: AtomicUsize::new(0),
        });
        let as_dyn: Arc<dyn GroupMember> = member.clone();
        group.enroll(Arc::downgrade(&as_dyn));

        group.drain(true);
        group.drain(true);
        assert_eq!(member.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dead_members_skipped() {
        let group = CleanupGroup::new();
        {
            let member = Arc::new(CountingMember {
                shutdowns: AtomicUsize::new(0),
            });
            let as_dyn: Arc<dyn GroupMember> = member;
            group.enroll(Arc::downgrade(&as_dyn));
        }
        group.drain(false);
    }

    #[test]
    fn test_enroll_prunes_dead() {
        let group = CleanupGroup::new();
        for _ in 0..65 {
            let member = Arc::new(CountingMember {
                shutdowns: AtomicUsize::new(0),
            });
            let as_dyn: Arc<dyn GroupMember> = member;
            group.enroll(Arc::downgrade(&as_dyn));
        }
        // The prune pass at the 64-entry boundary dropped the dead ones
        assert!(group.enrolled() < 65);
    }
}
