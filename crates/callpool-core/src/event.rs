//! Waitable event with watcher registration
//!
//! The event is the handle the wait manager arms against: a boolean flag
//! that threads can block on and that dispatchers can watch. Manual-reset
//! events stay signaled until `reset`; auto-reset events hand the signal
//! to exactly one consumer.
//!
//! Watchers are one-shot: a registered watcher fires at most once, on the
//! `set` that consumes it (or immediately if the event is already
//! signaled), and is then forgotten.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Watcher callback invoked when the event is signaled
pub type WatchFn = Arc<dyn Fn() + Send + Sync>;

/// Token identifying a registered watcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchToken(u64);

struct EventState {
    signaled: bool,
    manual: bool,
    next_watch: u64,
    watchers: Vec<(u64, WatchFn)>,
}

/// A waitable signal, shaped like a Win32 event object.
pub struct Event {
    state: Mutex<EventState>,
    cond: Condvar,
}

impl Event {
    fn new(manual: bool) -> Self {
        Self {
            state: Mutex::new(EventState {
                signaled: false,
                manual,
                next_watch: 1,
                watchers: Vec::new(),
            }),
            cond: Condvar::new(),
        }
    }

    /// Create a manual-reset event (stays signaled until `reset`)
    pub fn manual() -> Self {
        Self::new(true)
    }

    /// Create an auto-reset event (one consumer per signal)
    pub fn auto() -> Self {
        Self::new(false)
    }

    /// Signal the event.
    ///
    /// Manual-reset: wakes every waiter and fires every watcher.
    /// Auto-reset: hands the signal to one watcher if any is registered,
    /// otherwise to one waiter; the signal is consumed either way.
    pub fn set(&self) {
        let to_fire: Vec<WatchFn> = {
            let mut st = self.state.lock();
            if st.manual {
                st.signaled = true;
                self.cond.notify_all();
                st.watchers.drain(..).map(|(_, f)| f).collect()
            } else if !st.watchers.is_empty() {
                let (_, f) = st.watchers.remove(0);
                vec![f]
            } else {
                st.signaled = true;
                self.cond.notify_one();
                Vec::new()
            }
        };

        // Watchers run outside the lock so they may re-enter the event.
        for f in to_fire {
            f();
        }
    }

    /// Clear the signal
    pub fn reset(&self) {
        self.state.lock().signaled = false;
    }

    /// Whether the event is currently signaled
    pub fn is_set(&self) -> bool {
        self.state.lock().signaled
    }

    /// Block until the event is signaled
    pub fn wait(&self) {
        let mut st = self.state.lock();
        loop {
            if st.signaled {
                if !st.manual {
                    st.signaled = false;
                }
                return;
            }
            self.cond.wait(&mut st);
        }
    }

    /// Block until the event is signaled or the timeout elapses.
    ///
    /// Returns `true` if the event was signaled. An effectively-infinite
    /// timeout degenerates to `wait`.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            self.wait();
            return true;
        };
        let mut st = self.state.lock();
        loop {
            if st.signaled {
                if !st.manual {
                    st.signaled = false;
                }
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            if self.cond.wait_until(&mut st, deadline).timed_out() {
                if st.signaled {
                    if !st.manual {
                        st.signaled = false;
                    }
                    return true;
                }
                return false;
            }
        }
    }

    /// Register a one-shot watcher.
    ///
    /// If the event is already signaled the watcher fires immediately on
    /// the calling thread (consuming the signal for auto-reset events)
    /// and the returned token is already spent.
    pub fn watch(&self, f: WatchFn) -> WatchToken {
        let (token, fire_now) = {
            let mut st = self.state.lock();
            let token = WatchToken(st.next_watch);
            st.next_watch += 1;
            if st.signaled {
                if !st.manual {
                    st.signaled = false;
                }
                (token, true)
            } else {
                st.watchers.push((token.0, f.clone()));
                (token, false)
            }
        };
        if fire_now {
            f();
        }
        token
    }

    /// Remove a registered watcher.
    ///
    /// Returns `false` if the watcher already fired or was removed.
    pub fn unwatch(&self, token: WatchToken) -> bool {
        let mut st = self.state.lock();
        let before = st.watchers.len();
        st.watchers.retain(|(id, _)| *id != token.0);
        st.watchers.len() != before
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.state.lock();
        f.debug_struct("Event")
            .field("signaled", &st.signaled)
            .field("manual", &st.manual)
            .field("watchers", &st.watchers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_manual_reset_stays_signaled() {
        let event = Event::manual();
        event.set();
        assert!(event.is_set());
        assert!(event.wait_timeout(Duration::from_millis(1)));
        // Still signaled after a wait
        assert!(event.wait_timeout(Duration::from_millis(1)));
        event.reset();
        assert!(!event.is_set());
    }

    #[test]
    fn test_auto_reset_consumed_by_wait() {
        let event = Event::auto();
        event.set();
        assert!(event.wait_timeout(Duration::from_millis(1)));
        assert!(!event.wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn test_wait_timeout_expires() {
        let event = Event::manual();
        let start = Instant::now();
        assert!(!event.wait_timeout(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_cross_thread_wakeup() {
        let event = Arc::new(Event::manual());
        let setter = event.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            setter.set();
        });
        assert!(event.wait_timeout(Duration::from_secs(5)));
        handle.join().unwrap();
    }

    #[test]
    fn test_watcher_fires_on_set() {
        let event = Event::manual();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        event.watch(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        event.set();
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // One-shot: a second set does not re-fire
        event.reset();
        event.set();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_watcher_fires_immediately_when_signaled() {
        let event = Event::manual();
        event.set();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let token = event.watch(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        // Token is already spent
        assert!(!event.unwatch(token));
    }

    #[test]
    fn test_unwatch_prevents_fire() {
        let event = Event::manual();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let token = event.watch(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(event.unwatch(token));
        event.set();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_auto_reset_watcher_consumes_signal() {
        let event = Event::auto();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        event.watch(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        event.set();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        // Watcher consumed the signal; a waiter would now block
        assert!(!event.wait_timeout(Duration::from_millis(1)));
    }
}
