//! I/O completion plumbing
//!
//! The engine observes I/O through a `CompletionPort`: the caller (or the
//! `OverlappedFile` helper) posts completion packets to the port, and the
//! armed trigger forwards each packet to the dispatch thunk on a worker
//! thread. Packets posted while nothing is armed are held in a backlog
//! and delivered on the next arm; `abort` discards that backlog for the
//! case where the asynchronous operation never started.

use std::collections::VecDeque;
use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use callpool_core::error::{PoolError, PoolResult};
use callpool_core::logging::Severity;
use callpool_core::trace_event;
use parking_lot::Mutex;

use crate::cleanup::GroupMember;
use crate::environment::Environment;
use crate::tracker::{DispatchTracker, EndGuard};

/// A completed (or failed) I/O operation.
///
/// `status` is 0 on success, otherwise an OS error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoCompletion {
    /// Caller-chosen operation tag, carried through unchanged
    pub token: usize,
    /// 0 on success, OS error code otherwise
    pub status: i32,
    /// Bytes transferred by the operation
    pub bytes_transferred: usize,
}

impl IoCompletion {
    /// Whether the operation completed without error
    #[inline]
    pub fn is_success(&self) -> bool {
        self.status == 0
    }
}

type DeliverFn = Arc<dyn Fn(IoCompletion) + Send + Sync>;

struct PortRegistration {
    owner: usize,
    deliver: DeliverFn,
}

#[derive(Default)]
struct PortState {
    armed: Option<PortRegistration>,
    backlog: VecDeque<IoCompletion>,
}

/// Destination for completion packets.
///
/// Cloning shares the port. At most one trigger may be armed against a
/// port at a time.
#[derive(Clone)]
pub struct CompletionPort {
    inner: Arc<Mutex<PortState>>,
}

impl CompletionPort {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(PortState::default())),
        }
    }

    /// Post a completion packet.
    ///
    /// Delivered to the armed trigger, or held in the backlog until one
    /// arms.
    pub fn post(&self, completion: IoCompletion) {
        let deliver = {
            let mut state = self.inner.lock();
            match state.armed.as_ref() {
                Some(registration) => Some(registration.deliver.clone()),
                None => {
                    state.backlog.push_back(completion);
                    None
                }
            }
        };
        if let Some(deliver) = deliver {
            deliver(completion);
        }
    }

    fn register(&self, owner: usize, deliver: DeliverFn) -> PoolResult<Vec<IoCompletion>> {
        let mut state = self.inner.lock();
        if state.armed.is_some() {
            return Err(PoolError::InvalidArgument);
        }
        state.armed = Some(PortRegistration { owner, deliver });
        Ok(state.backlog.drain(..).collect())
    }

    fn unregister(&self, owner: usize) {
        let mut state = self.inner.lock();
        if state.armed.as_ref().is_some_and(|r| r.owner == owner) {
            state.armed = None;
        }
    }

    fn discard_backlog(&self) -> usize {
        let mut state = self.inner.lock();
        let discarded = state.backlog.len();
        state.backlog.clear();
        discarded
    }
}

impl Default for CompletionPort {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CompletionPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("CompletionPort")
            .field("armed", &state.armed.is_some())
            .field("backlog", &state.backlog.len())
            .finish()
    }
}

/// Thunk run once per delivered completion
pub type IoThunk = Arc<dyn Fn(IoCompletion) + Send + Sync>;

/// Handle to an armable I/O dispatcher.
#[derive(Clone)]
pub struct IoTrigger {
    inner: Arc<IoTriggerInner>,
}

struct IoTriggerInner {
    env: Arc<Environment>,
    port: CompletionPort,
    thunk: IoThunk,
    tracker: Arc<DispatchTracker>,
    gen: AtomicU64,
    closed: AtomicBool,
}

impl IoTrigger {
    pub fn new(env: &Arc<Environment>, port: &CompletionPort, thunk: IoThunk) -> Self {
        Self {
            inner: Arc::new(IoTriggerInner {
                env: env.clone(),
                port: port.clone(),
                thunk,
                tracker: DispatchTracker::new(),
                gen: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Register against the port; backlogged packets are delivered now
    pub fn arm(&self) -> PoolResult<()> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::Acquire) {
            return Err(PoolError::InvalidHandle);
        }

        let gen = inner.gen.load(Ordering::Acquire);
        let weak = Arc::downgrade(inner);
        let deliver: DeliverFn = Arc::new(move |completion| {
            if let Some(inner) = weak.upgrade() {
                IoTriggerInner::schedule(&inner, gen, completion);
            }
        });

        let backlog = inner.port.register(IoTriggerInner::owner_key(inner), deliver.clone())?;
        for completion in backlog {
            deliver(completion);
        }
        Ok(())
    }

    /// Unregister from the port; scheduled dispatches become no-ops
    pub fn disarm(&self) {
        IoTriggerInner::disarm_inner(&self.inner);
    }

    /// Discard packets and expectations for an operation that never
    /// started, then unregister
    pub fn abort(&self) {
        let discarded = self.inner.port.discard_backlog();
        if discarded > 0 {
            trace_event!(
                Severity::Extended,
                "[IoTrigger::abort]: {} pending completions discarded",
                discarded
            );
        }
        IoTriggerInner::disarm_inner(&self.inner);
    }

    /// Wait for dispatches; with `cancel_pending`, drop unstarted ones first
    pub fn wait_callbacks(&self, cancel_pending: bool) {
        self.inner.wait_callbacks(cancel_pending);
    }

    /// Disarm and mark closed without joining.
    ///
    /// Safe to call from inside the dispatch thunk.
    pub fn close(&self) {
        IoTriggerInner::disarm_inner(&self.inner);
        self.inner.closed.store(true, Ordering::Release);
    }

    /// Disarm, join, close
    pub fn shutdown(&self, cancel_pending: bool) {
        self.inner.shutdown_member(cancel_pending);
    }

    /// Weak reference for cleanup-group enrollment
    pub fn member(&self) -> Weak<dyn GroupMember> {
        let as_dyn: Arc<dyn GroupMember> = self.inner.clone();
        Arc::downgrade(&as_dyn)
    }
}

impl IoTriggerInner {
    fn owner_key(inner: &Arc<Self>) -> usize {
        Arc::as_ptr(inner) as usize
    }

    fn disarm_inner(inner: &Arc<Self>) {
        inner.gen.fetch_add(1, Ordering::AcqRel);
        inner.port.unregister(Self::owner_key(inner));
    }

    fn wait_callbacks(&self, cancel_pending: bool) {
        if cancel_pending {
            self.gen.fetch_add(1, Ordering::AcqRel);
        }
        self.tracker.wait_idle();
    }

    fn schedule(inner: &Arc<Self>, gen: u64, completion: IoCompletion) {
        inner.tracker.begin();
        let guard = EndGuard::new(&inner.tracker);

        let job_inner = inner.clone();
        let _ = inner.env.submit(Box::new(move || {
            let _guard = guard;
            if job_inner.gen.load(Ordering::Acquire) == gen
                && !job_inner.closed.load(Ordering::Acquire)
            {
                (job_inner.thunk)(completion);
            }
        }));
    }
}

impl GroupMember for IoTriggerInner {
    fn shutdown_member(&self, cancel_pending: bool) {
        // Same teardown as IoTrigger::shutdown, reachable from a Weak
        self.gen.fetch_add(1, Ordering::AcqRel);
        self.port.unregister(self as *const Self as usize);
        self.wait_callbacks(cancel_pending);
        self.closed.store(true, Ordering::Release);
    }
}

/// File wrapper whose writes complete through a port.
///
/// `write_at` starts the write on a background thread and posts one
/// completion packet when it finishes. A call that returns an error
/// posted nothing and never will; the owning pool object must then be
/// aborted rather than cancelled.
pub struct OverlappedFile {
    file: Arc<File>,
    port: CompletionPort,
}

impl OverlappedFile {
    /// Create (truncating) a file bound to `port`
    pub fn create<P: AsRef<Path>>(path: P, port: &CompletionPort) -> PoolResult<Self> {
        let file = File::create(path).map_err(io_error)?;
        Ok(Self {
            file: Arc::new(file),
            port: port.clone(),
        })
    }

    /// Open an existing file bound to `port`
    pub fn open<P: AsRef<Path>>(path: P, port: &CompletionPort) -> PoolResult<Self> {
        let file = File::open(path).map_err(io_error)?;
        Ok(Self {
            file: Arc::new(file),
            port: port.clone(),
        })
    }

    /// Start an asynchronous write of `data` at `offset`.
    ///
    /// On success the eventual completion packet carries `token`, a zero
    /// status and `data.len()` bytes transferred; a failed write posts
    /// the OS error code instead.
    pub fn write_at(&self, data: Vec<u8>, offset: u64, token: usize) -> PoolResult<()> {
        if data.is_empty() {
            return Err(PoolError::InvalidArgument);
        }

        let file = self.file.clone();
        let port = self.port.clone();
        std::thread::Builder::new()
            .name("callpool-io".into())
            .spawn(move || {
                let completion = match write_all_at(&file, &data, offset) {
                    Ok(()) => IoCompletion {
                        token,
                        status: 0,
                        bytes_transferred: data.len(),
                    },
                    Err(err) => IoCompletion {
                        token,
                        status: err.raw_os_error().unwrap_or(-1),
                        bytes_transferred: 0,
                    },
                };
                port.post(completion);
            })
            .map_err(|_| PoolError::ResourceExhausted)?;

        Ok(())
    }
}

#[cfg(unix)]
fn write_all_at(file: &File, data: &[u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(data, offset)
}

#[cfg(windows)]
fn write_all_at(file: &File, data: &[u8], offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    let mut written = 0;
    while written < data.len() {
        let n = file.seek_write(&data[written..], offset + written as u64)?;
        written += n;
    }
    Ok(())
}

fn io_error(err: std::io::Error) -> PoolError {
    PoolError::Engine {
        code: err.raw_os_error().unwrap_or(-1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use parking_lot::Mutex as PlMutex;
    use std::time::{Duration, Instant};

    fn test_env() -> Arc<Environment> {
        Environment::new(EngineConfig::custom(2, 4)).unwrap()
    }

    fn recording_trigger(
        env: &Arc<Environment>,
        port: &CompletionPort,
    ) -> (IoTrigger, Arc<PlMutex<Vec<IoCompletion>>>) {
        let seen = Arc::new(PlMutex::new(Vec::new()));
        let sink = seen.clone();
        let trigger = IoTrigger::new(
            env,
            port,
            Arc::new(move |completion| {
                sink.lock().push(completion);
            }),
        );
        (trigger, seen)
    }

    fn wait_for<F: Fn() -> bool>(cond: F) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_post_reaches_armed_trigger() {
        let env = test_env();
        let port = CompletionPort::new();
        let (trigger, seen) = recording_trigger(&env, &port);

        trigger.arm().unwrap();
        port.post(IoCompletion {
            token: 7,
            status: 0,
            bytes_transferred: 128,
        });

        wait_for(|| !seen.lock().is_empty());
        trigger.wait_callbacks(false);

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].token, 7);
        assert!(seen[0].is_success());
        assert_eq!(seen[0].bytes_transferred, 128);
    }

    #[test]
    fn test_backlog_delivered_on_arm() {
        let env = test_env();
        let port = CompletionPort::new();
        port.post(IoCompletion {
            token: 1,
            status: 0,
            bytes_transferred: 4,
        });

        let (trigger, seen) = recording_trigger(&env, &port);
        trigger.arm().unwrap();

        wait_for(|| !seen.lock().is_empty());
        trigger.wait_callbacks(false);
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_double_arm_rejected() {
        let env = test_env();
        let port = CompletionPort::new();
        let (first, _) = recording_trigger(&env, &port);
        let (second, _) = recording_trigger(&env, &port);

        first.arm().unwrap();
        assert_eq!(second.arm(), Err(PoolError::InvalidArgument));
        first.shutdown(true);
    }

    #[test]
    fn test_abort_discards_backlog() {
        let env = test_env();
        let port = CompletionPort::new();
        port.post(IoCompletion {
            token: 9,
            status: 0,
            bytes_transferred: 1,
        });

        let (trigger, seen) = recording_trigger(&env, &port);
        trigger.abort();
        trigger.shutdown(true);

        // Arm a fresh trigger: the discarded packet must not reappear
        let (fresh, fresh_seen) = recording_trigger(&env, &port);
        fresh.arm().unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert!(seen.lock().is_empty());
        assert!(fresh_seen.lock().is_empty());
    }

    #[test]
    fn test_overlapped_file_write_completes() {
        let env = test_env();
        let port = CompletionPort::new();
        let (trigger, seen) = recording_trigger(&env, &port);
        trigger.arm().unwrap();

        let dir = std::env::temp_dir();
        let path = dir.join(format!("callpool-io-test-{}", std::process::id()));
        let file = OverlappedFile::create(&path, &port).unwrap();

        let payload = vec![0xabu8; 4096];
        file.write_at(payload.clone(), 0, 42).unwrap();

        wait_for(|| !seen.lock().is_empty());
        trigger.wait_callbacks(false);

        {
            let seen = seen.lock();
            assert_eq!(seen.len(), 1);
            assert_eq!(seen[0].token, 42);
            assert!(seen[0].is_success());
            assert_eq!(seen[0].bytes_transferred, payload.len());
        }

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_empty_write_fails_synchronously() {
        let port = CompletionPort::new();
        let dir = std::env::temp_dir();
        let path = dir.join(format!("callpool-io-empty-{}", std::process::id()));
        let file = OverlappedFile::create(&path, &port).unwrap();

        assert_eq!(
            file.write_at(Vec::new(), 0, 1),
            Err(PoolError::InvalidArgument)
        );

        let _ = std::fs::remove_file(&path);
    }
}
