//! Polling change watcher.
//!
//! Namespaces have no native change notification, so every registration
//! gets its own task that reads the watched path's modification time once
//! per poll interval and turns transitions into events:
//!
//! | before  | after   | event      |
//! |---------|---------|------------|
//! | absent  | present | `created`  |
//! | present | absent  | `deleted`  |
//! | present | present (different mtime) | `modified` |
//!
//! A registration that produces events is signalled: its batch is placed
//! in its outbox, it is pushed onto the service's ready queue, and its task
//! stops until [`WatchKey::reset`] is called.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{VfsError, VfsResult};
use crate::namespace::Namespace;
use crate::path::AbsolutePath;

/// Kinds of change a registration can be interested in.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::EnumIter,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum WatchEventKind {
    Created,
    Modified,
    Deleted,
}

/// One observed change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    /// The watched path.
    pub context: AbsolutePath,
    /// Always 1; transitions are never coalesced beyond one per poll.
    pub count: u32,
}

impl WatchEvent {
    fn new(kind: WatchEventKind, context: AbsolutePath) -> Self {
        Self {
            kind,
            context,
            count: 1,
        }
    }
}

/// State shared between a [`WatchService`], its keys and their tasks.
pub(crate) struct WatchShared {
    namespace: Arc<Namespace>,
    poll_interval: Duration,
    live: DashMap<u64, Arc<WatchKey>>,
    ready: Mutex<VecDeque<Arc<WatchKey>>>,
    ready_notify: Notify,
    shutdown: CancellationToken,
    handle: Handle,
    next_id: AtomicU64,
}

impl WatchShared {
    fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Cancel every live registration and stop all tasks.
    pub(crate) fn close(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        for entry in self.live.iter() {
            entry.value().invalidate();
        }
        self.live.clear();
        debug!(namespace = %self.namespace.id(), "watch service closed");
    }

    /// Modification time of `path`, `None` if it cannot be read for any
    /// reason. Fails with `Closed` once the namespace has closed.
    async fn stat(&self, path: &AbsolutePath) -> VfsResult<Option<SystemTime>> {
        match self.namespace.read_attributes(path).await {
            Ok(attr) => Ok(Some(attr.mtime)),
            Err(_) if !self.namespace.is_open() => Err(VfsError::Closed),
            Err(e) => {
                trace!(path = %path, error = %e, "watched path absent");
                Ok(None)
            }
        }
    }
}

fn spawn_worker(shared: &Arc<WatchShared>, key: Arc<WatchKey>) {
    let shared = Arc::clone(shared);
    shared.handle.clone().spawn(run_worker(shared, key));
}

async fn run_worker(shared: Arc<WatchShared>, key: Arc<WatchKey>) {
    trace!(path = %key.path, key = key.id, "watch worker started");
    loop {
        if !key.is_valid() || shared.is_closed() {
            break;
        }

        let Ok(now) = shared.stat(&key.path).await else {
            break;
        };
        let events = key.classify(now);
        if !events.is_empty() {
            if !shared.is_closed() && key.is_valid() {
                key.signal(&shared, events);
            }
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(shared.poll_interval) => {}
            _ = key.wake.notified() => {}
            _ = shared.shutdown.cancelled() => break,
        }
    }
    trace!(path = %key.path, key = key.id, "watch worker stopped");
}

#[derive(Debug)]
struct KeyState {
    last_seen: Option<SystemTime>,
    outbox: Vec<WatchEvent>,
}

/// One watched path.
#[derive(Debug)]
pub struct WatchKey {
    id: u64,
    path: AbsolutePath,
    interest: HashSet<WatchEventKind>,
    service: Weak<WatchShared>,
    state: Mutex<KeyState>,
    signalled: AtomicBool,
    valid: AtomicBool,
    wake: Notify,
}

impl WatchKey {
    pub fn path(&self) -> &AbsolutePath {
        &self.path
    }

    pub fn interest(&self) -> &HashSet<WatchEventKind> {
        &self.interest
    }

    /// False once cancelled or once the service has closed.
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// True between a signal and the next successful [`reset`](Self::reset).
    pub fn is_signalled(&self) -> bool {
        self.signalled.load(Ordering::Acquire)
    }

    /// Take the pending events.
    pub fn poll_events(&self) -> Vec<WatchEvent> {
        std::mem::take(&mut self.state.lock().outbox)
    }

    /// Resume polling after a signal.
    ///
    /// Polling continues from the state observed at signal time. Returns
    /// false if the key is not signalled, has been cancelled, or its service
    /// is gone.
    pub fn reset(self: &Arc<Self>) -> bool {
        if !self.is_valid() {
            return false;
        }
        let Some(shared) = self.service.upgrade() else {
            return false;
        };
        if shared.is_closed() {
            return false;
        }
        if self
            .signalled
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        self.state.lock().outbox.clear();
        shared.live.insert(self.id, Arc::clone(self));
        spawn_worker(&shared, Arc::clone(self));
        trace!(path = %self.path, key = self.id, "watch reset");
        true
    }

    /// Stop watching. The task wakes and exits promptly.
    pub fn cancel(&self) {
        if !self.valid.swap(false, Ordering::AcqRel) {
            return;
        }
        self.wake.notify_one();
        if let Some(shared) = self.service.upgrade() {
            shared.live.remove(&self.id);
        }
        debug!(path = %self.path, key = self.id, "watch cancelled");
    }

    fn invalidate(&self) {
        self.valid.store(false, Ordering::Release);
        self.wake.notify_one();
    }

    /// Compare `now` with the last recorded state and remember `now`.
    fn classify(&self, now: Option<SystemTime>) -> Vec<WatchEvent> {
        let mut state = self.state.lock();
        let then = state.last_seen;
        state.last_seen = now;

        let mut events = Vec::new();
        let mut push = |kind: WatchEventKind| {
            if self.interest.contains(&kind) {
                events.push(WatchEvent::new(kind, self.path.clone()));
            }
        };
        match (then, now) {
            (None, Some(_)) => push(WatchEventKind::Created),
            (Some(_), None) => push(WatchEventKind::Deleted),
            (Some(a), Some(b)) if a != b => push(WatchEventKind::Modified),
            _ => {}
        }
        events
    }

    fn signal(self: &Arc<Self>, shared: &WatchShared, events: Vec<WatchEvent>) {
        debug!(
            path = %self.path,
            key = self.id,
            kinds = ?events.iter().map(|e| e.kind).collect::<Vec<_>>(),
            "watch signalled"
        );
        self.state.lock().outbox = events;
        self.signalled.store(true, Ordering::Release);
        shared.live.remove(&self.id);
        shared.ready.lock().push_back(Arc::clone(self));
        shared.ready_notify.notify_one();
    }
}

/// A polling watch service bound to one namespace.
pub struct WatchService {
    shared: Arc<WatchShared>,
}

impl std::fmt::Debug for WatchService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchService")
            .field("namespace", &self.shared.namespace.id())
            .field("poll_interval", &self.shared.poll_interval)
            .field("live", &self.shared.live.len())
            .field("closed", &self.shared.is_closed())
            .finish()
    }
}

impl WatchService {
    pub(crate) fn new(namespace: Arc<Namespace>, poll_interval: Duration, handle: Handle) -> Self {
        debug!(namespace = %namespace.id(), ?poll_interval, "watch service created");
        Self {
            shared: Arc::new(WatchShared {
                namespace,
                poll_interval,
                live: DashMap::new(),
                ready: Mutex::new(VecDeque::new()),
                ready_notify: Notify::new(),
                shutdown: CancellationToken::new(),
                handle,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<WatchShared> {
        Arc::downgrade(&self.shared)
    }

    pub fn poll_interval(&self) -> Duration {
        self.shared.poll_interval
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Number of registrations currently being polled.
    pub fn live_registrations(&self) -> usize {
        self.shared.live.len()
    }

    /// Watch `path` for the given kinds of change.
    ///
    /// The path's current state is recorded before polling starts, so only
    /// changes after this call produce events.
    pub async fn register(
        &self,
        path: &AbsolutePath,
        interest: &[WatchEventKind],
    ) -> VfsResult<Arc<WatchKey>> {
        if self.is_closed() {
            return Err(VfsError::Closed);
        }
        self.shared.namespace.check_belongs(path)?;

        let baseline = self.shared.stat(path).await?;
        let key = Arc::new(WatchKey {
            id: self.shared.next_id.fetch_add(1, Ordering::Relaxed),
            path: path.clone(),
            interest: interest.iter().copied().collect(),
            service: Arc::downgrade(&self.shared),
            state: Mutex::new(KeyState {
                last_seen: baseline,
                outbox: Vec::new(),
            }),
            signalled: AtomicBool::new(false),
            valid: AtomicBool::new(true),
            wake: Notify::new(),
        });

        self.shared.live.insert(key.id, Arc::clone(&key));
        spawn_worker(&self.shared, Arc::clone(&key));
        debug!(path = %path, ?interest, key = key.id, "watch registered");
        Ok(key)
    }

    /// Next signalled key, if one is ready now. Never waits, even while
    /// another task is blocked in [`take`](Self::take).
    pub fn poll(&self) -> Option<Arc<WatchKey>> {
        if self.is_closed() {
            return None;
        }
        self.shared.ready.lock().pop_front()
    }

    /// Wait up to `timeout` for a signalled key.
    pub async fn poll_timeout(&self, timeout: Duration) -> VfsResult<Option<Arc<WatchKey>>> {
        match tokio::time::timeout(timeout, self.take()).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Wait for a signalled key. Fails with `Closed` once the service closes.
    pub async fn take(&self) -> VfsResult<Arc<WatchKey>> {
        loop {
            if let Some(key) = self.poll() {
                return Ok(key);
            }
            if self.is_closed() {
                return Err(VfsError::Closed);
            }
            tokio::select! {
                biased;
                _ = self.shared.shutdown.cancelled() => return Err(VfsError::Closed),
                _ = self.shared.ready_notify.notified() => {}
            }
        }
    }

    /// Cancel every registration. Pending and future `take` calls fail with
    /// `Closed`.
    pub fn close(&self) {
        self.shared.close();
    }
}

impl Drop for WatchService {
    fn drop(&mut self) {
        self.shared.close();
    }
}
