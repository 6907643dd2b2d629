//! Per-client project watches.
//!
//! The cache notifies every registered [`CacheWatcher`] of each namespace's membership, serially,
//! from the synchronizer. A [`ProjectWatch`] filters these notifications for a single user and
//! buffers the resulting events in a bounded queue without ever blocking the synchronizer. A
//! separate task drains that queue into the stream consumed by the client; only that task may
//! block on a slow client.
//!
//! If a client falls so far behind that the queue fills, the watch removes itself from the cache
//! and ends its stream with a single error event.

use crate::metrics::WatchMetrics;
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use futures::prelude::*;
use parking_lot::Mutex;
use project_authz_core::{Namespace, NamespaceLister, ProjectEvent, Scope, UserInfo, WatchError};
use project_authz_k8s_api::{self as k8s, ResourceExt};
use std::{
    pin::Pin,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Weak,
    },
    task::{Context, Poll},
};
use tokio::sync::{
    mpsc::{self, error::TrySendError},
    watch,
};

/// The cache operations available to a watch.
pub trait WatchableCache: Send + Sync {
    fn list(&self, user: &UserInfo) -> Vec<Namespace>;

    fn remove_watcher(&self, id: WatcherId);
}

/// Receives the membership of each namespace as it is synchronized.
pub trait CacheWatcher: Send + Sync {
    fn id(&self) -> WatcherId;

    /// Called with the users and groups that may currently access `namespace`.
    ///
    /// Implementations must not block: all watchers are notified serially by the synchronizer.
    fn group_membership_changed(
        &self,
        namespace: &str,
        users: &HashSet<String>,
        groups: &HashSet<String>,
    );
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct WatcherId(u64);

#[derive(Clone, Debug)]
pub struct WatchConfig {
    /// The number of events that may be buffered before the watch fails.
    pub queue_capacity: usize,
    pub metrics: WatchMetrics,
}

/// Drives a watch, forwarding its events to a [`ProjectWatchStream`].
///
/// The watcher returned by [`ProjectWatch::watcher`] must be registered with the cache for any
/// events beyond the initial snapshot to be observed.
pub struct ProjectWatch {
    session: Arc<Session>,
    initial: Vec<Namespace>,
    queue: mpsc::Receiver<ProjectEvent>,
    errors: mpsc::Receiver<WatchError>,
    results: mpsc::Sender<ProjectEvent>,
    stop: watch::Receiver<bool>,
}

/// The events of a single project watch. Dropping the stream stops the watch.
#[derive(Debug)]
pub struct ProjectWatchStream {
    results: mpsc::Receiver<ProjectEvent>,
    stop: StopHandle,
}

/// Stops a watch. Stopping is idempotent.
#[derive(Clone, Debug)]
pub struct StopHandle(Arc<watch::Sender<bool>>);

/// The watcher state shared with the cache.
struct Session {
    id: WatcherId,
    user: UserInfo,
    scope: Scope,

    /// The resource versions of the projects the user has been told about.
    known: Mutex<HashMap<String, String>>,

    namespaces: Arc<dyn NamespaceLister>,
    cache: Weak<dyn WatchableCache>,
    queue: mpsc::Sender<ProjectEvent>,
    errors: mpsc::Sender<WatchError>,

    /// Set once the watcher has been removed from the cache.
    removed: AtomicBool,

    metrics: WatchMetrics,
}

/// Removes the watcher from the cache however the watch task ends.
struct Deregister(Arc<Session>);

// The client's stream buffers a single event so that the watch task applies backpressure as soon
// as the client stops reading.
const RESULTS_CAPACITY: usize = 1;

// === impl WatcherId ===

impl WatcherId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

// === impl WatchConfig ===

impl WatchConfig {
    pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: Self::DEFAULT_QUEUE_CAPACITY,
            metrics: WatchMetrics::default(),
        }
    }
}

// === impl ProjectWatch ===

impl ProjectWatch {
    /// Creates a watch of the projects visible to `user` within `scope`.
    ///
    /// Projects outside of `scope` are never reported, including in the initial snapshot.
    ///
    /// The projects that are visible when the watch is created are known to the watch, so
    /// subsequent notifications about them only produce events when they change. When
    /// `include_existing` is set, they are also emitted as `Added` events when the watch starts.
    pub fn new(
        user: UserInfo,
        scope: Scope,
        include_existing: bool,
        cache: Arc<dyn WatchableCache>,
        namespaces: Arc<dyn NamespaceLister>,
        config: WatchConfig,
    ) -> (Self, ProjectWatchStream) {
        let mut projects = cache.list(&user);
        projects.retain(|ns| scope.allows(&ns.name_unchecked()));
        let known = projects
            .iter()
            .map(|ns| {
                let version = k8s::resource_version(ns).unwrap_or_default();
                (ns.name_unchecked(), version)
            })
            .collect();
        let initial = if include_existing {
            projects
        } else {
            Vec::new()
        };

        let (queue_tx, queue) = mpsc::channel(config.queue_capacity.max(1));
        let (errors_tx, errors) = mpsc::channel(1);
        let (results, results_rx) = mpsc::channel(RESULTS_CAPACITY);
        let (stop_tx, stop) = watch::channel(false);

        let session = Arc::new(Session {
            id: WatcherId::next(),
            user,
            scope,
            known: Mutex::new(known),
            namespaces,
            cache: Arc::downgrade(&cache),
            queue: queue_tx,
            errors: errors_tx,
            removed: AtomicBool::new(false),
            metrics: config.metrics,
        });

        let watch = Self {
            session,
            initial,
            queue,
            errors,
            results,
            stop,
        };
        let stream = ProjectWatchStream {
            results: results_rx,
            stop: StopHandle(Arc::new(stop_tx)),
        };
        (watch, stream)
    }

    pub fn id(&self) -> WatcherId {
        self.session.id
    }

    pub fn watcher(&self) -> Arc<dyn CacheWatcher> {
        self.session.clone()
    }

    /// Emits the initial snapshot and then forwards queued events until the watch is stopped, it
    /// fails, or the client goes away.
    pub async fn run(self) {
        let Self {
            session,
            initial,
            mut queue,
            mut errors,
            results,
            mut stop,
        } = self;
        let _deregister = Deregister(session);

        for ns in initial {
            // Don't bother emitting the snapshot if the watch has already failed.
            if let Ok(error) = errors.try_recv() {
                deliver(&results, &mut stop, ProjectEvent::Error(error)).await;
                return;
            }
            if !deliver(&results, &mut stop, ProjectEvent::Added(ns)).await {
                return;
            }
        }

        loop {
            tokio::select! {
                biased;

                Some(error) = errors.recv() => {
                    tracing::debug!(%error, "Watch failed");
                    deliver(&results, &mut stop, ProjectEvent::Error(error)).await;
                    return;
                }

                () = stopped(&mut stop) => {
                    tracing::debug!("Watch stopped");
                    return;
                }

                event = queue.recv() => match event {
                    Some(event) => {
                        if !deliver(&results, &mut stop, event).await {
                            return;
                        }
                    }
                    None => return,
                },
            }
        }
    }
}

/// Sends an event to the client, returning false if the watch was stopped or the client is gone.
async fn deliver(
    results: &mpsc::Sender<ProjectEvent>,
    stop: &mut watch::Receiver<bool>,
    event: ProjectEvent,
) -> bool {
    tokio::select! {
        biased;
        () = stopped(stop) => false,
        res = results.send(event) => res.is_ok(),
    }
}

/// Completes once the watch is stopped or its stream is dropped.
async fn stopped(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}

// === impl Session ===

impl Session {
    fn emit(&self, event: ProjectEvent) {
        match self.queue.try_send(event) {
            Ok(()) => {
                let depth = self.queue.max_capacity() - self.queue.capacity();
                self.metrics.observe_queue_depth(depth);
            }
            Err(TrySendError::Full(_)) => self.fail(WatchError::QueueFull),
            // The watch task has ended and deregistered itself.
            Err(TrySendError::Closed(_)) => {}
        }
    }

    fn fail(&self, error: WatchError) {
        if !self.deregister() {
            return;
        }
        tracing::warn!(user = %self.user.name, %error, "Terminating project watch");
        self.metrics.overflowed();
        let _ = self.errors.try_send(error);
    }

    /// Removes the watcher from the cache, returning false if it was already removed.
    fn deregister(&self) -> bool {
        if self.removed.swap(true, Ordering::AcqRel) {
            return false;
        }
        if let Some(cache) = self.cache.upgrade() {
            cache.remove_watcher(self.id);
        }
        true
    }
}

impl CacheWatcher for Session {
    fn id(&self) -> WatcherId {
        self.id
    }

    fn group_membership_changed(
        &self,
        namespace: &str,
        users: &HashSet<String>,
        groups: &HashSet<String>,
    ) {
        if self.removed.load(Ordering::Acquire) || !self.scope.allows(namespace) {
            return;
        }

        let event = {
            let mut known = self.known.lock();
            if self.user.is_granted(users, groups) {
                let Some(ns) = self.namespaces.namespace(namespace) else {
                    tracing::debug!(%namespace, "Namespace no longer exists");
                    return;
                };
                let version = k8s::resource_version(&ns).unwrap_or_default();
                match known.insert(namespace.to_string(), version.clone()) {
                    None => ProjectEvent::Added(ns),
                    Some(prior) if prior != version => ProjectEvent::Modified(ns),
                    Some(_) => return,
                }
            } else if known.remove(namespace).is_some() {
                let ns = self
                    .namespaces
                    .namespace(namespace)
                    .unwrap_or_else(|| k8s::namespace_named(namespace));
                ProjectEvent::Deleted(ns)
            } else {
                return;
            }
        };

        self.emit(event);
    }
}

// === impl Deregister ===

impl Drop for Deregister {
    fn drop(&mut self) {
        self.0.deregister();
    }
}

// === impl ProjectWatchStream ===

impl ProjectWatchStream {
    pub async fn recv(&mut self) -> Option<ProjectEvent> {
        self.results.recv().await
    }

    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }
}

impl Stream for ProjectWatchStream {
    type Item = ProjectEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<ProjectEvent>> {
        self.get_mut().results.poll_recv(cx)
    }
}

impl Drop for ProjectWatchStream {
    fn drop(&mut self) {
        self.stop.stop();
    }
}

// === impl StopHandle ===

impl StopHandle {
    pub fn stop(&self) {
        self.0.send_if_modified(|stopped| !std::mem::replace(stopped, true));
    }
}
