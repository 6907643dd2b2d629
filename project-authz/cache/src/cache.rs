use crate::{
    metrics::CacheMetrics,
    subjects::Subjects,
    sync::SyncState,
    watch::{CacheWatcher, ProjectWatch, ProjectWatchStream, WatchConfig, WatchableCache, WatcherId},
};
use ahash::AHashSet as HashSet;
use parking_lot::{Mutex, RwLock};
use project_authz_core::{
    Namespace, NamespaceLister, PermissionLister, Reviewer, Scope, UserInfo,
};
use std::sync::Arc;
use tokio::{sync::watch, time};
use tracing::{info_span, Instrument};

/// Indexes the namespaces each user and group may access.
///
/// The index is updated by [`AuthorizationCache::synchronize`], which must be driven by a single
/// task (see [`AuthorizationCache::run`]). Lookups may proceed concurrently with synchronization.
pub struct AuthorizationCache {
    pub(crate) namespaces: Arc<dyn NamespaceLister>,
    pub(crate) permissions: Vec<Arc<dyn PermissionLister>>,
    pub(crate) reviewer: Arc<dyn Reviewer>,

    /// The live subject indexes, read by `list`.
    pub(crate) subjects: RwLock<Subjects>,

    /// Review records and the last observed cluster-wide permissions. Held for the duration of a
    /// synchronization pass, so that passes are serialized.
    pub(crate) state: Mutex<SyncState>,

    watchers: Mutex<Vec<Arc<dyn CacheWatcher>>>,
    watch_queue_capacity: usize,

    /// Set once the first synchronization pass completes.
    ready: watch::Sender<bool>,

    pub(crate) metrics: CacheMetrics,
}

// === impl AuthorizationCache ===

impl AuthorizationCache {
    pub fn new(
        namespaces: Arc<dyn NamespaceLister>,
        permissions: impl IntoIterator<Item = Arc<dyn PermissionLister>>,
        reviewer: Arc<dyn Reviewer>,
        metrics: CacheMetrics,
    ) -> Self {
        Self {
            namespaces,
            permissions: permissions.into_iter().collect(),
            reviewer,
            subjects: RwLock::new(Subjects::default()),
            state: Mutex::new(SyncState::default()),
            watchers: Mutex::new(Vec::new()),
            watch_queue_capacity: WatchConfig::DEFAULT_QUEUE_CAPACITY,
            ready: watch::channel(false).0,
            metrics,
        }
    }

    pub fn with_watch_queue_capacity(mut self, capacity: usize) -> Self {
        self.watch_queue_capacity = capacity;
        self
    }

    /// Synchronizes the cache every `period` until the task is dropped.
    pub async fn run(cache: Arc<Self>, period: time::Duration) {
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;

            // Reviews may be expensive, so the pass runs off of the async workers. The pass is
            // awaited before the next tick so that only one is ever in flight.
            let cache = cache.clone();
            if let Err(error) = tokio::task::spawn_blocking(move || cache.synchronize()).await {
                tracing::error!(%error, "Synchronization failed");
            }
        }
    }

    /// Indicates whether a synchronization pass has completed, so that `list` and `watch` reflect
    /// the mirrors rather than an empty index.
    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Waits until the first synchronization pass completes.
    pub async fn ready(&self) {
        let mut rx = self.ready.subscribe();
        // The sender is owned by the cache, so the channel cannot close while it is borrowed.
        let _ = rx.wait_for(|ready| *ready).await;
    }

    pub(crate) fn mark_ready(&self) {
        if self.ready.send_if_modified(|ready| !std::mem::replace(ready, true)) {
            tracing::info!("Authorization cache is ready");
        }
    }

    /// Lists the namespaces that `user` may access, either directly or through one of its groups.
    ///
    /// Namespaces that have been deleted since the last synchronization are omitted.
    pub fn list(&self, user: &UserInfo) -> Vec<Namespace> {
        let names = {
            let subjects = self.subjects.read();
            subjects
                .users
                .namespaces(&user.name)
                .chain(user.groups.iter().flat_map(|g| subjects.groups.namespaces(g)))
                .cloned()
                .collect::<HashSet<_>>()
        };
        names
            .iter()
            .filter_map(|name| self.namespaces.namespace(name))
            .collect()
    }

    pub fn add_watcher(&self, watcher: Arc<dyn CacheWatcher>) {
        let mut watchers = self.watchers.lock();
        watchers.push(watcher);
        self.metrics.set_watchers(watchers.len());
    }

    /// Starts watching the projects visible to `user`.
    ///
    /// The returned stream must be polled for the watch to make progress; it ends when the watch
    /// is stopped or fails. Must be called from within a Tokio runtime.
    pub fn watch(
        self: &Arc<Self>,
        user: UserInfo,
        scope: Scope,
        include_existing: bool,
    ) -> ProjectWatchStream {
        let span = info_span!("watch", user = %user.name);
        let cache: Arc<dyn WatchableCache> = self.clone();
        let (watch, stream) = ProjectWatch::new(
            user,
            scope,
            include_existing,
            cache,
            self.namespaces.clone(),
            WatchConfig {
                queue_capacity: self.watch_queue_capacity,
                metrics: self.metrics.watch(),
            },
        );
        self.add_watcher(watch.watcher());
        tokio::spawn(watch.run().instrument(span));
        stream
    }

    /// Notifies all watchers of the users and groups that may now access `namespace`.
    ///
    /// Watchers are invoked without holding the lock, so they may remove themselves.
    pub(crate) fn notify(
        &self,
        namespace: &str,
        users: &HashSet<String>,
        groups: &HashSet<String>,
    ) {
        let watchers = self.watchers.lock().clone();
        for watcher in &watchers {
            watcher.group_membership_changed(namespace, users, groups);
        }
    }

    #[cfg(test)]
    pub(crate) fn watcher_count(&self) -> usize {
        self.watchers.lock().len()
    }
}

impl WatchableCache for AuthorizationCache {
    fn list(&self, user: &UserInfo) -> Vec<Namespace> {
        AuthorizationCache::list(self, user)
    }

    fn remove_watcher(&self, id: WatcherId) {
        let mut watchers = self.watchers.lock();
        watchers.retain(|w| w.id() != id);
        self.metrics.set_watchers(watchers.len());
    }
}

impl std::fmt::Debug for AuthorizationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationCache")
            .field("subjects", &self.subjects)
            .field("watchers", &self.watchers.lock().len())
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}
