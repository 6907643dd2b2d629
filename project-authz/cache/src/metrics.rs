use prometheus_client::{
    metrics::{counter::Counter, gauge::Gauge, histogram::Histogram},
    registry::{Registry, Unit},
};
use std::sync::atomic::Ordering;

#[derive(Clone, Debug)]
pub struct CacheMetrics {
    syncs: Counter,
    full_rebuilds: Counter,
    reviews: Counter,
    review_skips: Counter,
    review_errors: Counter,
    evaluation_errors: Counter,
    purged_namespaces: Counter,
    sync_duration: Histogram,

    user_subjects: Gauge,
    group_subjects: Gauge,
    review_records: Gauge,
    watchers: Gauge,

    watch: WatchMetrics,
}

/// Metrics shared by all project watches.
#[derive(Clone, Debug, Default)]
pub struct WatchMetrics {
    queue_high_water_mark: Gauge,
    overflows: Counter,
}

// === impl CacheMetrics ===

impl CacheMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let syncs = Counter::default();
        reg.register(
            "syncs",
            "Total number of completed synchronization passes",
            syncs.clone(),
        );

        let full_rebuilds = Counter::default();
        reg.register(
            "full_rebuilds",
            "Total number of synchronization passes that rebuilt all indexes",
            full_rebuilds.clone(),
        );

        let reviews = Counter::default();
        reg.register(
            "reviews",
            "Total number of namespace reviews performed",
            reviews.clone(),
        );

        let review_skips = Counter::default();
        reg.register(
            "review_skips",
            "Total number of namespace reviews skipped because nothing changed",
            review_skips.clone(),
        );

        let review_errors = Counter::default();
        reg.register(
            "review_errors",
            "Total number of namespace reviews that failed",
            review_errors.clone(),
        );

        let evaluation_errors = Counter::default();
        reg.register(
            "evaluation_errors",
            "Total number of namespace reviews that produced a partial result",
            evaluation_errors.clone(),
        );

        let purged_namespaces = Counter::default();
        reg.register(
            "purged_namespaces",
            "Total number of deleted namespaces removed from the indexes",
            purged_namespaces.clone(),
        );

        let sync_duration = Histogram::new([0.001, 0.01, 0.1, 1.0, 10.0]);
        reg.register_with_unit(
            "sync_duration",
            "Histogram of synchronization pass durations",
            Unit::Seconds,
            sync_duration.clone(),
        );

        let user_subjects = Gauge::default();
        reg.register(
            "user_subjects",
            "The number of users granted access to at least one namespace",
            user_subjects.clone(),
        );

        let group_subjects = Gauge::default();
        reg.register(
            "group_subjects",
            "The number of groups granted access to at least one namespace",
            group_subjects.clone(),
        );

        let review_records = Gauge::default();
        reg.register(
            "review_records",
            "The number of namespaces with a recorded review",
            review_records.clone(),
        );

        let watchers = Gauge::default();
        reg.register(
            "watchers",
            "The number of active project watches",
            watchers.clone(),
        );

        let watch = WatchMetrics::register(reg);

        Self {
            syncs,
            full_rebuilds,
            reviews,
            review_skips,
            review_errors,
            evaluation_errors,
            purged_namespaces,
            sync_duration,
            user_subjects,
            group_subjects,
            review_records,
            watchers,
            watch,
        }
    }

    pub(crate) fn watch(&self) -> WatchMetrics {
        self.watch.clone()
    }

    pub(crate) fn full_rebuild(&self) {
        self.full_rebuilds.inc();
    }

    pub(crate) fn reviewed(&self) {
        self.reviews.inc();
    }

    pub(crate) fn review_skipped(&self) {
        self.review_skips.inc();
    }

    pub(crate) fn review_failed(&self) {
        self.review_errors.inc();
    }

    pub(crate) fn partially_evaluated(&self) {
        self.evaluation_errors.inc();
    }

    pub(crate) fn purged(&self) {
        self.purged_namespaces.inc();
    }

    pub(crate) fn set_watchers(&self, n: usize) {
        self.watchers.set(n as i64);
    }

    pub(crate) fn synced(&self, elapsed: std::time::Duration, sizes: (usize, usize, usize)) {
        let (users, groups, records) = sizes;
        self.syncs.inc();
        self.sync_duration.observe(elapsed.as_secs_f64());
        self.user_subjects.set(users as i64);
        self.group_subjects.set(groups as i64);
        self.review_records.set(records as i64);
    }
}

impl Default for CacheMetrics {
    /// Creates metrics that are not exported.
    fn default() -> Self {
        Self::register(&mut Registry::default())
    }
}

// === impl WatchMetrics ===

impl WatchMetrics {
    fn register(reg: &mut Registry) -> Self {
        let queue_high_water_mark = Gauge::default();
        reg.register(
            "watch_queue_high_water_mark",
            "The largest number of events buffered by any project watch",
            queue_high_water_mark.clone(),
        );

        let overflows = Counter::default();
        reg.register(
            "watch_overflows",
            "Total number of project watches terminated because their queue was full",
            overflows.clone(),
        );

        Self {
            queue_high_water_mark,
            overflows,
        }
    }

    pub(crate) fn observe_queue_depth(&self, depth: usize) {
        self.queue_high_water_mark
            .inner()
            .fetch_max(depth as i64, Ordering::Relaxed);
    }

    pub(crate) fn overflowed(&self) {
        self.overflows.inc();
    }

    pub fn queue_high_water_mark(&self) -> i64 {
        self.queue_high_water_mark.get()
    }
}
