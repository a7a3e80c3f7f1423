//! Prometheus-compatible reconcile metrics.
//!
//! Counters are updated lock-free by workers and rendered in Prometheus text
//! exposition format on demand.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

/// Prometheus metric type of a [`Sample`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    /// Monotonic count since start.
    Counter,
    /// Point-in-time level.
    Gauge,
}

impl SampleKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
        }
    }
}

/// One exported value. Every sample is labelled with the source shard when rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    /// Metric name, e.g. `shardcache_repl_creates_total`.
    pub name: &'static str,
    /// `# HELP` text.
    pub help: &'static str,
    /// Counter or gauge.
    pub kind: SampleKind,
    /// Current value.
    pub value: u64,
}

impl Sample {
    /// A counter sample.
    pub fn counter(name: &'static str, help: &'static str, value: u64) -> Self {
        Self {
            name,
            help,
            kind: SampleKind::Counter,
            value,
        }
    }

    /// A gauge sample.
    pub fn gauge(name: &'static str, help: &'static str, value: u64) -> Self {
        Self {
            name,
            help,
            kind: SampleKind::Gauge,
            value,
        }
    }
}

/// Render samples in Prometheus text exposition format under a `shard` label.
pub fn render(shard: &str, samples: &[Sample]) -> String {
    let shard = shard.replace('\\', "\\\\").replace('"', "\\\"");
    let mut out = String::new();
    for sample in samples {
        // Writing into a String cannot fail.
        let _ = writeln!(out, "# HELP {} {}", sample.name, sample.help);
        let _ = writeln!(out, "# TYPE {} {}", sample.name, sample.kind.as_str());
        let _ = writeln!(out, "{}{{shard=\"{}\"}} {}", sample.name, shard, sample.value);
    }
    out
}

/// Point-in-time copy of [`ReconcileMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Reconcile invocations started.
    pub reconciles: u64,
    /// Replicas created.
    pub creates: u64,
    /// Replicas overwritten.
    pub updates: u64,
    /// Replicas deleted.
    pub deletes: u64,
    /// Invocations that found nothing to do.
    pub noops: u64,
    /// Optimistic concurrency conflicts and create races observed.
    pub conflicts: u64,
    /// Invocations that ended in an error.
    pub failures: u64,
    /// Identities re-queued with backoff.
    pub requeues: u64,
    /// Drift corrector passes completed.
    pub resyncs: u64,
    /// Cache objects left alone because they lack the provenance annotation.
    pub skipped_unmanaged: u64,
    /// Source watches re-established after their stream ended.
    pub watch_restarts: u64,
}

impl MetricsSnapshot {
    /// Total write calls issued against the cache store.
    pub fn writes(&self) -> u64 {
        self.creates + self.updates + self.deletes
    }
}

/// Shared reconcile counters.
#[derive(Debug, Default)]
pub struct ReconcileMetrics {
    reconciles: AtomicU64,
    creates: AtomicU64,
    updates: AtomicU64,
    deletes: AtomicU64,
    noops: AtomicU64,
    conflicts: AtomicU64,
    failures: AtomicU64,
    requeues: AtomicU64,
    resyncs: AtomicU64,
    skipped_unmanaged: AtomicU64,
    watch_restarts: AtomicU64,
}

impl ReconcileMetrics {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn inc_reconciles(&self) {
        self.reconciles.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_creates(&self) {
        self.creates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_updates(&self) {
        self.updates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_deletes(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_noops(&self) {
        self.noops.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_conflicts(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_failures(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_requeues(&self) {
        self.requeues.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_resyncs(&self) {
        self.resyncs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_skipped_unmanaged(&self) {
        self.skipped_unmanaged.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_watch_restarts(&self) {
        self.watch_restarts.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the current counter values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            reconciles: self.reconciles.load(Ordering::Relaxed),
            creates: self.creates.load(Ordering::Relaxed),
            updates: self.updates.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            noops: self.noops.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            requeues: self.requeues.load(Ordering::Relaxed),
            resyncs: self.resyncs.load(Ordering::Relaxed),
            skipped_unmanaged: self.skipped_unmanaged.load(Ordering::Relaxed),
            watch_restarts: self.watch_restarts.load(Ordering::Relaxed),
        }
    }

    /// Counter samples for every tracked value.
    pub fn samples(&self) -> Vec<Sample> {
        let s = self.snapshot();
        vec![
            Sample::counter("shardcache_repl_reconciles_total", "Reconcile invocations", s.reconciles),
            Sample::counter("shardcache_repl_creates_total", "Replicas created in the cache store", s.creates),
            Sample::counter("shardcache_repl_updates_total", "Replicas overwritten in the cache store", s.updates),
            Sample::counter("shardcache_repl_deletes_total", "Replicas deleted from the cache store", s.deletes),
            Sample::counter(
                "shardcache_repl_noops_total",
                "Reconciles that found cache and source in agreement",
                s.noops,
            ),
            Sample::counter("shardcache_repl_conflicts_total", "Write conflicts and create races", s.conflicts),
            Sample::counter("shardcache_repl_failures_total", "Reconciles that ended in an error", s.failures),
            Sample::counter("shardcache_repl_requeues_total", "Identities re-queued with backoff", s.requeues),
            Sample::counter("shardcache_repl_resyncs_total", "Drift correction passes", s.resyncs),
            Sample::counter(
                "shardcache_repl_skipped_unmanaged_total",
                "Cache objects left alone for lacking the provenance annotation",
                s.skipped_unmanaged,
            ),
            Sample::counter(
                "shardcache_repl_watch_restarts_total",
                "Source watches re-established after the stream ended",
                s.watch_restarts,
            ),
        ]
    }

    /// Render all counters in Prometheus text format.
    pub fn to_prometheus(&self, shard: &str) -> String {
        render(shard, &self.samples())
    }
}
