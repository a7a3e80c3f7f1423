//! Periodic full resync.
//!
//! Watch events only report changes on the source side. Replicas that are
//! deleted or edited directly in the cache store produce no source event, so
//! on every tick the drift corrector enqueues every identity it can find:
//! all source objects of the registered kinds plus every replica this shard
//! owns in the cache store. The reconcile loop then repairs whatever differs.

use crate::kinds::AdapterRegistry;
use crate::metrics::ReconcileMetrics;
use crate::object::{ResourceIdentity, ResourceKind, ShardName};
use crate::provenance::{identity_of, provenance_of};
use crate::queue::WorkQueue;
use crate::store::{ShardRouting, SourceReader};
use crate::writer::CacheWriter;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Enqueues every known identity on a fixed period.
pub struct DriftCorrector {
    source: Arc<dyn SourceReader>,
    writer: CacheWriter,
    adapters: AdapterRegistry,
    shard: ShardName,
    queue: WorkQueue<ResourceIdentity>,
    period: Duration,
    metrics: Arc<ReconcileMetrics>,
}

impl DriftCorrector {
    /// Create a corrector feeding `queue` every `period`.
    pub fn new(
        source: Arc<dyn SourceReader>,
        writer: CacheWriter,
        adapters: AdapterRegistry,
        shard: ShardName,
        queue: WorkQueue<ResourceIdentity>,
        period: Duration,
        metrics: Arc<ReconcileMetrics>,
    ) -> Self {
        Self {
            source,
            writer,
            adapters,
            shard,
            queue,
            period,
            metrics,
        }
    }

    /// Identities of one kind known to either side.
    ///
    /// A listing failure on one side is logged and skipped; the other side's
    /// identities are still returned so one flaky store does not stall repair.
    pub async fn known_identities(&self, kind: &ResourceKind) -> BTreeSet<ResourceIdentity> {
        let mut ids = BTreeSet::new();

        match self.source.list(kind).await {
            Ok(objs) => ids.extend(objs.iter().map(identity_of)),
            Err(e) => warn!(%kind, error = %e, "source list failed during resync"),
        }

        match self.writer.list(&ShardRouting::Wildcard, kind).await {
            Ok(objs) => ids.extend(
                objs.iter()
                    .filter(|o| provenance_of(o).as_ref() == Some(&self.shard))
                    .map(identity_of),
            ),
            Err(e) => warn!(%kind, error = %e, "cache list failed during resync"),
        }

        ids
    }

    /// Enqueue every known identity of one kind. Returns the number enqueued.
    pub async fn resync_kind(&self, kind: &ResourceKind) -> usize {
        let ids = self.known_identities(kind).await;
        let count = ids.len();
        for id in ids {
            self.queue.add(id).await;
        }
        count
    }

    /// Run one resync pass. Returns the number of identities enqueued.
    pub async fn resync_once(&self) -> usize {
        let mut total = 0;
        for kind in self.adapters.kinds() {
            total += self.resync_kind(&kind).await;
        }
        self.metrics.inc_resyncs();
        debug!(shard = %self.shard, enqueued = total, "resync pass complete");
        total
    }

    /// Tick until `cancel` fires. The first pass runs immediately.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.resync_once().await;
                }
            }
        }
        debug!(shard = %self.shard, "drift corrector stopped");
    }
}
