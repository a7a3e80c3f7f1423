//! Per-identity reconcile loop.
//!
//! For one [`ResourceIdentity`] the reconciler re-reads the source object and
//! the cached replica, decides what to do from the pair, and applies at most
//! one write. Stale-state failures (update conflict, create race, replica
//! vanishing under an update) re-read and re-decide within the same
//! invocation, a bounded number of times; past that the error goes back to
//! the work queue, whose per-identity backoff takes over.

use crate::differ::{diff, equivalent_with};
use crate::error::{ReplError, Result};
use crate::kinds::{AdapterRegistry, KindAdapter};
use crate::metrics::ReconcileMetrics;
use crate::object::{ReplicatedObject, ResourceIdentity, ShardName};
use crate::provenance::{annotate, is_managed};
use crate::store::{ShardRouting, SourceReader};
use crate::writer::{CacheWriter, CreateOutcome, DeleteOutcome, UpdateOutcome};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What the reconciler should do for one (source, cache) pair.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Neither side exists: nothing to do, ever.
    Absent,
    /// Both sides agree.
    InSync,
    /// The cache object is not a managed replica and must not be touched.
    SkipUnmanaged,
    /// Create the replica with this content.
    Create(ReplicatedObject),
    /// Overwrite the replica with this content (carries the replica's resource version).
    Update(ReplicatedObject),
    /// Delete the replica.
    Delete,
}

/// Decide the action for one identity from freshly read state.
///
/// A source object counts as present only if it exists, is selected by the
/// kind adapter and is not terminating.
pub fn decide(
    source: Option<&ReplicatedObject>,
    cache: Option<&ReplicatedObject>,
    adapter: &dyn KindAdapter,
    shard: &ShardName,
) -> Decision {
    let source = source.filter(|s| !s.is_terminating() && adapter.selects(s));

    if cache.is_some_and(|c| !is_managed(c)) {
        return Decision::SkipUnmanaged;
    }

    match (source, cache) {
        (None, None) => Decision::Absent,
        (None, Some(_)) => Decision::Delete,
        (Some(src), None) => Decision::Create(desired_replica(src, shard, "")),
        (Some(src), Some(cached)) => {
            if equivalent_with(src, cached, adapter) {
                Decision::InSync
            } else {
                Decision::Update(desired_replica(src, shard, cached.resource_version()))
            }
        }
    }
}

fn desired_replica(src: &ReplicatedObject, shard: &ShardName, resource_version: &str) -> ReplicatedObject {
    let mut replica = annotate(src, shard);
    replica.metadata.resource_version = resource_version.to_string();
    replica
}

/// Final result of one reconcile invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The replica was created.
    Created,
    /// The replica was overwritten with source content.
    Updated,
    /// The replica was deleted.
    Deleted,
    /// Source and replica already agreed.
    InSync,
    /// Neither source nor replica exists. Terminal.
    Absent,
    /// A non-managed object holds the identity in the cache; left alone.
    SkippedUnmanaged,
}

impl ReconcileOutcome {
    /// Returns true if the identity needs no further attention until something changes.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Absent | Self::SkippedUnmanaged)
    }
}

/// Outcome plus bookkeeping of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    /// What happened.
    pub outcome: ReconcileOutcome,
    /// Write calls issued against the cache store.
    pub writes: u32,
    /// Read-decide-write rounds used.
    pub attempts: u32,
}

/// Drives one identity's replica into agreement with its source object.
pub struct Reconciler {
    source: Arc<dyn SourceReader>,
    writer: CacheWriter,
    adapters: AdapterRegistry,
    shard: ShardName,
    routing: ShardRouting,
    max_conflict_retries: u32,
    metrics: Arc<ReconcileMetrics>,
}

impl Reconciler {
    /// Create a reconciler replicating `shard`'s source store into the cache store.
    pub fn new(
        source: Arc<dyn SourceReader>,
        writer: CacheWriter,
        adapters: AdapterRegistry,
        shard: ShardName,
        max_conflict_retries: u32,
        metrics: Arc<ReconcileMetrics>,
    ) -> Self {
        let routing = ShardRouting::Shard(shard.clone());
        Self {
            source,
            writer,
            adapters,
            shard,
            routing,
            max_conflict_retries,
            metrics,
        }
    }

    /// Source shard recorded as provenance.
    pub fn shard(&self) -> &ShardName {
        &self.shard
    }

    /// Adapters of the replicated kinds.
    pub fn adapters(&self) -> &AdapterRegistry {
        &self.adapters
    }

    /// Shared counters.
    pub fn metrics(&self) -> &Arc<ReconcileMetrics> {
        &self.metrics
    }

    /// Reconcile one identity.
    ///
    /// Returns `Shutdown` if `cancel` fires; no write is started after that.
    /// A write already issued runs to completion so its outcome is known.
    pub async fn reconcile(&self, identity: &ResourceIdentity, cancel: &CancellationToken) -> Result<ReconcileReport> {
        self.metrics.inc_reconciles();
        let adapter = self.adapters.get(&identity.kind).ok_or_else(|| ReplError::Invalid {
            msg: format!("no adapter registered for kind {}", identity.kind),
        })?;

        let mut writes = 0u32;
        let mut last_race: Option<ReplError> = None;

        for attempt in 1..=self.max_conflict_retries.saturating_add(1) {
            let source = guarded(cancel, self.source.get(identity)).await?;
            let cached = guarded(cancel, self.writer.get(&self.routing, identity)).await?;
            let decision = decide(source.as_ref(), cached.as_ref(), adapter.as_ref(), &self.shard);
            debug!(%identity, attempt, decision = decision_label(&decision), "reconcile decision");

            let report = move |outcome| ReconcileReport {
                outcome,
                writes,
                attempts: attempt,
            };

            match decision {
                Decision::Absent => {
                    self.metrics.inc_noops();
                    return Ok(report(ReconcileOutcome::Absent));
                }
                Decision::InSync => {
                    self.metrics.inc_noops();
                    return Ok(report(ReconcileOutcome::InSync));
                }
                Decision::SkipUnmanaged => {
                    self.metrics.inc_skipped_unmanaged();
                    warn!(%identity, "cache object lacks provenance annotation, leaving it untouched");
                    return Ok(report(ReconcileOutcome::SkippedUnmanaged));
                }
                Decision::Create(replica) => {
                    ensure_running(cancel)?;
                    writes += 1;
                    match self.writer.create(&self.routing, &replica).await? {
                        CreateOutcome::Created(stored) => {
                            self.metrics.inc_creates();
                            info!(%identity, rv = %stored.resource_version(), "replica created");
                            return Ok(ReconcileReport {
                                outcome: ReconcileOutcome::Created,
                                writes,
                                attempts: attempt,
                            });
                        }
                        CreateOutcome::AlreadyExists => {
                            self.metrics.inc_conflicts();
                            last_race = Some(ReplError::AlreadyExists {
                                identity: identity.clone(),
                            });
                        }
                    }
                }
                Decision::Update(replica) => {
                    if let Some(cached) = cached.as_ref() {
                        let fields: Vec<String> = diff(cached, &replica).iter().map(ToString::to_string).collect();
                        info!(%identity, diff = ?fields, "replica diverged from source");
                    }
                    ensure_running(cancel)?;
                    writes += 1;
                    match self.writer.update(&self.routing, &replica).await? {
                        UpdateOutcome::Updated(stored) => {
                            self.metrics.inc_updates();
                            info!(%identity, rv = %stored.resource_version(), "replica updated");
                            return Ok(ReconcileReport {
                                outcome: ReconcileOutcome::Updated,
                                writes,
                                attempts: attempt,
                            });
                        }
                        UpdateOutcome::Conflict { expected, actual } => {
                            self.metrics.inc_conflicts();
                            last_race = Some(ReplError::Conflict {
                                identity: identity.clone(),
                                expected,
                                actual,
                            });
                        }
                        UpdateOutcome::NotFound => {
                            debug!(%identity, "replica vanished before update, re-reading");
                        }
                    }
                }
                Decision::Delete => {
                    let observed_rv = cached.as_ref().map(|c| c.resource_version());
                    ensure_running(cancel)?;
                    writes += 1;
                    match self.writer.delete(&self.routing, identity, observed_rv).await? {
                        DeleteOutcome::Conflict { expected, actual } => {
                            self.metrics.inc_conflicts();
                            last_race = Some(ReplError::Conflict {
                                identity: identity.clone(),
                                expected,
                                actual,
                            });
                        }
                        outcome => {
                            self.metrics.inc_deletes();
                            info!(%identity, already_gone = (outcome == DeleteOutcome::NotFound), "replica deleted");
                            return Ok(ReconcileReport {
                                outcome: ReconcileOutcome::Deleted,
                                writes,
                                attempts: attempt,
                            });
                        }
                    }
                }
            }
        }

        Err(last_race.unwrap_or_else(|| ReplError::Transient {
            msg: format!("{} kept changing during reconcile", identity),
        }))
    }
}

fn decision_label(decision: &Decision) -> &'static str {
    match decision {
        Decision::Absent => "absent",
        Decision::InSync => "in_sync",
        Decision::SkipUnmanaged => "skip_unmanaged",
        Decision::Create(_) => "create",
        Decision::Update(_) => "update",
        Decision::Delete => "delete",
    }
}

fn ensure_running(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(ReplError::Shutdown);
    }
    Ok(())
}

/// Runs a read unless `cancel` fires first.
async fn guarded<T, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    ensure_running(cancel)?;
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ReplError::Shutdown),
        res = fut => res,
    }
}
