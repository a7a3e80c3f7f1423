//! Property-Based Tests for Reconciliation - convergence over random histories
//!
//! Random interleavings of source mutations, cache tampering and partial
//! reconciles are applied; a final reconcile of every identity must leave
//! each replica an exact copy of its live source object (or absent), leave
//! foreign objects alone, and a second pass must write nothing.

use proptest::prelude::*;

/// One step of a random history. Objects are addressed by index.
#[derive(Debug, Clone)]
pub enum Step {
    /// Create the source object.
    CreateSource(u8),
    /// Change a label on the source object.
    UpdateSource(u8, u8),
    /// Replace the source object's spec.
    RespecSource(u8, u8),
    /// Delete the source object.
    DeleteSource(u8),
    /// Mark the source object as terminating.
    TerminateSource(u8),
    /// Delete the replica directly in the cache store.
    DeleteReplica(u8),
    /// Edit the replica directly in the cache store.
    TamperReplica(u8),
    /// Put an unannotated object into the cache store.
    CreateForeign(u8),
    /// Reconcile one identity.
    Reconcile(u8),
}

/// Number of distinct object names a history touches.
pub const OBJECTS: u8 = 4;

/// Generator for a single history step.
pub fn arb_step() -> impl Strategy<Value = Step> {
    let idx = 0..OBJECTS;
    prop_oneof![
        3 => idx.clone().prop_map(Step::CreateSource),
        2 => (idx.clone(), any::<u8>()).prop_map(|(i, v)| Step::UpdateSource(i, v)),
        2 => (idx.clone(), any::<u8>()).prop_map(|(i, v)| Step::RespecSource(i, v)),
        1 => idx.clone().prop_map(Step::DeleteSource),
        1 => idx.clone().prop_map(Step::TerminateSource),
        1 => idx.clone().prop_map(Step::DeleteReplica),
        2 => idx.clone().prop_map(Step::TamperReplica),
        1 => idx.clone().prop_map(Step::CreateForeign),
        3 => idx.prop_map(Step::Reconcile),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::is_faithful_copy;
    use serde_json::json;
    use shardcache_repl::kinds::API_EXPORT;
    use shardcache_repl::memory::{MemoryCacheStore, MemorySourceStore};
    use shardcache_repl::metrics::ReconcileMetrics;
    use shardcache_repl::provenance::is_managed;
    use shardcache_repl::store::CacheStore;
    use shardcache_repl::writer::CacheWriter;
    use shardcache_repl::{
        kinds::AdapterRegistry, LogicalCluster, ReconcileOutcome, Reconciler, ReplicatedObject, ResourceIdentity,
        ResourceKind, ShardName, ShardRouting,
    };
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn object(i: u8) -> ReplicatedObject {
        ReplicatedObject::new(LogicalCluster::new("root:org"), ResourceKind::new(API_EXPORT), format!("export-{}", i))
    }

    fn identity(i: u8) -> ResourceIdentity {
        shardcache_repl::provenance::identity_of(&object(i))
    }

    struct World {
        source: Arc<MemorySourceStore>,
        cache: Arc<MemoryCacheStore>,
        reconciler: Reconciler,
        routing: ShardRouting,
        cancel: CancellationToken,
    }

    impl World {
        fn new() -> Self {
            let source = Arc::new(MemorySourceStore::new("root"));
            let cache = Arc::new(MemoryCacheStore::new());
            let reconciler = Reconciler::new(
                source.clone(),
                CacheWriter::new(cache.clone()),
                AdapterRegistry::from_kinds(&[API_EXPORT]),
                ShardName::new("root"),
                3,
                Arc::new(ReconcileMetrics::new()),
            );
            Self {
                source,
                cache,
                reconciler,
                routing: ShardRouting::shard("root"),
                cancel: CancellationToken::new(),
            }
        }

        async fn apply(&self, step: &Step) {
            match *step {
                Step::CreateSource(i) => {
                    let _ = self.source.create(object(i)).await;
                }
                Step::UpdateSource(i, v) => {
                    if let Some(mut current) = self.source.get_object(&identity(i)).await {
                        current.metadata.labels.insert("v".to_string(), v.to_string());
                        let _ = self.source.update(current).await;
                    }
                }
                Step::RespecSource(i, v) => {
                    if let Some(mut current) = self.source.get_object(&identity(i)).await {
                        current.spec = json!({"latestResourceSchemas": [format!("s{}.example.io", v)]});
                        let _ = self.source.update(current).await;
                    }
                }
                Step::DeleteSource(i) => {
                    let _ = self.source.delete(&identity(i)).await;
                }
                Step::TerminateSource(i) => {
                    let _ = self.source.begin_delete(&identity(i)).await;
                }
                Step::DeleteReplica(i) => {
                    if let Ok(replica) = self.cache.get(&self.routing, &identity(i)).await {
                        if is_managed(&replica) {
                            let _ = self.cache.delete(&self.routing, &identity(i), None).await;
                        }
                    }
                }
                Step::TamperReplica(i) => {
                    if let Ok(mut replica) = self.cache.get(&self.routing, &identity(i)).await {
                        if is_managed(&replica) {
                            replica.metadata.labels.insert("tampered".to_string(), "yes".to_string());
                            replica.spec = json!({"latestResourceSchemas": ["rogue.example.io"]});
                            let _ = self.cache.update(&self.routing, &replica).await;
                        }
                    }
                }
                Step::CreateForeign(i) => {
                    let foreign = object(i).with_label("foreign", "yes");
                    let _ = self.cache.create(&self.routing, &foreign).await;
                }
                Step::Reconcile(i) => {
                    let _ = self.reconciler.reconcile(&identity(i), &self.cancel).await;
                }
            }
        }
    }

    fn run<F: std::future::Future<Output = ()>>(fut: F) {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(fut);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// After a full pass every replica matches its live source object and a second pass is silent.
        #[test]
        fn test_reconcile_converges(steps in proptest::collection::vec(arb_step(), 0..40)) {
            run(async move {
                let world = World::new();
                for step in &steps {
                    world.apply(step).await;
                }

                for i in 0..OBJECTS {
                    world.reconciler.reconcile(&identity(i), &world.cancel).await.unwrap();
                }

                for i in 0..OBJECTS {
                    let id = identity(i);
                    let source = world.source.get_object(&id).await.filter(|s| !s.is_terminating());
                    let cached = world.cache.get(&world.routing, &id).await.ok();
                    match (source, cached) {
                        (_, Some(c)) if !is_managed(&c) => {
                            assert_eq!(c.metadata.labels.get("foreign").map(String::as_str), Some("yes"));
                        }
                        (Some(s), Some(c)) => assert!(is_faithful_copy(&s, &c), "{} diverged", id),
                        (None, None) => {}
                        (s, c) => panic!("{}: source {:?} cache {:?}", id, s.is_some(), c.is_some()),
                    }
                }

                let writes = world.cache.write_count();
                for i in 0..OBJECTS {
                    let report = world.reconciler.reconcile(&identity(i), &world.cancel).await.unwrap();
                    assert_eq!(report.writes, 0);
                    assert!(matches!(
                        report.outcome,
                        ReconcileOutcome::InSync | ReconcileOutcome::Absent | ReconcileOutcome::SkippedUnmanaged
                    ));
                }
                assert_eq!(world.cache.write_count(), writes);
            });
        }
    }
}
