//! Concurrency and fault tests
//!
//! Competing cache writers, injected store failures, bursts of source
//! updates and shutdown while work is pending.

#[cfg(test)]
mod tests {
    use crate::harness::{id, mangodb_export, sheriffs_schema_and_export, test_config, ReplicationFixture};
    use serde_json::json;
    use shardcache_repl::store::CacheStore;
    use shardcache_repl::{ControllerConfig, ControllerState, LogicalCluster};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_competing_cache_writer_converges() {
        let fixture = Arc::new(ReplicationFixture::start().await.unwrap());
        let created = fixture.source.create(mangodb_export(&fixture.cluster)).await.unwrap();
        let identity = id(&created);
        fixture.wait_replicated(&identity).await.unwrap();

        // A rogue writer keeps editing the replica for a while.
        let rogue = {
            let fixture = fixture.clone();
            let identity = identity.clone();
            tokio::spawn(async move {
                for i in 0..20 {
                    if let Some(mut replica) = fixture.cached(&identity).await {
                        replica.spec = json!({"latestResourceSchemas": [format!("rogue-{}", i)]});
                        let _ = fixture.cache.update(fixture.routing(), &replica).await;
                    }
                    tokio::time::sleep(Duration::from_millis(15)).await;
                }
            })
        };
        rogue.await.unwrap();

        fixture.wait_replicated(&identity).await.unwrap();
        fixture.shutdown().await;
    }

    #[tokio::test]
    async fn test_forced_conflicts_are_absorbed() {
        let fixture = ReplicationFixture::start().await.unwrap();
        let created = fixture.source.create(mangodb_export(&fixture.cluster)).await.unwrap();
        let identity = id(&created);
        fixture.wait_replicated(&identity).await.unwrap();

        fixture.cache.conflict_next(12);
        fixture
            .update_source(&identity, |o| o.spec = json!({"latestResourceSchemas": ["a.b"]}))
            .await
            .unwrap();
        fixture.wait_replicated(&identity).await.unwrap();

        let snap = fixture.controller.metrics().snapshot();
        assert!(snap.conflicts >= 1);
        fixture.shutdown().await;
    }

    #[tokio::test]
    async fn test_transient_store_failures_are_retried() {
        let fixture = ReplicationFixture::idle(test_config()).unwrap();
        let (schema, export) = sheriffs_schema_and_export(&fixture.cluster, "wild.wild.west");
        let schema = fixture.source.create(schema).await.unwrap();
        let export = fixture.source.create(export).await.unwrap();
        fixture.cache.fail_next(5);
        fixture.source.fail_next(3);
        fixture.controller.start().await.unwrap();

        fixture.wait_replicated(&id(&schema)).await.unwrap();
        fixture.wait_replicated(&id(&export)).await.unwrap();
        let snap = fixture.controller.metrics().snapshot();
        assert_eq!(snap.failures, snap.requeues);
        fixture.shutdown().await;
    }

    #[tokio::test]
    async fn test_burst_of_updates_converges_to_last() {
        let fixture = ReplicationFixture::start().await.unwrap();
        let created = fixture.source.create(mangodb_export(&fixture.cluster)).await.unwrap();
        let identity = id(&created);

        for i in 0..50 {
            fixture
                .update_source(&identity, |o| {
                    o.metadata.labels.insert("revision".to_string(), i.to_string());
                })
                .await
                .unwrap();
        }
        let replica = fixture.wait_replicated(&identity).await.unwrap();
        assert_eq!(replica.metadata.labels.get("revision").map(String::as_str), Some("49"));
        fixture.shutdown().await;
    }

    #[tokio::test]
    async fn test_single_worker_still_converges() {
        let config = ControllerConfig {
            workers: 1,
            ..test_config()
        };
        let fixture = ReplicationFixture::start_with(config).await.unwrap();
        let mut ids = Vec::new();
        for ws in 0..5 {
            let cluster = LogicalCluster::new(format!("root:org:ws-{}", ws));
            ids.push(id(&fixture.source.create(mangodb_export(&cluster)).await.unwrap()));
        }
        for identity in &ids {
            fixture.wait_replicated(identity).await.unwrap();
        }
        fixture.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_with_pending_work_is_prompt() {
        let fixture = ReplicationFixture::start().await.unwrap();
        for i in 0..200 {
            let cluster = LogicalCluster::new(format!("root:org:ws-{}", i));
            fixture.source.create(mangodb_export(&cluster)).await.unwrap();
        }
        tokio::time::timeout(Duration::from_secs(2), fixture.shutdown())
            .await
            .unwrap();
        assert_eq!(fixture.controller.state().await, ControllerState::Stopped);

        // Nothing is written after shutdown returns.
        let writes = fixture.cache.write_count();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(fixture.cache.write_count(), writes);
    }
}
