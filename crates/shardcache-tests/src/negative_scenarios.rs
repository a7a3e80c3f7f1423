//! Negative replication scenarios
//!
//! Replicas deleted or edited directly in the cache store are restored from
//! the source object without any source-side event.

use crate::harness::{id, ReplicationFixture};
use shardcache_repl::store::CacheStore;
use shardcache_repl::ReplicatedObject;

/// Create `obj`, then delete and tamper with its replica, waiting for repair each time.
pub async fn replicate_resource_negative_scenario<T>(
    fixture: &ReplicationFixture,
    obj: ReplicatedObject,
    tamper: T,
) -> anyhow::Result<()>
where
    T: Fn(&mut ReplicatedObject),
{
    let created = fixture.source.create(obj).await?;
    let identity = id(&created);
    fixture.wait_replicated(&identity).await?;

    tracing::info!(%identity, "deleting the replica");
    fixture.cache.delete(fixture.routing(), &identity, None).await?;
    fixture.wait_replicated(&identity).await?;

    tracing::info!(%identity, "tampering with the replica");
    let mut replica = fixture
        .cached(&identity)
        .await
        .ok_or_else(|| anyhow::anyhow!("{} not cached", identity))?;
    tamper(&mut replica);
    fixture.cache.update(fixture.routing(), &replica).await?;
    fixture.wait_replicated(&identity).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::{mangodb_export, mangodb_schema};
    use serde_json::{json, Value};

    #[tokio::test]
    async fn test_replicate_api_export_negative() {
        let fixture = ReplicationFixture::start().await.unwrap();
        let export = mangodb_export(&fixture.cluster);
        replicate_resource_negative_scenario(&fixture, export, |replica| {
            if replica.spec.is_null() {
                replica.spec = json!({"latestResourceSchemas": []});
            }
            if let Some(list) = replica.spec["latestResourceSchemas"].as_array_mut() {
                list.push(json!("foo"));
            }
        })
        .await
        .unwrap();
        fixture.shutdown().await;
    }

    #[tokio::test]
    async fn test_replicate_api_resource_schema_negative() {
        let fixture = ReplicationFixture::start().await.unwrap();
        let schema = mangodb_schema(&fixture.cluster);
        replicate_resource_negative_scenario(&fixture, schema, |replica| {
            replica.metadata.labels.insert("foo".to_string(), "bar".to_string());
        })
        .await
        .unwrap();
        fixture.shutdown().await;
    }

    #[tokio::test]
    async fn test_stripped_provenance_is_not_reclaimed() {
        // A replica whose annotation is removed by hand becomes a foreign object.
        let fixture = ReplicationFixture::start().await.unwrap();
        let created = fixture.source.create(mangodb_schema(&fixture.cluster)).await.unwrap();
        let identity = id(&created);
        fixture.wait_replicated(&identity).await.unwrap();

        let replica = fixture.cached(&identity).await.unwrap();
        let mut orphaned = shardcache_repl::provenance::strip_provenance(&replica);
        orphaned.status = json!({"note": "hand edited"});
        fixture.cache.update(fixture.routing(), &orphaned).await.unwrap();

        let before = fixture.controller.metrics().snapshot().skipped_unmanaged;
        crate::harness::eventually(
            crate::harness::WAIT_TIMEOUT,
            crate::harness::POLL_INTERVAL,
            "unmanaged collision to be observed",
            || {
                let metrics = fixture.controller.metrics().clone();
                async move { metrics.snapshot().skipped_unmanaged > before }
            },
        )
        .await
        .unwrap();

        let still = fixture.cached(&identity).await.unwrap();
        assert_eq!(still.status, json!({"note": "hand edited"}));
        assert_ne!(still.status, Value::Null);
        fixture.shutdown().await;
    }
}
