//! Replication scenarios
//!
//! Source-side lifecycle of each replicated kind: the replica appears after
//! creation, follows spec and metadata updates, and disappears after the
//! source object is deleted.

use crate::harness::ReplicationFixture;
use shardcache_repl::{ReplicatedObject, ResourceIdentity};

/// Drive `obj` through create, spec update, metadata update and delete,
/// waiting for the replica to follow after every step.
pub async fn replicate_resource_scenario<S>(
    fixture: &ReplicationFixture,
    obj: ReplicatedObject,
    update_spec: S,
) -> anyhow::Result<()>
where
    S: Fn(&mut ReplicatedObject),
{
    let created = fixture.source.create(obj).await?;
    let identity: ResourceIdentity = crate::harness::id(&created);
    tracing::info!(%identity, "created on the root shard");
    fixture.wait_replicated(&identity).await?;

    tracing::info!(%identity, "verifying spec update propagation");
    fixture.update_source(&identity, &update_spec).await?;
    fixture.wait_replicated(&identity).await?;

    tracing::info!(%identity, "verifying metadata update propagation");
    fixture
        .update_source(&identity, |o| {
            o.metadata
                .annotations
                .insert("testAnnotation".to_string(), "testAnnotationValue".to_string());
        })
        .await?;
    let replica = fixture.wait_replicated(&identity).await?;
    anyhow::ensure!(
        replica.metadata.annotations.get("testAnnotation").map(String::as_str) == Some("testAnnotationValue"),
        "annotation not replicated"
    );

    tracing::info!(%identity, "verifying delete propagation");
    fixture.source.delete(&identity).await?;
    fixture.wait_removed(&identity).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::{id, sheriffs_schema_and_export};
    use serde_json::json;

    #[tokio::test]
    async fn test_replicate_api_export() {
        let fixture = ReplicationFixture::start().await.unwrap();
        let (schema, export) = sheriffs_schema_and_export(&fixture.cluster, "wild.wild.west");
        fixture.source.create(schema).await.unwrap();

        replicate_resource_scenario(&fixture, export, |o| {
            if let Some(list) = o.spec["latestResourceSchemas"].as_array_mut() {
                list.push(json!("foo.bar"));
            }
        })
        .await
        .unwrap();
        fixture.shutdown().await;
    }

    #[tokio::test]
    async fn test_replicate_api_resource_schema() {
        let fixture = ReplicationFixture::start().await.unwrap();
        let (schema, export) = sheriffs_schema_and_export(&fixture.cluster, "wild.wild.west");
        fixture.source.create(export).await.unwrap();

        // The spec of a schema is immutable, so the spec step is a no-op write.
        replicate_resource_scenario(&fixture, schema, |_| {}).await.unwrap();
        fixture.shutdown().await;
    }

    #[tokio::test]
    async fn test_spec_update_carries_generation() {
        let fixture = ReplicationFixture::start().await.unwrap();
        let (_, export) = sheriffs_schema_and_export(&fixture.cluster, "wild.wild.west");
        let created = fixture.source.create(export).await.unwrap();
        let identity = id(&created);
        fixture.wait_replicated(&identity).await.unwrap();

        fixture
            .update_source(&identity, |o| o.spec = json!({"latestResourceSchemas": ["v2.sheriffs.wild.wild.west"]}))
            .await
            .unwrap();
        let replica = fixture.wait_replicated(&identity).await.unwrap();
        assert_eq!(replica.metadata.generation, 2);
        assert_eq!(replica.metadata.uid, created.metadata.uid);
        fixture.shutdown().await;
    }

    #[tokio::test]
    async fn test_many_objects_across_clusters() {
        let fixture = ReplicationFixture::start().await.unwrap();
        let mut ids = Vec::new();
        for ws in 0..3 {
            let cluster = shardcache_repl::LogicalCluster::new(format!("root:org:ws-{}", ws));
            let (schema, export) = sheriffs_schema_and_export(&cluster, "wild.wild.west");
            ids.push(id(&fixture.source.create(schema).await.unwrap()));
            ids.push(id(&fixture.source.create(export).await.unwrap()));
        }
        for identity in &ids {
            fixture.wait_replicated(identity).await.unwrap();
        }
        assert_eq!(fixture.cache.len().await, ids.len());
        fixture.shutdown().await;
    }

    #[tokio::test]
    async fn test_terminating_source_removes_replica() {
        let fixture = ReplicationFixture::start().await.unwrap();
        let created = fixture
            .source
            .create(crate::harness::mangodb_export(&fixture.cluster))
            .await
            .unwrap();
        let identity = id(&created);
        fixture.wait_replicated(&identity).await.unwrap();

        fixture.source.begin_delete(&identity).await.unwrap();
        fixture.wait_removed(&identity).await.unwrap();
        assert!(fixture.source.get_object(&identity).await.is_some());
        fixture.shutdown().await;
    }
}
