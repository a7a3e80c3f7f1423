//! Test Harness - in-process replication environment
//!
//! A [`ReplicationFixture`] owns a source store for shard `root`, a cache
//! store and a running controller between them. Scenario tests drive the
//! source store (and tamper with the cache store) and then poll with
//! [`eventually`] until the replica matches.

use serde_json::json;
use shardcache_repl::differ::diff;
use shardcache_repl::kinds::{API_EXPORT, API_RESOURCE_SCHEMA};
use shardcache_repl::memory::{MemoryCacheStore, MemorySourceStore};
use shardcache_repl::provenance::{identity_of, provenance_of, strip_provenance};
use shardcache_repl::store::CacheStore;
use shardcache_repl::{
    Controller, ControllerConfig, LogicalCluster, ReplicatedObject, ResourceIdentity, ResourceKind, ShardRouting,
};
use std::future::Future;
use std::sync::{Arc, Once};
use std::time::{Duration, Instant};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Upper bound for any single wait in a scenario.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(30);
/// Delay between two polls.
pub const POLL_INTERVAL: Duration = Duration::from_millis(400);

static TRACING: Once = Once::new();

/// Install a `tracing` subscriber once per test binary. Filter with `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::registry()
            .with(fmt::layer().with_test_writer())
            .with(EnvFilter::from_default_env())
            .try_init();
    });
}

/// Poll `check` every `interval` until it returns true or `timeout` elapses.
pub async fn eventually<F, Fut>(timeout: Duration, interval: Duration, what: &str, mut check: F) -> anyhow::Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if check().await {
            return Ok(());
        }
        if Instant::now() >= deadline {
            anyhow::bail!("timed out after {:?} waiting for {}", timeout, what);
        }
        tokio::time::sleep(interval).await;
    }
}

/// Controller settings used by scenario tests: short resync, fast backoff.
pub fn test_config() -> ControllerConfig {
    ControllerConfig {
        shard: "root".to_string(),
        workers: 4,
        resync_period_ms: 200,
        backoff_base_ms: 5,
        backoff_max_ms: 200,
        backoff_jitter: true,
        max_conflict_retries: 5,
        kinds: vec![API_EXPORT.to_string(), API_RESOURCE_SCHEMA.to_string()],
    }
}

/// Source store, cache store and a controller replicating between them.
pub struct ReplicationFixture {
    /// Authoritative store of shard `root`.
    pub source: Arc<MemorySourceStore>,
    /// Shared cache store.
    pub cache: Arc<MemoryCacheStore>,
    /// The controller under test.
    pub controller: Controller,
    /// Logical cluster the scenario objects live in.
    pub cluster: LogicalCluster,
    routing: ShardRouting,
}

impl ReplicationFixture {
    /// Build a fixture with [`test_config`] and start the controller.
    pub async fn start() -> anyhow::Result<Self> {
        Self::start_with(test_config()).await
    }

    /// Build a fixture with `config` and start the controller.
    pub async fn start_with(config: ControllerConfig) -> anyhow::Result<Self> {
        let fixture = Self::idle(config)?;
        fixture.controller.start().await?;
        Ok(fixture)
    }

    /// Build a fixture without starting the controller.
    pub fn idle(config: ControllerConfig) -> anyhow::Result<Self> {
        init_tracing();
        let source = Arc::new(MemorySourceStore::new(config.shard.clone()));
        let cache = Arc::new(MemoryCacheStore::new());
        let routing = ShardRouting::shard(config.shard.clone());
        let controller = Controller::new(config, source.clone(), cache.clone())?;
        Ok(Self {
            source,
            cache,
            controller,
            cluster: LogicalCluster::new("root:e2e-org:ws"),
            routing,
        })
    }

    /// Routing context of the replicas this fixture's controller writes.
    pub fn routing(&self) -> &ShardRouting {
        &self.routing
    }

    /// Current replica of `identity`, if any.
    pub async fn cached(&self, identity: &ResourceIdentity) -> Option<ReplicatedObject> {
        self.cache.get(&self.routing, identity).await.ok()
    }

    /// Current source object for `identity`.
    pub async fn source_object(&self, identity: &ResourceIdentity) -> anyhow::Result<ReplicatedObject> {
        self.source
            .get_object(identity)
            .await
            .ok_or_else(|| anyhow::anyhow!("{} missing from source", identity))
    }

    /// Wait until the cached state of `identity` satisfies `pred`.
    pub async fn wait_for_cache<P>(&self, identity: &ResourceIdentity, what: &str, pred: P) -> anyhow::Result<()>
    where
        P: Fn(Option<&ReplicatedObject>) -> bool,
    {
        let pred = &pred;
        eventually(WAIT_TIMEOUT, POLL_INTERVAL, what, || {
            let cache = self.cache.clone();
            let routing = self.routing.clone();
            let identity = identity.clone();
            async move {
                let current = cache.get(&routing, &identity).await.ok();
                pred(current.as_ref())
            }
        })
        .await
    }

    /// Apply `mutate` to the latest source object and write it back, retrying on conflicts.
    pub async fn update_source<M>(&self, identity: &ResourceIdentity, mutate: M) -> anyhow::Result<ReplicatedObject>
    where
        M: Fn(&mut ReplicatedObject),
    {
        let deadline = Instant::now() + WAIT_TIMEOUT;
        loop {
            let mut current = self.source_object(identity).await?;
            mutate(&mut current);
            match self.source.update(current).await {
                Ok(updated) => return Ok(updated),
                Err(e) if e.is_conflict() && Instant::now() < deadline => {
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Wait until the replica is an exact copy of the current source object.
    pub async fn wait_replicated(&self, identity: &ResourceIdentity) -> anyhow::Result<ReplicatedObject> {
        let source = self.source_object(identity).await?;
        let what = format!("{} to be replicated", identity);
        let result = self
            .wait_for_cache(identity, &what, |cached| cached.is_some_and(|c| is_faithful_copy(&source, c)))
            .await;
        if result.is_err() {
            if let Some(cached) = self.cached(identity).await {
                tracing::warn!(%identity, diff = ?diff(&source, &cached), "replica still differs");
            }
        }
        result?;
        self.cached(identity)
            .await
            .ok_or_else(|| anyhow::anyhow!("{} vanished after converging", identity))
    }

    /// Wait until no replica of `identity` exists.
    pub async fn wait_removed(&self, identity: &ResourceIdentity) -> anyhow::Result<()> {
        let what = format!("{} to be removed from the cache", identity);
        self.wait_for_cache(identity, &what, |cached| cached.is_none()).await
    }

    /// Stop the controller and wait for its tasks.
    pub async fn shutdown(&self) {
        self.controller.shutdown().await;
    }
}

/// Returns true if `cached` carries the provenance of shard `root` and equals
/// `source` in every field except that annotation and the resource version.
pub fn is_faithful_copy(source: &ReplicatedObject, cached: &ReplicatedObject) -> bool {
    if provenance_of(cached).map(|s| s.as_str() == "root") != Some(true) {
        return false;
    }
    let mut copy = strip_provenance(cached);
    copy.metadata.resource_version = source.metadata.resource_version.clone();
    &copy == source
}

/// The sheriffs schema and the export that references it.
pub fn sheriffs_schema_and_export(cluster: &LogicalCluster, export_name: &str) -> (ReplicatedObject, ReplicatedObject) {
    let schema_name = format!("today.sheriffs.{}", export_name);
    let schema = ReplicatedObject::new(cluster.clone(), ResourceKind::new(API_RESOURCE_SCHEMA), schema_name.clone())
        .with_spec(json!({
            "group": export_name,
            "names": {"plural": "sheriffs", "singular": "sheriff", "kind": "Sheriff", "listKind": "SheriffList"},
            "scope": "Namespaced",
            "versions": [{"name": "v1", "served": true, "storage": true}]
        }));
    let export = ReplicatedObject::new(cluster.clone(), ResourceKind::new(API_EXPORT), export_name)
        .with_spec(json!({"latestResourceSchemas": [schema_name]}));
    (schema, export)
}

/// A schema describing the `mangodbs.db.io` resource.
pub fn mangodb_schema(cluster: &LogicalCluster) -> ReplicatedObject {
    ReplicatedObject::new(cluster.clone(), ResourceKind::new(API_RESOURCE_SCHEMA), "juicy.mangodbs.db.io").with_spec(
        json!({
            "group": "db.io",
            "names": {"plural": "mangodbs", "singular": "mangodb", "kind": "MangoDB", "listKind": "MangoDBList"},
            "scope": "Namespaced",
            "versions": [{
                "name": "v1",
                "served": true,
                "storage": true,
                "schema": {"type": "object", "description": "the best db out there"}
            }]
        }),
    )
}

/// An export with an empty spec.
pub fn mangodb_export(cluster: &LogicalCluster) -> ReplicatedObject {
    ReplicatedObject::new(cluster.clone(), ResourceKind::new(API_EXPORT), "mangodb")
}

/// Identity helper re-exported for scenario code.
pub fn id(obj: &ReplicatedObject) -> ResourceIdentity {
    identity_of(obj)
}
