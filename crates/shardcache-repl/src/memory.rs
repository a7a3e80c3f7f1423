//! In-process source and cache stores.
//!
//! Both stores assign resource versions and enforce optimistic concurrency
//! the way the real stores do. They support fault injection (transient
//! failures, forced conflicts) and count write calls, which makes them the
//! backing stores for tests and for embedding the controller in-process.

use crate::error::{ReplError, Result};
use crate::object::{ReplicatedObject, ResourceIdentity, ResourceKind, ShardName};
use crate::provenance::identity_of;
use crate::store::{CacheStore, ShardRouting, SourceReader, WatchEvent, WatchEventType};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tokio::sync::{mpsc, Mutex, RwLock};

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Consumes one unit of an injected-failure budget.
fn take_budget(budget: &AtomicU32) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn injected_failure() -> ReplError {
    ReplError::Transient {
        msg: "injected failure".to_string(),
    }
}

/// Authoritative store for one shard.
///
/// Mutations (`create`, `update`, `delete`, `begin_delete`) model the
/// shard's own API; the reconciler only sees the [`SourceReader`] side.
pub struct MemorySourceStore {
    shard: ShardName,
    objects: RwLock<BTreeMap<ResourceIdentity, ReplicatedObject>>,
    watchers: Mutex<Vec<(ResourceKind, mpsc::UnboundedSender<WatchEvent>)>>,
    next_rv: AtomicU64,
    next_uid: AtomicU64,
    fail_budget: AtomicU32,
}

impl MemorySourceStore {
    /// Create an empty store for `shard`.
    pub fn new(shard: impl Into<String>) -> Self {
        Self {
            shard: ShardName::new(shard),
            objects: RwLock::new(BTreeMap::new()),
            watchers: Mutex::new(Vec::new()),
            next_rv: AtomicU64::new(1),
            next_uid: AtomicU64::new(1),
            fail_budget: AtomicU32::new(0),
        }
    }

    /// Shard this store serves.
    pub fn shard(&self) -> &ShardName {
        &self.shard
    }

    /// Make the next `n` reader calls fail with a transient error.
    pub fn fail_next(&self, n: u32) {
        self.fail_budget.store(n, Ordering::SeqCst);
    }

    fn bump_rv(&self) -> String {
        self.next_rv.fetch_add(1, Ordering::SeqCst).to_string()
    }

    async fn notify(&self, event: WatchEvent) {
        let mut watchers = self.watchers.lock().await;
        watchers.retain(|(kind, tx)| {
            if *kind != event.identity.kind {
                return !tx.is_closed();
            }
            tx.send(event.clone()).is_ok()
        });
    }

    /// Create an object. Assigns uid, resource version, generation and creation time.
    pub async fn create(&self, obj: ReplicatedObject) -> Result<ReplicatedObject> {
        let identity = identity_of(&obj);
        let stored = {
            let mut objects = self.objects.write().await;
            if objects.contains_key(&identity) {
                return Err(ReplError::AlreadyExists { identity });
            }
            let mut stored = obj;
            stored.metadata.resource_version = self.bump_rv();
            stored.metadata.uid = format!("uid-{}", self.next_uid.fetch_add(1, Ordering::SeqCst));
            stored.metadata.generation = 1;
            stored.metadata.creation_timestamp = Some(now_ms());
            stored.metadata.deletion_timestamp = None;
            objects.insert(identity.clone(), stored.clone());
            stored
        };
        self.notify(WatchEvent::new(WatchEventType::Added, identity)).await;
        Ok(stored)
    }

    /// Replace an object. `obj` must carry the current resource version.
    pub async fn update(&self, obj: ReplicatedObject) -> Result<ReplicatedObject> {
        let identity = identity_of(&obj);
        let stored = {
            let mut objects = self.objects.write().await;
            let current = objects
                .get(&identity)
                .ok_or_else(|| ReplError::NotFound { identity: identity.clone() })?;
            if current.metadata.resource_version != obj.metadata.resource_version {
                return Err(ReplError::Conflict {
                    identity,
                    expected: obj.metadata.resource_version.clone(),
                    actual: current.metadata.resource_version.clone(),
                });
            }
            let mut stored = obj;
            stored.metadata.uid = current.metadata.uid.clone();
            stored.metadata.creation_timestamp = current.metadata.creation_timestamp;
            stored.metadata.deletion_timestamp = current.metadata.deletion_timestamp;
            stored.metadata.generation = if stored.spec != current.spec {
                current.metadata.generation + 1
            } else {
                current.metadata.generation
            };
            stored.metadata.resource_version = self.bump_rv();
            objects.insert(identity.clone(), stored.clone());
            stored
        };
        self.notify(WatchEvent::new(WatchEventType::Modified, identity)).await;
        Ok(stored)
    }

    /// Mark an object as terminating without removing it (deletion in progress).
    pub async fn begin_delete(&self, identity: &ResourceIdentity) -> Result<ReplicatedObject> {
        let stored = {
            let mut objects = self.objects.write().await;
            let current = objects
                .get_mut(identity)
                .ok_or_else(|| ReplError::NotFound { identity: identity.clone() })?;
            if current.metadata.deletion_timestamp.is_none() {
                current.metadata.deletion_timestamp = Some(now_ms());
                current.metadata.resource_version = self.next_rv.fetch_add(1, Ordering::SeqCst).to_string();
            }
            current.clone()
        };
        self.notify(WatchEvent::new(WatchEventType::Modified, identity.clone())).await;
        Ok(stored)
    }

    /// Remove an object.
    pub async fn delete(&self, identity: &ResourceIdentity) -> Result<()> {
        let removed = self.objects.write().await.remove(identity);
        if removed.is_none() {
            return Err(ReplError::NotFound {
                identity: identity.clone(),
            });
        }
        self.notify(WatchEvent::new(WatchEventType::Deleted, identity.clone())).await;
        Ok(())
    }

    /// Direct read, bypassing fault injection.
    pub async fn get_object(&self, identity: &ResourceIdentity) -> Option<ReplicatedObject> {
        self.objects.read().await.get(identity).cloned()
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    /// Returns true if the store holds no objects.
    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl SourceReader for MemorySourceStore {
    async fn get(&self, identity: &ResourceIdentity) -> Result<Option<ReplicatedObject>> {
        if take_budget(&self.fail_budget) {
            return Err(injected_failure());
        }
        Ok(self.objects.read().await.get(identity).cloned())
    }

    async fn list(&self, kind: &ResourceKind) -> Result<Vec<ReplicatedObject>> {
        if take_budget(&self.fail_budget) {
            return Err(injected_failure());
        }
        Ok(self
            .objects
            .read()
            .await
            .values()
            .filter(|o| &o.kind == kind)
            .cloned()
            .collect())
    }

    async fn watch(&self, kind: &ResourceKind) -> Result<mpsc::UnboundedReceiver<WatchEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.watchers.lock().await.push((kind.clone(), tx));
        Ok(rx)
    }
}

/// Write-call counters of a [`MemoryCacheStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheWriteStats {
    /// Create calls received.
    pub creates: u64,
    /// Update calls received.
    pub updates: u64,
    /// Delete calls received.
    pub deletes: u64,
}

impl CacheWriteStats {
    /// Total write calls.
    pub fn total(&self) -> u64 {
        self.creates + self.updates + self.deletes
    }
}

/// Cache store partitioned by the shard that wrote each object.
#[derive(Default)]
pub struct MemoryCacheStore {
    shards: RwLock<HashMap<ShardName, BTreeMap<ResourceIdentity, ReplicatedObject>>>,
    next_rv: AtomicU64,
    creates: AtomicU64,
    updates: AtomicU64,
    deletes: AtomicU64,
    fail_budget: AtomicU32,
    conflict_budget: AtomicU32,
}

impl MemoryCacheStore {
    /// Create an empty cache store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` calls of any type fail with a transient error.
    pub fn fail_next(&self, n: u32) {
        self.fail_budget.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` update calls fail with a conflict, as if another writer won.
    pub fn conflict_next(&self, n: u32) {
        self.conflict_budget.store(n, Ordering::SeqCst);
    }

    /// Write calls received so far, including rejected ones.
    pub fn write_stats(&self) -> CacheWriteStats {
        CacheWriteStats {
            creates: self.creates.load(Ordering::SeqCst),
            updates: self.updates.load(Ordering::SeqCst),
            deletes: self.deletes.load(Ordering::SeqCst),
        }
    }

    /// Total write calls received so far.
    pub fn write_count(&self) -> u64 {
        self.write_stats().total()
    }

    /// Number of objects across all shards.
    pub async fn len(&self) -> usize {
        self.shards.read().await.values().map(BTreeMap::len).sum()
    }

    /// Returns true if no shard holds any object.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn bump_rv(&self) -> String {
        (self.next_rv.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn shard_of(routing: &ShardRouting) -> Result<&ShardName> {
        match routing {
            ShardRouting::Shard(name) => Ok(name),
            ShardRouting::Wildcard => Err(ReplError::Invalid {
                msg: "wildcard routing is read-only".to_string(),
            }),
        }
    }

    fn check_faults(&self) -> Result<()> {
        if take_budget(&self.fail_budget) {
            return Err(injected_failure());
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, routing: &ShardRouting, identity: &ResourceIdentity) -> Result<ReplicatedObject> {
        self.check_faults()?;
        let shards = self.shards.read().await;
        let found = match routing {
            ShardRouting::Shard(name) => shards.get(name).and_then(|objs| objs.get(identity)),
            ShardRouting::Wildcard => shards.values().find_map(|objs| objs.get(identity)),
        };
        found.cloned().ok_or_else(|| ReplError::NotFound {
            identity: identity.clone(),
        })
    }

    async fn create(&self, routing: &ShardRouting, obj: &ReplicatedObject) -> Result<ReplicatedObject> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.check_faults()?;
        let shard = Self::shard_of(routing)?;
        let identity = identity_of(obj);
        let mut shards = self.shards.write().await;
        let objects = shards.entry(shard.clone()).or_default();
        if objects.contains_key(&identity) {
            return Err(ReplError::AlreadyExists { identity });
        }
        let mut stored = obj.clone();
        stored.metadata.resource_version = self.bump_rv();
        objects.insert(identity, stored.clone());
        Ok(stored)
    }

    async fn update(&self, routing: &ShardRouting, obj: &ReplicatedObject) -> Result<ReplicatedObject> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.check_faults()?;
        let shard = Self::shard_of(routing)?;
        let identity = identity_of(obj);
        let mut shards = self.shards.write().await;
        let current = shards
            .get_mut(shard)
            .and_then(|objs| objs.get_mut(&identity))
            .ok_or_else(|| ReplError::NotFound { identity: identity.clone() })?;
        if take_budget(&self.conflict_budget) || current.metadata.resource_version != obj.metadata.resource_version {
            return Err(ReplError::Conflict {
                identity,
                expected: obj.metadata.resource_version.clone(),
                actual: current.metadata.resource_version.clone(),
            });
        }
        let mut stored = obj.clone();
        stored.metadata.resource_version = self.bump_rv();
        *current = stored.clone();
        Ok(stored)
    }

    async fn delete(&self, routing: &ShardRouting, identity: &ResourceIdentity, precondition: Option<&str>) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.check_faults()?;
        let shard = Self::shard_of(routing)?;
        let mut shards = self.shards.write().await;
        let objects = shards
            .get_mut(shard)
            .filter(|objs| objs.contains_key(identity))
            .ok_or_else(|| ReplError::NotFound {
                identity: identity.clone(),
            })?;
        if let (Some(expected), Some(current)) = (precondition, objects.get(identity)) {
            if current.metadata.resource_version != expected {
                return Err(ReplError::Conflict {
                    identity: identity.clone(),
                    expected: expected.to_string(),
                    actual: current.metadata.resource_version.clone(),
                });
            }
        }
        objects.remove(identity);
        Ok(())
    }

    async fn list(&self, routing: &ShardRouting, kind: &ResourceKind) -> Result<Vec<ReplicatedObject>> {
        self.check_faults()?;
        let shards = self.shards.read().await;
        let matching = |objs: &BTreeMap<ResourceIdentity, ReplicatedObject>| {
            objs.values().filter(|o| &o.kind == kind).cloned().collect::<Vec<_>>()
        };
        Ok(match routing {
            ShardRouting::Shard(name) => shards.get(name).map(matching).unwrap_or_default(),
            ShardRouting::Wildcard => shards.values().flat_map(matching).collect(),
        })
    }
}
