//! Capability interfaces for the source and cache stores.
//!
//! The reconciler never talks to a concrete client; it consumes the narrow
//! [`SourceReader`] and [`CacheStore`] traits. Transport and authentication
//! belong to whoever implements them.

use crate::error::Result;
use crate::object::{ReplicatedObject, ResourceIdentity, ResourceKind, ShardName};
use async_trait::async_trait;
use std::fmt;
use tokio::sync::mpsc;

/// Routing context for cache store calls.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ShardRouting {
    /// Address the partition written by one shard.
    Shard(ShardName),
    /// Address every shard. Valid for reads and lists only.
    Wildcard,
}

impl ShardRouting {
    /// Route to a single shard.
    pub fn shard(name: impl Into<String>) -> Self {
        Self::Shard(ShardName::new(name))
    }

    /// Returns true for the cross-shard wildcard.
    pub fn is_wildcard(&self) -> bool {
        matches!(self, Self::Wildcard)
    }
}

impl fmt::Display for ShardRouting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shard(name) => write!(f, "shard/{}", name),
            Self::Wildcard => f.write_str("shard/*"),
        }
    }
}

/// Type of change reported by a source watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventType {
    /// Object created.
    Added,
    /// Object changed (including the start of deletion).
    Modified,
    /// Object removed.
    Deleted,
}

/// A change notification from the source store.
///
/// Only the identity is carried; the reconciler always re-reads current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    /// Type of change.
    pub event_type: WatchEventType,
    /// Object that changed.
    pub identity: ResourceIdentity,
}

impl WatchEvent {
    /// Create a watch event.
    pub fn new(event_type: WatchEventType, identity: ResourceIdentity) -> Self {
        Self { event_type, identity }
    }
}

/// Read-only access to the authoritative store.
#[async_trait]
pub trait SourceReader: Send + Sync + 'static {
    /// Current state of one object, or `None` if it does not exist.
    async fn get(&self, identity: &ResourceIdentity) -> Result<Option<ReplicatedObject>>;

    /// All objects of a kind across every logical cluster served by this shard.
    async fn list(&self, kind: &ResourceKind) -> Result<Vec<ReplicatedObject>>;

    /// Subscribe to changes of a kind. The stream ends when the store goes away.
    async fn watch(&self, kind: &ResourceKind) -> Result<mpsc::UnboundedReceiver<WatchEvent>>;
}

/// Read/write access to the cache store.
///
/// Errors follow the store's conventions: `NotFound`, `AlreadyExists`,
/// `Conflict` (resource version precondition failed), `Transient` and
/// `Invalid`.
#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
    /// Fetch one object; `NotFound` if absent.
    async fn get(&self, routing: &ShardRouting, identity: &ResourceIdentity) -> Result<ReplicatedObject>;

    /// Create an object; `AlreadyExists` if the identity is taken.
    /// The store assigns the resource version.
    async fn create(&self, routing: &ShardRouting, obj: &ReplicatedObject) -> Result<ReplicatedObject>;

    /// Replace an object; `Conflict` unless `obj`'s resource version is current.
    async fn update(&self, routing: &ShardRouting, obj: &ReplicatedObject) -> Result<ReplicatedObject>;

    /// Remove an object; `NotFound` if absent.
    ///
    /// With a `precondition`, `Conflict` unless the stored resource version matches it.
    async fn delete(&self, routing: &ShardRouting, identity: &ResourceIdentity, precondition: Option<&str>) -> Result<()>;

    /// All objects of a kind under the routing context.
    async fn list(&self, routing: &ShardRouting, kind: &ResourceKind) -> Result<Vec<ReplicatedObject>>;
}
