//! Typed cache writer.
//!
//! Wraps a [`CacheStore`] and turns the store's expected failure modes
//! (`NotFound`, `AlreadyExists`, `Conflict`) into outcome variants, so the
//! reconcile loop can branch on them instead of matching errors. Anything
//! left in the `Err` position is a real failure (transient or permanent).

use crate::error::{ReplError, Result};
use crate::object::{ReplicatedObject, ResourceIdentity, ResourceKind};
use crate::store::{CacheStore, ShardRouting};
use std::sync::Arc;
use tracing::debug;

/// Result of a create call.
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    /// The replica was created; carries the stored copy.
    Created(ReplicatedObject),
    /// Another writer created the identity first.
    AlreadyExists,
}

/// Result of an update call.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    /// The replica was replaced; carries the stored copy.
    Updated(ReplicatedObject),
    /// The supplied resource version was stale.
    Conflict {
        /// Resource version the caller supplied.
        expected: String,
        /// Resource version the store holds.
        actual: String,
    },
    /// The replica disappeared since it was read.
    NotFound,
}

/// Result of a delete call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The replica was removed.
    Deleted,
    /// There was nothing to remove.
    NotFound,
    /// The replica changed since it was read and was left in place.
    Conflict {
        /// Resource version the caller observed.
        expected: String,
        /// Resource version the store holds.
        actual: String,
    },
}

/// Shard-agnostic writer for the cache store. Every call takes its routing context.
#[derive(Clone)]
pub struct CacheWriter {
    store: Arc<dyn CacheStore>,
}

impl CacheWriter {
    /// Create a writer over `store`.
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// Fetch the replica, `None` if absent.
    pub async fn get(&self, routing: &ShardRouting, identity: &ResourceIdentity) -> Result<Option<ReplicatedObject>> {
        match self.store.get(routing, identity).await {
            Ok(obj) => Ok(Some(obj)),
            Err(ReplError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Create the replica.
    pub async fn create(&self, routing: &ShardRouting, obj: &ReplicatedObject) -> Result<CreateOutcome> {
        Self::require_shard(routing)?;
        match self.store.create(routing, obj).await {
            Ok(stored) => Ok(CreateOutcome::Created(stored)),
            Err(ReplError::AlreadyExists { identity }) => {
                debug!(%identity, %routing, "create raced with another writer");
                Ok(CreateOutcome::AlreadyExists)
            }
            Err(e) => Err(e),
        }
    }

    /// Replace the replica; `obj` must carry the last observed resource version.
    pub async fn update(&self, routing: &ShardRouting, obj: &ReplicatedObject) -> Result<UpdateOutcome> {
        Self::require_shard(routing)?;
        match self.store.update(routing, obj).await {
            Ok(stored) => Ok(UpdateOutcome::Updated(stored)),
            Err(ReplError::Conflict { identity, expected, actual }) => {
                debug!(%identity, %expected, %actual, "update precondition failed");
                Ok(UpdateOutcome::Conflict { expected, actual })
            }
            Err(ReplError::NotFound { .. }) => Ok(UpdateOutcome::NotFound),
            Err(e) => Err(e),
        }
    }

    /// Remove the replica. Idempotent.
    ///
    /// `observed_rv` guards against removing an object that replaced the one
    /// the caller read.
    pub async fn delete(
        &self,
        routing: &ShardRouting,
        identity: &ResourceIdentity,
        observed_rv: Option<&str>,
    ) -> Result<DeleteOutcome> {
        Self::require_shard(routing)?;
        match self.store.delete(routing, identity, observed_rv).await {
            Ok(()) => Ok(DeleteOutcome::Deleted),
            Err(ReplError::NotFound { .. }) => Ok(DeleteOutcome::NotFound),
            Err(ReplError::Conflict { identity, expected, actual }) => {
                debug!(%identity, %expected, %actual, "delete precondition failed");
                Ok(DeleteOutcome::Conflict { expected, actual })
            }
            Err(e) => Err(e),
        }
    }

    /// List replicas of a kind; `routing` may be the wildcard.
    pub async fn list(&self, routing: &ShardRouting, kind: &ResourceKind) -> Result<Vec<ReplicatedObject>> {
        self.store.list(routing, kind).await
    }

    fn require_shard(routing: &ShardRouting) -> Result<()> {
        if routing.is_wildcard() {
            return Err(ReplError::Invalid {
                msg: "writes require a concrete shard routing".to_string(),
            });
        }
        Ok(())
    }
}
