#![warn(missing_docs)]

//! shardcache replication subsystem: keeps a cache store in agreement with
//! the objects of one source shard.
//!
//! Source objects are copied into the cache store, marked with a provenance
//! annotation, kept equal on every source change, repaired when the replica
//! is edited or deleted directly, and removed when the source object goes
//! away. Objects in the cache store without the annotation are never touched.

pub mod backoff;
pub mod config;
pub mod controller;
pub mod differ;
pub mod drift;
pub mod error;
pub mod kinds;
pub mod memory;
pub mod metrics;
pub mod object;
pub mod provenance;
pub mod queue;
pub mod reconciler;
pub mod store;
pub mod writer;

pub use config::ControllerConfig;
pub use controller::{Controller, ControllerState};
pub use error::{ReplError, Result};
pub use object::{LogicalCluster, ObjectMeta, ReplicatedObject, ResourceIdentity, ResourceKind, ShardName};
pub use reconciler::{ReconcileOutcome, ReconcileReport, Reconciler};
pub use store::{CacheStore, ShardRouting, SourceReader, WatchEvent, WatchEventType};
