//! Object model shared by the source and cache stores.
//!
//! A single schema-less [`ReplicatedObject`] represents both the authoritative
//! source object and its cached replica; kind-specific content lives in the
//! `spec` and `status` JSON values so one engine can replicate every kind.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Name of an isolated tenant within a shard (e.g. `root:org:ws`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogicalCluster(String);

impl LogicalCluster {
    /// Create a logical cluster name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the cluster name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LogicalCluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of a replicated resource (e.g. `APIExport`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceKind(String);

impl ResourceKind {
    /// Create a resource kind.
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    /// Returns the kind name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of a physical shard hosting logical clusters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShardName(String);

impl ShardName {
    /// Create a shard name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the shard name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShardName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Addresses one source object and its at-most-one replica. Used as the work-queue key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceIdentity {
    /// Owning logical cluster.
    pub cluster: LogicalCluster,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Object name, unique per (cluster, kind).
    pub name: String,
}

impl ResourceIdentity {
    /// Create a new identity.
    pub fn new(cluster: LogicalCluster, kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            cluster,
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}|{}", self.kind, self.cluster, self.name)
    }
}

/// Object metadata common to every kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Object name.
    pub name: String,
    /// Logical cluster the object lives in.
    pub cluster: LogicalCluster,
    /// Labels (order-insensitive).
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Annotations (order-insensitive).
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Opaque version assigned by the owning store; empty until persisted.
    #[serde(default)]
    pub resource_version: String,
    /// Unique id assigned at creation in the source store.
    #[serde(default)]
    pub uid: String,
    /// Spec generation, bumped by the source store on spec changes.
    #[serde(default)]
    pub generation: u64,
    /// Creation time in milliseconds since the Unix epoch (server-managed).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<u64>,
    /// Set once deletion of the object has begun.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<u64>,
}

/// A source object or its cached replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicatedObject {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Object metadata.
    pub metadata: ObjectMeta,
    /// Kind-specific desired state.
    #[serde(default)]
    pub spec: Value,
    /// Kind-specific observed state.
    #[serde(default)]
    pub status: Value,
}

impl ReplicatedObject {
    /// Create an empty object of the given kind.
    pub fn new(cluster: LogicalCluster, kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            metadata: ObjectMeta {
                name: name.into(),
                cluster,
                ..Default::default()
            },
            spec: Value::Null,
            status: Value::Null,
        }
    }

    /// Builder: replace the spec.
    pub fn with_spec(mut self, spec: Value) -> Self {
        self.spec = spec;
        self
    }

    /// Builder: replace the status.
    pub fn with_status(mut self, status: Value) -> Self {
        self.status = status;
        self
    }

    /// Builder: set one label.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.labels.insert(key.into(), value.into());
        self
    }

    /// Builder: set one annotation.
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.annotations.insert(key.into(), value.into());
        self
    }

    /// Object name.
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Current resource version.
    pub fn resource_version(&self) -> &str {
        &self.metadata.resource_version
    }

    /// Returns true once deletion of the object has started.
    pub fn is_terminating(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}
