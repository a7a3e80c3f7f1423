//! Identity and provenance of replicated objects.
//!
//! A cached replica is correlated with its source object by
//! [`ResourceIdentity`] and marked as reconciler-owned by the
//! [`PROVENANCE_ANNOTATION`]. An object in the cache store without that
//! annotation was not written by the reconciler and is never touched by it.

use crate::object::{ReplicatedObject, ResourceIdentity, ShardName};

/// Reserved annotation marking an object as a managed replica. The value is the origin shard.
pub const PROVENANCE_ANNOTATION: &str = "cache.shardcache.io/origin";

/// Identity of an object: (logical cluster, kind, name).
pub fn identity_of(obj: &ReplicatedObject) -> ResourceIdentity {
    ResourceIdentity::new(
        obj.metadata.cluster.clone(),
        obj.kind.clone(),
        obj.metadata.name.clone(),
    )
}

/// Returns a copy of `obj` carrying the provenance annotation for `shard`.
pub fn annotate(obj: &ReplicatedObject, shard: &ShardName) -> ReplicatedObject {
    let mut out = obj.clone();
    out.metadata
        .annotations
        .insert(PROVENANCE_ANNOTATION.to_string(), shard.as_str().to_string());
    out
}

/// Returns a copy of `obj` without the provenance annotation.
pub fn strip_provenance(obj: &ReplicatedObject) -> ReplicatedObject {
    let mut out = obj.clone();
    out.metadata.annotations.remove(PROVENANCE_ANNOTATION);
    out
}

/// Origin shard recorded on a replica, if any.
pub fn provenance_of(obj: &ReplicatedObject) -> Option<ShardName> {
    obj.metadata
        .annotations
        .get(PROVENANCE_ANNOTATION)
        .map(|s| ShardName::new(s.clone()))
}

/// Returns true if `obj` is a replica owned by the reconciler.
pub fn is_managed(obj: &ReplicatedObject) -> bool {
    obj.metadata.annotations.contains_key(PROVENANCE_ANNOTATION)
}
