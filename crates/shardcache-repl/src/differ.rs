//! Semantic comparison of a source object and its replica.
//!
//! Both sides are normalized before comparison: the provenance annotation,
//! the resource version and server-managed timestamps are removed, then a
//! per-kind adapter may drop further fields. Maps (labels, annotations, JSON
//! objects) compare order-insensitively, JSON arrays order-sensitively.

use crate::kinds::KindAdapter;
use crate::object::ReplicatedObject;
use crate::provenance::strip_provenance;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// How a field differs between the two compared objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffKind {
    /// Present only on the right-hand object.
    Added,
    /// Present only on the left-hand object.
    Removed,
    /// Present on both with different values.
    Changed,
}

/// A single differing field, addressed by a dotted path (e.g. `metadata.labels.foo`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDiff {
    /// Dotted path of the field.
    pub path: String,
    /// Nature of the difference.
    pub kind: DiffKind,
}

impl fmt::Display for FieldDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = match self.kind {
            DiffKind::Added => '+',
            DiffKind::Removed => '-',
            DiffKind::Changed => '~',
        };
        write!(f, "{}{}", sign, self.path)
    }
}

/// Strip bookkeeping fields that legitimately differ between source and replica.
pub fn normalize(obj: &ReplicatedObject) -> ReplicatedObject {
    let mut out = strip_provenance(obj);
    out.metadata.resource_version.clear();
    out.metadata.creation_timestamp = None;
    out
}

/// Normalize with the generic rules, then apply the adapter's extra rule.
pub fn normalize_with(obj: &ReplicatedObject, adapter: &dyn KindAdapter) -> ReplicatedObject {
    let mut out = normalize(obj);
    adapter.normalize(&mut out);
    out
}

/// Returns true if `a` and `b` are equal modulo bookkeeping fields.
pub fn equivalent(a: &ReplicatedObject, b: &ReplicatedObject) -> bool {
    normalize(a) == normalize(b)
}

/// Like [`equivalent`], with the adapter's normalization applied to both sides.
pub fn equivalent_with(a: &ReplicatedObject, b: &ReplicatedObject, adapter: &dyn KindAdapter) -> bool {
    normalize_with(a, adapter) == normalize_with(b, adapter)
}

/// Lists every human-meaningful difference between `a` and `b`.
///
/// Empty exactly when [`equivalent`] holds.
pub fn diff(a: &ReplicatedObject, b: &ReplicatedObject) -> Vec<FieldDiff> {
    let a = normalize(a);
    let b = normalize(b);
    let mut out = Vec::new();

    if a.kind != b.kind {
        push(&mut out, "kind", DiffKind::Changed);
    }
    let (ma, mb) = (&a.metadata, &b.metadata);
    if ma.name != mb.name {
        push(&mut out, "metadata.name", DiffKind::Changed);
    }
    if ma.cluster != mb.cluster {
        push(&mut out, "metadata.cluster", DiffKind::Changed);
    }
    if ma.uid != mb.uid {
        push(&mut out, "metadata.uid", DiffKind::Changed);
    }
    if ma.generation != mb.generation {
        push(&mut out, "metadata.generation", DiffKind::Changed);
    }
    if ma.deletion_timestamp != mb.deletion_timestamp {
        push(&mut out, "metadata.deletionTimestamp", DiffKind::Changed);
    }
    diff_string_map("metadata.labels", &ma.labels, &mb.labels, &mut out);
    diff_string_map("metadata.annotations", &ma.annotations, &mb.annotations, &mut out);
    diff_value("spec", &a.spec, &b.spec, &mut out);
    diff_value("status", &a.status, &b.status, &mut out);
    out
}

fn push(out: &mut Vec<FieldDiff>, path: &str, kind: DiffKind) {
    out.push(FieldDiff {
        path: path.to_string(),
        kind,
    });
}

fn diff_string_map(
    prefix: &str,
    a: &BTreeMap<String, String>,
    b: &BTreeMap<String, String>,
    out: &mut Vec<FieldDiff>,
) {
    for (key, value) in a {
        match b.get(key) {
            None => push(out, &format!("{}.{}", prefix, key), DiffKind::Removed),
            Some(other) if other != value => push(out, &format!("{}.{}", prefix, key), DiffKind::Changed),
            Some(_) => {}
        }
    }
    for key in b.keys().filter(|k| !a.contains_key(*k)) {
        push(out, &format!("{}.{}", prefix, key), DiffKind::Added);
    }
}

fn diff_value(path: &str, a: &Value, b: &Value, out: &mut Vec<FieldDiff>) {
    match (a, b) {
        (Value::Object(ma), Value::Object(mb)) => {
            for (key, va) in ma {
                let child = format!("{}.{}", path, key);
                match mb.get(key) {
                    None => push(out, &child, DiffKind::Removed),
                    Some(vb) => diff_value(&child, va, vb, out),
                }
            }
            for key in mb.keys().filter(|k| !ma.contains_key(*k)) {
                push(out, &format!("{}.{}", path, key), DiffKind::Added);
            }
        }
        (Value::Array(va), Value::Array(vb)) if va.len() == vb.len() => {
            for (i, (x, y)) in va.iter().zip(vb).enumerate() {
                diff_value(&format!("{}[{}]", path, i), x, y, out);
            }
        }
        (Value::Null, other) if !other.is_null() => push(out, path, DiffKind::Added),
        (other, Value::Null) if !other.is_null() => push(out, path, DiffKind::Removed),
        _ if a != b => push(out, path, DiffKind::Changed),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinds::GenericAdapter;
    use crate::object::{LogicalCluster, ResourceKind, ShardName};
    use crate::provenance::annotate;
    use serde_json::json;

    fn export() -> ReplicatedObject {
        let mut obj = ReplicatedObject::new(LogicalCluster::new("root:org"), ResourceKind::new("APIExport"), "mangodb")
            .with_spec(json!({"latestResourceSchemas": ["today.mangodbs.db.io"], "identity": {"hash": "abc"}}));
        obj.metadata.resource_version = "10".to_string();
        obj.metadata.uid = "uid-1".to_string();
        obj.metadata.creation_timestamp = Some(1_000);
        obj
    }

    fn replica_of(src: &ReplicatedObject) -> ReplicatedObject {
        let mut replica = annotate(src, &ShardName::new("root"));
        replica.metadata.resource_version = "3".to_string();
        replica.metadata.creation_timestamp = Some(9_999);
        replica
    }

    #[test]
    fn test_replica_is_equivalent_to_source() {
        let src = export();
        let replica = replica_of(&src);
        assert!(equivalent(&src, &replica));
        assert!(diff(&src, &replica).is_empty());
    }

    #[test]
    fn test_spec_array_append_is_divergence() {
        let src = export();
        let mut replica = replica_of(&src);
        replica.spec["latestResourceSchemas"]
            .as_array_mut()
            .unwrap()
            .push(json!("foo"));
        assert!(!equivalent(&src, &replica));
        let d = diff(&src, &replica);
        assert_eq!(d.len(), 1);
        assert_eq!(d[0].path, "spec.latestResourceSchemas");
        assert_eq!(d[0].kind, DiffKind::Changed);
    }

    #[test]
    fn test_array_order_matters() {
        let a = export().with_spec(json!({"versions": ["v1", "v2"]}));
        let b = export().with_spec(json!({"versions": ["v2", "v1"]}));
        assert!(!equivalent(&a, &b));
        let d = diff(&a, &b);
        assert_eq!(d.len(), 2);
        assert_eq!(d[0].path, "spec.versions[0]");
    }

    #[test]
    fn test_object_key_order_does_not_matter() {
        let a = export().with_spec(serde_json::from_str(r#"{"a": 1, "b": {"c": 2, "d": 3}}"#).unwrap());
        let b = export().with_spec(serde_json::from_str(r#"{"b": {"d": 3, "c": 2}, "a": 1}"#).unwrap());
        assert!(equivalent(&a, &b));
    }

    #[test]
    fn test_label_added_on_replica() {
        let src = export();
        let replica = replica_of(&src).with_label("foo", "bar");
        assert!(!equivalent(&src, &replica));
        assert_eq!(
            diff(&src, &replica),
            vec![FieldDiff {
                path: "metadata.labels.foo".to_string(),
                kind: DiffKind::Added,
            }]
        );
    }

    #[test]
    fn test_annotation_removed_on_replica() {
        let src = export().with_annotation("testAnnotation", "testAnnotationValue");
        let replica = strip_annotation(replica_of(&src), "testAnnotation");
        let d = diff(&src, &replica);
        assert_eq!(d[0].path, "metadata.annotations.testAnnotation");
        assert_eq!(d[0].kind, DiffKind::Removed);
    }

    fn strip_annotation(mut obj: ReplicatedObject, key: &str) -> ReplicatedObject {
        obj.metadata.annotations.remove(key);
        obj
    }

    #[test]
    fn test_status_difference_detected() {
        let src = export().with_status(json!({"phase": "Ready"}));
        let replica = replica_of(&export());
        assert!(!equivalent(&src, &replica));
        assert_eq!(diff(&src, &replica)[0].path, "status");
    }

    #[test]
    fn test_uid_difference_detected() {
        let src = export();
        let mut replica = replica_of(&src);
        replica.metadata.uid = "uid-2".to_string();
        assert!(!equivalent(&src, &replica));
        assert_eq!(diff(&src, &replica)[0].path, "metadata.uid");
    }

    #[test]
    fn test_normalize_with_generic_adapter_matches_normalize() {
        let src = export();
        let adapter = GenericAdapter::new(ResourceKind::new("APIExport"));
        assert_eq!(normalize_with(&src, &adapter), normalize(&src));
        assert!(equivalent_with(&src, &replica_of(&src), &adapter));
    }

    #[test]
    fn test_field_diff_display() {
        let d = FieldDiff {
            path: "spec.x".to_string(),
            kind: DiffKind::Added,
        };
        assert_eq!(d.to_string(), "+spec.x");
    }
}
