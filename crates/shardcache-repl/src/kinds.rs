//! Per-kind adapters for the replication engine.
//!
//! The engine is kind-agnostic; an adapter supplies the selector predicate
//! (which source objects are replicated) and any extra normalization the
//! differ applies before comparing a source object with its replica.

use crate::object::{ReplicatedObject, ResourceKind};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Kind name of API exports.
pub const API_EXPORT: &str = "APIExport";
/// Kind name of API resource schemas.
pub const API_RESOURCE_SCHEMA: &str = "APIResourceSchema";

/// Describes how one resource kind is replicated.
pub trait KindAdapter: Send + Sync {
    /// The kind this adapter handles.
    fn kind(&self) -> &ResourceKind;

    /// Returns true if the source object should be replicated.
    fn selects(&self, _obj: &ReplicatedObject) -> bool {
        true
    }

    /// Extra normalization applied to both sides before comparison.
    fn normalize(&self, _obj: &mut ReplicatedObject) {}
}

/// Replicates every object of a kind with the default comparison rules.
#[derive(Debug, Clone)]
pub struct GenericAdapter {
    kind: ResourceKind,
}

impl GenericAdapter {
    /// Create an adapter for `kind`.
    pub fn new(kind: ResourceKind) -> Self {
        Self { kind }
    }
}

impl KindAdapter for GenericAdapter {
    fn kind(&self) -> &ResourceKind {
        &self.kind
    }
}

/// Replicates only objects whose labels contain every selector pair.
#[derive(Debug, Clone)]
pub struct LabelSelectorAdapter {
    kind: ResourceKind,
    selector: BTreeMap<String, String>,
}

impl LabelSelectorAdapter {
    /// Create an adapter for `kind` matching `selector`.
    pub fn new(kind: ResourceKind, selector: BTreeMap<String, String>) -> Self {
        Self { kind, selector }
    }
}

impl KindAdapter for LabelSelectorAdapter {
    fn kind(&self) -> &ResourceKind {
        &self.kind
    }

    fn selects(&self, obj: &ReplicatedObject) -> bool {
        self.selector
            .iter()
            .all(|(k, v)| obj.metadata.labels.get(k) == Some(v))
    }
}

/// APIExport: `spec.latestResourceSchemas` is omitted when empty, so an
/// empty list and a missing field are the same.
#[derive(Debug, Clone)]
pub struct ApiExportAdapter {
    kind: ResourceKind,
}

impl Default for ApiExportAdapter {
    fn default() -> Self {
        Self {
            kind: ResourceKind::new(API_EXPORT),
        }
    }
}

impl KindAdapter for ApiExportAdapter {
    fn kind(&self) -> &ResourceKind {
        &self.kind
    }

    fn normalize(&self, obj: &mut ReplicatedObject) {
        if let Value::Object(spec) = &mut obj.spec {
            let empty = matches!(
                spec.get("latestResourceSchemas"),
                Some(Value::Array(a)) if a.is_empty()
            ) || matches!(spec.get("latestResourceSchemas"), Some(Value::Null));
            if empty {
                spec.remove("latestResourceSchemas");
            }
        }
        if obj.spec.as_object().is_some_and(|s| s.is_empty()) {
            obj.spec = Value::Null;
        }
    }
}

/// APIResourceSchema: spec is immutable at the source; replicated verbatim.
#[derive(Debug, Clone)]
pub struct ApiResourceSchemaAdapter {
    kind: ResourceKind,
}

impl Default for ApiResourceSchemaAdapter {
    fn default() -> Self {
        Self {
            kind: ResourceKind::new(API_RESOURCE_SCHEMA),
        }
    }
}

impl KindAdapter for ApiResourceSchemaAdapter {
    fn kind(&self) -> &ResourceKind {
        &self.kind
    }
}

/// Registered adapters keyed by kind.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<ResourceKind, Arc<dyn KindAdapter>>,
}

impl AdapterRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry for the given kind names; unknown kinds get a [`GenericAdapter`].
    pub fn from_kinds<S: AsRef<str>>(kinds: &[S]) -> Self {
        let mut registry = Self::new();
        for kind in kinds {
            let adapter: Arc<dyn KindAdapter> = match kind.as_ref() {
                API_EXPORT => Arc::new(ApiExportAdapter::default()),
                API_RESOURCE_SCHEMA => Arc::new(ApiResourceSchemaAdapter::default()),
                other => Arc::new(GenericAdapter::new(ResourceKind::new(other))),
            };
            registry.register(adapter);
        }
        registry
    }

    /// Register (or replace) the adapter for its kind.
    pub fn register(&mut self, adapter: Arc<dyn KindAdapter>) {
        self.adapters.insert(adapter.kind().clone(), adapter);
    }

    /// Adapter for `kind`, if registered.
    pub fn get(&self, kind: &ResourceKind) -> Option<Arc<dyn KindAdapter>> {
        self.adapters.get(kind).cloned()
    }

    /// All registered kinds, sorted.
    pub fn kinds(&self) -> Vec<ResourceKind> {
        let mut kinds: Vec<ResourceKind> = self.adapters.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Number of registered kinds.
    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    /// Returns true if no kinds are registered.
    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
