//! Vista core types shared by the data-select engine, the fan-out layer and the handlers.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

pub mod errors;
pub mod property;
mod value;

pub use errors::{append_error, extract_errors, DataError, ErrorPolicy, Severity, StatusReason};
pub use value::ComparableValue;

pub mod prelude {
    pub use super::{Cell, ComparableValue, DataError, ListMeta, ResourceKind, ResourceSelector};
}

/// Resource kinds the aggregation layer fetches from the orchestration API.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Pod,
    Event,
    Service,
    ReplicaSet,
    Deployment,
    Node,
    Namespace,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 7] = [
        ResourceKind::Pod,
        ResourceKind::Event,
        ResourceKind::Service,
        ResourceKind::ReplicaSet,
        ResourceKind::Deployment,
        ResourceKind::Node,
        ResourceKind::Namespace,
    ];

    pub fn group(&self) -> &'static str {
        match self {
            ResourceKind::ReplicaSet | ResourceKind::Deployment => "apps",
            _ => "",
        }
    }

    pub fn version(&self) -> &'static str { "v1" }

    pub fn kind(&self) -> &'static str {
        match self {
            ResourceKind::Pod => "Pod",
            ResourceKind::Event => "Event",
            ResourceKind::Service => "Service",
            ResourceKind::ReplicaSet => "ReplicaSet",
            ResourceKind::Deployment => "Deployment",
            ResourceKind::Node => "Node",
            ResourceKind::Namespace => "Namespace",
        }
    }

    pub fn plural(&self) -> &'static str {
        match self {
            ResourceKind::Pod => "pods",
            ResourceKind::Event => "events",
            ResourceKind::Service => "services",
            ResourceKind::ReplicaSet => "replicasets",
            ResourceKind::Deployment => "deployments",
            ResourceKind::Node => "nodes",
            ResourceKind::Namespace => "namespaces",
        }
    }

    /// Look up a kind by plural, singular or kind name, case-insensitively (`pods`, `pod`, `Pod`).
    pub fn from_name(name: &str) -> Option<Self> {
        let n = name.trim().to_ascii_lowercase();
        ResourceKind::ALL
            .iter()
            .copied()
            .find(|k| k.plural() == n || k.kind().to_ascii_lowercase() == n)
    }

    pub fn namespaced(&self) -> bool { !matches!(self, ResourceKind::Node | ResourceKind::Namespace) }

    /// Key in the `v1/Kind` or `group/v1/Kind` form.
    pub fn gvk_key(&self) -> String {
        if self.group().is_empty() {
            format!("{}/{}", self.version(), self.kind())
        } else {
            format!("{}/{}/{}", self.group(), self.version(), self.kind())
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.plural()) }
}

/// Identifies one object for correlation with an external metric series.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSelector {
    pub kind: ResourceKind,
    pub namespace: Option<String>,
    pub name: String,
    pub uid: String,
}

/// Adapter exposing one object's sortable and filterable attributes by logical name.
///
/// Unknown property names return `None`: such a property never matches a filter
/// and has no effect on ordering.
pub trait Cell {
    fn property(&self, name: &str) -> Option<ComparableValue>;

    /// Selector used by the metric stage; kinds without metrics keep the default.
    fn resource_selector(&self) -> Option<ResourceSelector> { None }
}

impl<C: Cell + ?Sized> Cell for &C {
    fn property(&self, name: &str) -> Option<ComparableValue> { (**self).property(name) }
    fn resource_selector(&self) -> Option<ResourceSelector> { (**self).resource_selector() }
}

/// Pagination metadata returned with every list.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListMeta {
    /// Number of items after filtering and before pagination.
    pub total_items: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeltaKind {
    Applied,
    Deleted,
}

/// A change to one object, keyed by its `metadata.uid`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delta {
    pub uid: String,
    pub kind: DeltaKind,
    pub raw: serde_json::Value,
}

impl Delta {
    /// Build an `Applied` delta from a raw object; `None` when it lacks `metadata.uid`.
    pub fn applied(raw: serde_json::Value) -> Option<Self> {
        let uid = raw.get("metadata")?.get("uid")?.as_str()?.to_string();
        Some(Self { uid, kind: DeltaKind::Applied, raw })
    }

    pub fn deleted(uid: impl Into<String>) -> Self {
        Self { uid: uid.into(), kind: DeltaKind::Deleted, raw: serde_json::Value::Null }
    }
}
