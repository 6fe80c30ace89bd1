//! Logical property names understood by the built-in cells.
//!
//! Names are stable; clients address properties by these strings in
//! `filterBy` and `sortBy`. A cell may support any subset.

// Object metadata
pub const NAME: &str = "name";
pub const NAMESPACE: &str = "namespace";
pub const CREATION_TIMESTAMP: &str = "creationTimestamp";
/// Character count of the object name.
pub const NAME_LENGTH: &str = "nameLength";

// Status-like columns
pub const STATUS: &str = "status";
pub const TYPE: &str = "type";

// Pods
pub const RESTARTS: &str = "restarts";
pub const NODE: &str = "node";

// Workloads
pub const REPLICAS: &str = "replicas";

// Events
pub const REASON: &str = "reason";
pub const FIRST_SEEN: &str = "firstSeen";
pub const LAST_SEEN: &str = "lastSeen";

/// Sort property that resolves to the first requested metric.
pub const METRIC: &str = "metric";
/// Prefix of sort properties naming a specific metric, e.g. `metric:cpu/usage_rate`.
pub const METRIC_PREFIX: &str = "metric:";

/// Metric name (as a sort property) referenced by `property`, if any.
pub fn metric_name(property: &str) -> Option<&str> {
    if property == METRIC { return Some(""); }
    property.strip_prefix(METRIC_PREFIX).filter(|s| !s.is_empty())
}
