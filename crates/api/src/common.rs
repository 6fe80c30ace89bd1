//! DTO pieces shared by every list, and the metadata part of each cell.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Event, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta as KubeObjectMeta;
use serde::{Deserialize, Serialize};
use vista_core::{property, ComparableValue};

/// Object metadata as presented to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub uid: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
}

impl From<&KubeObjectMeta> for ObjectMeta {
    fn from(m: &KubeObjectMeta) -> Self {
        Self {
            name: m.name.clone().unwrap_or_default(),
            namespace: m.namespace.clone(),
            uid: m.uid.clone().unwrap_or_default(),
            labels: m.labels.clone().unwrap_or_default(),
            creation_timestamp: m.creation_timestamp.as_ref().map(|t| t.0),
        }
    }
}

impl ObjectMeta {
    /// Properties every kind shares: name, namespace, creation time, name length.
    pub fn property(&self, name: &str) -> Option<ComparableValue> {
        match name {
            property::NAME => Some(self.name.as_str().into()),
            property::NAMESPACE => self.namespace.as_deref().map(Into::into),
            property::CREATION_TIMESTAMP => self.creation_timestamp.map(Into::into),
            property::NAME_LENGTH => Some(ComparableValue::rune_count(&self.name)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TypeMeta {
    pub kind: String,
}

impl TypeMeta {
    pub fn new(kind: &str) -> Self { Self { kind: kind.to_string() } }
}

/// Warning event attached to a pod or workload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Warning {
    pub reason: String,
    pub message: String,
    pub object_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

pub fn is_warning(e: &Event) -> bool { e.type_.as_deref() == Some("Warning") }

/// Last time an event was observed: `lastTimestamp`, else `eventTime`, else creation time.
pub fn event_last_seen(e: &Event) -> Option<DateTime<Utc>> {
    e.last_timestamp
        .as_ref()
        .map(|t| t.0)
        .or_else(|| e.event_time.as_ref().map(|t| t.0))
        .or_else(|| e.metadata.creation_timestamp.as_ref().map(|t| t.0))
}

pub fn event_first_seen(e: &Event) -> Option<DateTime<Utc>> {
    e.first_timestamp
        .as_ref()
        .map(|t| t.0)
        .or_else(|| e.event_time.as_ref().map(|t| t.0))
        .or_else(|| e.metadata.creation_timestamp.as_ref().map(|t| t.0))
}

/// Warning events whose involved object is `uid`, in input order.
pub fn warnings_for(events: &[Event], uid: &str) -> Vec<Warning> {
    events
        .iter()
        .filter(|e| is_warning(e) && e.involved_object.uid.as_deref() == Some(uid))
        .map(|e| Warning {
            reason: e.reason.clone().unwrap_or_default(),
            message: e.message.clone().unwrap_or_default(),
            object_name: e.involved_object.name.clone().unwrap_or_default(),
            last_seen: event_last_seen(e),
        })
        .collect()
}

/// Aggregate pod phase counts for a workload.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodInfo {
    pub current: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desired: Option<i32>,
    pub running: i32,
    pub pending: i32,
    pub failed: i32,
    pub succeeded: i32,
    pub warnings: Vec<Warning>,
}

impl PodInfo {
    pub fn from_pods(current: i32, desired: Option<i32>, pods: &[&Pod], events: &[Event]) -> Self {
        let mut info = PodInfo { current, desired, ..Default::default() };
        for pod in pods {
            match pod.status.as_ref().and_then(|s| s.phase.as_deref()) {
                Some("Running") => info.running += 1,
                Some("Pending") => info.pending += 1,
                Some("Failed") => info.failed += 1,
                Some("Succeeded") => info.succeeded += 1,
                _ => {}
            }
            if let Some(uid) = pod.metadata.uid.as_deref() {
                info.warnings.extend(warnings_for(events, uid));
            }
        }
        info
    }
}

/// Controllers listed in `meta.ownerReferences` with `controller: true`.
pub fn is_controlled_by(meta: &KubeObjectMeta, owner_uid: &str) -> bool {
    meta.owner_references
        .as_deref()
        .unwrap_or_default()
        .iter()
        .any(|r| r.controller.unwrap_or(false) && r.uid == owner_uid)
}
