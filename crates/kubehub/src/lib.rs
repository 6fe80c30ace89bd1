//! Vista kubehub: list/get access to the cluster API behind [`ResourceStore`]

#![forbid(unsafe_code)]

use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;
use kube::{
    api::{Api, ListParams},
    core::{ApiResource, DynamicObject, GroupVersionKind},
    Client,
};
use serde::de::DeserializeOwned;
use tracing::{debug, info};
use vista_core::{DataError, ResourceKind, StatusReason};

mod metrics_server;

pub use metrics_server::{parse_quantity, MetricsServerSource};

/// Read access to cluster objects of the kinds the handlers aggregate.
///
/// Implementations return the orchestration API's own error taxonomy through
/// [`DataError::Api`] so that callers can classify failures.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// List objects of `kind`. `None` means all namespaces; ignored for cluster-scoped kinds.
    async fn list(&self, kind: ResourceKind, namespace: Option<&str>) -> Result<Vec<DynamicObject>, DataError>;

    async fn get(&self, kind: ResourceKind, namespace: Option<&str>, name: &str) -> Result<DynamicObject, DataError>;
}

/// List objects of `kind` and convert each one to the typed API struct.
pub async fn list_typed<K>(store: &dyn ResourceStore, kind: ResourceKind, namespace: Option<&str>) -> Result<Vec<K>, DataError>
where
    K: k8s_openapi::Resource + DeserializeOwned,
{
    let objs = store.list(kind, namespace).await?;
    objs.iter().map(to_typed::<K>).collect()
}

/// Convert a dynamic object into a typed `k8s-openapi` struct.
///
/// List responses usually omit `apiVersion`/`kind` on items, so both are
/// filled from `K` before decoding.
pub fn to_typed<K>(obj: &DynamicObject) -> Result<K, DataError>
where
    K: k8s_openapi::Resource + DeserializeOwned,
{
    let mut raw = serde_json::to_value(obj).map_err(|e| DataError::Decode(e.to_string()))?;
    if let Some(map) = raw.as_object_mut() {
        map.insert("apiVersion".into(), K::API_VERSION.into());
        map.insert("kind".into(), K::KIND.into());
    }
    serde_json::from_value(raw).map_err(|e| DataError::Decode(format!("{}: {}", K::KIND, e)))
}

/// Build a [`DynamicObject`] for `kind` from raw JSON, filling in type metadata if absent.
pub fn dynamic_from_raw(kind: ResourceKind, mut raw: serde_json::Value) -> Result<DynamicObject, DataError> {
    strip_managed_fields(&mut raw);
    if let Some(map) = raw.as_object_mut() {
        let api_version = if kind.group().is_empty() { kind.version().to_string() } else { format!("{}/{}", kind.group(), kind.version()) };
        map.entry("apiVersion").or_insert_with(|| api_version.into());
        map.entry("kind").or_insert_with(|| kind.kind().into());
    }
    serde_json::from_value(raw).map_err(|e| DataError::Decode(format!("{}: {}", kind.kind(), e)))
}

fn strip_managed_fields(v: &mut serde_json::Value) {
    if let Some(meta) = v.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        meta.remove("managedFields");
    }
}

/// Map a kube client error onto [`DataError`].
///
/// Status errors keep their reason; an unknown reason string falls back to the HTTP code.
pub fn map_kube_error(err: kube::Error) -> DataError {
    match err {
        kube::Error::Api(resp) => {
            let reason = resp.reason.parse::<StatusReason>().unwrap_or_else(|_| StatusReason::from_code(resp.code));
            DataError::Api { reason, code: resp.code, message: resp.message }
        }
        kube::Error::SerdeError(e) => DataError::Decode(e.to_string()),
        other => DataError::Transport(other.to_string()),
    }
}

pub fn api_resource(kind: ResourceKind) -> ApiResource {
    let gvk = GroupVersionKind::gvk(kind.group(), kind.version(), kind.kind());
    ApiResource::from_gvk_with_plural(&gvk, kind.plural())
}

/// [`ResourceStore`] backed by a live cluster.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self { Self { client } }

    /// Client from the ambient kubeconfig or in-cluster environment.
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default().await.context("building kube client")?;
        info!("kube client ready");
        Ok(Self { client })
    }

    pub fn client(&self) -> Client { self.client.clone() }

    fn api(&self, kind: ResourceKind, namespace: Option<&str>) -> Api<DynamicObject> {
        let ar = api_resource(kind);
        match namespace {
            Some(ns) if kind.namespaced() => Api::namespaced_with(self.client.clone(), ns, &ar),
            _ => Api::all_with(self.client.clone(), &ar),
        }
    }
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn list(&self, kind: ResourceKind, namespace: Option<&str>) -> Result<Vec<DynamicObject>, DataError> {
        let t0 = Instant::now();
        let list = self.api(kind, namespace).list(&ListParams::default()).await.map_err(map_kube_error)?;
        let mut items = list.items;
        for o in items.iter_mut() {
            o.metadata.managed_fields = None;
        }
        debug!(kind = %kind, ns = ?namespace, count = items.len(), took_ms = %t0.elapsed().as_millis(), "kube: list ok");
        Ok(items)
    }

    async fn get(&self, kind: ResourceKind, namespace: Option<&str>, name: &str) -> Result<DynamicObject, DataError> {
        let t0 = Instant::now();
        let mut obj = self.api(kind, namespace).get(name).await.map_err(map_kube_error)?;
        obj.metadata.managed_fields = None;
        debug!(kind = %kind, ns = ?namespace, name, took_ms = %t0.elapsed().as_millis(), "kube: get ok");
        Ok(obj)
    }
}
