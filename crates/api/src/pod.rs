//! Pod list: pods plus warning events, with optional cumulative metrics.

use std::time::Instant;

use k8s_openapi::api::core::v1::{Event, Pod};
use serde::{Deserialize, Serialize};
use tracing::info;
use vista_channels::NamespaceQuery;
use vista_core::{property, Cell, ComparableValue, DataError, ListMeta, ResourceKind, ResourceSelector};
use vista_dataselect::{DataSelectQuery, Metric};

use crate::common::{warnings_for, ObjectMeta, TypeMeta, Warning};
use crate::{collect, InProcApi};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodDto {
    pub object_meta: ObjectMeta,
    pub type_meta: TypeMeta,
    pub status: String,
    pub restart_count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    pub container_images: Vec<String>,
    pub warnings: Vec<Warning>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodList {
    pub list_meta: ListMeta,
    pub pods: Vec<PodDto>,
    pub cumulative_metrics: Vec<Metric>,
    pub errors: Vec<DataError>,
}

/// Display status: the first non-running container reason wins over the pod phase.
pub fn pod_status(pod: &Pod) -> String {
    if pod.metadata.deletion_timestamp.is_some() {
        return "Terminating".to_string();
    }
    let Some(status) = pod.status.as_ref() else { return "Unknown".to_string() };
    let mut reason = status.reason.clone().or_else(|| status.phase.clone()).unwrap_or_else(|| "Unknown".to_string());

    for cs in status.init_container_statuses.as_deref().unwrap_or_default() {
        let Some(state) = cs.state.as_ref() else { continue };
        if let Some(t) = state.terminated.as_ref().filter(|t| t.exit_code != 0) {
            return format!("Init:{}", t.reason.clone().unwrap_or_else(|| format!("ExitCode:{}", t.exit_code)));
        }
        if let Some(w) = state.waiting.as_ref().and_then(|w| w.reason.as_deref()).filter(|r| *r != "PodInitializing") {
            return format!("Init:{}", w);
        }
    }

    for cs in status.container_statuses.as_deref().unwrap_or_default() {
        let Some(state) = cs.state.as_ref() else { continue };
        if let Some(r) = state.waiting.as_ref().and_then(|w| w.reason.clone()) {
            reason = r;
        } else if let Some(t) = state.terminated.as_ref() {
            reason = t.reason.clone().unwrap_or_else(|| format!("ExitCode:{}", t.exit_code));
        }
    }
    reason
}

pub fn restart_count(pod: &Pod) -> i32 {
    pod.status
        .as_ref()
        .and_then(|s| s.container_statuses.as_deref())
        .map(|cs| cs.iter().map(|c| c.restart_count).sum())
        .unwrap_or(0)
}

/// Selection adapter over a pod.
#[derive(Debug, Clone)]
pub struct PodCell {
    pub pod: Pod,
    meta: ObjectMeta,
}

impl PodCell {
    pub fn new(pod: Pod) -> Self {
        let meta = ObjectMeta::from(&pod.metadata);
        Self { pod, meta }
    }
}

impl Cell for PodCell {
    fn property(&self, name: &str) -> Option<ComparableValue> {
        match name {
            property::STATUS => Some(pod_status(&self.pod).into()),
            property::RESTARTS => Some(i64::from(restart_count(&self.pod)).into()),
            property::NODE => self.pod.spec.as_ref().and_then(|s| s.node_name.as_deref()).map(Into::into),
            other => self.meta.property(other),
        }
    }

    fn resource_selector(&self) -> Option<ResourceSelector> {
        Some(ResourceSelector {
            kind: ResourceKind::Pod,
            namespace: self.meta.namespace.clone(),
            name: self.meta.name.clone(),
            uid: self.meta.uid.clone(),
        })
    }
}

pub fn to_pod(cell: PodCell, events: &[Event]) -> PodDto {
    let warnings = warnings_for(events, &cell.meta.uid);
    let pod = cell.pod;
    PodDto {
        status: pod_status(&pod),
        restart_count: restart_count(&pod),
        node_name: pod.spec.as_ref().and_then(|s| s.node_name.clone()),
        container_images: pod
            .spec
            .as_ref()
            .map(|s| s.containers.iter().filter_map(|c| c.image.clone()).collect())
            .unwrap_or_default(),
        warnings,
        type_meta: TypeMeta::new(ResourceKind::Pod.kind()),
        object_meta: cell.meta,
    }
}

/// Pods are the primary fetch; events only contribute warnings.
pub(crate) async fn pod_list(ctx: &InProcApi, nsq: &NamespaceQuery, query: &DataSelectQuery) -> Result<PodList, DataError> {
    let t0 = Instant::now();
    let mut channels = ctx.channels(nsq.clone()).pods().events().build();

    let (pods, err) = collect(channels.pod_list.take()).await;
    let errors = ctx.primary(err)?;
    let (events, err) = collect(channels.event_list.take()).await;
    let errors = ctx.policy().append_error(err, errors)?;

    let cells: Vec<PodCell> = pods.into_iter().map(PodCell::new).collect();
    let page = ctx.select(cells, query, errors).await?;
    let pods: Vec<PodDto> = page.items.into_iter().map(|c| to_pod(c, &events)).collect();
    info!(total = page.list_meta.total_items, page = pods.len(), errors = page.errors.len(), took_ms = %t0.elapsed().as_millis(), "api: pod list ok");
    Ok(PodList { list_meta: page.list_meta, pods, cumulative_metrics: page.cumulative_metrics, errors: page.errors })
}
