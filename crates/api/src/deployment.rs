//! Deployment list: deployments joined with their replica sets, pods and warning events.

use std::time::Instant;

use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use k8s_openapi::api::core::v1::{Event, Pod};
use serde::{Deserialize, Serialize};
use tracing::info;
use vista_channels::NamespaceQuery;
use vista_core::{property, Cell, ComparableValue, DataError, ListMeta, ResourceKind};
use vista_dataselect::{DataSelectQuery, Metric};

use crate::common::{is_controlled_by, ObjectMeta, PodInfo, TypeMeta};
use crate::{collect, InProcApi};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentDto {
    pub object_meta: ObjectMeta,
    pub type_meta: TypeMeta,
    pub pods: PodInfo,
    pub container_images: Vec<String>,
    pub init_container_images: Vec<String>,
}

/// Deployments bucketed by the health of their pods.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStatus {
    pub running: usize,
    pub pending: usize,
    pub failed: usize,
    pub succeeded: usize,
}

impl ResourceStatus {
    /// Warnings mark a workload failed, then pending pods pending; anything else is running.
    pub fn from_pod_infos<'a>(infos: impl IntoIterator<Item = &'a PodInfo>) -> Self {
        let mut s = ResourceStatus::default();
        for info in infos {
            if !info.warnings.is_empty() {
                s.failed += 1;
            } else if info.pending > 0 {
                s.pending += 1;
            } else {
                s.running += 1;
            }
        }
        s
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentList {
    pub list_meta: ListMeta,
    pub status: ResourceStatus,
    pub deployments: Vec<DeploymentDto>,
    pub cumulative_metrics: Vec<Metric>,
    pub errors: Vec<DataError>,
}

#[derive(Debug, Clone)]
pub struct DeploymentCell {
    pub deployment: Deployment,
    meta: ObjectMeta,
}

impl DeploymentCell {
    pub fn new(deployment: Deployment) -> Self {
        let meta = ObjectMeta::from(&deployment.metadata);
        Self { deployment, meta }
    }
}

impl Cell for DeploymentCell {
    fn property(&self, name: &str) -> Option<ComparableValue> {
        match name {
            property::REPLICAS => self.deployment.spec.as_ref().and_then(|s| s.replicas).map(|r| i64::from(r).into()),
            other => self.meta.property(other),
        }
    }
}

/// Pods controlled by any replica set that `deployment` controls.
pub fn deployment_pods<'a>(deployment: &Deployment, replica_sets: &[ReplicaSet], pods: &'a [Pod]) -> Vec<&'a Pod> {
    let Some(uid) = deployment.metadata.uid.as_deref() else { return Vec::new() };
    let rs_uids: Vec<&str> = replica_sets
        .iter()
        .filter(|rs| is_controlled_by(&rs.metadata, uid))
        .filter_map(|rs| rs.metadata.uid.as_deref())
        .collect();
    pods.iter().filter(|p| rs_uids.iter().any(|rs| is_controlled_by(&p.metadata, rs))).collect()
}

fn images(containers: Option<&Vec<k8s_openapi::api::core::v1::Container>>) -> Vec<String> {
    containers.map(|cs| cs.iter().filter_map(|c| c.image.clone()).collect()).unwrap_or_default()
}

pub fn to_deployment(cell: DeploymentCell, replica_sets: &[ReplicaSet], pods: &[Pod], events: &[Event]) -> DeploymentDto {
    let d = &cell.deployment;
    let owned = deployment_pods(d, replica_sets, pods);
    let current = d.status.as_ref().and_then(|s| s.replicas).unwrap_or(0);
    let desired = d.spec.as_ref().and_then(|s| s.replicas);
    let pod_spec = d.spec.as_ref().and_then(|s| s.template.spec.as_ref());
    DeploymentDto {
        pods: PodInfo::from_pods(current, desired, &owned, events),
        container_images: images(pod_spec.map(|s| &s.containers)),
        init_container_images: images(pod_spec.and_then(|s| s.init_containers.as_ref())),
        type_meta: TypeMeta::new(ResourceKind::Deployment.kind()),
        object_meta: cell.meta,
    }
}

/// Deployments are primary; pods, events and replica sets only enrich the rows.
pub(crate) async fn deployment_list(
    ctx: &InProcApi,
    nsq: &NamespaceQuery,
    query: &DataSelectQuery,
) -> Result<DeploymentList, DataError> {
    let t0 = Instant::now();
    let mut channels = ctx.channels(nsq.clone()).deployments().pods().events().replica_sets().build();

    let (deployments, err) = collect(channels.deployment_list.take()).await;
    let errors = ctx.primary(err)?;
    let (pods, err) = collect(channels.pod_list.take()).await;
    let errors = ctx.policy().append_error(err, errors)?;
    let (events, err) = collect(channels.event_list.take()).await;
    let errors = ctx.policy().append_error(err, errors)?;
    let (replica_sets, err) = collect(channels.replica_set_list.take()).await;
    let errors = ctx.policy().append_error(err, errors)?;

    let cells: Vec<DeploymentCell> = deployments.into_iter().map(DeploymentCell::new).collect();
    let page = ctx.select(cells, query, errors).await?;
    let deployments: Vec<DeploymentDto> =
        page.items.into_iter().map(|c| to_deployment(c, &replica_sets, &pods, &events)).collect();
    let status = ResourceStatus::from_pod_infos(deployments.iter().map(|d| &d.pods));
    info!(total = page.list_meta.total_items, page = deployments.len(), errors = page.errors.len(), took_ms = %t0.elapsed().as_millis(), "api: deployment list ok");
    Ok(DeploymentList {
        list_meta: page.list_meta,
        status,
        deployments,
        cumulative_metrics: page.cumulative_metrics,
        errors: page.errors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta as KubeMeta, OwnerReference};

    fn meta(name: &str, uid: &str, owner: Option<&str>) -> KubeMeta {
        KubeMeta {
            name: Some(name.into()),
            uid: Some(uid.into()),
            owner_references: owner.map(|o| vec![OwnerReference { uid: o.into(), controller: Some(true), ..Default::default() }]),
            ..Default::default()
        }
    }

    #[test]
    fn pods_are_joined_through_replica_sets() {
        let d = Deployment { metadata: meta("web", "d-1", None), ..Default::default() };
        let rss = vec![
            ReplicaSet { metadata: meta("web-1", "rs-1", Some("d-1")), ..Default::default() },
            ReplicaSet { metadata: meta("other-1", "rs-2", Some("d-2")), ..Default::default() },
        ];
        let pods = vec![
            Pod { metadata: meta("web-1-a", "p-1", Some("rs-1")), ..Default::default() },
            Pod { metadata: meta("other-1-a", "p-2", Some("rs-2")), ..Default::default() },
            Pod { metadata: meta("web-1-b", "p-3", Some("rs-1")), ..Default::default() },
        ];
        let names: Vec<_> = deployment_pods(&d, &rss, &pods).iter().filter_map(|p| p.metadata.name.clone()).collect();
        assert_eq!(names, vec!["web-1-a", "web-1-b"]);
    }

    #[test]
    fn status_buckets() {
        let warned = PodInfo { warnings: vec![crate::common::Warning {
            reason: "BackOff".into(), message: String::new(), object_name: "p".into(), last_seen: None,
        }], ..Default::default() };
        let pending = PodInfo { pending: 1, ..Default::default() };
        let ok = PodInfo { running: 2, ..Default::default() };
        let s = ResourceStatus::from_pod_infos([&warned, &pending, &ok]);
        assert_eq!(s, ResourceStatus { running: 1, pending: 1, failed: 1, succeeded: 0 });
    }
}
