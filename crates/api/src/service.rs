//! Service list.

use std::collections::BTreeMap;
use std::time::Instant;

use k8s_openapi::api::core::v1::Service;
use serde::{Deserialize, Serialize};
use tracing::info;
use vista_channels::NamespaceQuery;
use vista_core::{property, Cell, ComparableValue, DataError, ListMeta, ResourceKind};
use vista_dataselect::{DataSelectQuery, Metric};

use crate::common::{ObjectMeta, TypeMeta};
use crate::{collect, InProcApi};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServicePort {
    pub port: i32,
    pub protocol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_port: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub host: String,
    pub ports: Vec<ServicePort>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDto {
    pub object_meta: ObjectMeta,
    pub type_meta: TypeMeta,
    pub internal_endpoint: Endpoint,
    pub external_endpoints: Vec<Endpoint>,
    pub selector: BTreeMap<String, String>,
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_ip: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceList {
    pub list_meta: ListMeta,
    pub services: Vec<ServiceDto>,
    pub cumulative_metrics: Vec<Metric>,
    pub errors: Vec<DataError>,
}

#[derive(Debug, Clone)]
pub struct ServiceCell {
    pub service: Service,
    meta: ObjectMeta,
}

impl ServiceCell {
    pub fn new(service: Service) -> Self {
        let meta = ObjectMeta::from(&service.metadata);
        Self { service, meta }
    }
}

fn service_type(s: &Service) -> String {
    s.spec.as_ref().and_then(|sp| sp.type_.clone()).unwrap_or_else(|| "ClusterIP".to_string())
}

impl Cell for ServiceCell {
    fn property(&self, name: &str) -> Option<ComparableValue> {
        match name {
            property::TYPE => Some(service_type(&self.service).into()),
            other => self.meta.property(other),
        }
    }
}

fn ports(s: &Service) -> Vec<ServicePort> {
    s.spec
        .as_ref()
        .and_then(|sp| sp.ports.as_ref())
        .map(|ps| {
            ps.iter()
                .map(|p| ServicePort {
                    port: p.port,
                    protocol: p.protocol.clone().unwrap_or_else(|| "TCP".to_string()),
                    node_port: p.node_port,
                })
                .collect()
        })
        .unwrap_or_default()
}

/// In-cluster DNS name of the service with its ports.
pub fn internal_endpoint(s: &Service) -> Endpoint {
    let name = s.metadata.name.clone().unwrap_or_default();
    let host = match s.metadata.namespace.as_deref() {
        Some(ns) if ns != "default" => format!("{}.{}", name, ns),
        _ => name,
    };
    Endpoint { host, ports: ports(s) }
}

/// Load balancer ingress points, then external IPs.
pub fn external_endpoints(s: &Service) -> Vec<Endpoint> {
    let ps = ports(s);
    let mut out = Vec::new();
    let ingress = s.status.as_ref().and_then(|st| st.load_balancer.as_ref()).and_then(|lb| lb.ingress.as_ref());
    for ing in ingress.into_iter().flatten() {
        if let Some(host) = ing.hostname.clone().or_else(|| ing.ip.clone()) {
            out.push(Endpoint { host, ports: ps.clone() });
        }
    }
    for ip in s.spec.as_ref().and_then(|sp| sp.external_ips.as_ref()).into_iter().flatten() {
        out.push(Endpoint { host: ip.clone(), ports: ps.clone() });
    }
    out
}

pub fn to_service(cell: ServiceCell) -> ServiceDto {
    let s = &cell.service;
    ServiceDto {
        internal_endpoint: internal_endpoint(s),
        external_endpoints: external_endpoints(s),
        selector: s.spec.as_ref().and_then(|sp| sp.selector.clone()).unwrap_or_default(),
        type_: service_type(s),
        cluster_ip: s.spec.as_ref().and_then(|sp| sp.cluster_ip.clone()),
        type_meta: TypeMeta::new(ResourceKind::Service.kind()),
        object_meta: cell.meta,
    }
}

pub(crate) async fn service_list(ctx: &InProcApi, nsq: &NamespaceQuery, query: &DataSelectQuery) -> Result<ServiceList, DataError> {
    let t0 = Instant::now();
    let mut channels = ctx.channels(nsq.clone()).services().build();
    let (services, err) = collect(channels.service_list.take()).await;
    let errors = ctx.primary(err)?;

    let cells: Vec<ServiceCell> = services.into_iter().map(ServiceCell::new).collect();
    let page = ctx.select(cells, query, errors).await?;
    let services: Vec<ServiceDto> = page.items.into_iter().map(to_service).collect();
    info!(total = page.list_meta.total_items, page = services.len(), took_ms = %t0.elapsed().as_millis(), "api: service list ok");
    Ok(ServiceList { list_meta: page.list_meta, services, cumulative_metrics: page.cumulative_metrics, errors: page.errors })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{LoadBalancerIngress, LoadBalancerStatus, ServiceSpec, ServiceStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta as KubeMeta;

    #[test]
    fn endpoints() {
        let s = Service {
            metadata: KubeMeta { name: Some("web".into()), namespace: Some("prod".into()), ..Default::default() },
            spec: Some(ServiceSpec {
                type_: Some("LoadBalancer".into()),
                ports: Some(vec![k8s_openapi::api::core::v1::ServicePort { port: 80, ..Default::default() }]),
                external_ips: Some(vec!["10.0.0.9".into()]),
                ..Default::default()
            }),
            status: Some(ServiceStatus {
                load_balancer: Some(LoadBalancerStatus {
                    ingress: Some(vec![LoadBalancerIngress { ip: Some("1.2.3.4".into()), ..Default::default() }]),
                    ..Default::default()
                }),
                ..Default::default()
            }),
        };
        let int = internal_endpoint(&s);
        assert_eq!(int.host, "web.prod");
        assert_eq!(int.ports, vec![ServicePort { port: 80, protocol: "TCP".into(), node_port: None }]);
        let hosts: Vec<_> = external_endpoints(&s).into_iter().map(|e| e.host).collect();
        assert_eq!(hosts, vec!["1.2.3.4", "10.0.0.9"]);
        assert_eq!(ServiceCell::new(s).property(property::TYPE), Some(ComparableValue::Str("LoadBalancer".into())));
    }
}
