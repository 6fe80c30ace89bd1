#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use vista_api::{list_json, ApiError, InProcApi, VistaApi};
use vista_channels::NamespaceQuery;
use vista_core::{DataError, ErrorPolicy, ResourceKind, StatusReason};
use vista_dataselect::{AggregationMode, DataSelectQuery, MetricClient, MetricQuery, SortBy, CPU_USAGE_RATE};
use vista_store::{MemoryStore, StaticMetrics};

fn pod(name: &str, ns: &str, uid: &str, phase: &str) -> serde_json::Value {
    json!({
        "metadata": { "name": name, "namespace": ns, "uid": uid, "creationTimestamp": "2024-01-01T00:00:00Z" },
        "spec": { "nodeName": "node-1", "containers": [{ "name": "app", "image": "nginx:1.25" }] },
        "status": { "phase": phase }
    })
}

fn warning(uid: &str, ns: &str, involved: &str, reason: &str) -> serde_json::Value {
    json!({
        "metadata": { "name": format!("ev-{}", uid), "namespace": ns, "uid": uid },
        "involvedObject": { "kind": "Pod", "name": "p", "namespace": ns, "uid": involved },
        "reason": reason,
        "message": "Back-off restarting failed container",
        "type": "Warning"
    })
}

fn five_pods() -> MemoryStore {
    MemoryStore::new().with_objects(
        ResourceKind::Pod,
        [
            pod("web-1", "prod", "p-1", "Running"),
            pod("web-2", "dev", "p-2", "Running"),
            pod("db-1", "prod", "p-3", "Pending"),
            pod("cache", "dev", "p-4", "Running"),
            pod("batch", "ops", "p-5", "Succeeded"),
        ],
    )
}

fn api(store: MemoryStore) -> InProcApi {
    let store: Arc<dyn vista_kubehub::ResourceStore> = Arc::new(store);
    InProcApi::new(store).with_policy(ErrorPolicy::default())
}

#[tokio::test]
async fn namespace_filter_selects_two_of_five() {
    let api = api(five_pods());
    let q = DataSelectQuery::default_data_select().with_filter("namespace", "prod");
    let list = api.pods(&NamespaceQuery::All, &q).await.unwrap();
    assert_eq!(list.list_meta.total_items, 2);
    let names: Vec<_> = list.pods.iter().map(|p| p.object_meta.name.as_str()).collect();
    assert_eq!(names, vec!["web-1", "db-1"]);
    assert!(list.errors.is_empty());
}

#[tokio::test]
async fn non_critical_event_failure_keeps_data() {
    let store = five_pods();
    store.fail(ResourceKind::Event, DataError::api(StatusReason::Forbidden, "events is forbidden"));
    let list = api(store).pods(&NamespaceQuery::All, &DataSelectQuery::no_data_select()).await.unwrap();
    assert_eq!(list.pods.len(), 5);
    assert_eq!(list.errors, vec![DataError::api(StatusReason::Forbidden, "events is forbidden")]);
}

#[tokio::test]
async fn critical_primary_failure_skips_secondaries() {
    let store = five_pods();
    store.fail(ResourceKind::Pod, DataError::api(StatusReason::Unauthorized, "token expired"));
    store.fail(ResourceKind::Event, DataError::api(StatusReason::InternalError, "events broke"));
    store.delay(ResourceKind::Event, Duration::from_secs(5));
    let t0 = Instant::now();
    let err = api(store).pods(&NamespaceQuery::All, &DataSelectQuery::no_data_select()).await.unwrap_err();
    assert_eq!(err, ApiError::Data(DataError::api(StatusReason::Unauthorized, "token expired")));
    assert!(t0.elapsed() < Duration::from_secs(2), "events channel must not be awaited");
}

#[tokio::test]
async fn strict_policy_turns_any_failure_fatal() {
    let store = five_pods();
    store.fail(ResourceKind::Event, DataError::api(StatusReason::Forbidden, "events is forbidden"));
    let api = api(store).with_policy(ErrorPolicy::strict());
    let err = api.pods(&NamespaceQuery::All, &DataSelectQuery::no_data_select()).await.unwrap_err();
    assert!(matches!(err, ApiError::Data(DataError::Api { reason: StatusReason::Forbidden, .. })));
}

#[tokio::test]
async fn pods_carry_their_warnings() {
    let store = five_pods().with_objects(
        ResourceKind::Event,
        [warning("e-1", "dev", "p-2", "BackOff"), warning("e-2", "prod", "p-9", "Failed")],
    );
    let q = DataSelectQuery::no_data_select().with_filter("name", "web-2");
    let list = api(store).pods(&NamespaceQuery::parse("dev"), &q).await.unwrap();
    assert_eq!(list.pods.len(), 1);
    assert_eq!(list.pods[0].warnings.len(), 1);
    assert_eq!(list.pods[0].warnings[0].reason, "BackOff");
    assert_eq!(list.pods[0].container_images, vec!["nginx:1.25"]);
}

#[tokio::test]
async fn explicit_namespaces_fan_out_and_merge() {
    let store = five_pods();
    store.fail_namespace(ResourceKind::Event, "ops", DataError::api(StatusReason::Forbidden, "ops events are forbidden"));
    let list = api(store)
        .pods(&NamespaceQuery::parse("dev,ops,prod"), &DataSelectQuery::no_data_select())
        .await
        .unwrap();
    let names: Vec<_> = list.pods.iter().map(|p| p.object_meta.name.as_str()).collect();
    assert_eq!(names, vec!["web-2", "cache", "batch", "web-1", "db-1"]);
    assert_eq!(list.errors, vec![DataError::api(StatusReason::Forbidden, "ops events are forbidden")]);
}

#[tokio::test]
async fn repeated_namespaces_list_once() {
    let q = DataSelectQuery::no_data_select();
    let list = api(five_pods()).pods(&NamespaceQuery::parse("ops,ops"), &q).await.unwrap();
    let names: Vec<_> = list.pods.iter().map(|p| p.object_meta.name.as_str()).collect();
    assert_eq!(names, vec!["batch"]);
    assert_eq!(list.list_meta.total_items, 1);
}

#[tokio::test]
async fn primary_failure_is_fatal_whatever_the_reason() {
    let q = DataSelectQuery::no_data_select();
    let store = five_pods();
    store.fail(ResourceKind::Pod, DataError::api(StatusReason::Forbidden, "pods is forbidden"));
    let err = api(store).pods(&NamespaceQuery::All, &q).await.unwrap_err();
    assert_eq!(err, ApiError::Data(DataError::api(StatusReason::Forbidden, "pods is forbidden")));

    let store = five_pods();
    store.fail_namespace(ResourceKind::Pod, "ops", DataError::api(StatusReason::NotFound, "namespace ops not found"));
    let err = api(store).pods(&NamespaceQuery::parse("dev,ops"), &q).await.unwrap_err();
    assert!(matches!(err, ApiError::Data(DataError::Api { reason: StatusReason::NotFound, .. })));

    let store = MemoryStore::new();
    store.fail(ResourceKind::Service, DataError::api(StatusReason::Forbidden, "services is forbidden"));
    store.fail(ResourceKind::Deployment, DataError::api(StatusReason::Gone, "gone"));
    store.fail(ResourceKind::Event, DataError::api(StatusReason::TooManyRequests, "slow down"));
    let api = api(store);
    assert!(api.services(&NamespaceQuery::All, &q).await.is_err());
    assert!(api.deployments(&NamespaceQuery::All, &q).await.is_err());
    assert!(api.events(&NamespaceQuery::All, &q).await.is_err());
}

#[tokio::test]
async fn secondary_errors_follow_drain_order() {
    let store = MemoryStore::new().with_objects(
        ResourceKind::Deployment,
        [json!({ "metadata": { "name": "web", "namespace": "prod", "uid": "d-1" },
                 "spec": { "replicas": 1, "selector": {}, "template": {} } })],
    );
    store.fail(ResourceKind::Pod, DataError::api(StatusReason::NotFound, "pods"));
    store.fail(ResourceKind::Event, DataError::api(StatusReason::Forbidden, "events"));
    store.fail(ResourceKind::ReplicaSet, DataError::api(StatusReason::MethodNotAllowed, "replicasets"));
    let list = api(store).deployments(&NamespaceQuery::All, &DataSelectQuery::no_data_select()).await.unwrap();
    assert_eq!(list.deployments.len(), 1);
    assert_eq!(
        list.errors,
        vec![
            DataError::api(StatusReason::NotFound, "pods"),
            DataError::api(StatusReason::Forbidden, "events"),
            DataError::api(StatusReason::MethodNotAllowed, "replicasets"),
        ]
    );
}

#[tokio::test]
async fn critical_secondary_stops_the_drain() {
    let store = MemoryStore::new().with_objects(
        ResourceKind::Deployment,
        [json!({ "metadata": { "name": "web", "namespace": "prod", "uid": "d-1" },
                 "spec": { "replicas": 1, "selector": {}, "template": {} } })],
    );
    store.fail(ResourceKind::Pod, DataError::api(StatusReason::Forbidden, "pods"));
    store.fail(ResourceKind::Event, DataError::api(StatusReason::InternalError, "events broke"));
    store.delay(ResourceKind::ReplicaSet, Duration::from_secs(5));
    let t0 = Instant::now();
    let err = api(store).deployments(&NamespaceQuery::All, &DataSelectQuery::no_data_select()).await.unwrap_err();
    assert_eq!(err, ApiError::Data(DataError::api(StatusReason::InternalError, "events broke")));
    assert!(t0.elapsed() < Duration::from_secs(2), "replica set channel must not be awaited");
}

#[tokio::test]
async fn metrics_sort_and_cumulate() {
    let metrics = StaticMetrics::new()
        .with("p-1", CPU_USAGE_RATE, &[(100, 40)])
        .with("p-2", CPU_USAGE_RATE, &[(100, 250)])
        .with("p-3", CPU_USAGE_RATE, &[(100, 10)])
        .with("p-4", CPU_USAGE_RATE, &[(100, 90)])
        .failing("p-5");
    let api = api(five_pods()).with_metrics(MetricClient::new(Arc::new(metrics), 2));
    let q = DataSelectQuery::no_data_select()
        .with_metrics(MetricQuery::new(vec![CPU_USAGE_RATE.to_string()], vec![AggregationMode::Sum, AggregationMode::Max]))
        .with_sort(SortBy::desc("metric"))
        .with_pagination(3, 1);
    let list = api.pods(&NamespaceQuery::All, &q).await.unwrap();
    let names: Vec<_> = list.pods.iter().map(|p| p.object_meta.name.as_str()).collect();
    assert_eq!(names, vec!["web-2", "cache", "web-1"]);
    assert_eq!(list.list_meta.total_items, 5);

    let sum = list.cumulative_metrics.iter().find(|m| m.aggregation == AggregationMode::Sum).unwrap();
    assert_eq!(sum.data_points.iter().map(|p| p.y).collect::<Vec<_>>(), vec![390]);
    let max = list.cumulative_metrics.iter().find(|m| m.aggregation == AggregationMode::Max).unwrap();
    assert_eq!(max.data_points[0].y, 250);
    assert_eq!(list.errors.len(), 1);
    assert!(matches!(list.errors[0], DataError::Metric(_)));
}

#[tokio::test]
async fn metrics_without_a_source_are_reported() {
    let q = DataSelectQuery::default_data_select_with_metrics();
    let list = api(five_pods()).pods(&NamespaceQuery::All, &q).await.unwrap();
    assert_eq!(list.pods.len(), 5);
    assert!(list.cumulative_metrics.is_empty());
    assert_eq!(list.errors, vec![DataError::Metric("no metric source configured".into())]);
}

#[tokio::test]
async fn deployments_join_pods_through_replica_sets() {
    let owner = |uid: &str| json!([{ "apiVersion": "apps/v1", "kind": "X", "name": "o", "uid": uid, "controller": true }]);
    let store = MemoryStore::new()
        .with_objects(
            ResourceKind::Deployment,
            [
                json!({ "metadata": { "name": "web", "namespace": "prod", "uid": "d-1" },
                        "spec": { "replicas": 2, "selector": {}, "template": { "spec": { "containers": [{ "name": "app", "image": "web:2" }] } } },
                        "status": { "replicas": 2 } }),
                json!({ "metadata": { "name": "api", "namespace": "prod", "uid": "d-2" },
                        "spec": { "replicas": 1, "selector": {}, "template": {} } }),
            ],
        )
        .with_objects(
            ResourceKind::ReplicaSet,
            [json!({ "metadata": { "name": "web-1", "namespace": "prod", "uid": "rs-1", "ownerReferences": owner("d-1") },
                     "spec": { "selector": {} } })],
        )
        .with_objects(
            ResourceKind::Pod,
            [
                json!({ "metadata": { "name": "web-1-a", "namespace": "prod", "uid": "p-1", "ownerReferences": owner("rs-1") },
                        "status": { "phase": "Running" } }),
                json!({ "metadata": { "name": "web-1-b", "namespace": "prod", "uid": "p-2", "ownerReferences": owner("rs-1") },
                        "status": { "phase": "Pending" } }),
            ],
        )
        .with_objects(ResourceKind::Event, [warning("e-1", "prod", "p-2", "FailedScheduling")]);

    let q = DataSelectQuery::no_data_select().with_sort(SortBy::desc("name"));
    let list = api(store).deployments(&NamespaceQuery::All, &q).await.unwrap();
    assert_eq!(list.list_meta.total_items, 2);
    let web = &list.deployments[0];
    assert_eq!(web.object_meta.name, "web");
    assert_eq!((web.pods.current, web.pods.desired), (2, Some(2)));
    assert_eq!((web.pods.running, web.pods.pending), (1, 1));
    assert_eq!(web.pods.warnings.len(), 1);
    assert_eq!(web.container_images, vec!["web:2"]);
    assert_eq!(list.deployments[1].pods.current, 0);
    assert_eq!((list.status.failed, list.status.running), (1, 1));
}

#[tokio::test]
async fn services_and_events_list() {
    let store = MemoryStore::new()
        .with_objects(
            ResourceKind::Service,
            [
                json!({ "metadata": { "name": "web", "namespace": "prod", "uid": "s-1" }, "spec": { "type": "NodePort" } }),
                json!({ "metadata": { "name": "db", "namespace": "prod", "uid": "s-2" }, "spec": { "clusterIP": "10.0.0.2" } }),
            ],
        )
        .with_objects(ResourceKind::Event, [warning("e-1", "prod", "p-1", "BackOff")]);
    let api = api(store);
    let svcs = api.services(&NamespaceQuery::All, &DataSelectQuery::no_data_select().with_filter("type", "Node")).await.unwrap();
    assert_eq!(svcs.services.len(), 1);
    assert_eq!(svcs.services[0].internal_endpoint.host, "web.prod");

    let evs = api.events(&NamespaceQuery::All, &DataSelectQuery::default_data_select()).await.unwrap();
    assert_eq!(evs.events.len(), 1);
    assert_eq!(evs.events[0].reason, "BackOff");
}

#[tokio::test]
async fn json_dispatch_and_raw_access() {
    let api = api(five_pods());
    let v = list_json(&api, "pods", &NamespaceQuery::All, &DataSelectQuery::default_data_select()).await.unwrap();
    assert_eq!(v["listMeta"]["totalItems"], 5);
    assert!(v["cumulativeMetrics"].as_array().unwrap().is_empty());
    assert_eq!(v["pods"][0]["objectMeta"]["name"], "web-1");

    let err = list_json(&api, "ingresses", &NamespaceQuery::All, &DataSelectQuery::default_data_select()).await.unwrap_err();
    assert!(matches!(err, ApiError::Validation(_)));

    let raw = api.get_raw(ResourceKind::Pod, Some("dev"), "cache").await.unwrap();
    let obj: serde_json::Value = serde_json::from_slice(&raw).unwrap();
    assert_eq!(obj["metadata"]["uid"], "p-4");
    let missing = api.get_raw(ResourceKind::Pod, Some("dev"), "nope").await.unwrap_err();
    assert!(matches!(missing, ApiError::Data(DataError::Api { reason: StatusReason::NotFound, .. })));
    assert!(matches!(api.get_raw(ResourceKind::Pod, None, "cache").await, Err(ApiError::Validation(_))));
}
