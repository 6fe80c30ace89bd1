#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use vista_channels::{pod_list_channel, NamespaceQuery, ResourceChannel, ResourceChannels};
use vista_core::{DataError, ResourceKind, StatusReason};
use vista_kubehub::ResourceStore;
use vista_store::MemoryStore;

fn pod(n: usize, ns: &str) -> serde_json::Value {
    serde_json::json!({ "metadata": { "name": format!("p{}", n), "namespace": ns, "uid": format!("u-{}", n) } })
}

fn store_with(nss: &[&str]) -> MemoryStore {
    MemoryStore::new().with_objects(ResourceKind::Pod, nss.iter().enumerate().map(|(i, ns)| pod(i, ns)))
}

fn nsq(list: &[&str]) -> NamespaceQuery { NamespaceQuery::new(list.iter().map(|s| s.to_string()).collect()) }

#[tokio::test]
async fn undrained_writers_still_finish() {
    let nss = ["a", "b", "c", "d", "e"];
    let store = store_with(&nss);
    store.delay(ResourceKind::Pod, Duration::from_millis(10));
    let store: Arc<dyn ResourceStore> = Arc::new(store);

    let mut ch = pod_list_channel(store, &nsq(&nss));
    assert_eq!(ch.writers(), 5);
    for _ in 0..2 {
        let d = ch.recv().await.expect("writer delivered");
        assert_eq!(d.list.map(|l| l.len()), Some(1));
    }
    let handles = ch.detach();
    assert_eq!(handles.len(), 5);
    for h in handles {
        tokio::time::timeout(Duration::from_secs(2), h).await.expect("writer finished").expect("writer did not panic");
    }
}

#[tokio::test]
async fn collect_unions_in_namespace_order() {
    let store: Arc<dyn ResourceStore> = Arc::new(store_with(&["x", "y", "z", "y"]));
    let (pods, err) = pod_list_channel(store, &nsq(&["z", "y"])).collect().await;
    assert!(err.is_none());
    let names: Vec<_> = pods.iter().filter_map(|p| p.metadata.name.as_deref()).collect();
    assert_eq!(names, vec!["p2", "p1", "p3"]);
}

#[tokio::test]
async fn first_error_in_namespace_order_with_partial_data() {
    let store = store_with(&["a", "b", "c"]);
    store.fail_namespace(ResourceKind::Pod, "c", DataError::api(StatusReason::Forbidden, "c is forbidden"));
    store.fail_namespace(ResourceKind::Pod, "b", DataError::api(StatusReason::NotFound, "b is gone"));
    let store: Arc<dyn ResourceStore> = Arc::new(store);
    let (pods, err) = pod_list_channel(store, &nsq(&["a", "b", "c"])).collect().await;
    assert_eq!(pods.len(), 1);
    assert_eq!(err.and_then(|e| e.reason()), Some(StatusReason::NotFound));
}

#[tokio::test]
async fn cluster_scoped_kinds_ignore_namespaces() {
    let store = MemoryStore::new().with_objects(
        ResourceKind::Node,
        [serde_json::json!({ "metadata": { "name": "n1", "uid": "n-1" } })],
    );
    let store: Arc<dyn ResourceStore> = Arc::new(store);
    let ch: ResourceChannel<Vec<k8s_openapi::api::core::v1::Node>> =
        ResourceChannel::list(store, ResourceKind::Node, &nsq(&["a", "b"]));
    assert_eq!(ch.writers(), 1);
    let (nodes, err) = ch.collect().await;
    assert_eq!(nodes.len(), 1);
    assert!(err.is_none());
}

#[tokio::test]
async fn registry_starts_requested_kinds_only() {
    let store: Arc<dyn ResourceStore> = Arc::new(store_with(&["a"]));
    let mut channels = ResourceChannels::builder(store, NamespaceQuery::All).pods().events().build();
    assert!(channels.service_list.is_none());
    let events = channels.event_list.take().expect("events requested");
    let (evs, err) = events.collect().await;
    assert!(evs.is_empty() && err.is_none());
    for h in channels.detach() {
        tokio::time::timeout(Duration::from_secs(2), h).await.expect("writer finished").expect("no panic");
    }
}
