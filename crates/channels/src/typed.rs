//! Typed channel constructors and the per-request registry.

use std::sync::Arc;

use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use k8s_openapi::api::core::v1::{Event, Namespace, Node, Pod, Service};
use tokio::task::JoinHandle;
use vista_core::ResourceKind;
use vista_kubehub::ResourceStore;

use crate::{NamespaceQuery, ResourceChannel};

pub fn pod_list_channel(store: Arc<dyn ResourceStore>, nsq: &NamespaceQuery) -> ResourceChannel<Vec<Pod>> {
    ResourceChannel::list(store, ResourceKind::Pod, nsq)
}

pub fn event_list_channel(store: Arc<dyn ResourceStore>, nsq: &NamespaceQuery) -> ResourceChannel<Vec<Event>> {
    ResourceChannel::list(store, ResourceKind::Event, nsq)
}

pub fn service_list_channel(store: Arc<dyn ResourceStore>, nsq: &NamespaceQuery) -> ResourceChannel<Vec<Service>> {
    ResourceChannel::list(store, ResourceKind::Service, nsq)
}

pub fn replica_set_list_channel(store: Arc<dyn ResourceStore>, nsq: &NamespaceQuery) -> ResourceChannel<Vec<ReplicaSet>> {
    ResourceChannel::list(store, ResourceKind::ReplicaSet, nsq)
}

pub fn deployment_list_channel(store: Arc<dyn ResourceStore>, nsq: &NamespaceQuery) -> ResourceChannel<Vec<Deployment>> {
    ResourceChannel::list(store, ResourceKind::Deployment, nsq)
}

/// Nodes are cluster scoped: always a single writer.
pub fn node_list_channel(store: Arc<dyn ResourceStore>) -> ResourceChannel<Vec<Node>> {
    ResourceChannel::list(store, ResourceKind::Node, &NamespaceQuery::All)
}

pub fn namespace_list_channel(store: Arc<dyn ResourceStore>) -> ResourceChannel<Vec<Namespace>> {
    ResourceChannel::list(store, ResourceKind::Namespace, &NamespaceQuery::All)
}

/// Channels opened for one handler invocation. Unrequested kinds stay `None`.
#[derive(Debug, Default)]
pub struct ResourceChannels {
    pub pod_list: Option<ResourceChannel<Vec<Pod>>>,
    pub event_list: Option<ResourceChannel<Vec<Event>>>,
    pub service_list: Option<ResourceChannel<Vec<Service>>>,
    pub replica_set_list: Option<ResourceChannel<Vec<ReplicaSet>>>,
    pub deployment_list: Option<ResourceChannel<Vec<Deployment>>>,
    pub node_list: Option<ResourceChannel<Vec<Node>>>,
    pub namespace_list: Option<ResourceChannel<Vec<Namespace>>>,
}

impl ResourceChannels {
    pub fn builder(store: Arc<dyn ResourceStore>, nsq: NamespaceQuery) -> ResourceChannelsBuilder {
        ResourceChannelsBuilder { store, nsq, channels: ResourceChannels::default() }
    }

    /// Drop every receiver and return all writer tasks.
    pub fn detach(self) -> Vec<JoinHandle<()>> {
        let mut out = Vec::new();
        if let Some(c) = self.pod_list { out.extend(c.detach()); }
        if let Some(c) = self.event_list { out.extend(c.detach()); }
        if let Some(c) = self.service_list { out.extend(c.detach()); }
        if let Some(c) = self.replica_set_list { out.extend(c.detach()); }
        if let Some(c) = self.deployment_list { out.extend(c.detach()); }
        if let Some(c) = self.node_list { out.extend(c.detach()); }
        if let Some(c) = self.namespace_list { out.extend(c.detach()); }
        out
    }
}

/// Starts each requested fetch as soon as it is named.
pub struct ResourceChannelsBuilder {
    store: Arc<dyn ResourceStore>,
    nsq: NamespaceQuery,
    channels: ResourceChannels,
}

impl ResourceChannelsBuilder {
    pub fn pods(mut self) -> Self {
        self.channels.pod_list = Some(pod_list_channel(self.store.clone(), &self.nsq));
        self
    }

    pub fn events(mut self) -> Self {
        self.channels.event_list = Some(event_list_channel(self.store.clone(), &self.nsq));
        self
    }

    pub fn services(mut self) -> Self {
        self.channels.service_list = Some(service_list_channel(self.store.clone(), &self.nsq));
        self
    }

    pub fn replica_sets(mut self) -> Self {
        self.channels.replica_set_list = Some(replica_set_list_channel(self.store.clone(), &self.nsq));
        self
    }

    pub fn deployments(mut self) -> Self {
        self.channels.deployment_list = Some(deployment_list_channel(self.store.clone(), &self.nsq));
        self
    }

    pub fn nodes(mut self) -> Self {
        self.channels.node_list = Some(node_list_channel(self.store.clone()));
        self
    }

    pub fn namespaces(mut self) -> Self {
        self.channels.namespace_list = Some(namespace_list_channel(self.store.clone()));
        self
    }

    pub fn build(self) -> ResourceChannels { self.channels }
}
