//! Vista resource channels: fan-out of independent fetches to a single reader.
//!
//! Every fetch runs in its own tokio task (a writer) that sends exactly one
//! list and one error, then exits. Both halves of a [`ResourceChannel`] have
//! capacity equal to the writer count, so writers never block: a handler may
//! stop draining at any point and every writer still finishes.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Instant;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use vista_core::{DataError, ResourceKind};
use vista_kubehub::{list_typed, ResourceStore};

mod typed;

pub use typed::{
    deployment_list_channel, event_list_channel, namespace_list_channel, node_list_channel, pod_list_channel,
    replica_set_list_channel, service_list_channel, ResourceChannels, ResourceChannelsBuilder,
};

/// Namespaces a list fetch covers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum NamespaceQuery {
    #[default]
    All,
    Only(Vec<String>),
}

impl NamespaceQuery {
    /// An empty list means all namespaces. Repeats are dropped, first occurrence wins.
    pub fn new(namespaces: Vec<String>) -> Self {
        let mut seen = FxHashSet::default();
        let unique: Vec<String> = namespaces.into_iter().filter(|n| seen.insert(n.clone())).collect();
        if unique.is_empty() { NamespaceQuery::All } else { NamespaceQuery::Only(unique) }
    }

    /// Parse a comma separated list; blank entries are dropped.
    pub fn parse(raw: &str) -> Self {
        Self::new(raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect())
    }

    pub fn is_all(&self) -> bool { matches!(self, NamespaceQuery::All) }

    pub fn matches(&self, namespace: &str) -> bool {
        match self {
            NamespaceQuery::All => true,
            NamespaceQuery::Only(list) => list.iter().any(|n| n == namespace),
        }
    }

    /// One entry per writer: `None` lists across all namespaces.
    pub fn scopes(&self) -> Vec<Option<String>> {
        match self {
            NamespaceQuery::All => vec![None],
            NamespaceQuery::Only(list) => {
                let mut seen = FxHashSet::default();
                list.iter().filter(|n| seen.insert(n.as_str())).cloned().map(Some).collect()
            }
        }
    }
}

/// What one writer delivered.
#[derive(Debug)]
pub struct Delivered<T> {
    /// Writer position, in namespace order.
    pub slot: usize,
    pub list: Option<T>,
    pub error: Option<DataError>,
}

/// A (list, error) channel pair fed by one or more writer tasks.
#[derive(Debug)]
pub struct ResourceChannel<T> {
    kind: ResourceKind,
    writers: usize,
    received: usize,
    lists: mpsc::Receiver<(usize, Option<T>)>,
    errors: mpsc::Receiver<(usize, Option<DataError>)>,
    early_errors: FxHashMap<usize, Option<DataError>>,
    handles: Vec<JoinHandle<()>>,
    started: Instant,
}

impl<T: Send + 'static> ResourceChannel<T> {
    /// Spawn one writer per scope. Each future's output is sent as one list/error pair.
    pub fn spawn<F, Fut>(kind: ResourceKind, scopes: Vec<Option<String>>, fetch: F) -> Self
    where
        F: Fn(Option<String>) -> Fut,
        Fut: std::future::Future<Output = Result<T, DataError>> + Send + 'static,
    {
        let writers = scopes.len();
        let cap = writers.max(1);
        let (list_tx, lists) = mpsc::channel(cap);
        let (err_tx, errors) = mpsc::channel(cap);
        let handles = scopes
            .into_iter()
            .enumerate()
            .map(|(slot, scope)| {
                let fut = fetch(scope.clone());
                let list_tx = list_tx.clone();
                let err_tx = err_tx.clone();
                tokio::spawn(async move {
                    let t0 = Instant::now();
                    let res = fut.await;
                    metrics::histogram!("resource_fetch_ms", t0.elapsed().as_secs_f64() * 1_000.0, "kind" => kind.plural());
                    let (list, error) = match res {
                        Ok(v) => (Some(v), None),
                        Err(e) => {
                            metrics::counter!("resource_fetch_errors_total", 1u64, "kind" => kind.plural());
                            warn!(kind = %kind, ns = ?scope, error = %e, "channels: fetch failed");
                            (None, Some(e))
                        }
                    };
                    // A dropped reader closes the channel; nothing left to deliver to.
                    let _ = list_tx.send((slot, list)).await;
                    let _ = err_tx.send((slot, error)).await;
                })
            })
            .collect();
        Self {
            kind,
            writers,
            received: 0,
            lists,
            errors,
            early_errors: FxHashMap::default(),
            handles,
            started: Instant::now(),
        }
    }

    pub fn kind(&self) -> ResourceKind { self.kind }

    pub fn writers(&self) -> usize { self.writers }

    /// Next writer's list and its matching error, in completion order.
    ///
    /// Returns `None` once every writer has been received from, or if a writer
    /// terminated without sending.
    pub async fn recv(&mut self) -> Option<Delivered<T>> {
        if self.received >= self.writers { return None; }
        let (slot, list) = self.lists.recv().await?;
        let error = loop {
            if let Some(e) = self.early_errors.remove(&slot) { break e; }
            let (s, e) = self.errors.recv().await?;
            if s == slot { break e; }
            self.early_errors.insert(s, e);
        };
        self.received += 1;
        Some(Delivered { slot, list, error })
    }

    /// Drop the receivers and hand back the writer tasks.
    pub fn detach(self) -> Vec<JoinHandle<()>> { self.handles }
}

impl<K: Send + 'static> ResourceChannel<Vec<K>> {
    /// List all objects of `kind` through `store`, one writer per namespace scope.
    pub fn list(store: Arc<dyn ResourceStore>, kind: ResourceKind, namespaces: &NamespaceQuery) -> Self
    where
        K: k8s_openapi::Resource + DeserializeOwned,
    {
        let scopes = if kind.namespaced() { namespaces.scopes() } else { vec![None] };
        Self::spawn(kind, scopes, move |scope| {
            let store = Arc::clone(&store);
            async move { list_typed::<K>(store.as_ref(), kind, scope.as_deref()).await }
        })
    }

    /// Drain every writer and union the lists in namespace order.
    ///
    /// The first error in namespace order is returned next to whatever was
    /// listed successfully.
    pub async fn collect(mut self) -> (Vec<K>, Option<DataError>) {
        let mut slots: Vec<Option<(Option<Vec<K>>, Option<DataError>)>> = (0..self.writers).map(|_| None).collect();
        while let Some(d) = self.recv().await {
            if let Some(s) = slots.get_mut(d.slot) { *s = Some((d.list, d.error)); }
        }
        let mut items = Vec::new();
        let mut first_error = None;
        for (slot, delivered) in slots.into_iter().enumerate() {
            let (list, error) = delivered.unwrap_or_else(|| {
                (None, Some(DataError::Internal(format!("{} writer {} ended without a result", self.kind, slot))))
            });
            if let Some(mut l) = list { items.append(&mut l); }
            if first_error.is_none() { first_error = error; }
        }
        debug!(kind = %self.kind, writers = self.writers, items = items.len(), failed = first_error.is_some(),
            took_ms = %self.started.elapsed().as_millis(), "channels: list done");
        (items, first_error)
    }
}
