//! Vista store: in-RAM [`ResourceStore`] built from deltas, plus a static metric source.
//!
//! Writers apply batches of [`Delta`]s per kind; each batch produces a new
//! immutable [`Snapshot`] that readers load without locking. Failures and
//! latency can be injected per kind (optionally per namespace) so the fan-out
//! layer can be exercised without a cluster.

#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use kube::core::DynamicObject;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};
use vista_core::{DataError, Delta, DeltaKind, ResourceKind, StatusReason};
use vista_kubehub::{dynamic_from_raw, ResourceStore};

mod metrics;

pub use metrics::StaticMetrics;

/// Immutable view of one kind's objects, in first-applied order.
#[derive(Debug, Default)]
pub struct Snapshot {
    pub epoch: u64,
    pub items: Vec<DynamicObject>,
}

/// Builds [`Snapshot`]s for one kind from deltas, keyed by uid.
#[derive(Default)]
pub struct KindBuilder {
    epoch: u64,
    items: Vec<(String, DynamicObject)>,
    index: FxHashMap<String, usize>,
}

impl KindBuilder {
    /// Apply a batch in order. Objects that fail to decode are skipped.
    pub fn apply(&mut self, kind: ResourceKind, batch: Vec<Delta>) {
        for d in batch {
            match d.kind {
                DeltaKind::Applied => {
                    let obj = match dynamic_from_raw(kind, d.raw) {
                        Ok(o) => o,
                        Err(e) => {
                            warn!(kind = %kind, uid = %d.uid, error = %e, "store: skipping undecodable object");
                            continue;
                        }
                    };
                    match self.index.get(&d.uid) {
                        Some(&idx) => self.items[idx].1 = obj,
                        None => {
                            self.index.insert(d.uid.clone(), self.items.len());
                            self.items.push((d.uid, obj));
                        }
                    }
                }
                DeltaKind::Deleted => {
                    if self.index.remove(&d.uid).is_some() {
                        self.items.retain(|(uid, _)| *uid != d.uid);
                        self.index = self.items.iter().enumerate().map(|(i, (uid, _))| (uid.clone(), i)).collect();
                    }
                }
            }
        }
        self.epoch = self.epoch.saturating_add(1);
    }

    pub fn freeze(&self) -> Arc<Snapshot> {
        Arc::new(Snapshot { epoch: self.epoch, items: self.items.iter().map(|(_, o)| o.clone()).collect() })
    }
}

#[derive(Debug, Clone, Default)]
struct Fault {
    error: Option<DataError>,
    delay: Option<Duration>,
}

type FaultKey = (ResourceKind, Option<String>);

/// In-memory [`ResourceStore`].
pub struct MemoryStore {
    snaps: FxHashMap<ResourceKind, ArcSwap<Snapshot>>,
    builders: Mutex<FxHashMap<ResourceKind, KindBuilder>>,
    faults: Mutex<FxHashMap<FaultKey, Fault>>,
}

impl Default for MemoryStore {
    fn default() -> Self { Self::new() }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> { m.lock().unwrap_or_else(|p| p.into_inner()) }

impl MemoryStore {
    pub fn new() -> Self {
        let snaps = ResourceKind::ALL.iter().map(|k| (*k, ArcSwap::from_pointee(Snapshot::default()))).collect();
        Self { snaps, builders: Mutex::new(FxHashMap::default()), faults: Mutex::new(FxHashMap::default()) }
    }

    /// Builder-style seeding with raw objects; entries without `metadata.uid` are skipped.
    pub fn with_objects(self, kind: ResourceKind, raws: impl IntoIterator<Item = serde_json::Value>) -> Self {
        self.apply(kind, raws.into_iter().filter_map(Delta::applied).collect());
        self
    }

    /// Apply a delta batch for `kind` and publish a new snapshot.
    pub fn apply(&self, kind: ResourceKind, batch: Vec<Delta>) {
        let n = batch.len();
        let next = {
            let mut builders = lock(&self.builders);
            let b = builders.entry(kind).or_default();
            b.apply(kind, batch);
            b.freeze()
        };
        debug!(kind = %kind, deltas = n, epoch = next.epoch, items = next.items.len(), "store: snapshot swapped");
        if let Some(slot) = self.snaps.get(&kind) {
            slot.store(next);
        }
    }

    pub fn current(&self, kind: ResourceKind) -> Arc<Snapshot> {
        self.snaps.get(&kind).map(|s| s.load_full()).unwrap_or_default()
    }

    /// Make every fetch of `kind` fail with `error`.
    pub fn fail(&self, kind: ResourceKind, error: DataError) { self.set_fault(kind, None, |f| f.error = Some(error)); }

    /// Make fetches of `kind` scoped to `namespace` fail with `error`.
    pub fn fail_namespace(&self, kind: ResourceKind, namespace: &str, error: DataError) {
        self.set_fault(kind, Some(namespace), |f| f.error = Some(error));
    }

    /// Delay every fetch of `kind` by `delay`.
    pub fn delay(&self, kind: ResourceKind, delay: Duration) { self.set_fault(kind, None, |f| f.delay = Some(delay)); }

    pub fn clear_faults(&self) { lock(&self.faults).clear(); }

    fn set_fault(&self, kind: ResourceKind, namespace: Option<&str>, f: impl FnOnce(&mut Fault)) {
        f(lock(&self.faults).entry((kind, namespace.map(str::to_string))).or_default());
    }

    // Namespace-scoped fault wins over the kind-wide one; delays add up.
    fn injected(&self, kind: ResourceKind, namespace: Option<&str>) -> Fault {
        let faults = lock(&self.faults);
        let wide = faults.get(&(kind, None)).cloned().unwrap_or_default();
        let scoped = namespace.and_then(|ns| faults.get(&(kind, Some(ns.to_string()))).cloned()).unwrap_or_default();
        Fault {
            error: scoped.error.or(wide.error),
            delay: match (wide.delay, scoped.delay) {
                (Some(a), Some(b)) => Some(a + b),
                (a, b) => a.or(b),
            },
        }
    }

    async fn before_fetch(&self, kind: ResourceKind, namespace: Option<&str>) -> Result<(), DataError> {
        let fault = self.injected(kind, namespace);
        if let Some(d) = fault.delay {
            tokio::time::sleep(d).await;
        }
        match fault.error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn in_namespace(obj: &DynamicObject, namespace: Option<&str>) -> bool {
    match namespace {
        None => true,
        Some(ns) => obj.metadata.namespace.as_deref() == Some(ns),
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn list(&self, kind: ResourceKind, namespace: Option<&str>) -> Result<Vec<DynamicObject>, DataError> {
        let namespace = if kind.namespaced() { namespace } else { None };
        self.before_fetch(kind, namespace).await?;
        let snap = self.current(kind);
        Ok(snap.items.iter().filter(|o| in_namespace(o, namespace)).cloned().collect())
    }

    async fn get(&self, kind: ResourceKind, namespace: Option<&str>, name: &str) -> Result<DynamicObject, DataError> {
        let namespace = if kind.namespaced() { namespace } else { None };
        self.before_fetch(kind, namespace).await?;
        self.current(kind)
            .items
            .iter()
            .find(|o| o.metadata.name.as_deref() == Some(name) && in_namespace(o, namespace))
            .cloned()
            .ok_or_else(|| DataError::api(StatusReason::NotFound, format!("{} \"{}\" not found", kind, name)))
    }
}
