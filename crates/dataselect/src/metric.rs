//! Metric stage: per-resource series downloads and cumulative aggregation.
//!
//! Every `(resource, metric name)` pair is fetched by its own task. Tasks wait
//! on a shared semaphore, so at most `concurrency` downloads run at a time, and
//! each task finishes whether or not anyone reads its result.

use std::collections::BTreeMap;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Semaphore};
use tracing::{debug, warn};
use vista_core::{DataError, ResourceSelector};

use crate::query::MetricQuery;

pub const CPU_USAGE_RATE: &str = "cpu/usage_rate";
pub const MEMORY_USAGE: &str = "memory/usage";

pub const DEFAULT_METRIC_CONCURRENCY: usize = 16;

/// How data points sharing a timestamp are folded across resources.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AggregationMode {
    #[default]
    Sum,
    Max,
    Min,
    Average,
}

impl AggregationMode {
    /// `sum`, `max`, `min`, `average` (or `avg`); anything else is `sum`.
    pub fn parse_or_default(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "max" => AggregationMode::Max,
            "min" => AggregationMode::Min,
            "average" | "avg" => AggregationMode::Average,
            "sum" => AggregationMode::Sum,
            other => {
                debug!(aggregation = %other, "dataselect: unknown aggregation, using sum");
                AggregationMode::Sum
            }
        }
    }

    /// Sums saturate at the `i64` bounds; the average is taken in `i128`.
    fn fold(&self, ys: &[i64]) -> i64 {
        match self {
            AggregationMode::Sum => ys.iter().fold(0i64, |acc, y| acc.saturating_add(*y)),
            AggregationMode::Max => ys.iter().copied().max().unwrap_or(0),
            AggregationMode::Min => ys.iter().copied().min().unwrap_or(0),
            AggregationMode::Average => {
                if ys.is_empty() { return 0; }
                let total: i128 = ys.iter().map(|y| i128::from(*y)).sum();
                i64::try_from(total / ys.len() as i128).unwrap_or(if total < 0 { i64::MIN } else { i64::MAX })
            }
        }
    }
}

/// One sample: `x` is a unix timestamp in seconds, `y` the value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DataPoint {
    pub x: i64,
    pub y: i64,
}

/// Series downloaded for a single resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MetricSeries {
    pub metric_name: String,
    pub data_points: Vec<DataPoint>,
}

impl MetricSeries {
    /// Value of the most recent data point.
    pub fn latest(&self) -> Option<i64> { self.data_points.iter().max_by_key(|p| p.x).map(|p| p.y) }
}

/// Cumulative series across a whole collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Metric {
    pub metric_name: String,
    pub aggregation: AggregationMode,
    pub data_points: Vec<DataPoint>,
}

/// Fold series point-wise by timestamp. Output is ordered by timestamp.
pub fn aggregate(metric_name: &str, mode: AggregationMode, series: &[&MetricSeries]) -> Metric {
    let mut by_x: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
    for s in series.iter() {
        for p in s.data_points.iter() { by_x.entry(p.x).or_default().push(p.y); }
    }
    let data_points = by_x.into_iter().map(|(x, ys)| DataPoint { x, y: mode.fold(&ys) }).collect();
    Metric { metric_name: metric_name.to_string(), aggregation: mode, data_points }
}

/// Pluggable backend that downloads one metric series for one resource.
#[async_trait::async_trait]
pub trait MetricSource: Send + Sync {
    async fn download(&self, selector: &ResourceSelector, metric_name: &str) -> Result<MetricSeries, DataError>;
}

/// A [`MetricSource`] plus the download budget shared by every query using it.
#[derive(Clone)]
pub struct MetricClient {
    source: Arc<dyn MetricSource>,
    permits: Arc<Semaphore>,
}

impl MetricClient {
    pub fn new(source: Arc<dyn MetricSource>, concurrency: usize) -> Self {
        Self { source, permits: Arc::new(Semaphore::new(concurrency.max(1))) }
    }

    /// Concurrency from `VISTA_METRIC_CONCURRENCY`, default 16.
    pub fn from_env(source: Arc<dyn MetricSource>) -> Self {
        let concurrency = std::env::var("VISTA_METRIC_CONCURRENCY").ok().and_then(|s| s.parse::<usize>().ok()).unwrap_or(DEFAULT_METRIC_CONCURRENCY);
        Self::new(source, concurrency)
    }

    fn spawn_fetch(&self, selector: ResourceSelector, metric_name: String) -> oneshot::Receiver<Result<MetricSeries, DataError>> {
        let (tx, rx) = oneshot::channel();
        let source = Arc::clone(&self.source);
        let permits = Arc::clone(&self.permits);
        tokio::spawn(async move {
            let res = match permits.acquire_owned().await {
                Ok(_permit) => source.download(&selector, &metric_name).await,
                Err(_) => Err(DataError::Metric("metric client closed".into())),
            };
            if let Err(e) = &res {
                metrics::counter!("metric_fetch_errors_total", 1u64);
                warn!(error = %e, name = %selector.name, metric = %metric_name, "dataselect: metric download failed");
            }
            // Receiver may be gone; the result is then simply dropped.
            let _ = tx.send(res);
        });
        rx
    }
}

/// Result carried by a [`MetricPromise`]: cumulative metrics plus one
/// non-critical error per failed download.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MetricsOutcome {
    pub metrics: Vec<Metric>,
    pub errors: Vec<DataError>,
}

enum PromiseState {
    Ready(MetricsOutcome),
    Pending(oneshot::Receiver<MetricsOutcome>),
}

/// Deferred cumulative metrics. Resolve once with [`MetricPromise::get_metrics`]; dropping it is fine.
pub struct MetricPromise {
    state: PromiseState,
}

impl MetricPromise {
    /// Resolves to no metrics and no errors.
    pub fn empty() -> Self { Self::ready(MetricsOutcome::default()) }

    pub fn ready(outcome: MetricsOutcome) -> Self { Self { state: PromiseState::Ready(outcome) } }

    fn pending(rx: oneshot::Receiver<MetricsOutcome>) -> Self { Self { state: PromiseState::Pending(rx) } }

    pub async fn get_metrics(self) -> MetricsOutcome {
        match self.state {
            PromiseState::Ready(o) => o,
            PromiseState::Pending(rx) => rx.await.unwrap_or_else(|_| MetricsOutcome {
                metrics: Vec::new(),
                errors: vec![DataError::Metric("metric aggregation aborted".into())],
            }),
        }
    }
}

impl std::fmt::Debug for MetricPromise {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state { PromiseState::Ready(_) => "ready", PromiseState::Pending(_) => "pending" };
        f.debug_struct("MetricPromise").field("state", &state).finish()
    }
}

/// Latest value per resource uid and metric name.
#[derive(Debug, Clone, Default)]
pub struct MetricValues {
    by_uid: FxHashMap<String, FxHashMap<String, i64>>,
}

impl MetricValues {
    pub fn get(&self, uid: &str, metric_name: &str) -> Option<i64> {
        self.by_uid.get(uid).and_then(|m| m.get(metric_name)).copied()
    }
}

struct PendingFetch {
    metric: usize,
    uid: String,
    rx: oneshot::Receiver<Result<MetricSeries, DataError>>,
}

/// Downloads started for one query, not yet awaited.
pub(crate) struct PendingMetrics {
    names: Vec<String>,
    aggregations: Vec<AggregationMode>,
    fetches: Vec<PendingFetch>,
}

pub(crate) struct ResolvedMetrics {
    pub values: MetricValues,
    pub outcome: MetricsOutcome,
}

/// Start one download per distinct selector uid and requested metric name.
pub(crate) fn start(client: &MetricClient, selectors: &[ResourceSelector], query: &MetricQuery) -> PendingMetrics {
    let mut seen: FxHashSet<&str> = FxHashSet::default();
    let unique: Vec<&ResourceSelector> = selectors.iter().filter(|s| seen.insert(s.uid.as_str())).collect();
    let mut fetches = Vec::with_capacity(unique.len() * query.metric_names.len());
    for (mi, name) in query.metric_names.iter().enumerate() {
        for sel in unique.iter() {
            fetches.push(PendingFetch { metric: mi, uid: sel.uid.clone(), rx: client.spawn_fetch((*sel).clone(), name.clone()) });
        }
    }
    debug!(resources = unique.len(), metrics = query.metric_names.len(), "dataselect: metric downloads started");
    PendingMetrics { names: query.metric_names.clone(), aggregations: query.effective_aggregations(), fetches }
}

impl PendingMetrics {
    /// Await every download, then aggregate.
    pub(crate) async fn resolve(self) -> ResolvedMetrics {
        let mut per_metric: Vec<Vec<MetricSeries>> = vec![Vec::new(); self.names.len()];
        let mut values = MetricValues::default();
        let mut errors = Vec::new();
        for f in self.fetches {
            let res = f.rx.await.unwrap_or_else(|_| Err(DataError::Metric("metric download task aborted".into())));
            match res {
                Ok(series) => {
                    if let Some(v) = series.latest() {
                        values.by_uid.entry(f.uid).or_default().insert(self.names[f.metric].clone(), v);
                    }
                    per_metric[f.metric].push(series);
                }
                Err(e) => errors.push(e),
            }
        }
        let mut metrics = Vec::with_capacity(self.names.len() * self.aggregations.len());
        for (mi, name) in self.names.iter().enumerate() {
            let refs: Vec<&MetricSeries> = per_metric[mi].iter().collect();
            for mode in self.aggregations.iter() { metrics.push(aggregate(name, *mode, &refs)); }
        }
        ResolvedMetrics { values, outcome: MetricsOutcome { metrics, errors } }
    }

    /// Hand the downloads to a background aggregator and return its promise.
    pub(crate) fn into_promise(self) -> MetricPromise {
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let resolved = self.resolve().await;
            let _ = tx.send(resolved.outcome);
        });
        MetricPromise::pending(rx)
    }
}
