//! Metric source answering from a fixed table.

use async_trait::async_trait;
use rustc_hash::{FxHashMap, FxHashSet};
use vista_core::{DataError, ResourceSelector};
use vista_dataselect::{DataPoint, MetricSeries, MetricSource};

/// [`MetricSource`] with series registered up front, keyed by `(uid, metric)`.
///
/// Unknown pairs and uids marked with [`StaticMetrics::failing`] produce a
/// `DataError::Metric`.
#[derive(Debug, Clone, Default)]
pub struct StaticMetrics {
    series: FxHashMap<(String, String), Vec<DataPoint>>,
    failing: FxHashSet<String>,
}

impl StaticMetrics {
    pub fn new() -> Self { Self::default() }

    pub fn with(mut self, uid: &str, metric_name: &str, points: &[(i64, i64)]) -> Self {
        let pts = points.iter().map(|&(x, y)| DataPoint { x, y }).collect();
        self.series.insert((uid.to_string(), metric_name.to_string()), pts);
        self
    }

    pub fn failing(mut self, uid: &str) -> Self {
        self.failing.insert(uid.to_string());
        self
    }
}

#[async_trait]
impl MetricSource for StaticMetrics {
    async fn download(&self, selector: &ResourceSelector, metric_name: &str) -> Result<MetricSeries, DataError> {
        if self.failing.contains(&selector.uid) {
            return Err(DataError::Metric(format!("{} {}: source unavailable", selector.kind, selector.name)));
        }
        self.series
            .get(&(selector.uid.clone(), metric_name.to_string()))
            .map(|pts| MetricSeries { metric_name: metric_name.to_string(), data_points: pts.clone() })
            .ok_or_else(|| DataError::Metric(format!("no {} for {} {}", metric_name, selector.kind, selector.name)))
    }
}
