//! `metrics.k8s.io` backed [`MetricSource`].

use async_trait::async_trait;
use chrono::DateTime;
use kube::{
    api::Api,
    core::{ApiResource, DynamicObject, GroupVersionKind},
    Client,
};
use serde_json::Value;
use tracing::debug;
use vista_core::{DataError, ResourceKind, ResourceSelector};
use vista_dataselect::{DataPoint, MetricSeries, MetricSource, CPU_USAGE_RATE, MEMORY_USAGE};

use crate::map_kube_error;

/// Reads the current usage sample for pods and nodes from metrics-server.
///
/// Each download yields a single data point: `cpu/usage_rate` in millicores,
/// `memory/usage` in bytes, stamped with the sample time in epoch seconds.
#[derive(Clone)]
pub struct MetricsServerSource {
    client: Client,
}

impl MetricsServerSource {
    pub fn new(client: Client) -> Self { Self { client } }

    fn api(&self, selector: &ResourceSelector) -> Result<Api<DynamicObject>, DataError> {
        let (kind, plural) = match selector.kind {
            ResourceKind::Pod => ("PodMetrics", "pods"),
            ResourceKind::Node => ("NodeMetrics", "nodes"),
            other => return Err(DataError::Metric(format!("no metrics for {}", other))),
        };
        let ar = ApiResource::from_gvk_with_plural(&GroupVersionKind::gvk("metrics.k8s.io", "v1beta1", kind), plural);
        Ok(match selector.namespace.as_deref() {
            Some(ns) if selector.kind.namespaced() => Api::namespaced_with(self.client.clone(), ns, &ar),
            _ => Api::all_with(self.client.clone(), &ar),
        })
    }
}

#[async_trait]
impl MetricSource for MetricsServerSource {
    async fn download(&self, selector: &ResourceSelector, metric_name: &str) -> Result<MetricSeries, DataError> {
        let field = usage_field(metric_name)?;
        let obj = self
            .api(selector)?
            .get(&selector.name)
            .await
            .map_err(|e| DataError::Metric(format!("{}/{}: {}", selector.kind, selector.name, map_kube_error(e))))?;
        let point = sample(&obj.data, selector.kind, field)?;
        debug!(kind = %selector.kind, name = %selector.name, metric = metric_name, y = point.y, "metrics-server: sample");
        Ok(MetricSeries { metric_name: metric_name.to_string(), data_points: vec![point] })
    }
}

fn usage_field(metric_name: &str) -> Result<&'static str, DataError> {
    match metric_name {
        CPU_USAGE_RATE => Ok("cpu"),
        MEMORY_USAGE => Ok("memory"),
        other => Err(DataError::Metric(format!("unsupported metric: {}", other))),
    }
}

// Pod metrics carry one usage map per container; node metrics carry one usage map.
fn sample(data: &Value, kind: ResourceKind, field: &str) -> Result<DataPoint, DataError> {
    let x = data
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.timestamp())
        .unwrap_or(0);
    let usages: Vec<&Value> = match kind {
        ResourceKind::Pod => data
            .get("containers")
            .and_then(Value::as_array)
            .map(|cs| cs.iter().filter_map(|c| c.get("usage")).collect())
            .unwrap_or_default(),
        _ => data.get("usage").into_iter().collect(),
    };
    if usages.is_empty() {
        return Err(DataError::Metric(format!("no usage in {} metrics", kind)));
    }
    let mut total = 0f64;
    for usage in usages {
        let raw = usage.get(field).and_then(Value::as_str).unwrap_or("0");
        total += parse_quantity(raw).ok_or_else(|| DataError::Metric(format!("bad quantity: {}", raw)))?;
    }
    let y = if field == "cpu" { (total * 1000.0).round() as i64 } else { total.round() as i64 };
    Ok(DataPoint { x, y })
}

/// Parse a resource quantity (`250m`, `1.5`, `128Mi`, `2G`, `100n`, `1e3`) into base units.
pub fn parse_quantity(raw: &str) -> Option<f64> {
    let s = raw.trim();
    let split = s.find(|c: char| c.is_ascii_alphabetic()).unwrap_or(s.len());
    let (num, suffix) = s.split_at(split);
    let value: f64 = num.parse().ok()?;
    // `e`/`E` followed by a signed integer is a decimal exponent; a bare `E` is exa.
    if let Some(exp) = suffix.strip_prefix(|c: char| c == 'e' || c == 'E').and_then(|r| r.parse::<i32>().ok()) {
        return Some(value * 10f64.powi(exp));
    }
    let scale = match suffix {
        "" => 1.0,
        "n" => 1e-9,
        "u" => 1e-6,
        "m" => 1e-3,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        "Ki" => 1024.0,
        "Mi" => 1024f64.powi(2),
        "Gi" => 1024f64.powi(3),
        "Ti" => 1024f64.powi(4),
        "Pi" => 1024f64.powi(5),
        "Ei" => 1024f64.powi(6),
        _ => return None,
    };
    Some(value * scale)
}
