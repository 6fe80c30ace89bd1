//! Per-request query configuration and its parsing from request parameters.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::ops::Range;
use tracing::debug;
use vista_core::property;

use crate::metric::{AggregationMode, CPU_USAGE_RATE, MEMORY_USAGE};

/// Page window. `items_per_page <= 0` disables pagination; `page` is 1-based.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PaginationQuery {
    pub items_per_page: i64,
    pub page: i64,
}

pub const DEFAULT_ITEMS_PER_PAGE: i64 = 10;

impl PaginationQuery {
    pub fn new(items_per_page: i64, page: i64) -> Self { Self { items_per_page, page } }

    pub fn none() -> Self { Self { items_per_page: 0, page: 1 } }

    pub fn is_enabled(&self) -> bool { self.items_per_page > 0 }

    /// Clamped `[start, end)` window over `len` items, `None` when pagination is off.
    pub fn window(&self, len: usize) -> Option<Range<usize>> {
        if !self.is_enabled() { return None; }
        let size = usize::try_from(self.items_per_page).unwrap_or(usize::MAX);
        let page = usize::try_from(self.page.max(1)).unwrap_or(usize::MAX);
        let start = (page - 1).saturating_mul(size).min(len);
        let end = start.saturating_add(size).min(len);
        Some(start..end)
    }
}

impl Default for PaginationQuery {
    fn default() -> Self { Self::new(DEFAULT_ITEMS_PER_PAGE, 1) }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SortBy {
    pub property: String,
    pub ascending: bool,
}

impl SortBy {
    pub fn asc(property: impl Into<String>) -> Self { Self { property: property.into(), ascending: true } }
    pub fn desc(property: impl Into<String>) -> Self { Self { property: property.into(), ascending: false } }
}

/// Ordered sort keys; earlier keys take priority.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SortQuery {
    pub sort_by: SmallVec<[SortBy; 4]>,
}

impl SortQuery {
    pub fn new(keys: impl IntoIterator<Item = SortBy>) -> Self { Self { sort_by: keys.into_iter().collect() } }

    pub fn is_empty(&self) -> bool { self.sort_by.is_empty() }

    /// Whether any key refers to a metric and needs resolved series before sorting.
    pub fn uses_metrics(&self) -> bool {
        self.sort_by.iter().any(|k| property::metric_name(&k.property).is_some())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FilterBy {
    pub property: String,
    pub value: String,
}

impl FilterBy {
    pub fn new(property: impl Into<String>, value: impl Into<String>) -> Self {
        Self { property: property.into(), value: value.into() }
    }
}

/// Conjunction of `(property, value)` predicates.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FilterQuery {
    pub filter_by: SmallVec<[FilterBy; 4]>,
}

impl FilterQuery {
    pub fn new(terms: impl IntoIterator<Item = FilterBy>) -> Self { Self { filter_by: terms.into_iter().collect() } }

    pub fn is_empty(&self) -> bool { self.filter_by.is_empty() }
}

/// Which metrics to download and how to fold them into cumulative series.
/// No metric names means no metrics.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MetricQuery {
    pub metric_names: Vec<String>,
    pub aggregations: Vec<AggregationMode>,
}

impl MetricQuery {
    pub fn none() -> Self { Self::default() }

    /// CPU usage rate and memory usage, summed.
    pub fn standard() -> Self {
        Self { metric_names: vec![CPU_USAGE_RATE.to_string(), MEMORY_USAGE.to_string()], aggregations: vec![AggregationMode::Sum] }
    }

    pub fn new(metric_names: Vec<String>, aggregations: Vec<AggregationMode>) -> Self { Self { metric_names, aggregations } }

    pub fn is_enabled(&self) -> bool { !self.metric_names.is_empty() }

    /// Requested aggregations, `sum` when none were given.
    pub fn effective_aggregations(&self) -> Vec<AggregationMode> {
        if self.aggregations.is_empty() { vec![AggregationMode::default()] } else { self.aggregations.clone() }
    }
}

/// Filter, sort, pagination and metric settings for one request. Built once, never mutated.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DataSelectQuery {
    pub pagination: PaginationQuery,
    pub sort: SortQuery,
    pub filter: FilterQuery,
    pub metric: MetricQuery,
}

impl DataSelectQuery {
    pub fn new(pagination: PaginationQuery, sort: SortQuery, filter: FilterQuery, metric: MetricQuery) -> Self {
        Self { pagination, sort, filter, metric }
    }

    /// Everything, unsorted, no metrics.
    pub fn no_data_select() -> Self {
        Self::new(PaginationQuery::none(), SortQuery::default(), FilterQuery::default(), MetricQuery::none())
    }

    /// First page of ten items.
    pub fn default_data_select() -> Self {
        Self::new(PaginationQuery::default(), SortQuery::default(), FilterQuery::default(), MetricQuery::none())
    }

    pub fn default_data_select_with_metrics() -> Self {
        Self::new(PaginationQuery::default(), SortQuery::default(), FilterQuery::default(), MetricQuery::standard())
    }

    pub fn with_pagination(mut self, items_per_page: i64, page: i64) -> Self {
        self.pagination = PaginationQuery::new(items_per_page, page);
        self
    }

    pub fn with_sort(mut self, key: SortBy) -> Self {
        self.sort.sort_by.push(key);
        self
    }

    pub fn with_filter(mut self, property: impl Into<String>, value: impl Into<String>) -> Self {
        self.filter.filter_by.push(FilterBy::new(property, value));
        self
    }

    pub fn with_metrics(mut self, metric: MetricQuery) -> Self {
        self.metric = metric;
        self
    }
}

/// Raw request parameters as they arrive from the request layer.
///
/// - `filterBy`: `prop,value[,prop,value...]`
/// - `sortBy`: `a|d,prop[,a|d,prop...]`
/// - `page`, `itemsPerPage`: absent means no pagination
/// - `metricNames`, `aggregations`: comma lists
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DataSelectParams {
    pub filter_by: Option<String>,
    pub sort_by: Option<String>,
    pub page: Option<i64>,
    pub items_per_page: Option<i64>,
    pub metric_names: Option<String>,
    pub aggregations: Option<String>,
}

impl DataSelectParams {
    /// Collect recognized keys from `(key, value)` pairs; unknown keys are ignored.
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut p = Self::default();
        for (k, v) in pairs {
            let v = v.as_ref();
            match k.as_ref() {
                "filterBy" => p.filter_by = Some(v.to_string()),
                "sortBy" => p.sort_by = Some(v.to_string()),
                "page" => p.page = v.trim().parse().ok(),
                "itemsPerPage" => p.items_per_page = v.trim().parse().ok(),
                "metricNames" => p.metric_names = Some(v.to_string()),
                "aggregations" => p.aggregations = Some(v.to_string()),
                _ => {}
            }
        }
        p
    }

    pub fn to_query(&self) -> DataSelectQuery {
        let pagination = match self.items_per_page {
            Some(n) if n > 0 => PaginationQuery::new(n, self.page.unwrap_or(1)),
            _ => PaginationQuery::none(),
        };
        DataSelectQuery::new(
            pagination,
            parse_sort(self.sort_by.as_deref()),
            parse_filter(self.filter_by.as_deref()),
            parse_metric(self.metric_names.as_deref(), self.aggregations.as_deref()),
        )
    }
}

impl From<&DataSelectParams> for DataSelectQuery {
    fn from(p: &DataSelectParams) -> Self { p.to_query() }
}

fn split_list(raw: &str) -> Vec<&str> {
    raw.split(',').map(str::trim).collect()
}

/// `a,name,d,creationTimestamp`. Odd-length lists yield no sort.
fn parse_sort(raw: Option<&str>) -> SortQuery {
    let Some(raw) = raw.filter(|s| !s.trim().is_empty()) else { return SortQuery::default() };
    let parts = split_list(raw);
    if parts.len() % 2 != 0 {
        debug!(sort_by = %raw, "dataselect: ignoring odd-length sortBy");
        return SortQuery::default();
    }
    SortQuery::new(parts.chunks(2).map(|c| SortBy { property: c[1].to_string(), ascending: c[0] == "a" }))
}

/// `name,nginx,namespace,default`. Odd-length lists yield no filter.
fn parse_filter(raw: Option<&str>) -> FilterQuery {
    let Some(raw) = raw.filter(|s| !s.trim().is_empty()) else { return FilterQuery::default() };
    let parts = split_list(raw);
    if parts.len() % 2 != 0 {
        debug!(filter_by = %raw, "dataselect: ignoring odd-length filterBy");
        return FilterQuery::default();
    }
    FilterQuery::new(parts.chunks(2).map(|c| FilterBy::new(c[0], c[1])))
}

fn parse_metric(names: Option<&str>, aggregations: Option<&str>) -> MetricQuery {
    let names: Vec<String> = names
        .map(|s| split_list(s).into_iter().filter(|n| !n.is_empty()).map(str::to_string).collect())
        .unwrap_or_default();
    if names.is_empty() { return MetricQuery::none(); }
    let aggregations = aggregations
        .map(|s| split_list(s).into_iter().filter(|a| !a.is_empty()).map(AggregationMode::parse_or_default).collect())
        .unwrap_or_default();
    MetricQuery::new(names, aggregations)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_clamps_to_collection() {
        let p = PaginationQuery::new(2, 1);
        assert_eq!(p.window(3), Some(0..2));
        assert_eq!(PaginationQuery::new(2, 2).window(3), Some(2..3));
        assert_eq!(PaginationQuery::new(2, 3).window(3), Some(3..3));
        assert_eq!(PaginationQuery::new(2, 0).window(3), Some(0..2));
        assert_eq!(PaginationQuery::new(0, 1).window(3), None);
        assert_eq!(PaginationQuery::new(-1, 4).window(3), None);
        assert_eq!(PaginationQuery::new(i64::MAX, i64::MAX).window(3), Some(3..3));
    }

    #[test]
    fn params_parse_into_query() {
        let params = DataSelectParams::from_pairs([
            ("filterBy", "name,web,namespace,default"),
            ("sortBy", "d,creationTimestamp,a,name"),
            ("page", "2"),
            ("itemsPerPage", "5"),
            ("metricNames", "cpu/usage_rate"),
            ("aggregations", "max,bogus"),
            ("unrelated", "x"),
        ]);
        let q = params.to_query();
        assert_eq!(q.pagination, PaginationQuery::new(5, 2));
        assert_eq!(q.sort.sort_by.as_slice(), &[SortBy::desc("creationTimestamp"), SortBy::asc("name")]);
        assert_eq!(q.filter.filter_by.as_slice(), &[FilterBy::new("name", "web"), FilterBy::new("namespace", "default")]);
        assert_eq!(q.metric.metric_names, vec!["cpu/usage_rate".to_string()]);
        assert_eq!(q.metric.aggregations, vec![AggregationMode::Max, AggregationMode::Sum]);
    }

    #[test]
    fn malformed_params_degrade_to_defaults() {
        let q = DataSelectParams::from_pairs([("sortBy", "a,name,d"), ("filterBy", "name"), ("page", "x")]).to_query();
        assert!(q.sort.is_empty());
        assert!(q.filter.is_empty());
        assert!(!q.pagination.is_enabled());
        assert!(!q.metric.is_enabled());
    }

    #[test]
    fn params_deserialize_from_camel_case() {
        let p: DataSelectParams = serde_json::from_value(serde_json::json!({ "itemsPerPage": 3, "sortBy": "a,name" })).unwrap();
        assert_eq!(p.items_per_page, Some(3));
        assert_eq!(p.to_query().pagination, PaginationQuery::new(3, 1));
    }

    #[test]
    fn metric_sort_keys_are_detected() {
        assert!(SortQuery::new([SortBy::asc("name"), SortBy::desc("metric")]).uses_metrics());
        assert!(!SortQuery::new([SortBy::asc("name")]).uses_metrics());
    }
}
