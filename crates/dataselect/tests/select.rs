#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use vista_core::{Cell, ComparableValue, DataError, ResourceKind, ResourceSelector};
use vista_dataselect::{
    select_with_filter, select_with_filter_and_metrics, AggregationMode, DataPoint, DataSelectParams, DataSelectQuery,
    MetricClient, MetricQuery, MetricSeries, MetricSource, SortBy, CPU_USAGE_RATE, MEMORY_USAGE,
};

#[derive(Debug, Clone, PartialEq)]
struct Row {
    name: String,
    ns: String,
    uid: String,
}

impl Cell for Row {
    fn property(&self, name: &str) -> Option<ComparableValue> {
        match name {
            "name" => Some(self.name.as_str().into()),
            "namespace" => Some(self.ns.as_str().into()),
            _ => None,
        }
    }

    fn resource_selector(&self) -> Option<ResourceSelector> {
        Some(ResourceSelector { kind: ResourceKind::Pod, namespace: Some(self.ns.clone()), name: self.name.clone(), uid: self.uid.clone() })
    }
}

fn rows(spec: &[(&str, &str)]) -> Vec<Row> {
    spec.iter()
        .enumerate()
        .map(|(i, (name, ns))| Row { name: name.to_string(), ns: ns.to_string(), uid: format!("u-{}", i) })
        .collect()
}

fn names(v: &[Row]) -> Vec<&str> { v.iter().map(|r| r.name.as_str()).collect() }

/// Serves `cpu = uid index * 10` at x=1 and x=2 (latest is x=2); uids listed in `missing` fail.
struct Fake {
    missing: Vec<&'static str>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl Fake {
    fn new(missing: &[&'static str]) -> Arc<Self> {
        Arc::new(Self { missing: missing.to_vec(), in_flight: AtomicUsize::new(0), peak: AtomicUsize::new(0) })
    }
}

#[async_trait::async_trait]
impl MetricSource for Fake {
    async fn download(&self, selector: &ResourceSelector, metric_name: &str) -> Result<MetricSeries, DataError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.missing.contains(&selector.uid.as_str()) {
            return Err(DataError::Metric(format!("no data for {}", selector.name)));
        }
        let idx: i64 = selector.uid.trim_start_matches("u-").parse().unwrap_or(0);
        Ok(MetricSeries {
            metric_name: metric_name.to_string(),
            data_points: vec![DataPoint { x: 2, y: idx * 10 }, DataPoint { x: 1, y: 1 }],
        })
    }
}

#[test]
fn filter_is_idempotent() {
    let cells = rows(&[("web-1", "prod"), ("web-2", "dev"), ("db", "prod"), ("cache", "ops"), ("web-3", "prod")]);
    let q = DataSelectQuery::no_data_select().with_filter("name", "web").with_filter("namespace", "prod");
    let (once, total) = select_with_filter(&cells, &q);
    let (twice, total2) = select_with_filter(&once, &q);
    assert_eq!(names(&once), vec!["web-1", "web-3"]);
    assert_eq!(once, twice);
    assert_eq!((total, total2), (2, 2));
}

#[test]
fn sort_is_stable_on_ties() {
    let cells = rows(&[("b", "x"), ("a", "y"), ("c", "x"), ("d", "y")]);
    let q = DataSelectQuery::no_data_select().with_sort(SortBy::asc("namespace"));
    let (page, _) = select_with_filter(&cells, &q);
    assert_eq!(names(&page), vec!["b", "c", "a", "d"]);
    let q = DataSelectQuery::no_data_select().with_sort(SortBy::desc("namespace"));
    let (page, _) = select_with_filter(&cells, &q);
    assert_eq!(names(&page), vec!["a", "d", "b", "c"]);
}

#[test]
fn pages_cover_every_item_exactly_once() {
    let cells = rows(&[("a", "x"), ("b", "x"), ("c", "x"), ("d", "x"), ("e", "x"), ("f", "x"), ("g", "x")]);
    let mut seen = Vec::new();
    for page in 1..=3 {
        let q = DataSelectQuery::no_data_select().with_sort(SortBy::asc("name")).with_pagination(3, page);
        let (items, total) = select_with_filter(&cells, &q);
        assert_eq!(total, 7);
        seen.extend(items.into_iter().map(|r| r.name));
    }
    assert_eq!(seen, vec!["a", "b", "c", "d", "e", "f", "g"]);
}

#[test]
fn pagination_edges() {
    let cells = rows(&[("a", "x"), ("b", "x"), ("c", "x")]);
    let past_end = DataSelectQuery::no_data_select().with_pagination(2, 9);
    let (items, total) = select_with_filter(&cells, &past_end);
    assert!(items.is_empty());
    assert_eq!(total, 3);

    let page_zero = DataSelectQuery::no_data_select().with_pagination(2, 0);
    assert_eq!(names(&select_with_filter(&cells, &page_zero).0), vec!["a", "b"]);

    let disabled = DataSelectQuery::no_data_select().with_pagination(0, 4);
    assert_eq!(select_with_filter(&cells, &disabled).0.len(), 3);

    let (items, total) = select_with_filter::<Row>(&[], &DataSelectQuery::default_data_select());
    assert!(items.is_empty());
    assert_eq!(total, 0);
}

#[test]
fn request_params_drive_the_engine() {
    let cells = rows(&[("web-b", "prod"), ("db", "prod"), ("web-a", "prod"), ("web-c", "dev")]);
    let params = DataSelectParams::from_pairs([
        ("filterBy", "name,web,namespace,prod"),
        ("sortBy", "a,name"),
        ("itemsPerPage", "1"),
        ("page", "2"),
        ("unrelated", "x"),
    ]);
    let (page, total) = select_with_filter(&cells, &params.to_query());
    assert_eq!(names(&page), vec!["web-b"]);
    assert_eq!(total, 2);
}

#[tokio::test]
async fn metric_sort_puts_missing_values_last() {
    let cells = rows(&[("a", "x"), ("b", "x"), ("c", "x"), ("d", "x")]);
    let fake = Fake::new(&["u-3"]);
    let client = MetricClient::new(fake, 4);
    for ascending in [true, false] {
        let key = if ascending { SortBy::asc("metric") } else { SortBy::desc("metric") };
        let q = DataSelectQuery::no_data_select()
            .with_metrics(MetricQuery::new(vec![CPU_USAGE_RATE.to_string()], vec![AggregationMode::Max]))
            .with_sort(key);
        let sel = select_with_filter_and_metrics(&cells, &q, Some(&client)).await;
        let got = names(&sel.items);
        assert_eq!(got.last(), Some(&"d"), "missing metric must sort last (ascending = {})", ascending);
        let expected: Vec<&str> = if ascending { vec!["a", "b", "c", "d"] } else { vec!["c", "b", "a", "d"] };
        assert_eq!(got, expected);
        let outcome = sel.metrics.get_metrics().await;
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.metrics.len(), 1);
    }
}

#[tokio::test]
async fn named_metric_key_and_filtered_cumulation() {
    let cells = rows(&[("web-1", "prod"), ("db", "prod"), ("web-2", "prod")]);
    let client = MetricClient::new(Fake::new(&[]), 2);
    let q = DataSelectQuery::no_data_select()
        .with_filter("name", "web")
        .with_metrics(MetricQuery::new(vec![CPU_USAGE_RATE.to_string(), MEMORY_USAGE.to_string()], vec![]))
        .with_sort(SortBy::desc(format!("metric:{}", MEMORY_USAGE)))
        .with_pagination(1, 1);
    let sel = select_with_filter_and_metrics(&cells, &q, Some(&client)).await;
    assert_eq!(names(&sel.items), vec!["web-2"]);
    assert_eq!(sel.filtered_total, 2);

    let outcome = sel.metrics.get_metrics().await;
    assert!(outcome.errors.is_empty());
    let cpu = outcome.metrics.iter().find(|m| m.metric_name == CPU_USAGE_RATE).unwrap();
    assert_eq!(cpu.aggregation, AggregationMode::Sum);
    // web-1 is u-0, web-2 is u-2; db is filtered out before downloads.
    assert_eq!(cpu.data_points, vec![DataPoint { x: 1, y: 2 }, DataPoint { x: 2, y: 20 }]);
}

#[tokio::test]
async fn downloads_respect_the_concurrency_bound() {
    let cells = rows(&[("a", "x"), ("b", "x"), ("c", "x"), ("d", "x"), ("e", "x"), ("f", "x")]);
    let fake = Fake::new(&[]);
    let client = MetricClient::new(fake.clone(), 2);
    let q = DataSelectQuery::default_data_select_with_metrics();
    let sel = select_with_filter_and_metrics(&cells, &q, Some(&client)).await;
    assert_eq!(sel.items.len(), 6);
    let outcome = sel.metrics.get_metrics().await;
    assert!(outcome.errors.is_empty());
    assert!(fake.peak.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn no_source_reports_one_error_and_keeps_items() {
    let cells = rows(&[("a", "x"), ("b", "x")]);
    let sel = select_with_filter_and_metrics(&cells, &DataSelectQuery::default_data_select_with_metrics(), None).await;
    assert_eq!(sel.items.len(), 2);
    let outcome = sel.metrics.get_metrics().await;
    assert!(outcome.metrics.is_empty());
    assert_eq!(outcome.errors.len(), 1);
}
