//! Filter, sort and paginate stages and the two public entry points.

use std::cmp::Ordering;
use std::time::Instant;

use tracing::debug;
use vista_core::{property, Cell, DataError, ResourceSelector};

use crate::metric::{self, MetricClient, MetricPromise, MetricValues, MetricsOutcome};
use crate::query::{DataSelectQuery, FilterQuery, PaginationQuery, SortQuery};

/// Output of [`select_with_filter_and_metrics`].
#[derive(Debug)]
pub struct Selection<C> {
    pub items: Vec<C>,
    pub metrics: MetricPromise,
    /// Items that passed the filter, before pagination.
    pub filtered_total: usize,
}

// A borrowed cell plus its selector, computed once when metrics are in play.
struct Entry<'a, C> {
    cell: &'a C,
    selector: Option<ResourceSelector>,
}

/// Filter, sort, paginate. Returns the page and the post-filter count.
pub fn select_with_filter<C: Cell + Clone>(cells: &[C], query: &DataSelectQuery) -> (Vec<C>, usize) {
    let started = Instant::now();
    let mut entries = filter(cells, &query.filter, false);
    let filtered_total = entries.len();
    sort(&mut entries, &query.sort, &query.metric.metric_names, None);
    let page = paginate(entries, &query.pagination);
    record(started, cells.len(), filtered_total, page.len());
    (page.into_iter().map(|e| e.cell.clone()).collect(), filtered_total)
}

/// Filter, start metric downloads, sort, paginate.
///
/// When a sort key refers to a metric the per-resource series are awaited
/// before sorting and the returned promise is already resolved. Otherwise the
/// cumulative metrics are computed in the background.
pub async fn select_with_filter_and_metrics<C: Cell + Clone>(
    cells: &[C],
    query: &DataSelectQuery,
    client: Option<&MetricClient>,
) -> Selection<C> {
    let started = Instant::now();
    let wants_metrics = query.metric.is_enabled();
    let mut entries = filter(cells, &query.filter, wants_metrics);
    let filtered_total = entries.len();

    let (values, metrics) = match (wants_metrics, client) {
        (false, _) => (None, MetricPromise::empty()),
        (true, None) => {
            let outcome = MetricsOutcome { metrics: Vec::new(), errors: vec![DataError::Metric("no metric source configured".into())] };
            (None, MetricPromise::ready(outcome))
        }
        (true, Some(client)) => {
            let selectors: Vec<ResourceSelector> = entries.iter().filter_map(|e| e.selector.clone()).collect();
            let pending = metric::start(client, &selectors, &query.metric);
            if query.sort.uses_metrics() {
                let resolved = pending.resolve().await;
                (Some(resolved.values), MetricPromise::ready(resolved.outcome))
            } else {
                (None, pending.into_promise())
            }
        }
    };

    sort(&mut entries, &query.sort, &query.metric.metric_names, values.as_ref());
    let page = paginate(entries, &query.pagination);
    record(started, cells.len(), filtered_total, page.len());
    Selection { items: page.into_iter().map(|e| e.cell.clone()).collect(), metrics, filtered_total }
}

fn record(started: Instant, input: usize, filtered: usize, page: usize) {
    let elapsed = started.elapsed();
    metrics::histogram!("dataselect_eval_ms", elapsed.as_secs_f64() * 1_000.0);
    metrics::gauge!("dataselect_items", input as f64);
    debug!(input, filtered, page, took_us = %elapsed.as_micros(), "dataselect: selection done");
}

/// Keep cells whose every predicate property exists and contains the value. Order is preserved.
fn filter<'a, C: Cell>(cells: &'a [C], query: &FilterQuery, with_selectors: bool) -> Vec<Entry<'a, C>> {
    cells
        .iter()
        .filter(|c| {
            query.filter_by.iter().all(|f| c.property(&f.property).map(|v| v.contains(&f.value)).unwrap_or(false))
        })
        .map(|cell| Entry { cell, selector: if with_selectors { cell.resource_selector() } else { None } })
        .collect()
}

fn directed(ord: Ordering, ascending: bool) -> Ordering {
    if ascending { ord } else { ord.reverse() }
}

fn metric_value<C>(e: &Entry<'_, C>, name: &str, values: Option<&MetricValues>) -> Option<i64> {
    let uid = e.selector.as_ref()?.uid.as_str();
    values?.get(uid, name)
}

fn compare_entries<C: Cell>(
    a: &Entry<'_, C>,
    b: &Entry<'_, C>,
    sort: &SortQuery,
    metric_names: &[String],
    values: Option<&MetricValues>,
) -> Ordering {
    for key in sort.sort_by.iter() {
        let ord = match property::metric_name(&key.property) {
            Some(name) => {
                let name = if name.is_empty() {
                    match metric_names.first() { Some(n) => n.as_str(), None => continue }
                } else {
                    name
                };
                // Missing values sort last in either direction.
                match (metric_value(a, name, values), metric_value(b, name, values)) {
                    (Some(x), Some(y)) => directed(x.cmp(&y), key.ascending),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                }
            }
            None => match (a.cell.property(&key.property), b.cell.property(&key.property)) {
                (Some(x), Some(y)) => x.compare(&y).map(|o| directed(o, key.ascending)).unwrap_or(Ordering::Equal),
                _ => Ordering::Equal,
            },
        };
        if ord != Ordering::Equal { return ord; }
    }
    Ordering::Equal
}

/// Stable multi-key sort; ties keep input order.
fn sort<C: Cell>(entries: &mut [Entry<'_, C>], sort: &SortQuery, metric_names: &[String], values: Option<&MetricValues>) {
    if sort.is_empty() { return; }
    entries.sort_by(|a, b| compare_entries(a, b, sort, metric_names, values));
}

fn paginate<T>(mut items: Vec<T>, pagination: &PaginationQuery) -> Vec<T> {
    match pagination.window(items.len()) {
        None => items,
        Some(range) => {
            items.truncate(range.end);
            items.drain(..range.start);
            items
        }
    }
}
