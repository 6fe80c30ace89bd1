//! Vista data-select: one generic query engine over any collection of [`Cell`]s.
//!
//! Pipeline: filter, then (optionally) start metric downloads, then sort, then
//! paginate. Inputs are never mutated and identical inputs give identical output.
//!
//! [`Cell`]: vista_core::Cell

#![forbid(unsafe_code)]

pub mod metric;
pub mod query;
mod select;

pub use metric::{
    aggregate, AggregationMode, DataPoint, Metric, MetricClient, MetricPromise, MetricSeries, MetricSource, MetricsOutcome,
    CPU_USAGE_RATE, MEMORY_USAGE,
};
pub use query::{
    DataSelectParams, DataSelectQuery, FilterBy, FilterQuery, MetricQuery, PaginationQuery, SortBy, SortQuery,
    DEFAULT_ITEMS_PER_PAGE,
};
pub use select::{select_with_filter, select_with_filter_and_metrics, Selection};
