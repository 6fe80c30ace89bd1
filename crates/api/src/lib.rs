//! Vista public API façade (in-process).
//!
//! List handlers fan out over resource channels, classify every fetch error,
//! then run the data-select engine over per-kind cells. Frontends (CLI or a
//! request layer) depend on the [`VistaApi`] trait only.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::info;
use vista_channels::{NamespaceQuery, ResourceChannel, ResourceChannels, ResourceChannelsBuilder};
use vista_core::{Cell, DataError, ErrorPolicy, ListMeta, ResourceKind};
use vista_dataselect::{select_with_filter_and_metrics, DataSelectQuery, Metric, MetricClient};
use vista_kubehub::{KubeStore, MetricsServerSource, ResourceStore};

pub mod common;
pub mod deployment;
pub mod event;
pub mod pod;
pub mod service;

pub use deployment::{DeploymentDto, DeploymentList};
pub use event::{EventDto, EventList};
pub use pod::{PodDto, PodList};
pub use service::{ServiceDto, ServiceList};

/// API errors suitable for transport over RPC later.
#[derive(Debug, thiserror::Error, Serialize, Deserialize, Clone, PartialEq)]
pub enum ApiError {
    #[error("validation: {0}")]
    Validation(String),
    /// A critical fetch failure; no partial payload is returned.
    #[error(transparent)]
    Data(#[from] DataError),
    #[error("internal: {0}")]
    Internal(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

/// List surface served to frontends.
///
/// Each list call has three outcomes: full data, data plus non-critical
/// `errors`, or a single critical error. Failing to list the primary kind is
/// always critical; supporting fetches are classified by the policy.
#[async_trait::async_trait]
pub trait VistaApi: Send + Sync {
    async fn pods(&self, nsq: &NamespaceQuery, query: &DataSelectQuery) -> ApiResult<PodList>;

    async fn deployments(&self, nsq: &NamespaceQuery, query: &DataSelectQuery) -> ApiResult<DeploymentList>;

    async fn services(&self, nsq: &NamespaceQuery, query: &DataSelectQuery) -> ApiResult<ServiceList>;

    async fn events(&self, nsq: &NamespaceQuery, query: &DataSelectQuery) -> ApiResult<EventList>;

    /// Fetch raw JSON bytes for one object.
    async fn get_raw(&self, kind: ResourceKind, namespace: Option<&str>, name: &str) -> ApiResult<Vec<u8>>;
}

/// Dispatch a list by resource name (`pods`, `deployment`, ...) and return it as JSON.
pub async fn list_json(
    api: &dyn VistaApi,
    resource: &str,
    nsq: &NamespaceQuery,
    query: &DataSelectQuery,
) -> ApiResult<serde_json::Value> {
    let kind = ResourceKind::from_name(resource).ok_or_else(|| ApiError::Validation(format!("unknown resource: {}", resource)))?;
    let value = match kind {
        ResourceKind::Pod => serde_json::to_value(api.pods(nsq, query).await?),
        ResourceKind::Deployment => serde_json::to_value(api.deployments(nsq, query).await?),
        ResourceKind::Service => serde_json::to_value(api.services(nsq, query).await?),
        ResourceKind::Event => serde_json::to_value(api.events(nsq, query).await?),
        other => return Err(ApiError::Validation(format!("no list handler for {}", other))),
    };
    value.map_err(|e| ApiError::Internal(e.to_string()))
}

// ----------------- In-process implementation -----------------

/// Output of the shared select step.
pub(crate) struct Page<C> {
    pub items: Vec<C>,
    pub list_meta: ListMeta,
    pub cumulative_metrics: Vec<Metric>,
    pub errors: Vec<DataError>,
}

/// Drain a requested channel; one that was never started counts as an internal error.
pub(crate) async fn collect<K: Send + 'static>(ch: Option<ResourceChannel<Vec<K>>>) -> (Vec<K>, Option<DataError>) {
    match ch {
        Some(ch) => ch.collect().await,
        None => (Vec::new(), Some(DataError::Internal("channel was not started".into()))),
    }
}

/// In-process implementation over a [`ResourceStore`].
pub struct InProcApi {
    store: Arc<dyn ResourceStore>,
    metrics: Option<MetricClient>,
    policy: ErrorPolicy,
}

impl InProcApi {
    /// No metric source; error table from `VISTA_NONCRITICAL_REASONS` or the default.
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store, metrics: None, policy: ErrorPolicy::from_env() }
    }

    /// Live cluster store plus metrics-server, both from the ambient kube config.
    pub async fn connect() -> anyhow::Result<Self> {
        let t0 = Instant::now();
        let store = KubeStore::try_default().await?;
        let source = MetricsServerSource::new(store.client());
        let api = Self::new(Arc::new(store)).with_metrics(MetricClient::from_env(Arc::new(source)));
        info!(took_ms = %t0.elapsed().as_millis(), "api: connected");
        Ok(api)
    }

    pub fn with_metrics(mut self, client: MetricClient) -> Self {
        self.metrics = Some(client);
        self
    }

    pub fn with_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &ErrorPolicy { &self.policy }

    /// Classify the primary fetch. Any failure of the listed resource itself is fatal.
    pub(crate) fn primary(&self, err: Option<DataError>) -> Result<Vec<DataError>, DataError> {
        ErrorPolicy::strict().append_error(err, Vec::new())
    }

    pub(crate) fn channels(&self, nsq: NamespaceQuery) -> ResourceChannelsBuilder {
        ResourceChannels::builder(Arc::clone(&self.store), nsq)
    }

    /// Run data select and fold metric errors into `errors` through the policy.
    pub(crate) async fn select<C: Cell + Clone>(
        &self,
        cells: Vec<C>,
        query: &DataSelectQuery,
        mut errors: Vec<DataError>,
    ) -> Result<Page<C>, DataError> {
        let selection = select_with_filter_and_metrics(&cells, query, self.metrics.as_ref()).await;
        let outcome = selection.metrics.get_metrics().await;
        for e in outcome.errors {
            errors = self.policy.append_error(Some(e), errors)?;
        }
        Ok(Page {
            items: selection.items,
            list_meta: ListMeta { total_items: selection.filtered_total },
            cumulative_metrics: outcome.metrics,
            errors,
        })
    }
}

#[async_trait::async_trait]
impl VistaApi for InProcApi {
    async fn pods(&self, nsq: &NamespaceQuery, query: &DataSelectQuery) -> ApiResult<PodList> {
        Ok(pod::pod_list(self, nsq, query).await?)
    }

    async fn deployments(&self, nsq: &NamespaceQuery, query: &DataSelectQuery) -> ApiResult<DeploymentList> {
        Ok(deployment::deployment_list(self, nsq, query).await?)
    }

    async fn services(&self, nsq: &NamespaceQuery, query: &DataSelectQuery) -> ApiResult<ServiceList> {
        Ok(service::service_list(self, nsq, query).await?)
    }

    async fn events(&self, nsq: &NamespaceQuery, query: &DataSelectQuery) -> ApiResult<EventList> {
        Ok(event::event_list(self, nsq, query).await?)
    }

    async fn get_raw(&self, kind: ResourceKind, namespace: Option<&str>, name: &str) -> ApiResult<Vec<u8>> {
        let t0 = Instant::now();
        if kind.namespaced() && namespace.is_none() {
            return Err(ApiError::Validation("namespace required for namespaced kind".into()));
        }
        let obj = self.store.get(kind, namespace, name).await?;
        let bytes = serde_json::to_vec(&obj).map_err(|e| ApiError::Internal(e.to_string()))?;
        info!(kind = %kind, name, bytes = bytes.len(), took_ms = %t0.elapsed().as_millis(), "api: get_raw ok");
        Ok(bytes)
    }
}
