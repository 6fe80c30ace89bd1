//! Event list.

use std::time::Instant;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Event;
use serde::{Deserialize, Serialize};
use tracing::info;
use vista_channels::NamespaceQuery;
use vista_core::{property, Cell, ComparableValue, DataError, ListMeta, ResourceKind};
use vista_dataselect::{DataSelectQuery, Metric};

use crate::common::{event_first_seen, event_last_seen, ObjectMeta, TypeMeta};
use crate::{collect, InProcApi};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventDto {
    pub object_meta: ObjectMeta,
    pub type_meta: TypeMeta,
    pub message: String,
    pub source_component: String,
    pub source_host: String,
    pub object: String,
    pub object_kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_namespace: Option<String>,
    pub count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_seen: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
    pub reason: String,
    #[serde(rename = "type")]
    pub type_: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventList {
    pub list_meta: ListMeta,
    pub events: Vec<EventDto>,
    pub cumulative_metrics: Vec<Metric>,
    pub errors: Vec<DataError>,
}

#[derive(Debug, Clone)]
pub struct EventCell {
    pub event: Event,
    meta: ObjectMeta,
}

impl EventCell {
    pub fn new(event: Event) -> Self {
        let meta = ObjectMeta::from(&event.metadata);
        Self { event, meta }
    }
}

impl Cell for EventCell {
    fn property(&self, name: &str) -> Option<ComparableValue> {
        match name {
            property::REASON => self.event.reason.as_deref().map(Into::into),
            property::TYPE => self.event.type_.as_deref().map(Into::into),
            property::FIRST_SEEN => event_first_seen(&self.event).map(Into::into),
            property::LAST_SEEN => event_last_seen(&self.event).map(Into::into),
            other => self.meta.property(other),
        }
    }
}

pub fn to_event(cell: EventCell) -> EventDto {
    let e = &cell.event;
    let source = e.source.clone().unwrap_or_default();
    EventDto {
        message: e.message.clone().unwrap_or_default(),
        source_component: source.component.unwrap_or_default(),
        source_host: source.host.unwrap_or_default(),
        object: e.involved_object.name.clone().unwrap_or_default(),
        object_kind: e.involved_object.kind.clone().unwrap_or_default(),
        object_namespace: e.involved_object.namespace.clone(),
        count: e.count.unwrap_or(1),
        first_seen: event_first_seen(e),
        last_seen: event_last_seen(e),
        reason: e.reason.clone().unwrap_or_default(),
        type_: e.type_.clone().unwrap_or_default(),
        type_meta: TypeMeta::new(ResourceKind::Event.kind()),
        object_meta: cell.meta,
    }
}

pub(crate) async fn event_list(ctx: &InProcApi, nsq: &NamespaceQuery, query: &DataSelectQuery) -> Result<EventList, DataError> {
    let t0 = Instant::now();
    let mut channels = ctx.channels(nsq.clone()).events().build();
    let (events, err) = collect(channels.event_list.take()).await;
    let errors = ctx.primary(err)?;

    let cells: Vec<EventCell> = events.into_iter().map(EventCell::new).collect();
    let page = ctx.select(cells, query, errors).await?;
    let events: Vec<EventDto> = page.items.into_iter().map(to_event).collect();
    info!(total = page.list_meta.total_items, page = events.len(), took_ms = %t0.elapsed().as_millis(), "api: event list ok");
    Ok(EventList { list_meta: page.list_meta, events, cumulative_metrics: page.cumulative_metrics, errors: page.errors })
}
