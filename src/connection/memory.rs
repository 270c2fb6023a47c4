// ============================================================================
// src/connection/memory.rs - In-process loopback backend
// ============================================================================
//
// Serves list queries over records held in memory (filter, then stable
// multi-key sort, then paginate) and broadcasts a change notification for
// every mutation, in the same wire shape the server pushes.
//
// ============================================================================

use super::{Channel, ChannelSignal, SignalHandler, Subscription, Transport};
use crate::core::{
    Fields, LiveEvent, Page, QueryParams, Record, RecordId, Result, Sorter, Value, ViewError,
};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::debug;

/// Default number of notifications a subscriber may fall behind before it
/// is told it lagged.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

pub struct MemoryBackend {
    resources: RwLock<HashMap<String, Vec<Record>>>,
    channels: Mutex<HashMap<String, broadcast::Sender<JsonValue>>>,
    capacity: usize,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            resources: RwLock::new(HashMap::new()),
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Replaces a resource's records without notifying anyone.
    pub fn seed(&self, resource: &str, records: Vec<Record>) -> Result<()> {
        // reuse the page invariant check
        let records = Page::new(records, 0)?.into_records();
        self.resources
            .write()?
            .insert(resource.to_string(), records);
        Ok(())
    }

    pub fn records(&self, resource: &str) -> Result<Vec<Record>> {
        Ok(self
            .resources
            .read()?
            .get(resource)
            .cloned()
            .unwrap_or_default())
    }

    pub fn insert(&self, resource: &str, record: Record) -> Result<()> {
        let id = record.id.clone();
        {
            let mut resources = self.resources.write()?;
            let records = resources.entry(resource.to_string()).or_default();
            if records.iter().any(|existing| existing.id == id) {
                return Err(ViewError::DuplicateRecord(id.to_string()));
            }
            records.push(record);
        }
        self.publish_event(resource, &LiveEvent::Created { id })
    }

    /// Assigns `changes` to the record and notifies with the changed fields.
    pub fn update(&self, resource: &str, id: &RecordId, changes: Fields) -> Result<()> {
        {
            let mut resources = self.resources.write()?;
            let record = resources
                .get_mut(resource)
                .and_then(|records| records.iter_mut().find(|record| &record.id == id))
                .ok_or_else(|| {
                    ViewError::Transport(format!("{} '{}' not found", resource, id))
                })?;
            record.assign(&changes);
        }
        self.publish_event(
            resource,
            &LiveEvent::Updated {
                id: id.clone(),
                changed: changes,
            },
        )
    }

    pub fn delete(&self, resource: &str, id: &RecordId) -> Result<()> {
        {
            let mut resources = self.resources.write()?;
            let records = resources.get_mut(resource).ok_or_else(|| {
                ViewError::Transport(format!("{} '{}' not found", resource, id))
            })?;
            let before = records.len();
            records.retain(|record| &record.id != id);
            if records.len() == before {
                return Err(ViewError::Transport(format!("{} '{}' not found", resource, id)));
            }
        }
        self.publish_event(resource, &LiveEvent::Deleted { id: id.clone() })
    }

    /// Sends an arbitrary message to subscribers of `resource`. Returns the
    /// number of subscribers reached.
    pub fn publish_raw(&self, resource: &str, message: JsonValue) -> Result<usize> {
        let channels = self.channels.lock()?;
        Ok(channels
            .get(resource)
            .and_then(|sender| sender.send(message).ok())
            .unwrap_or(0))
    }

    /// Drops the channel for `resource`; current subscribers see it close.
    pub fn disconnect(&self, resource: &str) -> Result<()> {
        self.channels.lock()?.remove(resource);
        Ok(())
    }

    fn publish_event(&self, resource: &str, event: &LiveEvent) -> Result<()> {
        let reached = self.publish_raw(resource, event.to_message(resource, Utc::now()))?;
        debug!(resource, kind = event.kind(), id = %event.id(), reached, "published change");
        Ok(())
    }
}

#[async_trait]
impl Transport for MemoryBackend {
    async fn list(&self, resource: &str, params: &QueryParams) -> Result<Page> {
        params.validate()?;

        let mut matching: Vec<Record> = self
            .resources
            .read()?
            .get(resource)
            .map(|records| {
                records
                    .iter()
                    .filter(|record| {
                        params.filters.iter().all(|(field, predicate)| {
                            predicate.matches(&record.get(field).unwrap_or(Value::Null))
                        })
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        // stable, so ties keep insertion order
        matching.sort_by(|a, b| compare_records(a, b, &params.sorters));

        let total = matching.len() as u64;
        let records = matching
            .into_iter()
            .skip(params.pagination.offset())
            .take(params.page_size() as usize)
            .collect();
        Page::new(records, total)
    }
}

impl Channel for MemoryBackend {
    fn subscribe(&self, resource: &str, on_signal: SignalHandler) -> Subscription {
        let receiver = match self.channels.lock() {
            Ok(mut channels) => Some(
                channels
                    .entry(resource.to_string())
                    .or_insert_with(|| broadcast::channel(self.capacity).0)
                    .subscribe(),
            ),
            Err(_) => None,
        };

        let Some(mut receiver) = receiver else {
            on_signal(ChannelSignal::Closed);
            return Subscription::new(resource, || {});
        };

        let task = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(message) => on_signal(ChannelSignal::Message(message)),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        on_signal(ChannelSignal::Lagged(missed))
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        on_signal(ChannelSignal::Closed);
                        break;
                    }
                }
            }
        });
        Subscription::new(resource, move || task.abort())
    }
}

/// Multi-key comparison: the first sorter that distinguishes the records
/// decides.
fn compare_records(a: &Record, b: &Record, sorters: &[Sorter]) -> Ordering {
    for sorter in sorters {
        let left = a.get(&sorter.field).unwrap_or(Value::Null);
        let right = b.get(&sorter.field).unwrap_or(Value::Null);
        let ordering = sorter.order.apply(left.compare(&right));
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FilterPredicate, Pagination};

    fn printers() -> Vec<Record> {
        vec![
            Record::new(1).with("status", "idle").with("ams_unit_count", 2i64),
            Record::new(2).with("status", "printing").with("ams_unit_count", 1i64),
            Record::new(3).with("status", "idle"),
            Record::new(4).with("status", "error").with("ams_unit_count", 4i64),
        ]
    }

    #[tokio::test]
    async fn test_list_filters_sorts_and_paginates() {
        let backend = MemoryBackend::new();
        backend.seed("printer", printers()).unwrap();

        let params = QueryParams::new(
            Pagination { page_index: 0, page_size: 2 },
            vec![Sorter::desc("ams_unit_count")],
            Default::default(),
        );
        let page = backend.list("printer", &params).await.unwrap();
        let ids: Vec<_> = page.records().iter().map(|r| r.id.clone()).collect();
        // NULL sorts first when descending
        assert_eq!(ids, vec![RecordId::Int(3), RecordId::Int(4)]);
        assert_eq!(page.total(), 4);

        let params = params
            .with_page(1)
            .with_filter("status", FilterPredicate::Ne("error".into()));
        let page = backend.list("printer", &params).await.unwrap();
        let ids: Vec<_> = page.records().iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids, vec![RecordId::Int(2)]);
        assert_eq!(page.total(), 3);
    }

    #[tokio::test]
    async fn test_list_unknown_resource_is_empty() {
        let backend = MemoryBackend::new();
        let page = backend.list("filament", &QueryParams::default()).await.unwrap();
        assert!(page.is_empty());
        assert_eq!(page.total(), 0);
    }

    #[test]
    fn test_insert_rejects_duplicate() {
        let backend = MemoryBackend::new();
        backend.seed("printer", printers()).unwrap();
        let err = backend.insert("printer", Record::new(2)).unwrap_err();
        assert_eq!(err, ViewError::DuplicateRecord("2".into()));
    }
}
