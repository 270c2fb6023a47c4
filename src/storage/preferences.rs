//! Persisted per-view table preferences.
//!
//! Each view owns a namespace key under which its sorting, filters,
//! pagination and visible columns are stored as one JSON document. Reads never
//! fail: absent or unreadable data yields the namespace default. Writes are
//! queued to a background writer and applied in submission order, so callers
//! never wait on the store.

use super::KeyValueStore;
use crate::core::{Filters, Pagination, QueryParams, Result, Sorter, ViewError};
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewPreferences {
    pub sorters: Vec<Sorter>,
    pub filters: Filters,
    pub pagination: Pagination,
    pub visible_columns: BTreeSet<String>,
}

impl ViewPreferences {
    /// Query parameters implied by these preferences.
    pub fn query_params(&self) -> QueryParams {
        QueryParams::new(self.pagination, self.sorters.clone(), self.filters.clone())
    }

    /// Copies the query-affecting parts of `params` into the preferences.
    pub fn with_query(mut self, params: &QueryParams) -> Self {
        self.sorters = params.sorters.clone();
        self.filters = params.filters.clone();
        self.pagination = params.pagination;
        self
    }

    /// Decodes a stored document field by field. Missing or unreadable fields
    /// fall back to `defaults`; a document that is not a JSON object at all is
    /// rejected.
    pub fn decode(raw: &str, defaults: ViewPreferences) -> Result<Self> {
        let document: JsonValue = serde_json::from_str(raw)?;
        let JsonValue::Object(fields) = document else {
            return Err(ViewError::Serialization(
                "stored preferences are not a JSON object".into(),
            ));
        };

        Ok(Self {
            sorters: decode_field(&fields, &["sorters"]).unwrap_or(defaults.sorters),
            filters: decode_field(&fields, &["filters"]).unwrap_or(defaults.filters),
            pagination: decode_field(&fields, &["pagination"]).unwrap_or(defaults.pagination),
            // "showColumns" is the key older builds wrote
            visible_columns: decode_field(&fields, &["visibleColumns", "showColumns"])
                .unwrap_or(defaults.visible_columns),
        })
    }
}

fn decode_field<T: DeserializeOwned>(fields: &JsonMap<String, JsonValue>, keys: &[&str]) -> Option<T> {
    keys.iter().find_map(|key| {
        let raw = fields.get(*key)?;
        match serde_json::from_value(raw.clone()) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!("ignoring unreadable stored preference '{}': {}", key, err);
                None
            }
        }
    })
}

enum WriterCommand {
    Write {
        key: String,
        value: Option<String>,
        seq: u64,
    },
    Flush(oneshot::Sender<()>),
}

struct Pending {
    seq: u64,
    // `None` marks a queued removal
    entries: HashMap<String, (u64, Option<String>)>,
}

/// Namespaced access to a [`KeyValueStore`] for view preferences and flags.
///
/// Cloning is cheap; clones share the same writer queue. Must be created from
/// within a Tokio runtime, since construction spawns the writer task.
#[derive(Clone)]
pub struct PreferencesStore {
    store: Arc<dyn KeyValueStore>,
    pending: Arc<Mutex<Pending>>,
    writer: mpsc::UnboundedSender<WriterCommand>,
}

impl PreferencesStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        let pending = Arc::new(Mutex::new(Pending {
            seq: 0,
            entries: HashMap::new(),
        }));
        let (writer, commands) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(Arc::clone(&store), Arc::clone(&pending), commands));

        Self {
            store,
            pending,
            writer,
        }
    }

    /// Loads a namespace, falling back to [`ViewPreferences::default`].
    pub async fn load(&self, namespace: &str) -> ViewPreferences {
        self.load_or(namespace, ViewPreferences::default()).await
    }

    /// Loads a namespace, falling back to `defaults` when nothing usable is
    /// stored.
    pub async fn load_or(&self, namespace: &str, defaults: ViewPreferences) -> ViewPreferences {
        let Some(raw) = self.read(namespace).await else {
            return defaults;
        };
        match ViewPreferences::decode(&raw, defaults.clone()) {
            Ok(preferences) => preferences,
            Err(err) => {
                warn!(
                    "discarding corrupt preferences for namespace '{}': {}",
                    namespace, err
                );
                defaults
            }
        }
    }

    /// Queues the full preferences value for `namespace`, replacing whatever
    /// was stored before. Returns immediately.
    pub fn save(&self, namespace: &str, preferences: &ViewPreferences) {
        match serde_json::to_string(preferences) {
            Ok(raw) => self.enqueue(namespace, Some(raw)),
            Err(err) => warn!(
                "failed to encode preferences for namespace '{}': {}",
                namespace, err
            ),
        }
    }

    /// Queues removal of a namespace so that the next load sees the default.
    pub fn clear(&self, namespace: &str) {
        self.enqueue(namespace, None);
    }

    /// Loads a boolean preference kept under its own dedicated key.
    pub async fn load_flag(&self, key: &str, default: bool) -> bool {
        let Some(raw) = self.read(key).await else {
            return default;
        };
        match serde_json::from_str::<bool>(&raw) {
            Ok(value) => value,
            Err(err) => {
                warn!("discarding corrupt flag '{}': {}", key, err);
                default
            }
        }
    }

    pub fn save_flag(&self, key: &str, value: bool) {
        self.enqueue(key, Some(value.to_string()));
    }

    /// Waits until every write queued before this call has reached the store.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.writer.send(WriterCommand::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    /// Lists namespaces and flag keys currently stored or queued.
    pub async fn keys(&self) -> Result<Vec<String>> {
        let mut keys: BTreeSet<String> = self.store.keys().await?.into_iter().collect();
        if let Ok(pending) = self.pending.lock() {
            for (key, (_, value)) in &pending.entries {
                match value {
                    Some(_) => keys.insert(key.clone()),
                    None => keys.remove(key),
                };
            }
        }
        Ok(keys.into_iter().collect())
    }

    /// Raw stored text for a key, honouring queued writes.
    pub async fn read(&self, key: &str) -> Option<String> {
        let queued = match self.pending.lock() {
            Ok(pending) => pending.entries.get(key).map(|(_, value)| value.clone()),
            Err(err) => {
                warn!("pending preference writes unavailable: {}", err);
                None
            }
        };
        if let Some(value) = queued {
            return value;
        }

        match self.store.get_item(key).await {
            Ok(value) => value,
            Err(err) => {
                warn!("failed to read preference key '{}': {}", key, err);
                None
            }
        }
    }

    fn enqueue(&self, key: &str, value: Option<String>) {
        let seq = match self.pending.lock() {
            Ok(mut pending) => {
                pending.seq += 1;
                let seq = pending.seq;
                pending.entries.insert(key.to_string(), (seq, value.clone()));
                seq
            }
            Err(err) => {
                warn!("pending preference writes unavailable: {}", err);
                0
            }
        };
        let command = WriterCommand::Write {
            key: key.to_string(),
            value,
            seq,
        };
        if self.writer.send(command).is_err() {
            warn!("preference writer stopped, dropping write for '{}'", key);
        }
    }
}

async fn run_writer(
    store: Arc<dyn KeyValueStore>,
    pending: Arc<Mutex<Pending>>,
    mut commands: mpsc::UnboundedReceiver<WriterCommand>,
) {
    while let Some(command) = commands.recv().await {
        match command {
            WriterCommand::Write { key, value, seq } => {
                let written = match &value {
                    Some(raw) => store.set_item(&key, raw.clone()).await,
                    None => store.remove_item(&key).await,
                };
                if let Err(err) = written {
                    warn!("failed to persist preference key '{}': {}", key, err);
                } else {
                    debug!("persisted preference key '{}'", key);
                }

                // a newer write for the same key keeps its overlay entry
                if let Ok(mut pending) = pending.lock() {
                    if pending.entries.get(&key).is_some_and(|(queued, _)| *queued == seq) {
                        pending.entries.remove(&key);
                    }
                }
            }
            WriterCommand::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}
