//! JSON-file key-value store.
//!
//! All keys live in one JSON object on disk. Every write rewrites the whole
//! document through a temp file and a rename, so a crash mid-write leaves the
//! previous document intact.

use super::KeyValueStore;
use crate::core::{Result, ViewError};
use async_trait::async_trait;
use log::warn;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

type Document = BTreeMap<String, String>;

pub struct FileStore {
    path: PathBuf,
    // lazily loaded on first access
    document: Mutex<Option<Document>>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            document: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_document(&self) -> Result<Document> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Document::new()),
            Err(err) => {
                return Err(ViewError::Store(format!(
                    "Failed to read store file '{}': {}",
                    self.path.display(),
                    err
                )));
            }
        };

        match serde_json::from_slice::<Document>(&bytes) {
            Ok(document) => Ok(document),
            Err(err) => {
                warn!(
                    "store file '{}' is not a valid key-value document, starting empty: {}",
                    self.path.display(),
                    err
                );
                Ok(Document::new())
            }
        }
    }

    async fn with_document<T>(&self, f: impl FnOnce(&mut Document) -> T) -> Result<T> {
        let mut guard = self.document.lock().await;
        if guard.is_none() {
            *guard = Some(self.read_document().await?);
        }
        match guard.as_mut() {
            Some(document) => Ok(f(document)),
            None => Err(ViewError::Store("store document not loaded".into())),
        }
    }

    async fn persist(&self, document: &Document) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(document)?;
        atomic_write(&self.path, &bytes).await
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        self.with_document(|document| document.get(key).cloned()).await
    }

    async fn set_item(&self, key: &str, value: String) -> Result<()> {
        // hold the lock across the write so concurrent setters serialize
        let mut guard = self.document.lock().await;
        let mut document = match guard.take() {
            Some(document) => document,
            None => self.read_document().await?,
        };
        document.insert(key.to_string(), value);
        let written = self.persist(&document).await;
        *guard = Some(document);
        written
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        let mut guard = self.document.lock().await;
        let mut document = match guard.take() {
            Some(document) => document,
            None => self.read_document().await?,
        };
        let removed = document.remove(key).is_some();
        let written = if removed {
            self.persist(&document).await
        } else {
            Ok(())
        };
        *guard = Some(document);
        written
    }

    async fn keys(&self) -> Result<Vec<String>> {
        self.with_document(|document| document.keys().cloned().collect())
            .await
    }
}

async fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await.map_err(|err| {
                ViewError::Store(format!(
                    "Failed to create parent directory '{}': {}",
                    parent.display(),
                    err
                ))
            })?;
        }
    }

    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).await.map_err(|err| {
        ViewError::Store(format!(
            "Failed to write temp file '{}': {}",
            tmp.display(),
            err
        ))
    })?;

    fs::rename(&tmp, path).await.map_err(|err| {
        ViewError::Store(format!(
            "Failed to rename temp file '{}' -> '{}': {}",
            tmp.display(),
            path.display(),
            err
        ))
    })?;
    Ok(())
}
