use crate::core::Result;
use async_trait::async_trait;

/// Durable string key-value capability backing persisted view preferences.
///
/// Mirrors the browser's `localStorage` contract so that any local store
/// (a JSON file, an embedded database, plain memory) can stand in for it.
/// Values are small; nothing here is expected to stream.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Returns the stored value, or `None` if the key was never written.
    async fn get_item(&self, key: &str) -> Result<Option<String>>;

    /// Stores `value` under `key`, replacing any previous value.
    async fn set_item(&self, key: &str, value: String) -> Result<()>;

    /// Removes `key`; removing an absent key is not an error.
    async fn remove_item(&self, key: &str) -> Result<()>;

    /// Lists every stored key in ascending order.
    async fn keys(&self) -> Result<Vec<String>>;
}
