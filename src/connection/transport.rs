use crate::core::{Page, QueryParams, Result};
use async_trait::async_trait;

/// Backing data source for list queries, typically a REST client.
///
/// Retries and timeouts are the implementation's business; a failed call is
/// surfaced once as an error state on the view.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetches exactly one page of `resource` for the given parameters.
    async fn list(&self, resource: &str, params: &QueryParams) -> Result<Page>;
}
