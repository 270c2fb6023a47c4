use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ViewError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP error {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Malformed live event: {0}")]
    MalformedEvent(String),

    #[error("Duplicate record id '{0}' in page")]
    DuplicateRecord(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("View '{0}' is unmounted")]
    Unmounted(String),

    #[error("Lock error: {0}")]
    LockError(String),
}

pub type Result<T> = std::result::Result<T, ViewError>;

impl From<serde_json::Error> for ViewError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for ViewError {
    fn from(err: std::io::Error) -> Self {
        Self::Store(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for ViewError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}
