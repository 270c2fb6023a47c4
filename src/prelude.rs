//! Everything a rendering layer needs to mount and drive a live list.
//!
//! ```ignore
//! use spoolview::prelude::*;
//! ```

pub use crate::connection::{Channel, MemoryBackend, Transport};
pub use crate::core::{
    FilterPredicate, Filters, Pagination, QueryParams, Record, RecordId, SortOrder, Sorter, Value,
    ViewError,
};
pub use crate::storage::{FileStore, KeyValueStore, MemoryStore, PreferencesStore, ViewPreferences};
pub use crate::view::{LiveListView, ViewConfig, ViewSnapshot};
