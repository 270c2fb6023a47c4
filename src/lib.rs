// ============================================================================
// spoolview Library
// ============================================================================
//
// Keeps one paginated, sorted, filtered page of records consistent with the
// server's query results, the live change notifications it pushes, and the
// user's table preferences persisted across reloads.

pub mod connection;
pub mod core;
pub mod prelude;
pub mod printer;
pub mod storage;
pub mod view;

pub use crate::connection::{Channel, ChannelSignal, MemoryBackend, Subscription, Transport};
pub use crate::core::{
    FilterPredicate, Filters, LiveEvent, Page, Pagination, QueryParams, Record, RecordId, Result,
    SortOrder, Sorter, Value, ViewError,
};
pub use crate::storage::{FileStore, KeyValueStore, MemoryStore, PreferencesStore, ViewPreferences};
pub use crate::view::{LiveListView, ViewConfig, ViewSnapshot};
