pub mod error;
pub mod event;
pub mod query;
pub mod types;
pub mod value;

pub use error::{Result, ViewError};
pub use event::{Decoded, LiveEvent, LiveMessage, decode_message};
pub use query::{
    DEFAULT_PAGE_SIZE, FilterPredicate, Filters, Pagination, QueryParams, SortOrder, Sorter,
};
pub use types::{Fields, Page, Record, RecordId};
pub use value::Value;
