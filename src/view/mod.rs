//! The live list view: query cache, reconciler and their per-view owner.

pub mod cache;
pub mod config;
pub mod live_list;
pub mod reconciler;

pub use cache::{Completion, FetchReason, FetchTicket, Invalidation, QueryCache};
pub use config::ViewConfig;
pub use live_list::{LiveListView, ViewSnapshot};
pub use reconciler::{Reconciler, ReconcilerStats, Reconciliation, apply_event};
