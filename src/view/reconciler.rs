//! Applies live change notifications to the cached page.
//!
//! Updates patch the matching record in place. Creations and deletions
//! cannot be placed correctly without the server (sort position, filter
//! membership, totals), so they only invalidate the cache. Updates that
//! arrive before the first page are held and applied on top of it.

use super::cache::{FetchTicket, Invalidation, QueryCache};
use crate::connection::ChannelSignal;
use crate::core::{Decoded, Fields, LiveEvent, Page, RecordId, decode_message};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use tracing::{Level, debug, event};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// A record on the page changed.
    Patched,
    /// Nothing on the page was affected.
    Unchanged,
    /// The page can only be corrected by fetching it again.
    Refetch,
}

/// Pure page transition for one event.
///
/// Never adds an id the page does not already hold. Applying the same
/// update twice leaves the page as applying it once.
pub fn apply_event(page: &mut Page, event: &LiveEvent) -> Reconciliation {
    match event {
        LiveEvent::Updated { id, changed } => match page.get_mut(id) {
            Some(record) => {
                let before = record.clone();
                record.assign(changed);
                if *record == before {
                    Reconciliation::Unchanged
                } else {
                    Reconciliation::Patched
                }
            }
            None => Reconciliation::Unchanged,
        },
        LiveEvent::Created { .. } | LiveEvent::Deleted { .. } => Reconciliation::Refetch,
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerStats {
    pub patched: u64,
    pub unchanged: u64,
    pub refetches: u64,
    pub coalesced: u64,
    /// Invalidations held for a follow-up re-fetch.
    pub deferred: u64,
    /// Updates held until the first page.
    pub held: u64,
    pub ignored: u64,
}

/// Per-view reconciliation state: which resource it listens to, whether the
/// channel is still delivering, and counters.
#[derive(Debug)]
pub struct Reconciler {
    resource: String,
    connected: bool,
    stale: bool,
    // merged per id, later assignments win
    held: BTreeMap<RecordId, Fields>,
    stats: ReconcilerStats,
}

impl Reconciler {
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            connected: true,
            stale: false,
            held: BTreeMap::new(),
            stats: ReconcilerStats::default(),
        }
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// True once the channel closed and no authoritative page arrived since.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn stats(&self) -> ReconcilerStats {
        self.stats
    }

    /// A fresh page landed; it reflects the server regardless of channel
    /// state. Applies held updates to it and returns the deferred re-fetch,
    /// if one is owed.
    pub fn page_replaced(&mut self, cache: &mut QueryCache) -> Option<FetchTicket> {
        self.stale = false;

        if let Some(page) = cache.page_mut() {
            for (id, changed) in std::mem::take(&mut self.held) {
                match apply_event(page, &LiveEvent::Updated { id, changed }) {
                    Reconciliation::Patched => self.stats.patched += 1,
                    _ => self.stats.unchanged += 1,
                }
            }
        }

        let ticket = cache.follow_up()?;
        self.stats.refetches += 1;
        debug!(resource = %self.resource, "re-fetching for changes the last page missed");
        Some(ticket)
    }

    /// Handles one channel signal. Returns a ticket when a re-fetch must be
    /// started.
    pub fn handle(&mut self, cache: &mut QueryCache, signal: ChannelSignal) -> Option<FetchTicket> {
        match signal {
            ChannelSignal::Message(raw) => self.handle_message(cache, &raw),
            ChannelSignal::Lagged(missed) => {
                event!(
                    Level::WARN,
                    resource = %self.resource,
                    missed,
                    "live channel lagged, re-fetching page"
                );
                self.request_refetch(cache)
            }
            ChannelSignal::Closed => {
                if self.connected {
                    event!(
                        Level::WARN,
                        resource = %self.resource,
                        "live channel closed, page will no longer follow changes"
                    );
                }
                self.connected = false;
                self.stale = true;
                None
            }
        }
    }

    fn handle_message(&mut self, cache: &mut QueryCache, raw: &JsonValue) -> Option<FetchTicket> {
        let message = match decode_message(raw) {
            Ok(Decoded::Event(message)) => message,
            Ok(Decoded::KeepAlive) => return None,
            Err(err) => {
                self.stats.ignored += 1;
                event!(Level::WARN, resource = %self.resource, error = %err, "ignoring live message");
                return None;
            }
        };

        if let Some(resource) = message.resource.as_deref() {
            if resource != self.resource {
                self.stats.ignored += 1;
                event!(
                    Level::WARN,
                    expected = %self.resource,
                    received = resource,
                    "ignoring live event for another resource"
                );
                return None;
            }
        }

        if cache.page().is_none() {
            return match message.event {
                LiveEvent::Updated { id, changed } => {
                    debug!(resource = %self.resource, id = %id, "holding update until first page");
                    self.held.entry(id).or_default().extend(changed);
                    self.stats.held += 1;
                    None
                }
                LiveEvent::Created { .. } | LiveEvent::Deleted { .. } => self.request_refetch(cache),
            };
        }
        let Some(page) = cache.page_mut() else {
            return None;
        };

        match apply_event(page, &message.event) {
            Reconciliation::Patched => {
                self.stats.patched += 1;
                debug!(resource = %self.resource, id = %message.event.id(), "patched record");
                None
            }
            Reconciliation::Unchanged => {
                self.stats.unchanged += 1;
                None
            }
            Reconciliation::Refetch => {
                debug!(
                    resource = %self.resource,
                    kind = message.event.kind(),
                    id = %message.event.id(),
                    "membership changed"
                );
                self.request_refetch(cache)
            }
        }
    }

    fn request_refetch(&mut self, cache: &mut QueryCache) -> Option<FetchTicket> {
        match cache.invalidate() {
            Invalidation::Started(ticket) => {
                self.stats.refetches += 1;
                Some(ticket)
            }
            Invalidation::Coalesced => {
                self.stats.coalesced += 1;
                None
            }
            Invalidation::Deferred => {
                self.stats.deferred += 1;
                None
            }
        }
    }
}
