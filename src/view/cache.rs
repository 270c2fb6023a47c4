//! Query result cache: one page of results for the current parameters,
//! kept on screen while a newer request is outstanding.
//!
//! The cache performs no I/O. Starting a fetch hands out a [`FetchTicket`]
//! tagged with a generation; only the ticket of the latest generation may
//! land, so responses for superseded parameters are dropped.
//!
//! An invalidation that arrives while a re-fetch is outstanding folds into
//! it. One that arrives while any other fetch is outstanding cannot: that
//! response may already have been computed without the change. It is held
//! and turned into a single follow-up re-fetch once the response lands.

use crate::core::{Page, QueryParams, Result, ViewError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchReason {
    Initial,
    ParamsChanged,
    Invalidated,
    Manual,
}

#[derive(Debug, Clone)]
pub struct FetchTicket {
    generation: u64,
    params: QueryParams,
    reason: FetchReason,
}

impl FetchTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn params(&self) -> &QueryParams {
        &self.params
    }

    pub fn reason(&self) -> FetchReason {
        self.reason
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The page was replaced.
    Applied,
    /// The request failed; the previous page stays.
    Failed,
    /// The ticket was superseded and its result ignored.
    Discarded,
}

/// Outcome of [`QueryCache::invalidate`].
#[derive(Debug, Clone)]
pub enum Invalidation {
    /// No fetch was outstanding; this one must be started.
    Started(FetchTicket),
    /// Folded into the outstanding re-fetch.
    Coalesced,
    /// Held until the outstanding fetch lands.
    Deferred,
}

#[derive(Debug)]
pub struct QueryCache {
    params: QueryParams,
    page: Option<Page>,
    error: Option<ViewError>,
    generation: u64,
    in_flight: Option<FetchReason>,
    pending_invalidation: bool,
}

impl QueryCache {
    pub fn new(params: QueryParams) -> Self {
        Self {
            params,
            page: None,
            error: None,
            generation: 0,
            in_flight: None,
            pending_invalidation: false,
        }
    }

    pub fn params(&self) -> &QueryParams {
        &self.params
    }

    pub fn page(&self) -> Option<&Page> {
        self.page.as_ref()
    }

    pub(crate) fn page_mut(&mut self) -> Option<&mut Page> {
        self.page.as_mut()
    }

    pub fn error(&self) -> Option<&ViewError> {
        self.error.as_ref()
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight.is_some()
    }

    /// True while an invalidation waits for the outstanding fetch to land.
    pub fn has_pending_invalidation(&self) -> bool {
        self.pending_invalidation
    }

    /// Switches to new parameters. Equal parameters issue no request.
    pub fn set_params(&mut self, params: QueryParams) -> Option<FetchTicket> {
        if params == self.params {
            return None;
        }
        self.params = params;
        Some(self.begin(FetchReason::ParamsChanged))
    }

    /// Unconditionally starts a new request for the current parameters,
    /// superseding any outstanding one.
    pub fn refetch(&mut self, reason: FetchReason) -> FetchTicket {
        self.begin(reason)
    }

    /// Requests a re-fetch with the current parameters.
    pub fn invalidate(&mut self) -> Invalidation {
        match self.in_flight {
            None => Invalidation::Started(self.begin(FetchReason::Invalidated)),
            Some(FetchReason::Invalidated) => Invalidation::Coalesced,
            Some(_) => {
                self.pending_invalidation = true;
                Invalidation::Deferred
            }
        }
    }

    /// Starts the re-fetch held back by [`QueryCache::invalidate`], once
    /// nothing is outstanding.
    pub fn follow_up(&mut self) -> Option<FetchTicket> {
        if !self.pending_invalidation || self.in_flight.is_some() {
            return None;
        }
        Some(self.begin(FetchReason::Invalidated))
    }

    /// Lands the result of a request.
    pub fn complete(&mut self, ticket: &FetchTicket, result: Result<Page>) -> Completion {
        if ticket.generation != self.generation {
            return Completion::Discarded;
        }
        self.in_flight = None;
        match result {
            Ok(page) => {
                self.page = Some(page);
                self.error = None;
                Completion::Applied
            }
            Err(err) => {
                // no retries at this layer; the next fetch picks the change up
                self.pending_invalidation = false;
                self.error = Some(err);
                Completion::Failed
            }
        }
    }

    fn begin(&mut self, reason: FetchReason) -> FetchTicket {
        self.generation += 1;
        self.in_flight = Some(reason);
        // a request issued now observes every change seen so far
        self.pending_invalidation = false;
        FetchTicket {
            generation: self.generation,
            params: self.params.clone(),
            reason,
        }
    }
}
