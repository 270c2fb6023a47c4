//! One mounted list view: the cached page, the reconciler feeding it live
//! changes, and the preferences it restores from and writes back to.
//!
//! All state sits behind one mutex that is never held across an await.
//! Fetches run as spawned tasks and land through the cache's generation
//! check, so a response for parameters the user has since left, or for a
//! view that has been unmounted, is dropped.

use super::cache::{Completion, FetchReason, FetchTicket, QueryCache};
use super::config::ViewConfig;
use super::reconciler::{Reconciler, ReconcilerStats};
use crate::connection::{Channel, ChannelSignal, Subscription, Transport};
use crate::core::{Filters, Page, QueryParams, Record, Result, Sorter, ViewError};
use crate::storage::{PreferencesStore, ViewPreferences};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{Instrument, Level, event, info_span, warn};

/// What the rendering layer reads.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewSnapshot {
    pub rows: Vec<Record>,
    pub total: u64,
    pub is_loading: bool,
    pub error: Option<ViewError>,
    pub query_params: QueryParams,
    pub preferences: ViewPreferences,
    /// The channel closed and the rows may lag behind the server.
    pub is_stale: bool,
    pub channel_connected: bool,
}

struct ViewState {
    cache: QueryCache,
    reconciler: Reconciler,
    preferences: ViewPreferences,
    // generation of the outstanding fetch and its task
    in_flight: Option<(u64, AbortHandle)>,
    mounted: bool,
}

/// Records the task of fetch `generation` as the outstanding one and returns
/// whichever handle lost: the superseded task, or the new one if a newer
/// fetch was installed first.
fn install_fetch(
    slot: &mut Option<(u64, AbortHandle)>,
    generation: u64,
    task: AbortHandle,
) -> Option<AbortHandle> {
    match slot.take() {
        Some((current, running)) if current > generation => {
            *slot = Some((current, running));
            Some(task)
        }
        previous => {
            *slot = Some((generation, task));
            previous.map(|(_, running)| running)
        }
    }
}

struct ViewShared {
    config: ViewConfig,
    transport: Arc<dyn Transport>,
    preferences: PreferencesStore,
    state: Mutex<ViewState>,
    version: watch::Sender<u64>,
}

impl ViewShared {
    fn lock(&self) -> MutexGuard<'_, ViewState> {
        // the state is plain data; a panic elsewhere cannot leave it torn
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn notify(&self) {
        self.version.send_modify(|version| *version += 1);
    }

    fn on_signal(self: &Arc<Self>, signal: ChannelSignal) {
        let ticket = {
            let mut state = self.lock();
            if !state.mounted {
                return;
            }
            let ViewState {
                cache, reconciler, ..
            } = &mut *state;
            reconciler.handle(cache, signal)
        };
        self.notify();
        if let Some(ticket) = ticket {
            self.spawn_fetch(ticket);
        }
    }

    fn spawn_fetch(self: &Arc<Self>, ticket: FetchTicket) {
        let generation = ticket.generation();
        let shared = Arc::clone(self);
        let span = info_span!(
            "fetch",
            resource = %self.config.resource,
            generation = ticket.generation(),
            reason = ?ticket.reason()
        );
        let task = tokio::spawn(
            async move {
                let result = shared
                    .transport
                    .list(&shared.config.resource, ticket.params())
                    .await;
                shared.complete(&ticket, result);
            }
            .instrument(span),
        );

        let mut state = self.lock();
        if !state.mounted {
            task.abort();
            return;
        }
        if let Some(loser) = install_fetch(&mut state.in_flight, generation, task.abort_handle()) {
            // its result would be discarded anyway
            loser.abort();
        }
    }

    fn complete(self: &Arc<Self>, ticket: &FetchTicket, result: Result<Page>) {
        let follow_up = {
            let mut state = self.lock();
            if !state.mounted {
                event!(Level::DEBUG, "dropping response for unmounted view");
                return;
            }
            if state
                .in_flight
                .as_ref()
                .is_some_and(|(generation, _)| *generation == ticket.generation())
            {
                state.in_flight = None;
            }
            let ViewState {
                cache, reconciler, ..
            } = &mut *state;
            match cache.complete(ticket, result) {
                Completion::Applied => {
                    event!(Level::DEBUG, "page replaced");
                    reconciler.page_replaced(cache)
                }
                Completion::Failed => {
                    if let Some(err) = cache.error() {
                        warn!(error = %err, "fetch failed, keeping last page");
                    }
                    None
                }
                Completion::Discarded => {
                    event!(Level::DEBUG, "discarding superseded response");
                    return;
                }
            }
        };
        self.notify();
        if let Some(ticket) = follow_up {
            self.spawn_fetch(ticket);
        }
    }

    /// Commits new preferences: persists them, and re-queries when their
    /// query part moved.
    fn commit(self: &Arc<Self>, preferences: ViewPreferences) -> Result<()> {
        let params = preferences.query_params();
        params.validate()?;

        let ticket = {
            let mut state = self.lock();
            if !state.mounted {
                return Err(ViewError::Unmounted(self.config.namespace.clone()));
            }
            if state.preferences != preferences {
                self.preferences.save(&self.config.namespace, &preferences);
                state.preferences = preferences;
            }
            state.cache.set_params(params)
        };
        self.notify();
        if let Some(ticket) = ticket {
            self.spawn_fetch(ticket);
        }
        Ok(())
    }
}

/// A mounted list view.
///
/// Created with [`LiveListView::mount`]; unmounts on [`LiveListView::unmount`]
/// or drop.
pub struct LiveListView {
    shared: Arc<ViewShared>,
    subscription: Option<Subscription>,
}

impl LiveListView {
    /// Restores preferences, subscribes to live changes and starts the first
    /// fetch. Returns as soon as the fetch is under way.
    pub async fn mount(
        config: ViewConfig,
        transport: Arc<dyn Transport>,
        channel: &dyn Channel,
        preferences: PreferencesStore,
    ) -> Result<Self> {
        let defaults = config.default_preferences();
        defaults.query_params().validate()?;

        let mut restored = preferences.load_or(&config.namespace, defaults.clone()).await;
        if let Err(err) = restored.query_params().validate() {
            warn!(
                namespace = %config.namespace,
                error = %err,
                "stored pagination unusable, using defaults"
            );
            restored.pagination = defaults.pagination;
        }

        let (version, _) = watch::channel(0u64);
        let shared = Arc::new(ViewShared {
            state: Mutex::new(ViewState {
                cache: QueryCache::new(restored.query_params()),
                reconciler: Reconciler::new(config.resource.clone()),
                preferences: restored,
                in_flight: None,
                mounted: true,
            }),
            config,
            transport,
            preferences,
            version,
        });

        // subscribe before fetching so nothing slips between the two
        let weak: Weak<ViewShared> = Arc::downgrade(&shared);
        let subscription = channel.subscribe(
            &shared.config.resource,
            Arc::new(move |signal: ChannelSignal| {
                if let Some(shared) = weak.upgrade() {
                    shared.on_signal(signal);
                }
            }),
        );

        let ticket = shared.lock().cache.refetch(FetchReason::Initial);
        event!(
            Level::INFO,
            resource = %shared.config.resource,
            namespace = %shared.config.namespace,
            "view mounted"
        );
        shared.spawn_fetch(ticket);

        Ok(Self {
            shared,
            subscription: Some(subscription),
        })
    }

    pub fn config(&self) -> &ViewConfig {
        &self.shared.config
    }

    pub fn snapshot(&self) -> ViewSnapshot {
        let state = self.shared.lock();
        let (rows, total) = match state.cache.page() {
            Some(page) => (page.records().to_vec(), page.total()),
            None => (Vec::new(), 0),
        };
        ViewSnapshot {
            rows,
            total,
            is_loading: state.cache.is_loading(),
            error: state.cache.error().cloned(),
            query_params: state.cache.params().clone(),
            preferences: state.preferences.clone(),
            is_stale: state.reconciler.is_stale(),
            channel_connected: state.reconciler.is_connected(),
        }
    }

    pub fn query_params(&self) -> QueryParams {
        self.shared.lock().cache.params().clone()
    }

    pub fn preferences(&self) -> ViewPreferences {
        self.shared.lock().preferences.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.shared.lock().cache.is_loading()
    }

    pub fn reconciler_stats(&self) -> ReconcilerStats {
        self.shared.lock().reconciler.stats()
    }

    /// Visible columns in the view's display order.
    pub fn visible_columns_in_order(&self) -> Vec<String> {
        let state = self.shared.lock();
        self.shared
            .config
            .order_columns(&state.preferences.visible_columns)
    }

    /// Ticks on every state change.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.shared.version.subscribe()
    }

    /// Waits until no fetch is outstanding.
    pub async fn settled(&self) {
        let mut changes = self.changes();
        while self.is_loading() {
            if changes.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn set_query_params(&self, params: QueryParams) -> Result<()> {
        let preferences = self.preferences().with_query(&params);
        self.shared.commit(preferences)
    }

    pub fn set_preferences(&self, preferences: ViewPreferences) -> Result<()> {
        self.shared.commit(preferences)
    }

    pub fn set_sorters(&self, sorters: Vec<Sorter>) -> Result<()> {
        self.set_query_params(self.query_params().with_sorters(sorters))
    }

    pub fn set_filters(&self, filters: Filters) -> Result<()> {
        let mut params = self.query_params();
        params.filters = filters;
        self.set_query_params(params)
    }

    pub fn set_page(&self, page_index: u32) -> Result<()> {
        self.set_query_params(self.query_params().with_page(page_index))
    }

    pub fn set_page_size(&self, page_size: u32) -> Result<()> {
        self.set_query_params(self.query_params().with_page_size(page_size))
    }

    /// Replaces the visible column set. Columns the view does not define are
    /// dropped.
    pub fn set_visible_columns<I, S>(&self, columns: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut visible = BTreeSet::new();
        for column in columns.into_iter().map(Into::into) {
            if self.shared.config.has_column(&column) {
                visible.insert(column);
            } else {
                warn!(namespace = %self.shared.config.namespace, column = %column, "unknown column");
            }
        }
        let mut preferences = self.preferences();
        preferences.visible_columns = visible;
        self.set_preferences(preferences)
    }

    /// Drops every filter, restores the default sort and returns to the
    /// first page.
    pub fn clear_filters(&self) -> Result<()> {
        let params = self
            .query_params()
            .with_sorters(self.shared.config.default_sorters.clone())
            .with_page(0);
        let params = QueryParams {
            filters: Filters::new(),
            ..params
        };
        self.set_query_params(params)
    }

    /// Re-fetches the current parameters, superseding any outstanding fetch.
    pub fn refresh(&self) -> Result<()> {
        let ticket = {
            let mut state = self.shared.lock();
            if !state.mounted {
                return Err(ViewError::Unmounted(self.shared.config.namespace.clone()));
            }
            state.cache.refetch(FetchReason::Manual)
        };
        self.shared.notify();
        self.shared.spawn_fetch(ticket);
        Ok(())
    }

    /// Cancels the subscription and abandons any outstanding fetch.
    pub fn unmount(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
        let mut state = self.shared.lock();
        if !state.mounted {
            return;
        }
        state.mounted = false;
        if let Some((_, task)) = state.in_flight.take() {
            task.abort();
        }
        event!(
            Level::INFO,
            resource = %self.shared.config.resource,
            namespace = %self.shared.config.namespace,
            "view unmounted"
        );
    }
}

impl Drop for LiveListView {
    fn drop(&mut self) {
        self.teardown();
    }
}
