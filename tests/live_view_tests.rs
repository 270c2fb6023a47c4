use async_trait::async_trait;
use serde_json::json;
use spoolview::core::Fields;
use spoolview::printer;
use spoolview::{
    FilterPredicate, KeyValueStore, LiveListView, MemoryBackend, MemoryStore, Page,
    PreferencesStore, QueryParams, Record, RecordId, Result, Sorter, Transport, Value, ViewConfig,
    ViewError, ViewPreferences,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;

/// Serves pages from a [`MemoryBackend`], one per permit, and counts calls.
///
/// By default a page reflects the backend when its permit is granted. With
/// `answer_on_arrival` it is computed as the request arrives and only the
/// response waits for the permit, like a reply still on the wire.
struct GatedTransport {
    backend: Arc<MemoryBackend>,
    permits: Semaphore,
    calls: AtomicUsize,
    failing: AtomicBool,
    answer_on_arrival: bool,
}

impl GatedTransport {
    fn closed(backend: Arc<MemoryBackend>) -> Arc<Self> {
        Arc::new(Self {
            backend,
            permits: Semaphore::new(0),
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            answer_on_arrival: false,
        })
    }

    fn in_transit(backend: Arc<MemoryBackend>) -> Arc<Self> {
        Arc::new(Self {
            backend,
            permits: Semaphore::new(0),
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            answer_on_arrival: true,
        })
    }

    fn open(backend: Arc<MemoryBackend>) -> Arc<Self> {
        let transport = Self::closed(backend);
        transport.release(Semaphore::MAX_PERMITS / 2);
        transport
    }

    fn release(&self, n: usize) {
        self.permits.add_permits(n);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for GatedTransport {
    async fn list(&self, resource: &str, params: &QueryParams) -> Result<Page> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let answered = if self.answer_on_arrival {
            Some(self.backend.list(resource, params).await)
        } else {
            None
        };
        self.permits
            .acquire()
            .await
            .map_err(|e| ViewError::Transport(e.to_string()))?
            .forget();
        if self.failing.load(Ordering::SeqCst) {
            return Err(ViewError::Http {
                status: 503,
                message: "service unavailable".into(),
            });
        }
        match answered {
            Some(page) => page,
            None => self.backend.list(resource, params).await,
        }
    }
}

fn printers(count: i64) -> Vec<Record> {
    let statuses = ["idle", "printing", "idle", "error"];
    (1..=count)
        .map(|id| {
            Record::new(id)
                .with("printer_id", format!("X1P{:04}", id))
                .with("status", statuses[(id as usize - 1) % statuses.len()])
        })
        .collect()
}

fn seeded(count: i64) -> Arc<MemoryBackend> {
    let backend = Arc::new(MemoryBackend::new());
    backend.seed(printer::RESOURCE, printers(count)).unwrap();
    backend
}

async fn mount(
    config: ViewConfig,
    transport: Arc<dyn Transport>,
    backend: &Arc<MemoryBackend>,
    store: Arc<MemoryStore>,
) -> LiveListView {
    let preferences = PreferencesStore::new(store);
    LiveListView::mount(config, transport, backend.as_ref(), preferences)
        .await
        .unwrap()
}

async fn pump() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Runs `action` and waits for the view to report a state change.
async fn changed_after(view: &LiveListView, action: impl FnOnce()) {
    let mut changes = view.changes();
    action();
    tokio::time::timeout(Duration::from_secs(2), changes.changed())
        .await
        .expect("view did not change")
        .unwrap();
}

fn ids(view: &LiveListView) -> Vec<RecordId> {
    view.snapshot().rows.iter().map(|r| r.id.clone()).collect()
}

#[tokio::test]
async fn test_restores_saved_sort_and_pagination() {
    let backend = seeded(4);
    let store = Arc::new(MemoryStore::new());
    store
        .set_item(
            printer::LIST_NAMESPACE,
            json!({
                "sorters": [{"field": "id", "order": "asc"}],
                "pagination": {"pageIndex": 0, "pageSize": 20}
            })
            .to_string(),
        )
        .await
        .unwrap();

    let view = mount(printer::list_config(), backend.clone(), &backend, store).await;

    let params = view.query_params();
    assert_eq!(params.sorters, vec![Sorter::asc("id")]);
    assert_eq!(params.page_index(), 0);
    assert_eq!(params.page_size(), 20);
    // missing columns fall back to the view's defaults
    assert_eq!(
        view.visible_columns_in_order(),
        vec!["id", "printer_id", "ams_unit_count", "last_mqtt_message", "last_mqtt_ams_message"]
    );

    view.settled().await;
    assert_eq!(view.snapshot().total, 4);
}

#[tokio::test]
async fn test_restored_preferences_drive_first_query() {
    let backend = seeded(5);
    let store = Arc::new(MemoryStore::new());
    store
        .set_item(
            printer::LIST_NAMESPACE,
            json!({
                "sorters": [{"field": "id", "order": "desc"}],
                "pagination": {"pageIndex": 1, "pageSize": 2},
                "visibleColumns": ["status", "id"]
            })
            .to_string(),
        )
        .await
        .unwrap();

    let view = mount(printer::list_config(), backend.clone(), &backend, store).await;
    view.settled().await;

    assert_eq!(ids(&view), vec![RecordId::Int(3), RecordId::Int(2)]);
    assert_eq!(view.visible_columns_in_order(), vec!["id", "status"]);
}

#[tokio::test]
async fn test_update_patches_row_in_place() {
    let backend = seeded(2);
    let view = mount(
        printer::list_config(),
        backend.clone(),
        &backend,
        Arc::new(MemoryStore::new()),
    )
    .await;
    view.settled().await;

    changed_after(&view, || {
        let mut changed = Fields::new();
        changed.insert("status".into(), Value::from("error"));
        backend
            .update(printer::RESOURCE, &RecordId::Int(2), changed)
            .unwrap();
    })
    .await;

    let rows = view.snapshot().rows;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].id, RecordId::Int(1));
    assert_eq!(rows[0].get("status"), Some(Value::from("idle")));
    assert_eq!(rows[1].id, RecordId::Int(2));
    assert_eq!(rows[1].get("status"), Some(Value::from("error")));
    assert_eq!(rows[1].get("printer_id"), Some(Value::from("X1P0002")));
    assert_eq!(view.reconciler_stats().patched, 1);
    assert!(!view.is_loading());
}

#[tokio::test]
async fn test_update_for_row_off_page_is_ignored() {
    let backend = seeded(3);
    let transport = GatedTransport::open(backend.clone());
    let config = printer::list_config().page_size(2);
    let view = mount(config, transport.clone(), &backend, Arc::new(MemoryStore::new())).await;
    view.settled().await;
    let before = view.snapshot();

    changed_after(&view, || {
        let mut changed = Fields::new();
        changed.insert("status".into(), Value::from("printing"));
        backend
            .update(printer::RESOURCE, &RecordId::Int(3), changed)
            .unwrap();
    })
    .await;

    assert_eq!(view.snapshot(), before);
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_delete_refetches_page() {
    let backend = seeded(2);
    let transport = GatedTransport::open(backend.clone());
    let view = mount(
        printer::list_config(),
        transport.clone(),
        &backend,
        Arc::new(MemoryStore::new()),
    )
    .await;
    view.settled().await;
    assert_eq!(view.snapshot().rows.len(), 2);

    changed_after(&view, || {
        backend
            .delete(printer::RESOURCE, &RecordId::Int(1))
            .unwrap();
    })
    .await;
    view.settled().await;

    let snapshot = view.snapshot();
    assert_eq!(transport.calls(), 2);
    assert_eq!(snapshot.total, 1);
    assert_eq!(ids(&view), vec![RecordId::Int(2)]);
}

#[tokio::test]
async fn test_membership_events_coalesce_into_one_refetch() {
    let backend = seeded(3);
    let transport = GatedTransport::closed(backend.clone());
    transport.release(1);
    let view = mount(
        printer::list_config(),
        transport.clone(),
        &backend,
        Arc::new(MemoryStore::new()),
    )
    .await;
    view.settled().await;
    assert_eq!(transport.calls(), 1);

    backend
        .insert(printer::RESOURCE, Record::new(10).with("status", "idle"))
        .unwrap();
    backend
        .delete(printer::RESOURCE, &RecordId::Int(1))
        .unwrap();
    backend
        .insert(printer::RESOURCE, Record::new(11).with("status", "idle"))
        .unwrap();
    pump().await;

    assert_eq!(transport.calls(), 2);
    assert!(view.is_loading());
    // nothing is inserted or removed locally while the re-fetch is out
    assert_eq!(
        ids(&view),
        vec![RecordId::Int(1), RecordId::Int(2), RecordId::Int(3)]
    );

    transport.release(1);
    view.settled().await;
    pump().await;

    assert_eq!(transport.calls(), 2);
    assert_eq!(
        ids(&view),
        vec![
            RecordId::Int(2),
            RecordId::Int(3),
            RecordId::Int(10),
            RecordId::Int(11)
        ]
    );
    let stats = view.reconciler_stats();
    assert_eq!(stats.refetches, 1);
    assert_eq!(stats.coalesced, 2);
}

#[tokio::test]
async fn test_updates_apply_while_refetch_outstanding() {
    let backend = seeded(2);
    let transport = GatedTransport::closed(backend.clone());
    transport.release(1);
    let view = mount(
        printer::list_config(),
        transport.clone(),
        &backend,
        Arc::new(MemoryStore::new()),
    )
    .await;
    view.settled().await;

    backend
        .insert(printer::RESOURCE, Record::new(3).with("status", "idle"))
        .unwrap();
    pump().await;
    assert!(view.is_loading());

    changed_after(&view, || {
        let mut changed = Fields::new();
        changed.insert("status".into(), Value::from("error"));
        backend
            .update(printer::RESOURCE, &RecordId::Int(1), changed)
            .unwrap();
    })
    .await;
    assert_eq!(view.snapshot().rows[0].get("status"), Some(Value::from("error")));

    transport.release(1);
    view.settled().await;
    let rows = view.snapshot().rows;
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].get("status"), Some(Value::from("error")));
}

#[tokio::test]
async fn test_superseded_response_is_dropped() {
    let backend = seeded(4);
    let transport = GatedTransport::closed(backend.clone());
    let config = printer::list_config().page_size(2);
    let view = mount(config, transport.clone(), &backend, Arc::new(MemoryStore::new())).await;
    pump().await;

    view.set_page(1).unwrap();
    pump().await;
    assert_eq!(transport.calls(), 2);

    transport.release(10);
    view.settled().await;

    let snapshot = view.snapshot();
    assert_eq!(snapshot.query_params.page_index(), 1);
    assert_eq!(ids(&view), vec![RecordId::Int(3), RecordId::Int(4)]);
    assert_eq!(snapshot.total, 4);
}

#[tokio::test]
async fn test_failure_keeps_last_good_page() {
    let backend = seeded(2);
    let transport = GatedTransport::open(backend.clone());
    transport.failing.store(true, Ordering::SeqCst);
    let view = mount(
        printer::list_config(),
        transport.clone(),
        &backend,
        Arc::new(MemoryStore::new()),
    )
    .await;
    view.settled().await;

    let snapshot = view.snapshot();
    assert!(snapshot.rows.is_empty());
    assert!(matches!(snapshot.error, Some(ViewError::Http { status: 503, .. })));

    transport.failing.store(false, Ordering::SeqCst);
    view.refresh().unwrap();
    view.settled().await;
    let snapshot = view.snapshot();
    assert_eq!(snapshot.rows.len(), 2);
    assert!(snapshot.error.is_none());

    transport.failing.store(true, Ordering::SeqCst);
    view.refresh().unwrap();
    view.settled().await;
    let snapshot = view.snapshot();
    assert_eq!(snapshot.rows.len(), 2);
    assert!(snapshot.error.is_some());
}

#[tokio::test]
async fn test_malformed_messages_do_not_drop_subscription() {
    let backend = seeded(2);
    let view = mount(
        printer::list_config(),
        backend.clone(),
        &backend,
        Arc::new(MemoryStore::new()),
    )
    .await;
    view.settled().await;

    changed_after(&view, || {
        backend
            .publish_raw(printer::RESOURCE, json!({"type": "exploded", "payload": {}}))
            .unwrap();
    })
    .await;
    changed_after(&view, || {
        backend
            .publish_raw(
                printer::RESOURCE,
                json!({"type": "updated", "resource": "filament", "payload": {"id": 1, "status": "x"}}),
            )
            .unwrap();
    })
    .await;
    changed_after(&view, || {
        let mut changed = Fields::new();
        changed.insert("status".into(), Value::from("printing"));
        backend
            .update(printer::RESOURCE, &RecordId::Int(1), changed)
            .unwrap();
    })
    .await;

    let snapshot = view.snapshot();
    assert_eq!(snapshot.rows[0].get("status"), Some(Value::from("printing")));
    assert!(snapshot.channel_connected);
    assert_eq!(view.reconciler_stats().ignored, 2);
}

#[tokio::test]
async fn test_closed_channel_marks_view_stale() {
    let backend = seeded(2);
    let view = mount(
        printer::list_config(),
        backend.clone(),
        &backend,
        Arc::new(MemoryStore::new()),
    )
    .await;
    view.settled().await;

    changed_after(&view, || backend.disconnect(printer::RESOURCE).unwrap()).await;
    let snapshot = view.snapshot();
    assert!(snapshot.is_stale);
    assert!(!snapshot.channel_connected);
    assert_eq!(snapshot.rows.len(), 2);

    view.refresh().unwrap();
    view.settled().await;
    let snapshot = view.snapshot();
    assert!(!snapshot.is_stale);
    assert!(!snapshot.channel_connected);
}

#[tokio::test]
async fn test_user_changes_are_persisted() {
    let backend = seeded(4);
    let store = Arc::new(MemoryStore::new());
    let preferences = PreferencesStore::new(store.clone());
    let view = LiveListView::mount(
        printer::list_config(),
        backend.clone(),
        backend.as_ref(),
        preferences.clone(),
    )
    .await
    .unwrap();
    view.settled().await;

    view.set_sorters(vec![Sorter::desc("id")]).unwrap();
    view.set_filters(
        [("status".to_string(), FilterPredicate::Eq("idle".into()))]
            .into_iter()
            .collect(),
    )
    .unwrap();
    view.set_visible_columns(["status", "id", "nozzle_temp"]).unwrap();
    view.settled().await;

    assert_eq!(ids(&view), vec![RecordId::Int(3), RecordId::Int(1)]);
    assert_eq!(view.snapshot().total, 2);

    view.unmount();
    preferences.flush().await;

    let raw = store.get_item(printer::LIST_NAMESPACE).await.unwrap().unwrap();
    let persisted = ViewPreferences::decode(&raw, ViewPreferences::default()).unwrap();
    assert_eq!(persisted.sorters, vec![Sorter::desc("id")]);
    assert_eq!(persisted.filters.len(), 1);
    assert_eq!(
        persisted.visible_columns,
        ["id".to_string(), "status".to_string()].into()
    );
}

#[tokio::test]
async fn test_clear_filters_restores_default_sort_and_first_page() {
    let backend = seeded(6);
    let config = printer::list_config().page_size(2);
    let view = mount(config, backend.clone(), &backend, Arc::new(MemoryStore::new())).await;
    view.settled().await;

    view.set_query_params(
        QueryParams::default()
            .with_page_size(2)
            .with_page(1)
            .with_sorters(vec![Sorter::desc("status")])
            .with_filter("status", FilterPredicate::Ne("error".into())),
    )
    .unwrap();
    view.settled().await;

    view.clear_filters().unwrap();
    view.settled().await;

    let params = view.query_params();
    assert!(params.filters.is_empty());
    assert_eq!(params.sorters, vec![Sorter::asc("id")]);
    assert_eq!(params.page_index(), 0);
    assert_eq!(params.page_size(), 2);
    assert_eq!(ids(&view), vec![RecordId::Int(1), RecordId::Int(2)]);
}

#[tokio::test]
async fn test_invalid_params_are_rejected() {
    let backend = seeded(1);
    let view = mount(
        printer::list_config(),
        backend.clone(),
        &backend,
        Arc::new(MemoryStore::new()),
    )
    .await;
    view.settled().await;

    let err = view.set_page_size(0).unwrap_err();
    assert!(matches!(err, ViewError::InvalidQuery(_)));
    assert_eq!(view.query_params().page_size(), 20);
}

#[tokio::test]
async fn test_unmount_drops_subscription_and_late_results() {
    let backend = seeded(2);
    let transport = GatedTransport::closed(backend.clone());
    let view = mount(
        printer::list_config(),
        transport.clone(),
        &backend,
        Arc::new(MemoryStore::new()),
    )
    .await;
    pump().await;
    let mut changes = view.changes();

    view.unmount();
    transport.release(10);
    pump().await;

    assert_eq!(
        backend
            .publish_raw(printer::RESOURCE, json!({"status": "healthy"}))
            .unwrap(),
        0
    );
    assert!(!changes.has_changed().unwrap_or(false));
}

#[tokio::test]
async fn test_create_during_params_fetch_is_not_lost() {
    let backend = seeded(2);
    let transport = GatedTransport::in_transit(backend.clone());
    transport.release(1);
    let view = mount(
        printer::list_config(),
        transport.clone(),
        &backend,
        Arc::new(MemoryStore::new()),
    )
    .await;
    view.settled().await;

    view.set_page_size(10).unwrap();
    pump().await;
    assert_eq!(transport.calls(), 2);

    // the page for size 10 is already computed without this record
    backend
        .insert(printer::RESOURCE, Record::new(3).with("status", "idle"))
        .unwrap();
    pump().await;
    assert_eq!(transport.calls(), 2);

    transport.release(10);
    view.settled().await;

    assert_eq!(transport.calls(), 3);
    assert_eq!(
        ids(&view),
        vec![RecordId::Int(1), RecordId::Int(2), RecordId::Int(3)]
    );
    let stats = view.reconciler_stats();
    assert_eq!(stats.deferred, 1);
    assert_eq!(stats.refetches, 1);
}

#[tokio::test]
async fn test_update_before_first_page_is_applied() {
    let backend = seeded(2);
    let transport = GatedTransport::in_transit(backend.clone());
    let view = mount(
        printer::list_config(),
        transport.clone(),
        &backend,
        Arc::new(MemoryStore::new()),
    )
    .await;
    pump().await;
    assert_eq!(transport.calls(), 1);

    changed_after(&view, || {
        let mut changed = Fields::new();
        changed.insert("status".into(), Value::from("error"));
        backend
            .update(printer::RESOURCE, &RecordId::Int(2), changed)
            .unwrap();
    })
    .await;
    changed_after(&view, || {
        backend
            .publish_raw(
                printer::RESOURCE,
                json!({"type": "updated", "resource": "printer", "payload": {"id": 7, "status": "idle"}}),
            )
            .unwrap();
    })
    .await;

    transport.release(10);
    view.settled().await;

    let rows = view.snapshot().rows;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("status"), Some(Value::from("idle")));
    assert_eq!(rows[1].get("status"), Some(Value::from("error")));
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_membership_change_before_first_page_refetches() {
    let backend = seeded(2);
    let transport = GatedTransport::in_transit(backend.clone());
    let view = mount(
        printer::list_config(),
        transport.clone(),
        &backend,
        Arc::new(MemoryStore::new()),
    )
    .await;
    pump().await;

    backend
        .insert(printer::RESOURCE, Record::new(3).with("status", "idle"))
        .unwrap();
    backend
        .delete(printer::RESOURCE, &RecordId::Int(1))
        .unwrap();
    pump().await;
    assert_eq!(transport.calls(), 1);

    transport.release(10);
    view.settled().await;

    assert_eq!(transport.calls(), 2);
    assert_eq!(ids(&view), vec![RecordId::Int(2), RecordId::Int(3)]);
    assert_eq!(view.snapshot().total, 2);
}
