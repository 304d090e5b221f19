use crate::*;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use treevirt::{
    AggregateDescriptor, AggregateKind, AggregatePlacement, EntryKind, ProjectionState, Projector,
    ProjectorOptions, ReorderRequest, SortFilterGroupRequest, Value,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

// --- paging provider fixture ---

#[derive(Default)]
struct FakeProvider {
    total: usize,
    delay: Duration,
    fail_at: Mutex<HashSet<usize>>,
    calls: AtomicUsize,
    completions: AtomicUsize,
    invalidations: Mutex<Vec<InvalidationKind>>,
}

impl FakeProvider {
    fn new(total: usize, delay_ms: u64) -> Self {
        Self {
            total,
            delay: Duration::from_millis(delay_ms),
            ..Self::default()
        }
    }
}

impl PagingProvider for FakeProvider {
    type Row = usize;
    type ViewModel = usize;

    fn get_row_count(&self) -> BoxFuture<'_, Result<usize, ProviderError>> {
        async move { Ok(self.total) }.boxed()
    }

    fn get_page(
        &self,
        start: usize,
        count: usize,
        _token: CancellationToken,
    ) -> BoxFuture<'_, Result<PageResult<usize>, ProviderError>> {
        async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail_at.lock().contains(&start) {
                return Err(ProviderError::Failed(format!("page {start} unavailable")));
            }
            self.completions.fetch_add(1, Ordering::SeqCst);
            let end = (start + count).min(self.total);
            Ok(PageResult::new((start..end).collect()))
        }
        .boxed()
    }

    fn invalidate(&self, kind: InvalidationKind) {
        self.invalidations.lock().push(kind);
    }

    fn create(&self, row: usize) -> BoxFuture<'_, Result<usize, ProviderError>> {
        async move { Ok(row) }.boxed()
    }
}

fn scheduler(provider: FakeProvider, settings: SchedulerSettings) -> (Arc<FakeProvider>, ViewportScheduler<FakeProvider>) {
    let provider = Arc::new(provider);
    let total = provider.total;
    let s = ViewportScheduler::new(Arc::clone(&provider), settings, Handle::current());
    s.set_row_count(Some(total));
    (provider, s)
}

fn page_settings() -> SchedulerSettings {
    SchedulerSettings::default().with_page_size(10)
}

fn drain_events(rx: &mut tokio::sync::broadcast::Receiver<SchedulerEvent>) -> Vec<SchedulerEvent> {
    let mut out = Vec::new();
    while let Ok(e) = rx.try_recv() {
        out.push(e);
    }
    out
}

#[test]
fn scheduler_settings_defaults() {
    let s = SchedulerSettings::default();
    assert_eq!(s.page_size, 100);
    assert_eq!(s.prefetch_radius, 0);
    assert_eq!(s.max_concurrent_loads, 4);
    assert_eq!(s.max_pages, 64);
}

#[tokio::test]
async fn same_page_requests_complete_once() {
    let (provider, s) = scheduler(FakeProvider::new(100, 50), page_settings());
    let mut events = s.subscribe();

    assert_eq!(s.request(ViewportRequest::new(0, 10)), 1);
    // Different request, same page: supersedes the first fetch.
    assert_eq!(s.request(ViewportRequest::new(0, 5)), 1);
    assert_eq!(s.in_flight(), 1);

    wait_until(|| s.in_flight() == 0).await;
    tokio::time::sleep(Duration::from_millis(80)).await;

    let m = s.metrics();
    assert_eq!(m.fetches_started, 2);
    assert_eq!(m.fetches_completed, 1);
    assert_eq!(m.fetches_cancelled, 1);
    assert_eq!(m.in_flight, 0);
    assert_eq!(provider.completions.load(Ordering::SeqCst), 1);

    let loaded = drain_events(&mut events)
        .into_iter()
        .filter(|e| matches!(e, SchedulerEvent::PageLoaded { start: 0, .. }))
        .count();
    assert_eq!(loaded, 1);
    assert_eq!(s.try_get_materialized_row(7), Some(7));
}

#[tokio::test]
async fn identical_request_is_a_no_op() {
    let (provider, s) = scheduler(FakeProvider::new(100, 0), page_settings());
    let r = ViewportRequest::new(20, 15);
    assert_eq!(s.request(r), 2);
    assert_eq!(s.request(r), 0);
    wait_until(|| s.in_flight() == 0).await;

    assert_eq!(s.metrics().requests_issued, 1);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn back_pressure_drops_fetches_beyond_the_concurrency_ceiling() {
    let (_provider, s) = scheduler(
        FakeProvider::new(100, 10),
        page_settings().with_max_concurrent_loads(2),
    );

    assert_eq!(s.request(ViewportRequest::new(0, 50)), 2);
    assert_eq!(s.metrics().fetches_dropped, 3);
    wait_until(|| s.in_flight() == 0).await;
    assert_eq!(s.resident_pages(), 2);

    // The next viewport pass picks up where back-pressure stopped.
    assert_eq!(s.request(ViewportRequest::new(1, 49)), 2);
    let m = s.metrics();
    assert_eq!(m.cache_hits, 2);
    assert_eq!(m.fetches_dropped, 4);
}

#[tokio::test]
async fn full_cache_evicts_pages_outside_the_window_first() {
    let (_provider, s) = scheduler(
        FakeProvider::new(100, 0),
        page_settings().with_max_pages(2),
    );

    assert_eq!(s.request(ViewportRequest::new(0, 20)), 2);
    wait_until(|| s.resident_pages() == 2).await;

    assert_eq!(s.request(ViewportRequest::new(50, 10)), 1);
    wait_until(|| s.in_flight() == 0).await;

    assert_eq!(s.metrics().pages_evicted, 1);
    assert_eq!(s.try_get_materialized_row(5), None, "farthest page evicted");
    assert_eq!(s.try_get_materialized_row(15), Some(15));
    assert_eq!(s.try_get_materialized_row(55), Some(55));
}

#[tokio::test]
async fn full_cache_without_eviction_candidates_drops() {
    let (_provider, s) = scheduler(
        FakeProvider::new(100, 0),
        page_settings().with_max_pages(2),
    );
    assert_eq!(s.request(ViewportRequest::new(0, 30)), 2);
    assert_eq!(s.metrics().fetches_dropped, 1);
}

#[tokio::test]
async fn repeated_request_retries_dropped_pages_only() {
    let (_provider, s) = scheduler(
        FakeProvider::new(100, 10),
        page_settings().with_max_concurrent_loads(2),
    );
    let r = ViewportRequest::new(0, 50);

    assert_eq!(s.request(r), 2);
    // Pages still loading are not restarted by the repeat.
    assert_eq!(s.request(r), 0);
    assert_eq!(s.metrics().fetches_started, 2);
    assert_eq!(s.metrics().fetches_cancelled, 0);

    wait_until(|| s.in_flight() == 0).await;
    assert_eq!(s.request(r), 2);
    wait_until(|| s.in_flight() == 0).await;
    assert_eq!(s.request(r), 1);
    wait_until(|| s.in_flight() == 0).await;

    assert_eq!(s.resident_pages(), 5);
    assert_eq!(s.try_get_materialized_row(45), Some(45));
    // Complete now: the repeat short-circuits again.
    assert_eq!(s.request(r), 0);
}

#[tokio::test]
async fn failed_page_is_left_unfetched_and_retried() {
    init_tracing();
    let provider = FakeProvider::new(100, 0);
    provider.fail_at.lock().insert(10);
    let (provider, s) = scheduler(provider, page_settings());
    let mut events = s.subscribe();

    let r = ViewportRequest::new(0, 20);
    assert_eq!(s.request(r), 2);
    wait_until(|| s.in_flight() == 0).await;

    let m = s.metrics();
    assert_eq!(m.fetches_failed, 1);
    assert_eq!(m.fetches_completed, 1);
    assert_eq!(s.try_get_materialized_row(3), Some(3));
    assert_eq!(s.try_get_materialized_row(12), None);
    assert!(s.is_placeholder(12));
    assert!(!s.is_placeholder(3));
    assert!(
        drain_events(&mut events)
            .iter()
            .any(|e| matches!(e, SchedulerEvent::PageFailed { start: 10, count: 10, .. }))
    );

    // The same viewport is not short-circuited after a failure.
    provider.fail_at.lock().clear();
    assert_eq!(s.request(r), 1);
    wait_until(|| s.in_flight() == 0).await;
    assert_eq!(s.try_get_materialized_row(12), Some(12));
}

#[tokio::test]
async fn cancel_all_discards_in_flight_fetches() {
    let (provider, s) = scheduler(FakeProvider::new(100, 50), page_settings());
    assert_eq!(s.request(ViewportRequest::new(0, 30)), 3);
    assert_eq!(s.cancel_all(), 3);
    assert_eq!(s.in_flight(), 0);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(s.resident_pages(), 0);
    assert_eq!(provider.completions.load(Ordering::SeqCst), 0);
    let m = s.metrics();
    assert_eq!(m.fetches_cancelled, 3);
    assert_eq!(m.in_flight, 0);
}

#[tokio::test]
async fn prefetch_radius_extends_the_window() {
    let (_provider, s) = scheduler(FakeProvider::new(100, 0), page_settings());
    let started = s.request(ViewportRequest::new(20, 10).with_prefetch_radius(10));
    assert_eq!(started, 3);
    assert_eq!(s.window(), 10..40);

    let (_provider, s) = scheduler(
        FakeProvider::new(100, 0),
        page_settings().with_prefetch_radius(15),
    );
    // The larger of the two radii wins.
    s.request(ViewportRequest::new(40, 10).with_prefetch_radius(5));
    assert_eq!(s.window(), 20..70);
}

#[tokio::test]
async fn known_row_count_clamps_the_last_page() {
    let (_provider, s) = scheduler(FakeProvider::new(25, 0), page_settings());
    assert_eq!(s.request(ViewportRequest::new(0, 100)), 3);
    wait_until(|| s.in_flight() == 0).await;
    assert_eq!(s.try_get_materialized_row(24), Some(24));
    assert_eq!(s.try_get_materialized_row(25), None);
}

#[tokio::test]
async fn range_invalidation_drops_only_overlapping_pages() {
    let (provider, s) = scheduler(FakeProvider::new(100, 0), page_settings());
    let mut events = s.subscribe();
    s.request(ViewportRequest::new(0, 30));
    wait_until(|| s.resident_pages() == 3).await;

    let kind = InvalidationKind::Range { start: 12, count: 3 };
    s.invalidate(kind);
    assert_eq!(s.resident_pages(), 2);
    assert_eq!(s.try_get_materialized_row(12), None);
    assert_eq!(s.try_get_materialized_row(25), Some(25));
    assert_eq!(*provider.invalidations.lock(), vec![kind]);
    assert!(drain_events(&mut events).contains(&SchedulerEvent::Invalidated(kind)));

    s.invalidate(InvalidationKind::Full);
    assert_eq!(s.resident_pages(), 0);
    assert_eq!(s.row_count(), None);
}

#[tokio::test]
async fn editing_passthroughs_invalidate_affected_pages() {
    let (_provider, s) = scheduler(FakeProvider::new(100, 0), page_settings());
    s.request(ViewportRequest::new(0, 20));
    wait_until(|| s.resident_pages() == 2).await;

    assert_eq!(s.create(12).await, Ok(12));
    assert_eq!(s.try_get_materialized_row(3), Some(3));
    assert_eq!(s.try_get_materialized_row(15), None);
    assert_eq!(s.row_count(), None);

    assert_eq!(s.delete(3).await, Err(ProviderError::Unsupported));
    assert_eq!(s.refresh_row_count().await, Ok(100));
}

// --- cancellation and queue ---

#[tokio::test]
async fn child_tokens_follow_their_parent() {
    let parent = CancellationToken::new();
    let child = parent.child_token();
    let grandchild = child.child_token();

    let sibling = parent.child_token();
    sibling.cancel();
    assert!(!parent.is_cancelled());

    let waiter = tokio::spawn({
        let grandchild = grandchild.clone();
        async move { grandchild.cancelled().await }
    });
    parent.cancel();
    assert!(child.is_cancelled());
    assert!(grandchild.is_cancelled());
    tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .unwrap()
        .unwrap();

    assert!(parent.child_token().is_cancelled());
}

#[tokio::test]
async fn queue_runs_operations_in_submission_order() {
    let queue = OperationQueue::new(Handle::current());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let handles: Vec<_> = (0..5)
        .map(|i| {
            let seen = Arc::clone(&seen);
            queue.submit("push", move |_| {
                seen.lock().push(i);
                Ok(i * 10)
            })
        })
        .collect();

    let mut results = Vec::new();
    for h in handles {
        results.push(h.wait().await);
    }
    assert_eq!(*seen.lock(), vec![0, 1, 2, 3, 4]);
    assert_eq!(results[4], OperationOutcome::Completed(40));
    assert_eq!(queue.pending(), 0);
}

fn slow_op(token: &CancellationToken, value: u32) -> treevirt::Result<u32> {
    for _ in 0..200 {
        if token.is_cancelled() {
            return Err(treevirt::Error::Cancelled);
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    Ok(value)
}

#[tokio::test]
async fn cancellable_submission_supersedes_the_previous_one() {
    let queue = OperationQueue::new(Handle::current());
    let first = queue.submit_cancellable("slow", None, |t| slow_op(t, 1));
    let second = queue.submit_cancellable("fast", None, |_| Ok(2));

    assert_eq!(first.wait().await, OperationOutcome::Cancelled);
    assert_eq!(second.wait().await, OperationOutcome::Completed(2));
}

#[tokio::test]
async fn caller_token_cancels_a_running_operation() {
    let queue = OperationQueue::new(Handle::current());
    let caller = CancellationToken::new();
    let handle = queue.submit_cancellable("slow", Some(&caller), |t| slow_op(t, 1));
    tokio::time::sleep(Duration::from_millis(20)).await;
    caller.cancel();
    assert!(handle.wait().await.is_cancelled());
}

#[tokio::test]
async fn failing_operation_reports_its_error() {
    let queue = OperationQueue::new(Handle::current());
    let handle = queue.submit("fail", |_| -> treevirt::Result<()> {
        Err(treevirt::Error::DepthLimitExceeded { limit: 3 })
    });
    assert_eq!(
        handle.wait().await,
        OperationOutcome::Failed(treevirt::Error::DepthLimitExceeded { limit: 3 })
    );
}

#[tokio::test]
async fn panicking_operation_is_not_reported_as_cancelled() {
    let queue = OperationQueue::new(Handle::current());
    let handle = queue.submit("panic", |_| -> treevirt::Result<()> { panic!("comparator blew up") });
    assert_eq!(
        handle.wait().await,
        OperationOutcome::Panicked("comparator blew up".to_string())
    );

    // The worker survives and keeps running later operations.
    let next = queue.submit("after", |_| Ok(7));
    assert_eq!(next.wait().await, OperationOutcome::Completed(7));
}

// --- dispatcher and subscriptions ---

#[test]
fn queued_dispatcher_runs_foreign_callbacks_on_drain() {
    let dispatcher = Arc::new(QueuedDispatcher::new());
    let ran_on = Arc::new(Mutex::new(Vec::new()));

    {
        let ran_on = Arc::clone(&ran_on);
        dispatch(
            &*dispatcher,
            Box::new(move || ran_on.lock().push(std::thread::current().id())),
        );
    }
    assert_eq!(ran_on.lock().len(), 1, "owner thread runs inline");

    let remote = Arc::clone(&dispatcher);
    let remote_ran = Arc::clone(&ran_on);
    std::thread::spawn(move || {
        dispatch(
            &*remote,
            Box::new(move || remote_ran.lock().push(std::thread::current().id())),
        );
        assert_eq!(remote.drain(), 0, "only the owner may drain");
    })
    .join()
    .unwrap();

    assert_eq!(ran_on.lock().len(), 1);
    assert_eq!(dispatcher.pending(), 1);
    assert_eq!(dispatcher.drain(), 1);
    let me = std::thread::current().id();
    assert!(ran_on.lock().iter().all(|&id| id == me));
}

#[test]
fn dropping_a_subscription_unsubscribes() {
    let subscribers = Subscribers::<u32>::new();
    let got = Arc::new(Mutex::new(Vec::new()));

    let sub = {
        let got = Arc::clone(&got);
        subscribers.subscribe(move |v| got.lock().push(*v))
    };
    let kept = Arc::new(AtomicUsize::new(0));
    {
        let kept = Arc::clone(&kept);
        subscribers
            .subscribe(move |_| {
                kept.fetch_add(1, Ordering::SeqCst);
            })
            .detach();
    }

    subscribers.emit(&1);
    drop(sub);
    subscribers.emit(&2);

    assert_eq!(*got.lock(), vec![1]);
    assert_eq!(kept.load(Ordering::SeqCst), 2);
    assert_eq!(subscribers.len(), 1);
}

// --- grid ---

#[derive(Clone, Debug)]
struct Item {
    name: String,
    amount: i64,
    children: Vec<Item>,
}

fn leaf(name: &str, amount: i64) -> Item {
    Item {
        name: name.to_string(),
        amount,
        children: Vec::new(),
    }
}

fn options() -> ProjectorOptions<Item> {
    ProjectorOptions::new(|i: &Item| i.children.clone())
        .with_key(|i: &Item| i.name.clone())
        .with_value_provider(|i: &Item, column: &str| match column {
            "amount" => Value::from(i.amount),
            "name" => Value::from(i.name.as_str()),
            _ => Value::Null,
        })
}

fn flat_projector(n: usize) -> Projector<Item> {
    let items = (0..n).map(|i| leaf(&format!("r{i}"), i as i64));
    Projector::with_items(options(), items).unwrap()
}

fn row_name(grid: &Grid<Item>, index: usize) -> String {
    match grid.get_row(index).unwrap().kind {
        EntryKind::Node { item, .. } => item.name.clone(),
        _ => String::from("<other>"),
    }
}

fn record(grid: &Grid<Item>) -> (Arc<Mutex<Vec<GridEvent>>>, Subscription) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let sub = grid.subscribe(move |e| sink.lock().push(e.clone()));
    (events, sub)
}

#[tokio::test]
async fn toggle_raises_expansion_and_reset() {
    let items = vec![
        Item {
            children: vec![leaf("b", 1), leaf("c", 2)],
            ..leaf("a", 0)
        },
        leaf("d", 3),
    ];
    let grid = Grid::new(Projector::with_items(options(), items).unwrap(), Handle::current());
    let (events, _sub) = record(&grid);
    assert_eq!(grid.row_count(), 2);

    assert!(grid.toggle_expansion(0).unwrap());
    assert_eq!(grid.row_count(), 4);
    assert_eq!(row_name(&grid, 1), "b");

    let generation = grid.generation();
    assert_eq!(
        *events.lock(),
        vec![
            GridEvent::ExpansionChanged { index: 0 },
            GridEvent::Reset { generation }
        ]
    );

    // Leaves have nothing to toggle.
    assert!(!grid.toggle_expansion(1).unwrap());
    assert!(grid.toggle_expansion(9).is_err());
    assert_eq!(grid.get_total_height(), 4 * 28);
}

#[tokio::test]
async fn queued_sort_publishes_and_resets() {
    let grid = Grid::new(flat_projector(5), Handle::current());
    let (events, _sub) = record(&grid);

    let handle = grid.sort(Some(Arc::new(|a: &Item, b: &Item| b.amount.cmp(&a.amount))));
    assert_eq!(handle.wait().await, OperationOutcome::Completed(()));
    assert_eq!(row_name(&grid, 0), "r4");
    assert!(matches!(events.lock().last(), Some(GridEvent::Reset { .. })));

    let snapshot = grid.snapshot();
    grid.sort(None).wait().await;
    assert_eq!(row_name(&grid, 0), "r0");
    // Earlier snapshots are never mutated.
    assert!(matches!(&snapshot[0].kind, EntryKind::Node { item, .. } if item.name == "r4"));
}

#[tokio::test]
async fn grid_reports_rebuilding_while_operations_are_queued() {
    let grid = Grid::new(flat_projector(5), Handle::current());
    assert_eq!(grid.state(), ProjectionState::Clean);

    let busy = grid.queue().submit("busy", |_| {
        std::thread::sleep(Duration::from_millis(50));
        Ok(())
    });
    let sort = grid.sort(Some(Arc::new(|a: &Item, b: &Item| b.amount.cmp(&a.amount))));
    assert_eq!(grid.state(), ProjectionState::Rebuilding);
    // Readers keep the last published rows meanwhile.
    assert_eq!(row_name(&grid, 0), "r0");

    assert!(busy.wait().await.is_completed());
    assert!(sort.wait().await.is_completed());
    assert_eq!(grid.state(), ProjectionState::Clean);
    assert_eq!(row_name(&grid, 0), "r4");
}

#[tokio::test]
async fn events_from_the_queue_are_marshalled_to_the_owner() {
    let dispatcher = Arc::new(QueuedDispatcher::new());
    let grid = Grid::with_config(
        flat_projector(5),
        treevirt::LayoutOptions::default(),
        Arc::clone(&dispatcher) as Arc<dyn Dispatcher>,
        Handle::current(),
    );
    let (events, _sub) = record(&grid);

    let outcome = grid
        .set_filter(Some(Arc::new(|i: &Item| i.amount % 2 == 0)), true)
        .wait()
        .await;
    assert!(outcome.is_completed());
    assert_eq!(grid.row_count(), 3);
    assert!(events.lock().is_empty(), "raised on a worker thread");

    assert_eq!(dispatcher.drain(), 1);
    assert_eq!(
        *events.lock(),
        vec![GridEvent::Reset {
            generation: grid.generation()
        }]
    );
}

#[tokio::test]
async fn value_invalidated_reports_the_row_and_drops_aggregates() {
    let mut p = flat_projector(4);
    p.set_aggregates(vec![AggregateDescriptor::column(
        AggregatePlacement::GridFooter,
        "amount",
        AggregateKind::Sum,
    )]);
    let grid = Grid::new(p, Handle::current());
    let (events, _sub) = record(&grid);
    let before = grid.with_projector(|p| p.aggregate_evaluations());

    let node = grid.find_by_key("r2").unwrap();
    grid.value_invalidated(node, Some("amount"));

    assert_eq!(grid.with_projector(|p| p.aggregate_evaluations()), before + 1);
    assert!(events.lock().contains(&GridEvent::RowInvalidated {
        index: 2,
        column: Some("amount".to_string()),
    }));
}

#[tokio::test]
async fn apply_sort_filter_group_supersedes_pending_requests() {
    let grid = Grid::new(flat_projector(6), Handle::current());

    let first = grid.apply_sort_filter_group(
        SortFilterGroupRequest::default().with_filter(|i: &Item| i.amount < 2),
        None,
    );
    let second = grid.apply_sort_filter_group(
        SortFilterGroupRequest::default().with_filter(|i: &Item| i.amount >= 3),
        None,
    );

    assert_eq!(first.wait().await, OperationOutcome::Cancelled);
    assert_eq!(second.wait().await, OperationOutcome::Completed(()));
    assert_eq!(grid.row_count(), 3);
    assert_eq!(row_name(&grid, 0), "r3");
}

#[tokio::test]
async fn failed_reset_keeps_the_published_rows() {
    let cyclic = ProjectorOptions::new(|i: &Item| vec![i.clone()]).with_max_depth(8);
    let grid = Grid::new(Projector::new(cyclic), Handle::current());

    let outcome = grid.reset(vec![leaf("loop", 0)], false).wait().await;
    assert_eq!(
        outcome,
        OperationOutcome::Failed(treevirt::Error::DepthLimitExceeded { limit: 8 })
    );
    assert_eq!(grid.row_count(), 0);
}

#[tokio::test]
async fn queued_reorder_moves_rows() {
    let grid = Grid::new(flat_projector(6), Handle::current());
    assert!(!grid.can_reorder(&ReorderRequest::new(vec![9], 0)));

    let request = ReorderRequest::new(vec![4, 5], 1).at_generation(grid.generation());
    assert!(grid.can_reorder(&request));
    let moved = grid.reorder(request).wait().await.completed().unwrap();
    assert_eq!(moved, Ok(vec![1, 2]));
    assert_eq!(row_name(&grid, 1), "r4");

    // Indices read before the move are stale now.
    let stale = ReorderRequest::new(vec![0], 3).at_generation(0);
    assert!(!grid.can_reorder(&stale));
}
