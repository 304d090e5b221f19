use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;

use treevirt::{
    AggregateDescriptor, CompareFn, FilterFn, GroupDescriptor, LayoutOptions, NodeId,
    ProjectionState, Projector, ReorderRejection, ReorderRequest, RowLayoutEstimator, SortDescription,
    SortFilterGroupRequest, ViewState, VisibleEntry, VisibleRange,
};

use crate::{
    CancellationToken, Dispatcher, InlineDispatcher, OperationHandle, OperationQueue, Subscribers,
    Subscription, dispatch,
};

/// Change notifications raised by a [`Grid`].
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum GridEvent {
    /// The row list was republished; every index may have moved.
    Reset { generation: u64 },
    /// The row at `index` shows stale values, in `column` or in every column.
    RowInvalidated { index: usize, column: Option<String> },
    /// The row at `index` was expanded or collapsed.
    ExpansionChanged { index: usize },
}

struct Published<T> {
    rows: Arc<[VisibleEntry<T>]>,
    generation: u64,
}

struct GridInner<T> {
    projector: Mutex<Projector<T>>,
    published: RwLock<Published<T>>,
    layout: Mutex<RowLayoutEstimator>,
    queue: OperationQueue,
    dispatcher: Arc<dyn Dispatcher>,
    subscribers: Subscribers<GridEvent>,
}

/// A thread-safe façade over a [`Projector`] and a [`RowLayoutEstimator`].
///
/// Reads (`row_count`, `get_row`, `snapshot`) go through the last published
/// row list and never wait on a rebuild. Expansion changes apply inline;
/// sort, filter, grouping, reset and reorder go through an
/// [`OperationQueue`] and run one at a time off the calling thread.
///
/// After each republish a [`GridEvent::Reset`] is delivered to subscribers
/// through the grid's [`Dispatcher`].
pub struct Grid<T> {
    inner: Arc<GridInner<T>>,
}

impl<T> Clone for Grid<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + Sync + 'static> Grid<T> {
    /// Creates a grid whose events are delivered inline.
    pub fn new(projector: Projector<T>, runtime: Handle) -> Self {
        Self::with_config(
            projector,
            LayoutOptions::default(),
            Arc::new(InlineDispatcher),
            runtime,
        )
    }

    pub fn with_config(
        projector: Projector<T>,
        layout: LayoutOptions,
        dispatcher: Arc<dyn Dispatcher>,
        runtime: Handle,
    ) -> Self {
        let published = Published {
            rows: projector.snapshot(),
            generation: projector.generation(),
        };
        let layout = RowLayoutEstimator::new(projector.row_count(), layout);
        Self {
            inner: Arc::new(GridInner {
                projector: Mutex::new(projector),
                published: RwLock::new(published),
                layout: Mutex::new(layout),
                queue: OperationQueue::new(runtime),
                dispatcher,
                subscribers: Subscribers::new(),
            }),
        }
    }

    // --- reads ---

    pub fn row_count(&self) -> usize {
        self.inner.published.read().rows.len()
    }

    pub fn get_row(&self, index: usize) -> treevirt::Result<VisibleEntry<T>> {
        let published = self.inner.published.read();
        published
            .rows
            .get(index)
            .cloned()
            .ok_or(treevirt::Error::IndexOutOfRange {
                index,
                count: published.rows.len(),
            })
    }

    pub fn snapshot(&self) -> Arc<[VisibleEntry<T>]> {
        Arc::clone(&self.inner.published.read().rows)
    }

    pub fn generation(&self) -> u64 {
        self.inner.published.read().generation
    }

    /// [`ProjectionState::Rebuilding`] from the moment a queued operation is
    /// submitted until the queue is idle again. Reads keep returning the last
    /// published rows either way.
    pub fn state(&self) -> ProjectionState {
        if self.inner.queue.pending() > 0 {
            ProjectionState::Rebuilding
        } else {
            ProjectionState::Clean
        }
    }

    /// Runs `f` against the projector, waiting for any running operation.
    pub fn with_projector<R>(&self, f: impl FnOnce(&Projector<T>) -> R) -> R {
        f(&*self.inner.projector.lock())
    }

    pub fn find_by_key(&self, key: &str) -> Option<NodeId> {
        self.inner.projector.lock().find_by_key(key)
    }

    pub fn view_state(&self) -> ViewState {
        self.inner.projector.lock().view_state()
    }

    pub fn queue(&self) -> &OperationQueue {
        &self.inner.queue
    }

    /// Resolves once every operation submitted so far has finished.
    pub async fn flush(&self) {
        self.inner.queue.flush().await;
    }

    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe(&self, callback: impl Fn(&GridEvent) + Send + Sync + 'static) -> Subscription {
        self.inner.subscribers.subscribe(callback)
    }

    // --- inline mutations ---

    /// Flips the expansion of the row at `index`. Returns whether it changed.
    pub fn toggle_expansion(&self, index: usize) -> treevirt::Result<bool> {
        let (changed, mut events) = self.inner.mutate(false, |p| p.toggle_expansion(index));
        let changed = changed?;
        if changed {
            events.insert(0, GridEvent::ExpansionChanged { index });
        }
        self.inner.notify(events);
        Ok(changed)
    }

    pub fn expand_all(&self) {
        let ((), events) = self.inner.mutate(false, |p| p.expand_all());
        self.inner.notify(events);
    }

    pub fn collapse_all(&self) {
        let ((), events) = self.inner.mutate(false, |p| p.collapse_all());
        self.inner.notify(events);
    }

    /// Expands the ancestors of `node` and returns its row index.
    pub fn expand_to(&self, node: NodeId) -> Option<usize> {
        let (index, events) = self.inner.mutate(false, |p| p.expand_to(node));
        self.inner.notify(events);
        index
    }

    pub fn restore_view_state(&self, state: &ViewState) {
        let ((), events) = self.inner.mutate(false, |p| p.restore_view_state(state));
        self.inner.notify(events);
    }

    /// Tells the grid a value of `node` changed underneath it.
    ///
    /// Cached aggregates are dropped, and the node's row (if visible) is
    /// reported through [`GridEvent::RowInvalidated`].
    pub fn value_invalidated(&self, node: NodeId, column: Option<&str>) {
        let (index, mut events) = self.inner.mutate(false, |p| {
            p.invalidate_aggregates();
            p.visible_index_of(node)
        });
        if let Some(index) = index {
            events.push(GridEvent::RowInvalidated {
                index,
                column: column.map(str::to_owned),
            });
        }
        self.inner.notify(events);
    }

    /// Dry run against the current rows.
    pub fn can_reorder(&self, request: &ReorderRequest) -> bool {
        self.inner.projector.lock().can_reorder(request)
    }

    // --- queued mutations ---

    pub fn sort(&self, cmp: Option<CompareFn<T>>) -> OperationHandle<()> {
        self.submit("sort", move |p| {
            p.sort(cmp);
            Ok(())
        })
    }

    pub fn sort_by_columns(&self, columns: Vec<SortDescription>) -> OperationHandle<()> {
        self.submit("sort_by_columns", move |p| {
            p.sort_by_columns(&columns);
            Ok(())
        })
    }

    pub fn set_filter(&self, predicate: Option<FilterFn<T>>, expand_matches: bool) -> OperationHandle<()> {
        self.submit("set_filter", move |p| {
            p.set_filter(predicate, expand_matches);
            Ok(())
        })
    }

    pub fn set_groups(&self, groups: Vec<GroupDescriptor<T>>) -> OperationHandle<()> {
        self.submit("set_groups", move |p| {
            p.set_groups(groups);
            Ok(())
        })
    }

    pub fn set_aggregates(&self, aggregates: Vec<AggregateDescriptor<T>>) -> OperationHandle<()> {
        self.submit("set_aggregates", move |p| {
            p.set_aggregates(aggregates);
            Ok(())
        })
    }

    /// Replaces the items. A failed build leaves the previous rows in place
    /// and resolves as [`crate::OperationOutcome::Failed`].
    pub fn reset(&self, items: Vec<T>, preserve_expansion: bool) -> OperationHandle<()> {
        self.submit("reset", move |p| p.reset(items, preserve_expansion))
    }

    pub fn reorder(&self, request: ReorderRequest) -> OperationHandle<Result<Vec<usize>, ReorderRejection>> {
        self.submit("reorder", move |p| Ok(p.reorder(&request)))
    }

    /// Sort, filter and grouping as one cancellable rebuild.
    ///
    /// Supersedes the previous call that is still queued or running. A
    /// cancelled pass keeps the previously published rows.
    pub fn apply_sort_filter_group(
        &self,
        request: SortFilterGroupRequest<T>,
        caller: Option<&CancellationToken>,
    ) -> OperationHandle<()> {
        let inner = Arc::clone(&self.inner);
        self.inner
            .queue
            .submit_cancellable("apply_sort_filter_group", caller, move |token| {
                let (result, events) = inner.mutate(true, |p| {
                    p.apply_sort_filter_group(request, &|| token.is_cancelled())
                });
                inner.notify(events);
                result
            })
    }

    fn submit<R, F>(&self, name: &'static str, op: F) -> OperationHandle<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut Projector<T>) -> treevirt::Result<R> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        self.inner.queue.submit(name, move |_| {
            let (result, events) = inner.mutate(true, op);
            inner.notify(events);
            result
        })
    }

    // --- layout ---

    /// Runs `f` against the layout estimator, sized to the published rows.
    pub fn with_layout<R>(&self, f: impl FnOnce(&mut RowLayoutEstimator) -> R) -> R {
        f(&mut *self.inner.layout.lock())
    }

    pub fn get_visible_range(&self, scroll_offset: u64, viewport_height: u32, buffer: usize) -> VisibleRange {
        self.inner
            .layout
            .lock()
            .get_visible_range(scroll_offset, viewport_height, buffer)
    }

    pub fn get_row_height(&self, row: usize) -> u32 {
        self.inner.layout.lock().get_row_height(row)
    }

    pub fn get_row_top(&self, row: usize) -> u64 {
        self.inner.layout.lock().get_row_top(row)
    }

    pub fn get_total_height(&self) -> u64 {
        self.inner.layout.lock().get_total_height()
    }

    pub fn set_row_height(&self, row: usize, height: u32) {
        self.inner.layout.lock().set_row_height(row, height);
    }

    pub fn invalidate_row(&self, row: usize) {
        self.inner.layout.lock().invalidate_row(row);
    }
}

impl<T: Send + Sync + 'static> GridInner<T> {
    /// Runs `f` under the projector lock and republishes if it produced a new
    /// generation. Events are returned so they can be raised after the lock
    /// is released.
    ///
    /// With `remeasure`, row heights are forgotten on republish: the rows at
    /// each index are no longer the ones that were measured.
    fn mutate<R>(&self, remeasure: bool, f: impl FnOnce(&mut Projector<T>) -> R) -> (R, Vec<GridEvent>) {
        let mut projector = self.projector.lock();
        let result = f(&mut *projector);

        let generation = projector.generation();
        let mut events = Vec::new();
        if generation != self.published.read().generation {
            let rows = projector.snapshot();
            let count = rows.len();
            *self.published.write() = Published { rows, generation };
            let mut layout = self.layout.lock();
            if remeasure {
                layout.reset_measurements();
            }
            layout.set_row_count(count);
            tracing::trace!(target: "treevirt_runtime", generation, rows = count, "grid republished");
            events.push(GridEvent::Reset { generation });
        }
        (result, events)
    }

    fn notify(&self, events: Vec<GridEvent>) {
        for event in events {
            let subscribers = self.subscribers.clone();
            dispatch(&*self.dispatcher, Box::new(move || subscribers.emit(&event)));
        }
    }
}

impl<T> core::fmt::Debug for Grid<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let published = self.inner.published.read();
        f.debug_struct("Grid")
            .field("rows", &published.rows.len())
            .field("generation", &published.generation)
            .field("subscribers", &self.inner.subscribers.len())
            .finish_non_exhaustive()
    }
}
