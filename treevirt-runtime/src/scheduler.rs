//! Turns visible index ranges into bounded, cancellable page fetches.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Range;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::broadcast;

use crate::{
    CancellationToken, InvalidationKind, MetricsSnapshot, PageResult, PagingProvider,
    ProviderError, SchedulerMetrics,
};

const EVENT_CAPACITY: usize = 256;

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize), serde(default))]
pub struct SchedulerSettings {
    pub page_size: usize,
    /// Rows fetched beyond the visible range on each side.
    pub prefetch_radius: usize,
    pub max_concurrent_loads: usize,
    /// Ceiling on resident plus in-flight pages.
    pub max_pages: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            page_size: 100,
            prefetch_radius: 0,
            max_concurrent_loads: 4,
            max_pages: 64,
        }
    }
}

impl SchedulerSettings {
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_prefetch_radius(mut self, radius: usize) -> Self {
        self.prefetch_radius = radius;
        self
    }

    pub fn with_max_concurrent_loads(mut self, max: usize) -> Self {
        self.max_concurrent_loads = max;
        self
    }

    pub fn with_max_pages(mut self, max: usize) -> Self {
        self.max_pages = max;
        self
    }
}

/// A visible index range, as reported by one viewport pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ViewportRequest {
    pub start: usize,
    pub count: usize,
    pub prefetch_radius: usize,
}

impl ViewportRequest {
    pub fn new(start: usize, count: usize) -> Self {
        Self {
            start,
            count,
            prefetch_radius: 0,
        }
    }

    pub fn with_prefetch_radius(mut self, radius: usize) -> Self {
        self.prefetch_radius = radius;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SchedulerEvent {
    PageLoaded { start: usize, count: usize },
    PageFailed { start: usize, count: usize, error: ProviderError },
    Invalidated(InvalidationKind),
}

struct Page<R> {
    rows: Vec<R>,
    placeholders: HashSet<usize>,
}

struct Fetch {
    generation: u64,
    token: CancellationToken,
}

struct State<R> {
    pages: BTreeMap<usize, Page<R>>,
    in_flight: HashMap<usize, Fetch>,
    last_request: Option<ViewportRequest>,
    /// Some page of the last request was dropped or failed.
    incomplete: bool,
    window: Range<usize>,
    row_count: Option<usize>,
    next_generation: u64,
}

struct Inner<P: PagingProvider> {
    provider: Arc<P>,
    settings: SchedulerSettings,
    state: Mutex<State<P::Row>>,
    metrics: SchedulerMetrics,
    events: broadcast::Sender<SchedulerEvent>,
    runtime: Handle,
}

/// Fetches the pages behind a viewport from a [`PagingProvider`].
///
/// Each page is keyed by its start index. A newer fetch for the same start
/// supersedes the older one, and a stale completion is discarded. When the
/// in-flight or resident ceilings are reached, pages outside the current
/// window are evicted first; if none are, the new fetch is dropped and the
/// caller is expected to re-request on its next viewport pass.
pub struct ViewportScheduler<P: PagingProvider> {
    inner: Arc<Inner<P>>,
}

impl<P: PagingProvider> Clone for ViewportScheduler<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: PagingProvider> ViewportScheduler<P> {
    /// Fetches run as tasks on `runtime`.
    pub fn new(provider: Arc<P>, settings: SchedulerSettings, runtime: Handle) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                provider,
                settings,
                state: Mutex::new(State {
                    pages: BTreeMap::new(),
                    in_flight: HashMap::new(),
                    last_request: None,
                    incomplete: false,
                    window: 0..0,
                    row_count: None,
                    next_generation: 0,
                }),
                metrics: SchedulerMetrics::default(),
                events,
                runtime,
            }),
        }
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.inner.settings
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.inner.provider
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.inner.events.subscribe()
    }

    /// Known row count, used to clamp the last page. `None` until set or refreshed.
    pub fn row_count(&self) -> Option<usize> {
        self.inner.state.lock().row_count
    }

    pub fn set_row_count(&self, row_count: Option<usize>) {
        let mut state = self.inner.state.lock();
        state.row_count = row_count;
        state.last_request = None;
    }

    pub async fn refresh_row_count(&self) -> Result<usize, ProviderError> {
        let count = self.inner.provider.get_row_count().await?;
        self.set_row_count(Some(count));
        Ok(count)
    }

    pub fn resident_pages(&self) -> usize {
        self.inner.state.lock().pages.len()
    }

    pub fn in_flight(&self) -> usize {
        self.inner.state.lock().in_flight.len()
    }

    /// Page-aligned index range of the last request, radius included.
    pub fn window(&self) -> Range<usize> {
        self.inner.state.lock().window.clone()
    }

    /// Schedules the pages covering `viewport` and returns how many fetches started.
    ///
    /// Repeating the last request is a no-op unless one of its pages was
    /// dropped or failed. Then only the missing pages are fetched again and
    /// fetches still in flight are left alone.
    pub fn request(&self, viewport: ViewportRequest) -> usize {
        let inner = &self.inner;
        let mut state = inner.state.lock();
        let repeat = state.last_request == Some(viewport);
        if repeat && !state.incomplete {
            return 0;
        }
        state.last_request = Some(viewport);
        state.incomplete = false;
        inner.metrics.request_issued();

        let page_size = inner.settings.page_size.max(1);
        let radius = viewport.prefetch_radius.max(inner.settings.prefetch_radius);
        let start = viewport.start.saturating_sub(radius) / page_size * page_size;
        let mut end = viewport
            .start
            .saturating_add(viewport.count)
            .saturating_add(radius);
        if let Some(total) = state.row_count {
            end = end.min(total);
        }
        if viewport.count == 0 || start >= end {
            state.window = start..start;
            return 0;
        }
        state.window = start..end.div_ceil(page_size).saturating_mul(page_size);

        let mut started = 0;
        let mut page_start = start;
        while page_start < end {
            if state.pages.contains_key(&page_start) {
                inner.metrics.cache_hit();
            } else if repeat && state.in_flight.contains_key(&page_start) {
                // Still loading from the previous pass.
            } else {
                inner.metrics.cache_miss();
                let count = match state.row_count {
                    Some(total) => page_size.min(total - page_start),
                    None => page_size,
                };
                if self.start_fetch(&mut state, page_start, count) {
                    started += 1;
                } else {
                    state.incomplete = true;
                }
            }
            match page_start.checked_add(page_size) {
                Some(next) => page_start = next,
                None => break,
            }
        }
        started
    }

    fn start_fetch(&self, state: &mut State<P::Row>, page_start: usize, count: usize) -> bool {
        let inner = &self.inner;
        if let Some(previous) = state.in_flight.remove(&page_start) {
            previous.token.cancel();
            inner.metrics.fetch_cancelled();
            tracing::trace!(target: "treevirt_runtime", page_start, page_count = count, "superseding in-flight page fetch");
        } else if !self.make_room(state) {
            inner.metrics.fetch_dropped();
            tracing::debug!(target: "treevirt_runtime", page_start, page_count = count, "page fetch dropped: scheduler at capacity");
            return false;
        }

        let generation = state.next_generation;
        state.next_generation += 1;
        let token = CancellationToken::new();
        state.in_flight.insert(
            page_start,
            Fetch {
                generation,
                token: token.clone(),
            },
        );
        inner.metrics.fetch_started();

        let task = Arc::clone(inner);
        inner.runtime.spawn(async move {
            let started = Instant::now();
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => Err(ProviderError::Cancelled),
                page = task.provider.get_page(page_start, count, token.clone()) => page,
            };
            task.finish(page_start, count, generation, result, started.elapsed());
        });
        true
    }

    /// Frees a slot for one more fetch, evicting the resident page farthest
    /// outside the window when the page ceiling is reached.
    fn make_room(&self, state: &mut State<P::Row>) -> bool {
        let settings = &self.inner.settings;
        if state.in_flight.len() >= settings.max_concurrent_loads.max(1) {
            return false;
        }
        if state.pages.len() + state.in_flight.len() < settings.max_pages.max(1) {
            return true;
        }
        let window = state.window.clone();
        let victim = state
            .pages
            .keys()
            .copied()
            .filter(|&s| !window.contains(&s))
            .max_by_key(|&s| {
                if s < window.start {
                    window.start - s
                } else {
                    s - window.end
                }
            });
        match victim {
            Some(start) => {
                state.pages.remove(&start);
                self.inner.metrics.pages_evicted(1);
                tracing::trace!(target: "treevirt_runtime", page_start = start, "evicted resident page");
                true
            }
            None => false,
        }
    }

    /// The materialized row at `index`, if its page is resident and the row
    /// is not a placeholder.
    pub fn try_get_materialized_row(&self, index: usize) -> Option<P::Row> {
        let state = self.inner.state.lock();
        let (&start, page) = state.pages.range(..=index).next_back()?;
        if page.placeholders.contains(&index) {
            return None;
        }
        page.rows.get(index - start).cloned()
    }

    /// Whether `index` still shows a placeholder: not loaded yet, or loaded
    /// as one.
    pub fn is_placeholder(&self, index: usize) -> bool {
        let loaded = {
            let state = self.inner.state.lock();
            state
                .pages
                .range(..=index)
                .next_back()
                .is_some_and(|(&start, page)| {
                    index - start < page.rows.len() && !page.placeholders.contains(&index)
                })
        };
        !loaded || self.inner.provider.is_placeholder(index)
    }

    /// Drops resident pages and cancels fetches affected by `kind`, then
    /// forwards it to the provider.
    pub fn invalidate(&self, kind: InvalidationKind) {
        let inner = &self.inner;
        let page_size = inner.settings.page_size.max(1);
        {
            let mut state = inner.state.lock();
            let before = state.pages.len();
            match kind {
                InvalidationKind::MetadataOnly => state.row_count = None,
                InvalidationKind::Full | InvalidationKind::Range { .. } => {
                    if kind == InvalidationKind::Full {
                        state.row_count = None;
                    }
                    state
                        .pages
                        .retain(|&start, page| !kind.overlaps(start, page.rows.len().max(1)));
                    let stale: Vec<usize> = state
                        .in_flight
                        .keys()
                        .copied()
                        .filter(|&start| kind.overlaps(start, page_size))
                        .collect();
                    for start in stale {
                        if let Some(fetch) = state.in_flight.remove(&start) {
                            fetch.token.cancel();
                            inner.metrics.fetch_cancelled();
                        }
                    }
                }
            }
            state.last_request = None;
            tracing::debug!(target: "treevirt_runtime", ?kind, dropped = before - state.pages.len(), "scheduler invalidated");
        }
        inner.provider.invalidate(kind);
        let _ = inner.events.send(SchedulerEvent::Invalidated(kind));
    }

    /// Cancels every in-flight fetch. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let inner = &self.inner;
        let mut state = inner.state.lock();
        let cancelled = state.in_flight.len();
        for (_, fetch) in state.in_flight.drain() {
            fetch.token.cancel();
            inner.metrics.fetch_cancelled();
        }
        state.last_request = None;
        tracing::trace!(target: "treevirt_runtime", cancelled, "cancelled all page fetches");
        cancelled
    }

    /// Forwards a prefetch hint to the provider without waiting for it.
    pub fn prefetch(&self, start: usize, count: usize) {
        let task = Arc::clone(&self.inner);
        self.inner.runtime.spawn(async move {
            if let Err(error) = task.provider.prefetch(start, count).await {
                tracing::warn!(target: "treevirt_runtime", page_start = start, page_count = count, %error, "prefetch failed");
            }
        });
    }

    pub async fn create(&self, row: P::ViewModel) -> Result<usize, ProviderError> {
        let index = self.inner.provider.create(row).await?;
        self.invalidate(InvalidationKind::from_index(index));
        self.set_row_count(None);
        Ok(index)
    }

    pub async fn update(&self, index: usize, row: P::ViewModel) -> Result<(), ProviderError> {
        self.inner.provider.update(index, row).await?;
        self.invalidate(InvalidationKind::Range {
            start: index,
            count: 1,
        });
        Ok(())
    }

    pub async fn delete(&self, index: usize) -> Result<(), ProviderError> {
        self.inner.provider.delete(index).await?;
        self.invalidate(InvalidationKind::from_index(index));
        self.set_row_count(None);
        Ok(())
    }
}

impl<P: PagingProvider> Inner<P> {
    fn finish(
        &self,
        start: usize,
        count: usize,
        generation: u64,
        result: Result<PageResult<P::Row>, ProviderError>,
        latency: Duration,
    ) {
        let mut state = self.state.lock();
        let current = state
            .in_flight
            .get(&start)
            .is_some_and(|f| f.generation == generation);
        if !current {
            tracing::trace!(target: "treevirt_runtime", page_start = start, page_count = count, "discarding superseded page fetch");
            return;
        }
        state.in_flight.remove(&start);

        match result {
            Ok(page) => {
                let loaded = page.rows.len();
                state.pages.insert(
                    start,
                    Page {
                        rows: page.rows,
                        placeholders: page.placeholders.into_iter().collect(),
                    },
                );
                drop(state);
                self.metrics.fetch_completed(latency);
                tracing::trace!(
                    target: "treevirt_runtime",
                    page_start = start,
                    page_count = loaded,
                    latency_us = latency.as_micros() as u64,
                    "page loaded"
                );
                let _ = self.events.send(SchedulerEvent::PageLoaded {
                    start,
                    count: loaded,
                });
            }
            Err(ProviderError::Cancelled) => {
                drop(state);
                self.metrics.fetch_cancelled();
                tracing::trace!(target: "treevirt_runtime", page_start = start, page_count = count, "page fetch cancelled");
            }
            Err(error) => {
                // Let the next identical viewport pass retry the page.
                state.incomplete = true;
                drop(state);
                self.metrics.fetch_failed();
                tracing::warn!(
                    target: "treevirt_runtime",
                    page_start = start,
                    page_count = count,
                    %error,
                    "page fetch failed"
                );
                let _ = self.events.send(SchedulerEvent::PageFailed { start, count, error });
            }
        }
    }
}

impl<P: PagingProvider> core::fmt::Debug for ViewportScheduler<P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ViewportScheduler")
            .field("settings", &self.inner.settings)
            .field("resident_pages", &state.pages.len())
            .field("in_flight", &state.in_flight.len())
            .field("window", &state.window)
            .finish()
    }
}
