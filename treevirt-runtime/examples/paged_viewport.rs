// Example: a viewport scrolling over a slow paged source.
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use treevirt_runtime::{
    CancellationToken, PageResult, PagingProvider, ProviderError, SchedulerEvent,
    SchedulerSettings, ViewportRequest, ViewportScheduler,
};

struct SlowSource {
    rows: usize,
}

impl PagingProvider for SlowSource {
    type Row = String;
    type ViewModel = String;

    fn get_row_count(&self) -> BoxFuture<'_, Result<usize, ProviderError>> {
        async move { Ok(self.rows) }.boxed()
    }

    fn get_page(
        &self,
        start: usize,
        count: usize,
        _token: CancellationToken,
    ) -> BoxFuture<'_, Result<PageResult<String>, ProviderError>> {
        async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let end = (start + count).min(self.rows);
            Ok(PageResult::new((start..end).map(|i| format!("row {i}")).collect()))
        }
        .boxed()
    }
}

#[tokio::main]
async fn main() -> Result<(), ProviderError> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let settings = SchedulerSettings::default()
        .with_page_size(50)
        .with_prefetch_radius(50);
    let scheduler = ViewportScheduler::new(
        Arc::new(SlowSource { rows: 10_000 }),
        settings,
        tokio::runtime::Handle::current(),
    );
    let mut events = scheduler.subscribe();
    scheduler.refresh_row_count().await?;

    // Fast scrolling: pages past the concurrency ceiling are dropped, not queued.
    for start in (0..2_000).step_by(400) {
        scheduler.request(ViewportRequest::new(start, 40));
    }
    while scheduler.in_flight() > 0 {
        if let Ok(SchedulerEvent::PageLoaded { start, count }) = events.recv().await {
            println!("loaded {start}..{}", start + count);
        }
    }

    println!("row 10 = {:?}", scheduler.try_get_materialized_row(10));
    println!("row 1610 placeholder = {}", scheduler.is_placeholder(1610));
    println!("{:#?}", scheduler.metrics());
    Ok(())
}
