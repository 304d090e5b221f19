//! The consumer-implemented data source behind the viewport scheduler.

use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use crate::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("fetch cancelled")]
    Cancelled,
    #[error("provider failure: {0}")]
    Failed(String),
    #[error("operation not supported by this provider")]
    Unsupported,
}

/// One fetched page.
#[derive(Clone, Debug, PartialEq)]
pub struct PageResult<R> {
    /// Rows starting at the requested start index. May be shorter than
    /// requested at the end of the data.
    pub rows: Vec<R>,
    /// Absolute indices within this page whose row is still a placeholder.
    pub placeholders: Vec<usize>,
}

impl<R> PageResult<R> {
    pub fn new(rows: Vec<R>) -> Self {
        Self {
            rows,
            placeholders: Vec::new(),
        }
    }

    pub fn with_placeholders(mut self, placeholders: Vec<usize>) -> Self {
        self.placeholders = placeholders;
        self
    }
}

/// What a provider-side change invalidated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum InvalidationKind {
    /// Rows `start..start + count` changed.
    Range { start: usize, count: usize },
    /// Everything, including the row count.
    Full,
    /// Only the row count or other metadata.
    MetadataOnly,
}

impl InvalidationKind {
    /// Rows `start..` through the end of the data.
    pub fn from_index(start: usize) -> Self {
        Self::Range {
            start,
            count: usize::MAX - start,
        }
    }

    pub(crate) fn overlaps(&self, start: usize, count: usize) -> bool {
        match *self {
            Self::Range { start: s, count: c } => start < s.saturating_add(c) && s < start.saturating_add(count),
            Self::Full => true,
            Self::MetadataOnly => false,
        }
    }
}

/// A paged, asynchronous row source.
///
/// Only [`get_row_count`](PagingProvider::get_row_count) and
/// [`get_page`](PagingProvider::get_page) are required. Editing is optional and
/// reports [`ProviderError::Unsupported`] by default.
pub trait PagingProvider: Send + Sync + 'static {
    type Row: Clone + Send + Sync + 'static;
    type ViewModel: Send + 'static;

    fn get_row_count(&self) -> BoxFuture<'_, Result<usize, ProviderError>>;

    /// Fetches up to `count` rows starting at `start`.
    ///
    /// The scheduler drops the future once `token` is cancelled; a provider
    /// may also poll it to stop early.
    fn get_page(
        &self,
        start: usize,
        count: usize,
        token: CancellationToken,
    ) -> BoxFuture<'_, Result<PageResult<Self::Row>, ProviderError>>;

    /// Hint that `start..start + count` is likely to be requested soon.
    fn prefetch(&self, _start: usize, _count: usize) -> BoxFuture<'_, Result<(), ProviderError>> {
        async { Ok(()) }.boxed()
    }

    /// Told about invalidations raised through the scheduler.
    fn invalidate(&self, _kind: InvalidationKind) {}

    fn is_placeholder(&self, _index: usize) -> bool {
        false
    }

    /// Inserts a row and returns its index.
    fn create(&self, _row: Self::ViewModel) -> BoxFuture<'_, Result<usize, ProviderError>> {
        async { Err(ProviderError::Unsupported) }.boxed()
    }

    fn update(&self, _index: usize, _row: Self::ViewModel) -> BoxFuture<'_, Result<(), ProviderError>> {
        async { Err(ProviderError::Unsupported) }.boxed()
    }

    fn delete(&self, _index: usize) -> BoxFuture<'_, Result<(), ProviderError>> {
        async { Err(ProviderError::Unsupported) }.boxed()
    }
}
