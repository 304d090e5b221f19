//! A headless engine for virtualizing very large, possibly hierarchical
//! datasets into a small window of rows.
//!
//! For the operation queue, viewport scheduler and the thread-safe `Grid`
//! façade, see the `treevirt-runtime` crate.
//!
//! This crate holds the synchronous core:
//! - [`NodeStore`]: the item tree in original insertion order
//! - [`Projector`]: filter, sort, group, aggregate, expand/collapse and
//!   drag-reorder flattened into an indexable list of [`VisibleEntry`] rows
//! - [`RowLayoutEstimator`]: chunked running averages over lazily measured
//!   row heights, answering offset and visible-range queries
//!
//! It is UI-agnostic. A presentation layer is expected to provide:
//! - item values for column grouping/sorting via a [`ValueProvider`]
//! - viewport size and scroll offset
//! - row heights, either pushed with `set_row_height` or through a measurer
#![forbid(unsafe_code)]

#[macro_use]
mod macros;

mod error;
mod fenwick;
mod layout;
mod node;
mod options;
mod projector;
mod state;
mod types;
mod value;


pub use error::{Error, Result};
pub use layout::{
    DEFAULT_CHUNK_SIZE, DEFAULT_ROW_HEIGHT, LayoutOptions, MeasureFn, RowLayoutChunk,
    RowLayoutEstimator,
};
pub use node::{ChildrenFn, DEFAULT_MAX_DEPTH, KeyFn, NodeId, NodeStore, TreeNode};
pub use options::ProjectorOptions;
pub use projector::{
    AggregateCell, AggregateContext, AggregateDescriptor, AggregateFormatter, AggregateId,
    AggregateKind, AggregateProvider, AggregateSource, CompareFn, EntryKind, FilterFn,
    GroupAdapter, GroupDescriptor, GroupHeader, GroupId, GroupTree, GroupView, HeaderFormatter,
    KeyComparer, KeySelector, Projector, ReorderRejection, ReorderRequest, RowsAggregateFn,
    SortDescription, SortFilterGroupRequest, SummaryRow, VisibleEntry, column_comparator,
};
pub use state::ViewState;
pub use types::{AggregatePlacement, GroupPath, ProjectionState, SortDirection, VisibleRange};
pub use value::{Value, ValueProvider, format_count};
