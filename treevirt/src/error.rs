//! Error types for the projection engine.

/// Result type alias for projector and node-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the core engine.
///
/// Reorder feasibility is deliberately not part of this type: an infeasible
/// move is reported as a [`crate::ReorderRejection`] value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A visible-row index past the current row count.
    #[error("row index {index} is out of range (row count {count})")]
    IndexOutOfRange { index: usize, count: usize },

    /// The children callback produced a tree deeper than the configured ceiling.
    ///
    /// This almost always means the callback is cyclic.
    #[error("tree depth exceeded the limit of {limit} levels (cyclic children callback?)")]
    DepthLimitExceeded { limit: usize },

    /// The operation was superseded or cancelled before it completed.
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    pub(crate) fn out_of_range(index: usize, count: usize) -> Self {
        Self::IndexOutOfRange { index, count }
    }
}
