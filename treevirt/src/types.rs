use std::fmt;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn apply(self, ordering: core::cmp::Ordering) -> core::cmp::Ordering {
        match self {
            Self::Ascending => ordering,
            Self::Descending => ordering.reverse(),
        }
    }
}

/// Where an aggregate's summary row is rendered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AggregatePlacement {
    #[default]
    GroupFooter,
    GridFooter,
    Both,
}

impl AggregatePlacement {
    pub fn in_group_footer(self) -> bool {
        matches!(self, Self::GroupFooter | Self::Both)
    }

    pub fn in_grid_footer(self) -> bool {
        matches!(self, Self::GridFooter | Self::Both)
    }
}

/// Lifecycle of a projection behind a queue of rebuilds. Readers only ever
/// observe the entries published by the last transition back to `Clean`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProjectionState {
    #[default]
    Clean,
    Rebuilding,
}

/// Identifies one group bucket's position across every grouping level.
///
/// Built by appending `"/{level}:{normalized key}"` per level, so the path of
/// a nested group always starts with its parent's path.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GroupPath(Arc<str>);

impl GroupPath {
    pub fn root() -> Self {
        Self(Arc::from(""))
    }

    /// `/` and `%` in the key are percent-escaped so segments stay unambiguous.
    pub fn child(&self, level: usize, normalized_key: &str) -> Self {
        let key = normalized_key.replace('%', "%25").replace('/', "%2F");
        Self(Arc::from(format!("{}/{level}:{key}", self.0)))
    }

    /// The enclosing group's path; top-level groups return the root path.
    pub fn parent(&self) -> Option<Self> {
        let cut = self.0.rfind('/')?;
        Some(Self(Arc::from(&self.0[..cut])))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of grouping levels encoded in this path.
    pub fn depth(&self) -> usize {
        self.0.matches('/').count()
    }
}

impl fmt::Debug for GroupPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("GroupPath").field(&&*self.0).finish()
    }
}

impl fmt::Display for GroupPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GroupPath {
    fn from(value: &str) -> Self {
        Self(Arc::from(value))
    }
}

/// A visible row range as returned by the layout estimator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VisibleRange {
    pub start_index: usize,
    pub end_index: usize, // exclusive, rows intersecting the viewport (no buffer)
    pub buffer: usize,
    pub count: usize,
}

impl VisibleRange {
    pub fn empty(count: usize) -> Self {
        Self {
            start_index: 0,
            end_index: 0,
            buffer: 0,
            count,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.start_index >= self.end_index
    }

    pub fn len(&self) -> usize {
        self.end_index.saturating_sub(self.start_index)
    }

    /// First row to pre-render, including the leading buffer.
    pub fn buffered_start(&self) -> usize {
        self.start_index.saturating_sub(self.buffer)
    }

    /// Exclusive end of the rows to pre-render, including the trailing buffer.
    pub fn buffered_end(&self) -> usize {
        self.end_index.saturating_add(self.buffer).min(self.count)
    }
}
