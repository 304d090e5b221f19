use std::sync::Arc;

use crate::{AggregateId, AggregatePlacement, GroupPath, NodeId, Value};

/// One row of the projection.
#[derive(Debug)]
pub struct VisibleEntry<T> {
    pub kind: EntryKind<T>,
    /// Indentation level the row renders at, counting grouping levels.
    pub level: usize,
    pub is_expanded: bool,
    pub has_children: bool,
}

#[derive(Debug)]
pub enum EntryKind<T> {
    Node { id: NodeId, item: Arc<T> },
    GroupHeader(GroupHeader),
    Summary(SummaryRow),
}

#[derive(Clone, Debug, PartialEq)]
pub struct GroupHeader {
    pub path: GroupPath,
    pub key: Value,
    pub header: String,
    /// Items in this group across all of its nested levels.
    pub item_count: usize,
    /// Index of the originating group descriptor (its grouping level).
    pub descriptor: usize,
}

/// A synthetic aggregate row: one per group footer, or one for the whole grid.
#[derive(Clone, Debug, PartialEq)]
pub struct SummaryRow {
    /// `None` for the grid footer.
    pub path: Option<GroupPath>,
    pub placement: AggregatePlacement,
    pub cells: Vec<AggregateCell>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AggregateCell {
    pub aggregate: AggregateId,
    pub column: Option<String>,
    pub value: Value,
    pub text: String,
}

impl<T> Clone for EntryKind<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Node { id, item } => Self::Node {
                id: *id,
                item: Arc::clone(item),
            },
            Self::GroupHeader(h) => Self::GroupHeader(h.clone()),
            Self::Summary(s) => Self::Summary(s.clone()),
        }
    }
}

impl<T> Clone for VisibleEntry<T> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind.clone(),
            level: self.level,
            is_expanded: self.is_expanded,
            has_children: self.has_children,
        }
    }
}

impl<T> VisibleEntry<T> {
    pub fn is_node(&self) -> bool {
        matches!(self.kind, EntryKind::Node { .. })
    }

    pub fn is_group(&self) -> bool {
        matches!(self.kind, EntryKind::GroupHeader(_))
    }

    pub fn is_summary(&self) -> bool {
        matches!(self.kind, EntryKind::Summary(_))
    }

    pub fn node_id(&self) -> Option<NodeId> {
        match &self.kind {
            EntryKind::Node { id, .. } => Some(*id),
            _ => None,
        }
    }

    pub fn item(&self) -> Option<&Arc<T>> {
        match &self.kind {
            EntryKind::Node { item, .. } => Some(item),
            _ => None,
        }
    }

    pub fn group_header(&self) -> Option<&GroupHeader> {
        match &self.kind {
            EntryKind::GroupHeader(h) => Some(h),
            _ => None,
        }
    }

    pub fn summary(&self) -> Option<&SummaryRow> {
        match &self.kind {
            EntryKind::Summary(s) => Some(s),
            _ => None,
        }
    }

    /// Only group headers and group footers carry a path.
    pub fn group_path(&self) -> Option<&GroupPath> {
        match &self.kind {
            EntryKind::Node { .. } => None,
            EntryKind::GroupHeader(h) => Some(&h.path),
            EntryKind::Summary(s) => s.path.as_ref(),
        }
    }
}
