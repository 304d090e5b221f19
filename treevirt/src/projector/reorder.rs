//! Drag-move of visible rows within one sibling list.
//!
//! The dry run and the commit share [`Projector::plan_reorder`], so a request
//! that passes `can_reorder` on a snapshot is exactly one that `reorder`
//! accepts on the same snapshot.

use std::collections::HashSet;

use super::{EntryKind, Projector};
use crate::{GroupPath, NodeId};

/// Moves the rows at `source_indices` so they land before the surviving
/// sibling currently at or after `target_index`.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReorderRequest {
    pub source_indices: Vec<usize>,
    pub target_index: usize,
    /// Generation the indices were read from. Checked when set.
    pub generation: Option<u64>,
}

impl ReorderRequest {
    pub fn new(source_indices: impl Into<Vec<usize>>, target_index: usize) -> Self {
        Self {
            source_indices: source_indices.into(),
            target_index,
            generation: None,
        }
    }

    pub fn at_generation(mut self, generation: u64) -> Self {
        self.generation = Some(generation);
        self
    }
}

/// Why a reorder request is infeasible.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ReorderRejection {
    #[error("no rows to move")]
    Empty,
    #[error("row index {index} is out of range (row count {count})")]
    OutOfRange { index: usize, count: usize },
    #[error("summary row {index} cannot be moved")]
    SummaryRow { index: usize },
    #[error("group rows cannot be moved")]
    GroupMoveNotAllowed,
    #[error("group rows and item rows cannot be moved together")]
    MixedKinds,
    #[error("rows do not share a parent")]
    DifferentParents,
    #[error("request was read at generation {expected}, projector is at {current}")]
    Stale { expected: u64, current: u64 },
}

/// The sibling list a row belongs to.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Scope {
    /// Children of a node, or ungrouped roots.
    Nodes(Option<NodeId>),
    /// Roots placed in one group.
    GroupedRoots(GroupPath),
    /// Groups under one parent path.
    Groups(GroupPath),
}

impl Scope {
    fn is_group(&self) -> bool {
        matches!(self, Self::Groups(_))
    }
}

#[derive(Debug)]
pub(super) struct ReorderPlan {
    scope: Scope,
    /// Visible indices of the moved rows, ascending.
    sources: Vec<usize>,
    /// Visible indices of every row in the scope, ascending.
    siblings: Vec<usize>,
    /// First surviving sibling at or after the target.
    anchor: Option<usize>,
}

impl<T: 'static> Projector<T> {
    pub fn can_reorder(&self, request: &ReorderRequest) -> bool {
        self.plan_reorder(request).is_ok()
    }

    pub fn check_reorder(&self, request: &ReorderRequest) -> Result<(), ReorderRejection> {
        self.plan_reorder(request).map(|_| ())
    }

    /// Commits the move to the real sibling lists and rebuilds.
    ///
    /// Returns the new visible indices of the moved rows, ascending.
    pub fn reorder(&mut self, request: &ReorderRequest) -> Result<Vec<usize>, ReorderRejection> {
        let plan = self.plan_reorder(request)?;
        let moved = match &plan.scope {
            Scope::Nodes(parent) => Moved::Nodes(self.commit_nodes(*parent, &plan)),
            Scope::GroupedRoots(_) => Moved::Nodes(self.commit_nodes(None, &plan)),
            Scope::Groups(_) => Moved::Groups(self.commit_groups(&plan)),
        };
        self.aggregate_cache.clear();
        self.rebuild();

        let mut indices: Vec<usize> = match moved {
            Moved::Nodes(ids) => ids.iter().filter_map(|&id| self.visible_index_of(id)).collect(),
            Moved::Groups(paths) => self
                .entries
                .iter()
                .enumerate()
                .filter(|(_, e)| e.group_header().is_some_and(|h| paths.contains(&h.path)))
                .map(|(i, _)| i)
                .collect(),
        };
        indices.sort_unstable();
        vdebug!(moved = indices.len(), "Projector::reorder committed");
        Ok(indices)
    }

    pub(super) fn plan_reorder(&self, request: &ReorderRequest) -> Result<ReorderPlan, ReorderRejection> {
        if let Some(expected) = request.generation {
            if expected != self.generation {
                return Err(ReorderRejection::Stale {
                    expected,
                    current: self.generation,
                });
            }
        }

        let mut sources = request.source_indices.clone();
        sources.sort_unstable();
        sources.dedup();
        if sources.is_empty() {
            return Err(ReorderRejection::Empty);
        }
        let count = self.entries.len();
        if let Some(&index) = sources.iter().find(|&&i| i >= count) {
            return Err(ReorderRejection::OutOfRange { index, count });
        }

        let mut scope: Option<Scope> = None;
        for &i in &sources {
            let s = self.scope_of(i)?;
            match &scope {
                None => scope = Some(s),
                Some(prev) if prev.is_group() != s.is_group() => {
                    return Err(ReorderRejection::MixedKinds);
                }
                Some(prev) if *prev != s => return Err(ReorderRejection::DifferentParents),
                Some(_) => {}
            }
        }
        let Some(scope) = scope else {
            return Err(ReorderRejection::Empty);
        };

        let siblings: Vec<usize> = (0..count)
            .filter(|&i| self.scope_of(i).is_ok_and(|s| s == scope))
            .collect();
        let target = request.target_index.min(count);
        let anchor = siblings
            .iter()
            .copied()
            .filter(|i| sources.binary_search(i).is_err())
            .find(|&i| i >= target);

        Ok(ReorderPlan {
            scope,
            sources,
            siblings,
            anchor,
        })
    }

    fn scope_of(&self, index: usize) -> Result<Scope, ReorderRejection> {
        let entry = &self.entries[index];
        match &entry.kind {
            EntryKind::Node { id, .. } => {
                let parent = self.store.get(*id).parent();
                if parent.is_none() && !self.groups.is_empty() {
                    if let Some(group) = self.group_tree.group_of(*id) {
                        return Ok(Scope::GroupedRoots(group.path.clone()));
                    }
                }
                Ok(Scope::Nodes(parent))
            }
            EntryKind::GroupHeader(header) => {
                if !self.options.allow_group_reorder {
                    return Err(ReorderRejection::GroupMoveNotAllowed);
                }
                Ok(Scope::Groups(header.path.parent().unwrap_or_else(GroupPath::root)))
            }
            EntryKind::Summary(_) => Err(ReorderRejection::SummaryRow { index }),
        }
    }

    /// Moves nodes inside their real sibling list, then renumbers the
    /// original indices of that list so an unsorted view keeps the new order.
    fn commit_nodes(&mut self, parent: Option<NodeId>, plan: &ReorderPlan) -> Vec<NodeId> {
        let node_at = |i: usize| self.entries.get(i).and_then(|e| e.node_id());
        let moved: Vec<NodeId> = plan.sources.iter().filter_map(|&i| node_at(i)).collect();
        let anchor = plan.anchor.and_then(node_at);
        let last = plan
            .siblings
            .iter()
            .rev()
            .find(|i| plan.sources.binary_search(i).is_err())
            .and_then(|&i| node_at(i));

        let moved_set: HashSet<NodeId> = moved.iter().copied().collect();
        let list = self.store.siblings_of(parent);
        let order = splice_before(list, &moved, &moved_set, anchor, last);

        let mut slots: Vec<usize> = order.iter().map(|&id| self.store.get(id).original_index).collect();
        slots.sort_unstable();
        for (&id, slot) in order.iter().zip(slots) {
            self.store.get_mut(id).original_index = slot;
        }
        *self.store.siblings_mut(parent) = order;
        moved
    }

    /// Records a manual rank for every group in the moved-within list.
    fn commit_groups(&mut self, plan: &ReorderPlan) -> Vec<GroupPath> {
        let path_at = |i: usize| {
            self.entries
                .get(i)
                .and_then(|e| e.group_header())
                .map(|h| h.path.clone())
        };
        let list: Vec<GroupPath> = plan.siblings.iter().filter_map(|&i| path_at(i)).collect();
        let moved: Vec<GroupPath> = plan.sources.iter().filter_map(|&i| path_at(i)).collect();
        let anchor = plan.anchor.and_then(path_at);
        let last = plan
            .siblings
            .iter()
            .rev()
            .find(|i| plan.sources.binary_search(i).is_err())
            .and_then(|&i| path_at(i));

        let moved_set: HashSet<GroupPath> = moved.iter().cloned().collect();
        let order = splice_before(&list, &moved, &moved_set, anchor, last);
        for (rank, path) in order.into_iter().enumerate() {
            self.group_ranks.insert(path, rank);
        }
        moved
    }
}

enum Moved {
    Nodes(Vec<NodeId>),
    Groups(Vec<GroupPath>),
}

/// Removes `moved` from `list` and reinserts it before `anchor`, after `last`
/// when there is no anchor, or in place when nothing else survives.
fn splice_before<K: Clone + Eq + std::hash::Hash>(
    list: &[K],
    moved: &[K],
    moved_set: &HashSet<K>,
    anchor: Option<K>,
    last: Option<K>,
) -> Vec<K> {
    let mut remaining: Vec<K> = list.iter().filter(|k| !moved_set.contains(*k)).cloned().collect();
    let in_place = || {
        list.iter()
            .position(|k| moved_set.contains(k))
            .map(|p| list[..p].iter().filter(|k| !moved_set.contains(*k)).count())
    };
    let at = match (anchor, last) {
        (Some(a), _) => remaining.iter().position(|k| *k == a),
        (None, Some(l)) => remaining.iter().position(|k| *k == l).map(|p| p + 1),
        (None, None) => in_place(),
    }
    .unwrap_or(remaining.len());
    remaining.splice(at..at, moved.iter().cloned());
    remaining
}
