//! Flattens the node store and the group tree into visible entries.

use std::sync::Arc;

use super::aggregate::{AggregateCache, AggregateContext, AggregateDescriptor};
use super::entry::{AggregateCell, EntryKind, GroupHeader, SummaryRow, VisibleEntry};
use super::group::{GroupDescriptor, GroupId, GroupTree};
use crate::error::{Error, Result};
use crate::node::NodeStore;
use crate::{AggregatePlacement, GroupPath, NodeId, Value, ValueProvider};

/// How many rows are emitted between cancellation polls.
const CANCEL_POLL_INTERVAL: usize = 256;

pub(super) struct Emitter<'a, T> {
    pub store: &'a NodeStore<T>,
    pub tree: &'a GroupTree,
    pub groups: &'a [GroupDescriptor<T>],
    pub aggregates: &'a [AggregateDescriptor<T>],
    pub values: Option<&'a dyn ValueProvider<T>>,
    pub cache: &'a mut AggregateCache,
    pub is_cancelled: &'a dyn Fn() -> bool,
    pub out: Vec<VisibleEntry<T>>,
    pub steps: usize,
}

impl<T> Emitter<'_, T> {
    pub(super) fn run(mut self) -> Result<Vec<VisibleEntry<T>>> {
        let store = self.store;
        let tree = self.tree;
        if self.groups.is_empty() {
            for &root in store.roots() {
                self.emit_subtree(root, 0)?;
            }
        } else {
            for &g in tree.roots() {
                self.emit_group(g)?;
            }
        }

        if self.aggregates.iter().any(|a| a.placement.in_grid_footer()) {
            let rows: Vec<Arc<T>> = store
                .roots()
                .iter()
                .map(|&id| store.get(id))
                .filter(|n| n.is_filter_included())
                .map(|n| Arc::clone(n.item()))
                .collect();
            let summary = self.summary(None, 0, None, AggregatePlacement::GridFooter, || rows);
            self.out.push(VisibleEntry {
                kind: EntryKind::Summary(summary),
                level: 0,
                is_expanded: false,
                has_children: false,
            });
        }
        Ok(self.out)
    }

    fn poll(&mut self) -> Result<()> {
        self.steps += 1;
        if self.steps % CANCEL_POLL_INTERVAL == 0 && (self.is_cancelled)() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    /// Pre-order walk of one root. Descends only through expanded,
    /// filter-included nodes.
    fn emit_subtree(&mut self, root: NodeId, level_offset: usize) -> Result<()> {
        let store = self.store;
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let node = store.get(id);
            if !node.is_filter_included() {
                continue;
            }
            self.poll()?;
            let has_children = node.has_visible_children();
            self.out.push(VisibleEntry {
                kind: EntryKind::Node {
                    id,
                    item: Arc::clone(node.item()),
                },
                level: node.level() + level_offset,
                is_expanded: node.is_expanded(),
                has_children,
            });
            if node.is_expanded() && has_children {
                stack.extend(node.children().iter().rev().copied());
            }
        }
        Ok(())
    }

    fn emit_group(&mut self, id: GroupId) -> Result<()> {
        let tree = self.tree;
        let groups = self.groups;
        let g = tree.get(id);
        let descriptor = &groups[g.descriptor];
        self.poll()?;
        self.out.push(VisibleEntry {
            kind: EntryKind::GroupHeader(GroupHeader {
                path: g.path.clone(),
                key: g.key.clone(),
                header: descriptor.header(&g.key, g.item_count),
                item_count: g.item_count,
                descriptor: g.descriptor,
            }),
            level: g.depth,
            is_expanded: g.is_expanded,
            has_children: g.item_count > 0,
        });
        if !g.is_expanded {
            return Ok(());
        }

        for &child in &g.children {
            self.emit_group(child)?;
        }
        for &leaf in &g.leaves {
            self.emit_subtree(leaf, g.depth + 1)?;
        }

        if self.aggregates.iter().any(|a| a.placement.in_group_footer()) {
            let store = self.store;
            let summary = self.summary(
                Some(&g.path),
                g.depth + 1,
                Some(&g.key),
                AggregatePlacement::GroupFooter,
                || {
                    let mut leaves = Vec::with_capacity(g.item_count);
                    tree.collect_leaves(id, &mut leaves);
                    leaves.into_iter().map(|n| Arc::clone(store.get(n).item())).collect()
                },
            );
            self.out.push(VisibleEntry {
                kind: EntryKind::Summary(summary),
                level: g.depth + 1,
                is_expanded: false,
                has_children: false,
            });
        }
        Ok(())
    }

    /// Evaluates every aggregate shown at `placement`, hitting the cache first.
    /// `rows` is only collected on a cache miss.
    fn summary(
        &mut self,
        path: Option<&GroupPath>,
        level: usize,
        key: Option<&Value>,
        placement: AggregatePlacement,
        rows: impl FnOnce() -> Vec<Arc<T>>,
    ) -> SummaryRow {
        let mut rows = Some(rows);
        let mut collected: Option<Vec<Arc<T>>> = None;
        let mut cells = Vec::new();
        let values = self.values;

        let aggregates = self.aggregates;
        for descriptor in aggregates {
            let shown = match placement {
                AggregatePlacement::GridFooter => descriptor.placement.in_grid_footer(),
                _ => descriptor.placement.in_group_footer(),
            };
            if !shown {
                continue;
            }
            let (value, text) = self.cache.get_or_compute(descriptor, path, placement, || {
                if collected.is_none() {
                    collected = Some(rows.take().map(|f| f()).unwrap_or_default());
                }
                let rows = collected.as_deref().unwrap_or_default();
                descriptor.evaluate(&AggregateContext {
                    path,
                    level,
                    key,
                    rows,
                    placement,
                    column: descriptor.column.as_deref(),
                    values,
                })
            });
            cells.push(AggregateCell {
                aggregate: descriptor.id(),
                column: descriptor.column.clone(),
                value,
                text,
            });
        }

        SummaryRow {
            path: path.cloned(),
            placement,
            cells,
        }
    }
}
