//! The visible-row projection: filter, sort, group, aggregate and expansion
//! state flattened into one ordered list of rows.
//!
//! Every structural change builds a fresh candidate list and only swaps it in
//! once the pass has completed, so readers never observe a half-built list.

mod aggregate;
mod emit;
mod entry;
mod group;
mod reorder;
mod sort;

use std::collections::HashMap;
use std::sync::Arc;

pub use aggregate::{
    AggregateContext, AggregateDescriptor, AggregateFormatter, AggregateId, AggregateKind,
    AggregateProvider, AggregateSource, RowsAggregateFn,
};
pub use entry::{AggregateCell, EntryKind, GroupHeader, SummaryRow, VisibleEntry};
pub use group::{
    GroupAdapter, GroupDescriptor, GroupId, GroupTree, GroupView, HeaderFormatter, KeyComparer,
    KeySelector,
};
pub use reorder::{ReorderRejection, ReorderRequest};
pub use sort::{CompareFn, FilterFn, SortDescription, column_comparator};

use aggregate::AggregateCache;
use emit::Emitter;
use group::{ExpansionSeed, GroupBuilder};

use crate::error::{Error, Result};
use crate::node::NodeStore;
use crate::options::ProjectorOptions;
use crate::state::ViewState;
use crate::{GroupPath, NodeId};

/// A full sort/filter/group configuration applied as one rebuild.
pub struct SortFilterGroupRequest<T> {
    pub sort: Option<CompareFn<T>>,
    pub filter: Option<FilterFn<T>>,
    pub expand_matches: bool,
    pub groups: Vec<GroupDescriptor<T>>,
}

impl<T> Default for SortFilterGroupRequest<T> {
    fn default() -> Self {
        Self {
            sort: None,
            filter: None,
            expand_matches: true,
            groups: Vec::new(),
        }
    }
}

impl<T> Clone for SortFilterGroupRequest<T> {
    fn clone(&self) -> Self {
        Self {
            sort: self.sort.clone(),
            filter: self.filter.clone(),
            expand_matches: self.expand_matches,
            groups: self.groups.clone(),
        }
    }
}

impl<T> SortFilterGroupRequest<T> {
    pub fn with_sort(mut self, cmp: impl Fn(&T, &T) -> std::cmp::Ordering + Send + Sync + 'static) -> Self {
        self.sort = Some(Arc::new(cmp));
        self
    }

    pub fn with_filter(mut self, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Arc::new(predicate));
        self
    }

    pub fn with_expand_matches(mut self, expand: bool) -> Self {
        self.expand_matches = expand;
        self
    }

    pub fn with_groups(mut self, groups: Vec<GroupDescriptor<T>>) -> Self {
        self.groups = groups;
        self
    }
}

impl<T> core::fmt::Debug for SortFilterGroupRequest<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SortFilterGroupRequest")
            .field("sort", &self.sort.is_some())
            .field("filter", &self.filter.is_some())
            .field("expand_matches", &self.expand_matches)
            .field("groups", &self.groups.len())
            .finish()
    }
}

/// Turns a [`NodeStore`] plus display state into an indexable list of rows.
pub struct Projector<T> {
    store: NodeStore<T>,
    options: ProjectorOptions<T>,

    filter: Option<FilterFn<T>>,
    expand_matches: bool,
    comparator: Option<CompareFn<T>>,
    groups: Vec<GroupDescriptor<T>>,
    aggregates: Vec<AggregateDescriptor<T>>,

    /// Per-path group expansion chosen by the user (or restored from a view state).
    group_expansion: HashMap<GroupPath, bool>,
    /// Set by `expand_all` / `collapse_all`; applies to groups without a persisted state.
    expansion_override: Option<bool>,
    /// Manual sibling order of groups, written by group reorders.
    group_ranks: HashMap<GroupPath, usize>,

    group_tree: GroupTree,
    entries: Arc<[VisibleEntry<T>]>,
    node_rows: HashMap<NodeId, usize>,
    aggregate_cache: AggregateCache,
    generation: u64,
}

impl<T: 'static> Projector<T> {
    pub fn new(options: ProjectorOptions<T>) -> Self {
        Self {
            store: options.node_store(),
            expand_matches: true,
            options,
            filter: None,
            comparator: None,
            groups: Vec::new(),
            aggregates: Vec::new(),
            group_expansion: HashMap::new(),
            expansion_override: None,
            group_ranks: HashMap::new(),
            group_tree: GroupTree::default(),
            entries: Arc::from(Vec::new()),
            node_rows: HashMap::new(),
            aggregate_cache: AggregateCache::default(),
            generation: 0,
        }
    }

    /// Creates a projector and builds it from `items`.
    pub fn with_items(options: ProjectorOptions<T>, items: impl IntoIterator<Item = T>) -> Result<Self> {
        let mut p = Self::new(options);
        p.reset(items, false)?;
        Ok(p)
    }

    pub fn options(&self) -> &ProjectorOptions<T> {
        &self.options
    }

    pub fn store(&self) -> &NodeStore<T> {
        &self.store
    }

    pub fn group_tree(&self) -> &GroupTree {
        &self.group_tree
    }

    /// Incremented every time a new row list is published.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn row_count(&self) -> usize {
        self.entries.len()
    }

    pub fn get_row(&self, index: usize) -> Result<&VisibleEntry<T>> {
        self.entries
            .get(index)
            .ok_or_else(|| Error::out_of_range(index, self.entries.len()))
    }

    pub fn entries(&self) -> &[VisibleEntry<T>] {
        &self.entries
    }

    /// The published row list. Later rebuilds never mutate a returned snapshot.
    pub fn snapshot(&self) -> Arc<[VisibleEntry<T>]> {
        Arc::clone(&self.entries)
    }

    pub fn visible_index_of(&self, node: NodeId) -> Option<usize> {
        self.node_rows.get(&node).copied()
    }

    pub fn find_by_key(&self, key: &str) -> Option<NodeId> {
        self.store.find_by_key(key)
    }

    pub fn is_filtered(&self) -> bool {
        self.filter.is_some()
    }

    pub fn is_sorted(&self) -> bool {
        self.comparator.is_some()
    }

    pub fn groups(&self) -> &[GroupDescriptor<T>] {
        &self.groups
    }

    pub fn aggregates(&self) -> &[AggregateDescriptor<T>] {
        &self.aggregates
    }

    /// Number of aggregate evaluations that missed the cache so far.
    pub fn aggregate_evaluations(&self) -> u64 {
        self.aggregate_cache.evaluations()
    }

    /// Rebuilds the node tree from `items` and re-applies the current sort,
    /// filter and grouping.
    ///
    /// With `preserve_expansion` and a key function, expansion is carried
    /// across by identity key. On error the previous tree and rows are kept.
    pub fn reset(&mut self, items: impl IntoIterator<Item = T>, preserve_expansion: bool) -> Result<()> {
        self.store.reset(items, preserve_expansion)?;
        self.apply_sort();
        self.apply_filter();
        self.aggregate_cache.clear();
        self.rebuild();
        Ok(())
    }

    /// Sorts every sibling list with `cmp`, or restores original order for `None`.
    pub fn sort(&mut self, cmp: Option<CompareFn<T>>) {
        self.comparator = cmp;
        self.apply_sort();
        self.aggregate_cache.clear();
        self.rebuild();
    }

    /// Sorts by column values through the value provider.
    ///
    /// Without a value provider, or with an empty list, this restores original order.
    pub fn sort_by_columns(&mut self, columns: &[SortDescription]) {
        let cmp = match &self.options.value_provider {
            Some(values) => column_comparator(columns, Arc::clone(values)),
            None => {
                if !columns.is_empty() {
                    vwarn!("sort_by_columns: no value provider configured");
                }
                None
            }
        };
        self.sort(cmp);
    }

    /// Applies (or clears) the filter predicate.
    ///
    /// With `expand_matches`, ancestors of matching nodes are expanded while the
    /// filter is active. Clearing the filter restores the expansion captured
    /// when filtering began.
    pub fn set_filter(&mut self, predicate: Option<FilterFn<T>>, expand_matches: bool) {
        self.filter = predicate;
        self.expand_matches = expand_matches;
        self.apply_filter();
        self.aggregate_cache.clear();
        self.rebuild();
    }

    /// [`Projector::set_filter`] with the configured
    /// [`ProjectorOptions::expand_matches_by_default`].
    pub fn filter_by(&mut self, predicate: Option<FilterFn<T>>) {
        self.set_filter(predicate, self.options.expand_matches_by_default);
    }

    pub fn set_groups(&mut self, groups: Vec<GroupDescriptor<T>>) {
        self.groups = groups;
        self.group_ranks.clear();
        self.aggregate_cache.clear();
        self.rebuild();
    }

    pub fn set_aggregates(&mut self, aggregates: Vec<AggregateDescriptor<T>>) {
        self.aggregates = aggregates;
        self.aggregate_cache.clear();
        self.rebuild();
    }

    /// Drops cached aggregate results and republishes. Call when item values
    /// changed underneath the projector.
    pub fn invalidate_aggregates(&mut self) {
        self.aggregate_cache.clear();
        if !self.aggregates.is_empty() {
            self.rebuild();
        }
    }

    /// Sort, filter and grouping applied as one rebuild.
    ///
    /// `is_cancelled` is polled while rows are emitted; a cancelled pass
    /// returns [`Error::Cancelled`] and leaves the previous rows published.
    pub fn apply_sort_filter_group(
        &mut self,
        request: SortFilterGroupRequest<T>,
        is_cancelled: &dyn Fn() -> bool,
    ) -> Result<()> {
        if is_cancelled() {
            return Err(Error::Cancelled);
        }
        let SortFilterGroupRequest {
            sort,
            filter,
            expand_matches,
            groups,
        } = request;

        let display = self.store.display_state();
        let comparator = std::mem::replace(&mut self.comparator, sort);
        let previous_filter = std::mem::replace(&mut self.filter, filter);
        let previous_expand = std::mem::replace(&mut self.expand_matches, expand_matches);
        let previous_groups = std::mem::replace(&mut self.groups, groups);
        let group_ranks = std::mem::take(&mut self.group_ranks);

        self.apply_sort();
        self.apply_filter();
        self.aggregate_cache.clear();
        let result = self.try_rebuild(is_cancelled);
        if result.is_err() {
            // Roll back to the configuration behind the published rows.
            self.comparator = comparator;
            self.filter = previous_filter;
            self.expand_matches = previous_expand;
            self.groups = previous_groups;
            self.group_ranks = group_ranks;
            self.store.restore_display_state(display);
            self.aggregate_cache.clear();
        }
        result
    }

    /// Flips the expansion of the row at `index`.
    ///
    /// Returns whether anything changed: leaves and summary rows have nothing
    /// to toggle.
    pub fn toggle_expansion(&mut self, index: usize) -> Result<bool> {
        let expanded = self.get_row(index)?.is_expanded;
        self.set_expanded(index, !expanded)
    }

    pub fn set_expanded(&mut self, index: usize, expanded: bool) -> Result<bool> {
        let entry = self.get_row(index)?;
        if entry.is_expanded == expanded || !entry.has_children {
            return Ok(false);
        }
        match &entry.kind {
            EntryKind::Node { id, .. } => {
                let id = *id;
                match self.store.node_mut(id) {
                    Some(node) => node.is_expanded = expanded,
                    None => return Ok(false),
                }
            }
            EntryKind::GroupHeader(header) => {
                let path = header.path.clone();
                self.group_expansion.insert(path, expanded);
            }
            EntryKind::Summary(_) => return Ok(false),
        }
        self.rebuild();
        Ok(true)
    }

    /// Expands every node and group.
    pub fn expand_all(&mut self) {
        self.set_all_expanded(true);
    }

    /// Collapses every node and group.
    pub fn collapse_all(&mut self) {
        self.set_all_expanded(false);
    }

    fn set_all_expanded(&mut self, expanded: bool) {
        for node in self.store.nodes_mut() {
            if node.has_children() {
                node.is_expanded = expanded;
            }
        }
        self.group_expansion.clear();
        self.expansion_override = Some(expanded);
        self.rebuild();
    }

    /// Expands every ancestor of `node` (and its group chain) so it becomes
    /// visible. Returns its row index, or `None` if the filter excludes it.
    pub fn expand_to(&mut self, node: NodeId) -> Option<usize> {
        self.store.node(node)?;
        let ancestors = self.store.ancestors(node);
        for &a in &ancestors {
            if let Some(n) = self.store.node_mut(a) {
                n.is_expanded = true;
            }
        }

        let root = ancestors.last().copied().unwrap_or(node);
        if !self.groups.is_empty() {
            self.expand_group_chain(root);
        }
        self.rebuild();
        self.visible_index_of(node)
    }

    fn expand_group_chain(&mut self, root: NodeId) {
        let item = Arc::clone(self.store.get(root).item());
        let values = self.options.value_provider.as_deref();
        let mut path = GroupPath::root();
        for (level, descriptor) in self.groups.iter().enumerate() {
            let key = descriptor.resolve_key(&item, level, values);
            path = path.child(level, &key.normalized());
            self.group_expansion.insert(path.clone(), true);
        }
    }

    /// Exports group expansion by path and node expansion by identity key.
    pub fn view_state(&self) -> ViewState {
        let mut groups = self.group_expansion.clone();
        for g in self.group_tree.iter() {
            groups.insert(g.path.clone(), g.is_expanded);
        }
        let mut group_expansion: Vec<_> = groups.into_iter().collect();
        group_expansion.sort();

        let mut node_expansion: Vec<_> = self.store.expansion_by_key().into_iter().collect();
        node_expansion.sort();

        ViewState {
            group_expansion,
            node_expansion,
        }
    }

    pub fn restore_view_state(&mut self, state: &ViewState) {
        self.group_expansion = state.group_expansion.iter().cloned().collect();
        self.expansion_override = None;

        let by_key: HashMap<String, bool> = state.node_expansion.iter().cloned().collect();
        if self.filter.is_some() {
            // Lands in the saved state; the filter's own expansion stays in charge.
            for node in self.store.nodes_mut() {
                if let Some(expanded) = node.key.as_ref().and_then(|k| by_key.get(k)) {
                    node.saved_expansion = Some(*expanded);
                }
            }
        } else {
            self.store.apply_expansion_by_key(&by_key);
        }
        self.rebuild();
    }

    fn apply_sort(&mut self) {
        match &self.comparator {
            Some(cmp) => {
                let cmp = Arc::clone(cmp);
                self.store.sort_siblings(|a, b| cmp(a.item().as_ref(), b.item().as_ref()));
            }
            None => self
                .store
                .sort_siblings(|a, b| a.original_index.cmp(&b.original_index)),
        }
    }

    /// Recomputes match flags bottom-up, capturing pre-filter expansion on
    /// first use and restoring it when the filter is cleared.
    fn apply_filter(&mut self) {
        let Some(filter) = self.filter.clone() else {
            for node in self.store.nodes_mut() {
                if let Some(saved) = node.saved_expansion.take() {
                    node.is_expanded = saved;
                }
            }
            self.store.refresh_unfiltered_flags();
            return;
        };

        for node in self.store.nodes_mut() {
            let saved = *node.saved_expansion.get_or_insert(node.is_expanded);
            node.is_match = filter(node.item.as_ref());
            node.has_visible_children = false;
            node.is_expanded = saved;
        }
        // Pre-order arena: every child sits after its parent.
        for id in self.store.ids().rev() {
            let node = self.store.get(id);
            if node.is_filter_included() {
                if let Some(parent) = node.parent {
                    self.store.get_mut(parent).has_visible_children = true;
                }
            }
        }
        if self.expand_matches {
            for node in self.store.nodes_mut() {
                if node.has_visible_children {
                    node.is_expanded = true;
                }
            }
        }
        vdebug!(expand_matches = self.expand_matches, "Projector::apply_filter");
    }

    fn rebuild(&mut self) {
        // Uncancellable passes always complete.
        let _ = self.try_rebuild(&|| false);
    }

    fn try_rebuild(&mut self, is_cancelled: &dyn Fn() -> bool) -> Result<()> {
        let values = self.options.value_provider.as_deref();
        let tree = if self.groups.is_empty() {
            GroupTree::default()
        } else {
            let seed = ExpansionSeed {
                persisted: &self.group_expansion,
                override_all: self.expansion_override,
                default_expanded: self.options.groups_expanded_by_default,
            };
            let mut builder = GroupBuilder::new(&self.groups, values, seed, self.group_tree.clone());
            for &root in self.store.roots() {
                if self.store.get(root).is_filter_included() {
                    builder.add(&self.store, root);
                }
            }
            builder.finish(&self.group_ranks)
        };

        let emitter = Emitter {
            store: &self.store,
            tree: &tree,
            groups: &self.groups,
            aggregates: &self.aggregates,
            values,
            cache: &mut self.aggregate_cache,
            is_cancelled,
            out: Vec::with_capacity(self.entries.len()),
            steps: 0,
        };

        match emitter.run() {
            Ok(entries) => {
                self.node_rows = entries
                    .iter()
                    .enumerate()
                    .filter_map(|(i, e)| e.node_id().map(|id| (id, i)))
                    .collect();
                self.entries = Arc::from(entries);
                self.group_tree = tree;
                self.generation += 1;
                vtrace!(
                    rows = self.entries.len(),
                    groups = self.group_tree.len(),
                    generation = self.generation,
                    "Projector: published"
                );
                Ok(())
            }
            Err(err) => {
                vdebug!("Projector: rebuild cancelled, keeping previous rows");
                Err(err)
            }
        }
    }
}

impl<T> core::fmt::Debug for Projector<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Projector")
            .field("store", &self.store)
            .field("rows", &self.entries.len())
            .field("groups", &self.groups.len())
            .field("aggregates", &self.aggregates.len())
            .field("filtered", &self.filter.is_some())
            .field("sorted", &self.comparator.is_some())
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}
