use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use crate::node::NodeStore;
use crate::value::format_count;
use crate::{GroupPath, NodeId, SortDirection, Value, ValueProvider};

pub type KeySelector<T> = Arc<dyn Fn(&T) -> Value + Send + Sync>;
pub type HeaderFormatter = Arc<dyn Fn(&Value, usize) -> String + Send + Sync>;
pub type KeyComparer = Arc<dyn Fn(&Value, &Value) -> Ordering + Send + Sync>;

/// Pluggable grouping strategy. Takes priority over key selectors and columns.
pub trait GroupAdapter<T>: Send + Sync {
    fn group_key(&self, item: &T, level: usize) -> Value;

    /// A custom header label. `None` falls back to the descriptor's formatter.
    fn label(&self, _key: &Value, _item_count: usize) -> Option<String> {
        None
    }
}

/// One grouping level.
pub struct GroupDescriptor<T> {
    pub column: Option<String>,
    pub key_selector: Option<KeySelector<T>>,
    pub adapter: Option<Arc<dyn GroupAdapter<T>>>,
    pub header_formatter: Option<HeaderFormatter>,
    pub direction: SortDirection,
    pub comparer: Option<KeyComparer>,
    /// Initial expansion for groups at this level without a persisted state.
    pub expanded_by_default: Option<bool>,
}

impl<T> Clone for GroupDescriptor<T> {
    fn clone(&self) -> Self {
        Self {
            column: self.column.clone(),
            key_selector: self.key_selector.clone(),
            adapter: self.adapter.clone(),
            header_formatter: self.header_formatter.clone(),
            direction: self.direction,
            comparer: self.comparer.clone(),
            expanded_by_default: self.expanded_by_default,
        }
    }
}

impl<T> Default for GroupDescriptor<T> {
    fn default() -> Self {
        Self {
            column: None,
            key_selector: None,
            adapter: None,
            header_formatter: None,
            direction: SortDirection::Ascending,
            comparer: None,
            expanded_by_default: None,
        }
    }
}

impl<T> GroupDescriptor<T> {
    /// Groups by a column resolved through the projector's value provider.
    pub fn by_column(column: impl Into<String>) -> Self {
        Self {
            column: Some(column.into()),
            ..Self::default()
        }
    }

    pub fn by_key(selector: impl Fn(&T) -> Value + Send + Sync + 'static) -> Self {
        Self {
            key_selector: Some(Arc::new(selector)),
            ..Self::default()
        }
    }

    pub fn by_adapter(adapter: impl GroupAdapter<T> + 'static) -> Self {
        Self {
            adapter: Some(Arc::new(adapter)),
            ..Self::default()
        }
    }

    pub fn with_direction(mut self, direction: SortDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_comparer(
        mut self,
        comparer: impl Fn(&Value, &Value) -> Ordering + Send + Sync + 'static,
    ) -> Self {
        self.comparer = Some(Arc::new(comparer));
        self
    }

    pub fn with_header_formatter(
        mut self,
        formatter: impl Fn(&Value, usize) -> String + Send + Sync + 'static,
    ) -> Self {
        self.header_formatter = Some(Arc::new(formatter));
        self
    }

    pub fn with_expanded(mut self, expanded: bool) -> Self {
        self.expanded_by_default = Some(expanded);
        self
    }

    /// Adapter, then key selector, then column lookup (or the item itself).
    pub fn resolve_key(
        &self,
        item: &T,
        level: usize,
        values: Option<&dyn ValueProvider<T>>,
    ) -> Value {
        if let Some(adapter) = &self.adapter {
            return adapter.group_key(item, level);
        }
        if let Some(selector) = &self.key_selector {
            return selector(item);
        }
        match (values, &self.column) {
            (Some(v), Some(column)) => v.get_value(item, column),
            (Some(v), None) => v.item_value(item),
            (None, _) => Value::Null,
        }
    }

    pub fn compare_keys(&self, a: &Value, b: &Value) -> Ordering {
        let ordering = match &self.comparer {
            Some(cmp) => cmp(a, b),
            None => a.compare(b),
        };
        self.direction.apply(ordering)
    }

    /// Adapter label, then header formatter, then `"{key} ({count:N0})"`.
    pub fn header(&self, key: &Value, item_count: usize) -> String {
        if let Some(label) = self.adapter.as_ref().and_then(|a| a.label(key, item_count)) {
            return label;
        }
        if let Some(f) = &self.header_formatter {
            return f(key, item_count);
        }
        format!("{key} ({})", format_count(item_count))
    }
}

impl<T> core::fmt::Debug for GroupDescriptor<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GroupDescriptor")
            .field("column", &self.column)
            .field("direction", &self.direction)
            .field("expanded_by_default", &self.expanded_by_default)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GroupId(usize);

/// One grouping bucket, rebuilt with every projection.
#[derive(Clone, Debug)]
pub struct GroupView {
    pub path: GroupPath,
    pub depth: usize,
    pub descriptor: usize,
    pub key: Value,
    pub parent: Option<GroupId>,
    pub children: Vec<GroupId>,
    /// Items assigned directly to this group, in display order.
    pub leaves: Vec<NodeId>,
    pub is_expanded: bool,
    pub item_count: usize,
}

impl GroupView {
    fn reset(&mut self, depth: usize, descriptor: usize, key: Value, parent: Option<GroupId>) {
        self.depth = depth;
        self.descriptor = descriptor;
        self.key = key;
        self.parent = parent;
        self.children.clear();
        self.leaves.clear();
        self.item_count = 0;
    }
}

/// The group hierarchy of one projection pass.
#[derive(Clone, Debug, Default)]
pub struct GroupTree {
    groups: Vec<GroupView>,
    roots: Vec<GroupId>,
    by_path: HashMap<GroupPath, GroupId>,
    leaf_group: HashMap<NodeId, GroupId>,
}

impl GroupTree {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn roots(&self) -> &[GroupId] {
        &self.roots
    }

    pub fn get(&self, id: GroupId) -> &GroupView {
        &self.groups[id.0]
    }

    pub fn find(&self, path: &GroupPath) -> Option<&GroupView> {
        self.by_path.get(path).map(|id| &self.groups[id.0])
    }

    /// The group an item was placed in.
    pub fn group_of(&self, node: NodeId) -> Option<&GroupView> {
        self.leaf_group.get(&node).map(|id| &self.groups[id.0])
    }

    pub fn iter(&self) -> impl Iterator<Item = &GroupView> {
        self.groups.iter()
    }

    /// Every item under `id`, across nested levels, in display order.
    pub(crate) fn collect_leaves(&self, id: GroupId, out: &mut Vec<NodeId>) {
        let g = &self.groups[id.0];
        for &c in &g.children {
            self.collect_leaves(c, out);
        }
        out.extend_from_slice(&g.leaves);
    }

    fn into_pool(self) -> HashMap<GroupPath, GroupView> {
        self.groups.into_iter().map(|g| (g.path.clone(), g)).collect()
    }
}

/// Seeds a group's expansion: persisted state, then an `expand_all`/`collapse_all`
/// override, then the descriptor default, then the global default.
pub(crate) struct ExpansionSeed<'a> {
    pub persisted: &'a HashMap<GroupPath, bool>,
    pub override_all: Option<bool>,
    pub default_expanded: bool,
}

impl ExpansionSeed<'_> {
    fn resolve<T>(&self, path: &GroupPath, descriptor: &GroupDescriptor<T>) -> bool {
        self.persisted
            .get(path)
            .copied()
            .or(self.override_all)
            .or(descriptor.expanded_by_default)
            .unwrap_or(self.default_expanded)
    }
}

pub(crate) struct GroupBuilder<'a, T> {
    descriptors: &'a [GroupDescriptor<T>],
    values: Option<&'a dyn ValueProvider<T>>,
    seed: ExpansionSeed<'a>,
    pool: HashMap<GroupPath, GroupView>,
    tree: GroupTree,
}

impl<'a, T> GroupBuilder<'a, T> {
    /// Groups whose path also existed in `previous` are recycled rather than
    /// allocated again.
    pub(crate) fn new(
        descriptors: &'a [GroupDescriptor<T>],
        values: Option<&'a dyn ValueProvider<T>>,
        seed: ExpansionSeed<'a>,
        previous: GroupTree,
    ) -> Self {
        Self {
            descriptors,
            values,
            seed,
            pool: previous.into_pool(),
            tree: GroupTree::default(),
        }
    }

    pub(crate) fn add(&mut self, store: &NodeStore<T>, node: NodeId) {
        let item = store.get(node).item();
        let mut parent: Option<GroupId> = None;
        let mut parent_path = GroupPath::root();
        let descriptors = self.descriptors;

        for (level, descriptor) in descriptors.iter().enumerate() {
            if let Some(p) = parent {
                if !self.tree.groups[p.0].is_expanded {
                    // A collapsed group takes its items directly; deeper levels are skipped.
                    break;
                }
            }
            let key = descriptor.resolve_key(item, level, self.values);
            let path = parent_path.child(level, &key.normalized());
            let id = match self.tree.by_path.get(&path) {
                Some(id) => *id,
                None => self.insert_group(path.clone(), level, key, parent),
            };
            self.tree.groups[id.0].item_count += 1;
            parent = Some(id);
            parent_path = path;
        }

        if let Some(p) = parent {
            self.tree.groups[p.0].leaves.push(node);
            self.tree.leaf_group.insert(node, p);
        }
    }

    fn insert_group(
        &mut self,
        path: GroupPath,
        level: usize,
        key: Value,
        parent: Option<GroupId>,
    ) -> GroupId {
        let descriptors = self.descriptors;
        let descriptor = &descriptors[level];
        let is_expanded = self.seed.resolve(&path, descriptor);
        let view = match self.pool.remove(&path) {
            Some(mut view) => {
                view.reset(level, level, key, parent);
                view.is_expanded = is_expanded;
                view
            }
            None => GroupView {
                path: path.clone(),
                depth: level,
                descriptor: level,
                key,
                parent,
                children: Vec::new(),
                leaves: Vec::new(),
                is_expanded,
                item_count: 0,
            },
        };

        let id = GroupId(self.tree.groups.len());
        let groups = &self.tree.groups;
        let siblings = match parent {
            Some(p) => &self.tree.groups[p.0].children,
            None => &self.tree.roots,
        };
        // After existing equal keys, so ties keep first-seen order.
        let at = siblings.partition_point(|s| {
            descriptor.compare_keys(&groups[s.0].key, &view.key) != Ordering::Greater
        });
        self.tree.by_path.insert(path, id);
        self.tree.groups.push(view);
        match parent {
            Some(p) => self.tree.groups[p.0].children.insert(at, id),
            None => self.tree.roots.insert(at, id),
        }
        id
    }

    /// Applies manual sibling order recorded by group reorders.
    pub(crate) fn finish(mut self, ranks: &HashMap<GroupPath, usize>) -> GroupTree {
        if !ranks.is_empty() {
            let rank_of = |groups: &[GroupView], id: &GroupId| {
                ranks.get(&groups[id.0].path).copied().unwrap_or(usize::MAX)
            };
            let mut roots = std::mem::take(&mut self.tree.roots);
            roots.sort_by_key(|id| rank_of(&self.tree.groups, id));
            self.tree.roots = roots;
            for i in 0..self.tree.groups.len() {
                let mut children = std::mem::take(&mut self.tree.groups[i].children);
                children.sort_by_key(|id| rank_of(&self.tree.groups, id));
                self.tree.groups[i].children = children;
            }
        }
        self.tree
    }
}
