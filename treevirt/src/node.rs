//! Arena-backed storage for the hierarchical item tree.
//!
//! Nodes live in one `Vec` in depth-first (pre-order) build order, so a node's
//! arena slot is always greater than its parent's. Children are owned through
//! the parent's child list; the parent link is a plain index.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};

/// Returns the children of an item. Must describe a finite tree.
pub type ChildrenFn<T> = Arc<dyn Fn(&T) -> Vec<T> + Send + Sync>;

/// Returns a stable identity for an item, used to carry state across resets.
pub type KeyFn<T> = Arc<dyn Fn(&T) -> String + Send + Sync>;

pub const DEFAULT_MAX_DEPTH: usize = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug)]
pub struct TreeNode<T> {
    pub(crate) item: Arc<T>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) level: usize,
    pub(crate) original_index: usize,
    pub(crate) key: Option<String>,
    pub(crate) is_expanded: bool,
    pub(crate) is_match: bool,
    pub(crate) has_visible_children: bool,
    /// Expansion captured when a filter was first applied.
    pub(crate) saved_expansion: Option<bool>,
}

impl<T> TreeNode<T> {
    pub fn item(&self) -> &Arc<T> {
        &self.item
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn original_index(&self) -> usize {
        self.original_index
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn is_expanded(&self) -> bool {
        self.is_expanded
    }

    pub fn is_match(&self) -> bool {
        self.is_match
    }

    /// Whether any descendant matches the active filter.
    pub fn has_visible_children(&self) -> bool {
        self.has_visible_children
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    /// Matches the filter itself or leads to a descendant that does.
    pub fn is_filter_included(&self) -> bool {
        self.is_match || self.has_visible_children
    }
}

/// Sibling order and display flags of every node, without the items.
pub(crate) struct DisplayState {
    roots: Vec<NodeId>,
    nodes: Vec<NodeDisplay>,
}

struct NodeDisplay {
    children: Vec<NodeId>,
    is_expanded: bool,
    is_match: bool,
    has_visible_children: bool,
    saved_expansion: Option<bool>,
}

/// Owns the item tree in original insertion order, independent of display state.
pub struct NodeStore<T> {
    nodes: Vec<TreeNode<T>>,
    roots: Vec<NodeId>,
    children_of: ChildrenFn<T>,
    key_of: Option<KeyFn<T>>,
    by_key: HashMap<String, NodeId>,
    expanded_by_default: bool,
    max_depth: usize,
}

impl<T> NodeStore<T> {
    pub fn new(children_of: impl Fn(&T) -> Vec<T> + Send + Sync + 'static) -> Self {
        Self::with_children_fn(Arc::new(children_of))
    }

    /// Like [`NodeStore::new`], sharing an existing callback.
    pub fn with_children_fn(children_of: ChildrenFn<T>) -> Self {
        Self {
            nodes: Vec::new(),
            roots: Vec::new(),
            children_of,
            key_of: None,
            by_key: HashMap::new(),
            expanded_by_default: false,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// A store for flat data: every item is a root without children.
    pub fn flat() -> Self {
        Self::new(|_| Vec::new())
    }

    pub fn with_key(mut self, key_of: impl Fn(&T) -> String + Send + Sync + 'static) -> Self {
        self.key_of = Some(Arc::new(key_of));
        self
    }

    pub fn with_key_fn(mut self, key_of: Option<KeyFn<T>>) -> Self {
        self.key_of = key_of;
        self
    }

    pub fn with_expanded_by_default(mut self, expanded: bool) -> Self {
        self.expanded_by_default = expanded;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.max(1);
        self
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn node(&self, id: NodeId) -> Option<&TreeNode<T>> {
        self.nodes.get(id.0)
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut TreeNode<T>> {
        self.nodes.get_mut(id.0)
    }

    pub(crate) fn get(&self, id: NodeId) -> &TreeNode<T> {
        &self.nodes[id.0]
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> &mut TreeNode<T> {
        &mut self.nodes[id.0]
    }

    pub fn ids(&self) -> impl DoubleEndedIterator<Item = NodeId> + ExactSizeIterator + use<T> {
        (0..self.nodes.len()).map(NodeId)
    }

    pub fn find_by_key(&self, key: &str) -> Option<NodeId> {
        self.by_key.get(key).copied()
    }

    pub fn has_key_fn(&self) -> bool {
        self.key_of.is_some()
    }

    /// Ancestors from the immediate parent up to the root.
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut cur = self.node(id).and_then(|n| n.parent);
        while let Some(p) = cur {
            out.push(p);
            cur = self.nodes[p.0].parent;
        }
        out
    }

    /// The sibling list that owns `id`: the parent's children, or the roots.
    pub(crate) fn siblings_of(&self, parent: Option<NodeId>) -> &[NodeId] {
        match parent {
            Some(p) => &self.nodes[p.0].children,
            None => &self.roots,
        }
    }

    pub(crate) fn siblings_mut(&mut self, parent: Option<NodeId>) -> &mut Vec<NodeId> {
        match parent {
            Some(p) => &mut self.nodes[p.0].children,
            None => &mut self.roots,
        }
    }

    /// Builds the tree depth-first, assigning original indices in traversal order.
    ///
    /// The new tree is assembled on the side; on error the store keeps its
    /// previous contents.
    pub fn build(&mut self, items: impl IntoIterator<Item = T>) -> Result<()> {
        let mut nodes: Vec<TreeNode<T>> = Vec::new();
        let mut roots: Vec<NodeId> = Vec::new();
        let mut by_key: HashMap<String, NodeId> = HashMap::new();

        // (item, parent, level); pushed in reverse so pops follow source order.
        let mut stack: Vec<(T, Option<NodeId>, usize)> = Vec::new();
        let mut pending: Vec<T> = items.into_iter().collect();
        pending.reverse();
        stack.extend(pending.into_iter().map(|item| (item, None, 0)));

        while let Some((item, parent, level)) = stack.pop() {
            if level >= self.max_depth {
                vwarn!(limit = self.max_depth, "NodeStore::build: depth limit exceeded");
                return Err(Error::DepthLimitExceeded {
                    limit: self.max_depth,
                });
            }

            let id = NodeId(nodes.len());
            let mut children = (self.children_of)(&item);
            let key = self.key_of.as_ref().map(|f| f(&item));
            if let Some(k) = &key {
                // First node wins when keys collide.
                by_key.entry(k.clone()).or_insert(id);
            }

            nodes.push(TreeNode {
                item: Arc::new(item),
                parent,
                children: Vec::with_capacity(children.len()),
                level,
                original_index: id.0,
                key,
                is_expanded: self.expanded_by_default,
                is_match: true,
                has_visible_children: false,
                saved_expansion: None,
            });
            match parent {
                Some(p) => nodes[p.0].children.push(id),
                None => roots.push(id),
            }

            children.reverse();
            stack.extend(children.into_iter().map(|c| (c, Some(id), level + 1)));
        }

        self.nodes = nodes;
        self.roots = roots;
        self.by_key = by_key;
        self.refresh_unfiltered_flags();
        vdebug!(nodes = self.nodes.len(), roots = self.roots.len(), "NodeStore::build");
        Ok(())
    }

    /// Rebuilds from scratch, optionally carrying expansion across by identity key.
    ///
    /// Nodes whose key no longer exists simply start from the default state.
    pub fn reset(&mut self, items: impl IntoIterator<Item = T>, preserve_expansion: bool) -> Result<()> {
        let snapshot = if preserve_expansion && self.key_of.is_some() {
            self.expansion_by_key()
        } else {
            HashMap::new()
        };

        self.build(items)?;

        if !snapshot.is_empty() {
            self.apply_expansion_by_key(&snapshot);
        }
        Ok(())
    }

    pub(crate) fn expansion_by_key(&self) -> HashMap<String, bool> {
        self.nodes
            .iter()
            .filter_map(|n| {
                // While filtered, the user's own state is the saved one.
                let expanded = n.saved_expansion.unwrap_or(n.is_expanded);
                n.key.clone().map(|k| (k, expanded))
            })
            .collect()
    }

    pub(crate) fn apply_expansion_by_key(&mut self, expansion: &HashMap<String, bool>) {
        for node in &mut self.nodes {
            if let Some(expanded) = node.key.as_ref().and_then(|k| expansion.get(k)) {
                node.is_expanded = *expanded;
            }
        }
    }

    /// Stable-sorts every sibling list, the roots included.
    pub(crate) fn sort_siblings(&mut self, cmp: impl Fn(&TreeNode<T>, &TreeNode<T>) -> Ordering) {
        let mut roots = std::mem::take(&mut self.roots);
        roots.sort_by(|a, b| cmp(&self.nodes[a.0], &self.nodes[b.0]));
        self.roots = roots;
        for i in 0..self.nodes.len() {
            if self.nodes[i].children.len() < 2 {
                continue;
            }
            let mut children = std::mem::take(&mut self.nodes[i].children);
            children.sort_by(|a, b| cmp(&self.nodes[a.0], &self.nodes[b.0]));
            self.nodes[i].children = children;
        }
    }

    pub(crate) fn nodes_mut(&mut self) -> impl Iterator<Item = &mut TreeNode<T>> {
        self.nodes.iter_mut()
    }

    /// Copies sibling order and the per-node display flags.
    pub(crate) fn display_state(&self) -> DisplayState {
        DisplayState {
            roots: self.roots.clone(),
            nodes: self
                .nodes
                .iter()
                .map(|n| NodeDisplay {
                    children: n.children.clone(),
                    is_expanded: n.is_expanded,
                    is_match: n.is_match,
                    has_visible_children: n.has_visible_children,
                    saved_expansion: n.saved_expansion,
                })
                .collect(),
        }
    }

    /// Puts back a [`DisplayState`] taken from this same tree.
    pub(crate) fn restore_display_state(&mut self, state: DisplayState) {
        debug_assert_eq!(state.nodes.len(), self.nodes.len());
        self.roots = state.roots;
        for (node, saved) in self.nodes.iter_mut().zip(state.nodes) {
            node.children = saved.children;
            node.is_expanded = saved.is_expanded;
            node.is_match = saved.is_match;
            node.has_visible_children = saved.has_visible_children;
            node.saved_expansion = saved.saved_expansion;
        }
    }

    /// Resets match/visible-children flags to the "no filter" state.
    pub(crate) fn refresh_unfiltered_flags(&mut self) {
        for node in &mut self.nodes {
            node.is_match = true;
            node.has_visible_children = !node.children.is_empty();
        }
    }
}

impl<T> core::fmt::Debug for NodeStore<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NodeStore")
            .field("nodes", &self.nodes.len())
            .field("roots", &self.roots.len())
            .field("keys", &self.by_key.len())
            .field("expanded_by_default", &self.expanded_by_default)
            .field("max_depth", &self.max_depth)
            .finish_non_exhaustive()
    }
}
