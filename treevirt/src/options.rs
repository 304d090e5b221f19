use std::sync::Arc;

use crate::node::{ChildrenFn, DEFAULT_MAX_DEPTH, KeyFn, NodeStore};
use crate::ValueProvider;

/// Configuration for a [`crate::Projector`].
///
/// Cloning is cheap: callbacks are shared behind `Arc`s.
pub struct ProjectorOptions<T> {
    /// Returns the children of an item. Must describe a finite tree.
    pub children_of: ChildrenFn<T>,

    /// Identity key used to carry expansion state across resets and view-state imports.
    pub key_of: Option<KeyFn<T>>,

    /// Resolves column-keyed group keys, column sorts and column aggregates.
    pub value_provider: Option<Arc<dyn ValueProvider<T>>>,

    /// Initial expansion of freshly built nodes.
    pub nodes_expanded_by_default: bool,

    /// Expansion of a group with no persisted state and no descriptor default.
    pub groups_expanded_by_default: bool,

    /// Whether ancestors of filter matches are expanded until a filter call
    /// says otherwise.
    pub expand_matches_by_default: bool,

    /// Whether group headers may be drag-reordered among their siblings.
    pub allow_group_reorder: bool,

    /// Build depth ceiling. Exceeding it fails the build with
    /// [`crate::Error::DepthLimitExceeded`].
    pub max_depth: usize,
}

impl<T> ProjectorOptions<T> {
    pub fn new(children_of: impl Fn(&T) -> Vec<T> + Send + Sync + 'static) -> Self {
        Self {
            children_of: Arc::new(children_of),
            key_of: None,
            value_provider: None,
            nodes_expanded_by_default: false,
            groups_expanded_by_default: true,
            expand_matches_by_default: true,
            allow_group_reorder: false,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Options for flat data: every item is a root without children.
    pub fn flat() -> Self {
        Self::new(|_| Vec::new())
    }

    pub fn with_key(mut self, key_of: impl Fn(&T) -> String + Send + Sync + 'static) -> Self {
        self.key_of = Some(Arc::new(key_of));
        self
    }

    pub fn with_value_provider(mut self, provider: impl ValueProvider<T> + 'static) -> Self {
        self.value_provider = Some(Arc::new(provider));
        self
    }

    pub fn with_nodes_expanded(mut self, expanded: bool) -> Self {
        self.nodes_expanded_by_default = expanded;
        self
    }

    pub fn with_groups_expanded(mut self, expanded: bool) -> Self {
        self.groups_expanded_by_default = expanded;
        self
    }

    pub fn with_expand_matches(mut self, expand: bool) -> Self {
        self.expand_matches_by_default = expand;
        self
    }

    pub fn with_group_reorder(mut self, allow: bool) -> Self {
        self.allow_group_reorder = allow;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub(crate) fn node_store(&self) -> NodeStore<T> {
        NodeStore::with_children_fn(Arc::clone(&self.children_of))
            .with_key_fn(self.key_of.clone())
            .with_expanded_by_default(self.nodes_expanded_by_default)
            .with_max_depth(self.max_depth)
    }
}

impl<T> Clone for ProjectorOptions<T> {
    fn clone(&self) -> Self {
        Self {
            children_of: Arc::clone(&self.children_of),
            key_of: self.key_of.clone(),
            value_provider: self.value_provider.clone(),
            nodes_expanded_by_default: self.nodes_expanded_by_default,
            groups_expanded_by_default: self.groups_expanded_by_default,
            expand_matches_by_default: self.expand_matches_by_default,
            allow_group_reorder: self.allow_group_reorder,
            max_depth: self.max_depth,
        }
    }
}

impl<T> core::fmt::Debug for ProjectorOptions<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProjectorOptions")
            .field("key_of", &self.key_of.is_some())
            .field("value_provider", &self.value_provider.is_some())
            .field("nodes_expanded_by_default", &self.nodes_expanded_by_default)
            .field("groups_expanded_by_default", &self.groups_expanded_by_default)
            .field("expand_matches_by_default", &self.expand_matches_by_default)
            .field("allow_group_reorder", &self.allow_group_reorder)
            .field("max_depth", &self.max_depth)
            .finish_non_exhaustive()
    }
}
