use crate::GroupPath;

/// A serializable snapshot of user-driven expansion state.
///
/// Node expansion is keyed by identity key, so only stores configured with a
/// key function contribute node entries.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ViewState {
    pub group_expansion: Vec<(GroupPath, bool)>,
    pub node_expansion: Vec<(String, bool)>,
}

impl ViewState {
    pub fn is_empty(&self) -> bool {
        self.group_expansion.is_empty() && self.node_expansion.is_empty()
    }
}
