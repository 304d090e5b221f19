use std::cmp::Ordering;
use std::sync::Arc;

use crate::{SortDirection, ValueProvider};

/// Sibling comparator. Applied within each sibling list, never across levels.
pub type CompareFn<T> = Arc<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

/// Filter predicate. `true` means the item matches.
pub type FilterFn<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// One column of a multi-column sort.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SortDescription {
    pub column: String,
    pub direction: SortDirection,
}

impl SortDescription {
    pub fn ascending(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: SortDirection::Ascending,
        }
    }

    pub fn descending(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: SortDirection::Descending,
        }
    }
}

/// Builds a comparator that walks `columns` in order until one differs.
///
/// Returns `None` for an empty list, which callers treat as "original order".
pub fn column_comparator<T: 'static>(
    columns: &[SortDescription],
    values: Arc<dyn ValueProvider<T>>,
) -> Option<CompareFn<T>> {
    if columns.is_empty() {
        return None;
    }
    let columns = columns.to_vec();
    Some(Arc::new(move |a: &T, b: &T| {
        for c in &columns {
            let ord = values
                .get_value(a, &c.column)
                .compare(&values.get_value(b, &c.column));
            if ord != Ordering::Equal {
                return c.direction.apply(ord);
            }
        }
        Ordering::Equal
    }))
}
