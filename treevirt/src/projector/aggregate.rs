use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::{AggregatePlacement, GroupPath, Value, ValueProvider};

static NEXT_AGGREGATE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one aggregate descriptor instance.
///
/// Clones share the id; two descriptors built separately never do, even when
/// they are configured identically.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AggregateId(u64);

impl AggregateId {
    fn next() -> Self {
        Self(NEXT_AGGREGATE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Everything an aggregate provider may look at for one summary cell.
pub struct AggregateContext<'a, T> {
    /// `None` for the grid footer.
    pub path: Option<&'a GroupPath>,
    pub level: usize,
    pub key: Option<&'a Value>,
    pub rows: &'a [Arc<T>],
    pub placement: AggregatePlacement,
    pub column: Option<&'a str>,
    pub values: Option<&'a dyn ValueProvider<T>>,
}

impl<T> AggregateContext<'_, T> {
    /// Column values of every row, when both a column and a value provider exist.
    pub fn column_values(&self) -> Vec<Value> {
        match (self.values, self.column) {
            (Some(v), Some(column)) => self.rows.iter().map(|r| v.get_value(r, column)).collect(),
            _ => Vec::new(),
        }
    }
}

pub trait AggregateProvider<T>: Send + Sync {
    fn aggregate(&self, ctx: &AggregateContext<'_, T>) -> Value;
}

/// Built-in column aggregates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AggregateKind {
    Count,
    Sum,
    Average,
    Min,
    Max,
}

impl<T> AggregateProvider<T> for AggregateKind {
    fn aggregate(&self, ctx: &AggregateContext<'_, T>) -> Value {
        if *self == Self::Count {
            return Value::from(ctx.rows.len());
        }
        let values = ctx.column_values();
        let numbers: Vec<f64> = values.iter().filter_map(Value::as_f64).collect();
        match self {
            Self::Count => Value::from(ctx.rows.len()),
            Self::Sum => {
                if values.iter().all(|v| matches!(v, Value::Int(_))) {
                    Value::Int(values.iter().filter_map(|v| match v {
                        Value::Int(i) => Some(*i),
                        _ => None,
                    }).fold(0i64, i64::saturating_add))
                } else {
                    Value::Float(numbers.iter().sum())
                }
            }
            Self::Average => {
                if numbers.is_empty() {
                    Value::Null
                } else {
                    Value::Float(numbers.iter().sum::<f64>() / numbers.len() as f64)
                }
            }
            Self::Min => values.into_iter().filter(|v| !v.is_null()).min().unwrap_or_default(),
            Self::Max => values.into_iter().filter(|v| !v.is_null()).max().unwrap_or_default(),
        }
    }
}

pub type RowsAggregateFn<T> = Arc<dyn Fn(&[Arc<T>]) -> Value + Send + Sync>;
pub type AggregateFormatter = Arc<dyn Fn(&Value) -> String + Send + Sync>;

pub enum AggregateSource<T> {
    Provider(Arc<dyn AggregateProvider<T>>),
    Rows(RowsAggregateFn<T>),
}

impl<T> Clone for AggregateSource<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Provider(p) => Self::Provider(Arc::clone(p)),
            Self::Rows(f) => Self::Rows(Arc::clone(f)),
        }
    }
}

pub struct AggregateDescriptor<T> {
    id: AggregateId,
    pub column: Option<String>,
    pub placement: AggregatePlacement,
    pub source: AggregateSource<T>,
    pub formatter: Option<AggregateFormatter>,
}

impl<T> Clone for AggregateDescriptor<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            column: self.column.clone(),
            placement: self.placement,
            source: self.source.clone(),
            formatter: self.formatter.clone(),
        }
    }
}

impl<T> AggregateDescriptor<T> {
    pub fn new(placement: AggregatePlacement, source: AggregateSource<T>) -> Self {
        Self {
            id: AggregateId::next(),
            column: None,
            placement,
            source,
            formatter: None,
        }
    }

    pub fn from_rows(
        placement: AggregatePlacement,
        f: impl Fn(&[Arc<T>]) -> Value + Send + Sync + 'static,
    ) -> Self {
        Self::new(placement, AggregateSource::Rows(Arc::new(f)))
    }

    pub fn from_provider(
        placement: AggregatePlacement,
        provider: impl AggregateProvider<T> + 'static,
    ) -> Self {
        Self::new(placement, AggregateSource::Provider(Arc::new(provider)))
    }

    /// A built-in aggregate over `column`.
    pub fn column(placement: AggregatePlacement, column: impl Into<String>, kind: AggregateKind) -> Self
    where
        T: 'static,
    {
        Self::from_provider(placement, kind).with_column(column)
    }

    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    pub fn with_formatter(mut self, f: impl Fn(&Value) -> String + Send + Sync + 'static) -> Self {
        self.formatter = Some(Arc::new(f));
        self
    }

    pub fn id(&self) -> AggregateId {
        self.id
    }

    pub(crate) fn evaluate(&self, ctx: &AggregateContext<'_, T>) -> Value {
        match &self.source {
            AggregateSource::Provider(p) => p.aggregate(ctx),
            AggregateSource::Rows(f) => f(ctx.rows),
        }
    }

    pub(crate) fn format(&self, value: &Value) -> String {
        match &self.formatter {
            Some(f) => f(value),
            None => value.to_string(),
        }
    }
}

impl<T> core::fmt::Debug for AggregateDescriptor<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AggregateDescriptor")
            .field("id", &self.id)
            .field("column", &self.column)
            .field("placement", &self.placement)
            .finish_non_exhaustive()
    }
}

type CacheKey = (AggregateId, Option<GroupPath>, AggregatePlacement);

/// Aggregate results per (descriptor, group path, placement).
///
/// Survives expansion-only rebuilds; cleared when filter, sort, grouping or
/// data change.
#[derive(Clone, Debug, Default)]
pub(crate) struct AggregateCache {
    entries: HashMap<CacheKey, (Value, String)>,
    evaluations: u64,
}

impl AggregateCache {
    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn evaluations(&self) -> u64 {
        self.evaluations
    }

    pub(crate) fn get_or_compute<T>(
        &mut self,
        descriptor: &AggregateDescriptor<T>,
        path: Option<&GroupPath>,
        placement: AggregatePlacement,
        compute: impl FnOnce() -> Value,
    ) -> (Value, String) {
        let key = (descriptor.id, path.cloned(), placement);
        if let Some(hit) = self.entries.get(&key) {
            return hit.clone();
        }
        let value = compute();
        let text = descriptor.format(&value);
        self.evaluations += 1;
        self.entries.insert(key, (value.clone(), text.clone()));
        (value, text)
    }
}
