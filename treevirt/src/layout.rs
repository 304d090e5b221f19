//! Adaptive row layout over lazily measured, variable-height rows.
//!
//! Rows are split into fixed-size chunks. Each chunk remembers the heights of
//! the rows that were actually measured and estimates the rest with the
//! running average of those measurements, so offset queries over millions of
//! rows only touch chunk totals plus one chunk's rows.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::VisibleRange;
use crate::fenwick::ChunkSums;

/// Lazily measures one row. Called at most once per row until it is invalidated.
pub type MeasureFn = Arc<dyn Fn(usize) -> u32 + Send + Sync>;

pub const DEFAULT_CHUNK_SIZE: usize = 256;
pub const DEFAULT_ROW_HEIGHT: u32 = 28;

/// Configuration for [`RowLayoutEstimator`].
#[derive(Clone)]
pub struct LayoutOptions {
    pub chunk_size: usize,
    /// Estimate for rows in chunks that have no measurements yet.
    pub default_row_height: u32,
    pub measure: Option<MeasureFn>,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            default_row_height: DEFAULT_ROW_HEIGHT,
            measure: None,
        }
    }
}

impl LayoutOptions {
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_default_row_height(mut self, height: u32) -> Self {
        self.default_row_height = height;
        self
    }

    pub fn with_measure(mut self, measure: impl Fn(usize) -> u32 + Send + Sync + 'static) -> Self {
        self.measure = Some(Arc::new(measure));
        self
    }
}

impl core::fmt::Debug for LayoutOptions {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LayoutOptions")
            .field("chunk_size", &self.chunk_size)
            .field("default_row_height", &self.default_row_height)
            .field("measure", &self.measure.is_some())
            .finish()
    }
}

/// A fixed-size run of rows with sparse measurements.
#[derive(Clone, Debug)]
pub struct RowLayoutChunk {
    start: usize,
    count: usize,
    measured: BTreeMap<usize, u32>, // local index -> height
    measured_sum: u64,
    average: u32,
}

impl RowLayoutChunk {
    fn new(start: usize, count: usize, default_height: u32) -> Self {
        Self {
            start,
            count,
            measured: BTreeMap::new(),
            measured_sum: 0,
            average: default_height.max(1),
        }
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn measured_count(&self) -> usize {
        self.measured.len()
    }

    pub fn average(&self) -> u32 {
        self.average
    }

    /// `measured_sum + unmeasured * average`.
    pub fn estimated_height(&self) -> u64 {
        let unmeasured = self.count.saturating_sub(self.measured.len()) as u64;
        self.measured_sum
            .saturating_add(unmeasured.saturating_mul(self.average as u64))
    }

    fn height_of(&self, local: usize) -> u32 {
        self.measured.get(&local).copied().unwrap_or(self.average)
    }

    fn is_measured(&self, local: usize) -> bool {
        self.measured.contains_key(&local)
    }

    fn record(&mut self, local: usize, height: u32, default_height: u32) {
        if let Some(prev) = self.measured.insert(local, height) {
            self.measured_sum = self.measured_sum.saturating_sub(prev as u64);
        }
        self.measured_sum = self.measured_sum.saturating_add(height as u64);
        self.recompute_average(default_height);
    }

    fn forget(&mut self, local: usize, default_height: u32) -> bool {
        let Some(prev) = self.measured.remove(&local) else {
            return false;
        };
        self.measured_sum = self.measured_sum.saturating_sub(prev as u64);
        self.recompute_average(default_height);
        true
    }

    fn recompute_average(&mut self, default_height: u32) {
        let n = self.measured.len() as u64;
        self.average = if n == 0 {
            default_height.max(1)
        } else {
            let rounded = (self.measured_sum + n / 2) / n;
            (rounded.min(u32::MAX as u64) as u32).max(1)
        };
    }
}

/// Answers scroll-geometry queries without measuring every row up front.
///
/// Stale indices (scroll races against a shrinking row count) are clamped
/// rather than rejected.
#[derive(Clone, Debug)]
pub struct RowLayoutEstimator {
    options: LayoutOptions,
    row_count: usize,
    chunks: Vec<RowLayoutChunk>,
    sums: ChunkSums,
}

impl RowLayoutEstimator {
    pub fn new(row_count: usize, mut options: LayoutOptions) -> Self {
        options.chunk_size = options.chunk_size.max(1);
        let mut e = Self {
            options,
            row_count,
            chunks: Vec::new(),
            sums: ChunkSums::default(),
        };
        e.rebuild_chunks(Vec::new());
        e
    }

    pub fn options(&self) -> &LayoutOptions {
        &self.options
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn chunk_size(&self) -> usize {
        self.options.chunk_size
    }

    pub fn chunks(&self) -> &[RowLayoutChunk] {
        &self.chunks
    }

    pub fn measured_count(&self) -> usize {
        self.chunks.iter().map(RowLayoutChunk::measured_count).sum()
    }

    fn rebuild_chunks(&mut self, keep: Vec<(usize, u32)>) {
        let size = self.options.chunk_size;
        let default_height = self.options.default_row_height;
        let n = self.row_count.div_ceil(size);
        self.chunks.clear();
        self.chunks.reserve_exact(n);
        for c in 0..n {
            let start = c * size;
            let count = size.min(self.row_count - start);
            self.chunks.push(RowLayoutChunk::new(start, count, default_height));
        }
        for (row, height) in keep {
            if row < self.row_count {
                self.chunks[row / size].record(row % size, height, default_height);
            }
        }
        self.sums = ChunkSums::from_values(
            self.chunks
                .iter()
                .map(RowLayoutChunk::estimated_height)
                .collect(),
        );
        vtrace!(rows = self.row_count, chunks = n, chunk_size = size, "rebuild_chunks");
    }

    fn sync_chunk(&mut self, chunk: usize) {
        let h = self.chunks[chunk].estimated_height();
        self.sums.set(chunk, h);
    }

    /// Changes the chunk size. Every cached chunk (and its measurements) is dropped.
    pub fn set_chunk_size(&mut self, chunk_size: usize) {
        let chunk_size = chunk_size.max(1);
        if chunk_size == self.options.chunk_size {
            return;
        }
        vdebug!(from = self.options.chunk_size, to = chunk_size, "set_chunk_size");
        self.options.chunk_size = chunk_size;
        self.rebuild_chunks(Vec::new());
    }

    pub fn set_default_row_height(&mut self, height: u32) {
        if self.options.default_row_height == height {
            return;
        }
        self.options.default_row_height = height;
        let keep = self.export_measurements();
        self.rebuild_chunks(keep);
    }

    pub fn set_measure(&mut self, measure: Option<MeasureFn>) {
        self.options.measure = measure;
    }

    /// Resizes the row space, keeping measurements of rows that still exist.
    pub fn set_row_count(&mut self, row_count: usize) {
        if self.row_count == row_count {
            return;
        }
        let keep = self.export_measurements();
        self.row_count = row_count;
        self.rebuild_chunks(keep);
    }

    pub fn reset_measurements(&mut self) {
        self.rebuild_chunks(Vec::new());
    }

    /// Measured heights as `(row, height)` pairs, ascending by row.
    pub fn export_measurements(&self) -> Vec<(usize, u32)> {
        self.chunks
            .iter()
            .flat_map(|c| c.measured.iter().map(|(&local, &h)| (c.start + local, h)))
            .collect()
    }

    pub fn import_measurements(&mut self, entries: impl IntoIterator<Item = (usize, u32)>) {
        let keep: Vec<_> = entries.into_iter().collect();
        vdebug!(entries = keep.len(), "import_measurements");
        self.rebuild_chunks(keep);
    }

    fn locate(&self, row: usize) -> (usize, usize) {
        let size = self.options.chunk_size;
        (row / size, row % size)
    }

    fn clamp_row(&self, row: usize) -> Option<usize> {
        if self.row_count == 0 {
            None
        } else {
            Some(row.min(self.row_count - 1))
        }
    }

    pub fn is_measured(&self, row: usize) -> bool {
        if row >= self.row_count {
            return false;
        }
        let (c, local) = self.locate(row);
        self.chunks[c].is_measured(local)
    }

    /// The measured height if known, else the owning chunk's running average.
    pub fn get_row_height(&self, row: usize) -> u32 {
        let Some(row) = self.clamp_row(row) else {
            return 0;
        };
        let (c, local) = self.locate(row);
        self.chunks[c].height_of(local)
    }

    /// Top offset of `row`. `row == row_count` yields the total height.
    pub fn get_row_top(&self, row: usize) -> u64 {
        let row = row.min(self.row_count);
        if row == self.row_count {
            return self.get_total_height();
        }
        let (c, local) = self.locate(row);
        let chunk = &self.chunks[c];
        let mut top = self.sums.prefix_sum(c);
        for i in 0..local {
            top = top.saturating_add(chunk.height_of(i) as u64);
        }
        top
    }

    pub fn get_total_height(&self) -> u64 {
        self.sums.total()
    }

    /// Records a height reported by the presentation layer.
    pub fn set_row_height(&mut self, row: usize, height: u32) {
        if row >= self.row_count {
            return;
        }
        let (c, local) = self.locate(row);
        if self.chunks[c].measured.get(&local) == Some(&height) {
            return;
        }
        self.chunks[c].record(local, height, self.options.default_row_height);
        self.sync_chunk(c);
    }

    /// Returns the row's height, measuring it through the configured measurer
    /// the first time it is asked for.
    ///
    /// Without a measurer this is the current estimate and nothing is recorded.
    pub fn measure_row(&mut self, row: usize) -> u32 {
        let Some(row) = self.clamp_row(row) else {
            return 0;
        };
        let (c, local) = self.locate(row);
        if let Some(h) = self.chunks[c].measured.get(&local) {
            return *h;
        }
        let Some(measure) = self.options.measure.clone() else {
            return self.chunks[c].average;
        };
        let h = measure(row);
        self.chunks[c].record(local, h, self.options.default_row_height);
        self.sync_chunk(c);
        h
    }

    /// Forgets one row's measurement. Only its own chunk is recomputed.
    pub fn invalidate_row(&mut self, row: usize) {
        if row >= self.row_count {
            return;
        }
        let (c, local) = self.locate(row);
        if self.chunks[c].forget(local, self.options.default_row_height) {
            vtrace!(row, chunk = c, "invalidate_row");
            self.sync_chunk(c);
        }
    }

    /// The row covering `offset`, clamped to the last row.
    pub fn row_at_offset(&self, offset: u64) -> Option<usize> {
        if self.row_count == 0 {
            return None;
        }
        let total = self.get_total_height();
        let offset = offset.min(total.saturating_sub(1));
        let c = self.sums.lower_bound(offset).min(self.chunks.len() - 1);
        let chunk = &self.chunks[c];
        let mut top = self.sums.prefix_sum(c);
        for local in 0..chunk.count {
            let bottom = top.saturating_add(chunk.height_of(local) as u64);
            if bottom > offset {
                return Some(chunk.start + local);
            }
            top = bottom;
        }
        Some(chunk.start + chunk.count - 1)
    }

    /// Rows intersecting `[scroll_offset, scroll_offset + viewport_height)`,
    /// plus `buffer` extra rows on each side (see [`VisibleRange::buffered_start`]).
    ///
    /// Rows walked over are measured lazily, so the answer settles as real
    /// heights replace estimates.
    pub fn get_visible_range(
        &mut self,
        scroll_offset: u64,
        viewport_height: u32,
        buffer: usize,
    ) -> VisibleRange {
        let count = self.row_count;
        if count == 0 || viewport_height == 0 {
            return VisibleRange::empty(count);
        }

        let total = self.get_total_height();
        let offset = scroll_offset.min(total.saturating_sub(1));

        let c = self.sums.lower_bound(offset).min(self.chunks.len() - 1);
        let mut top = self.sums.prefix_sum(c);
        let mut row = self.chunks[c].start;
        loop {
            let h = self.measure_row(row) as u64;
            if top.saturating_add(h) > offset || row + 1 >= count {
                break;
            }
            top = top.saturating_add(h);
            row += 1;
        }

        let start_index = row;
        let limit = offset.saturating_add(viewport_height as u64);
        let mut bottom = top;
        let mut end_index = start_index;
        while end_index < count && bottom < limit {
            bottom = bottom.saturating_add(self.measure_row(end_index) as u64);
            end_index += 1;
        }
        let end_index = end_index.max(start_index + 1);

        vtrace!(scroll_offset, viewport_height, start_index, end_index, "get_visible_range");
        VisibleRange {
            start_index,
            end_index,
            buffer,
            count,
        }
    }
}
