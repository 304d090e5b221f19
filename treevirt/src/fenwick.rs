use std::cmp;

/// Prefix sums over per-chunk estimated heights.
///
/// Indexes are chunk indexes; values are each chunk's current estimated
/// total height.
#[derive(Clone, Debug, Default)]
pub(crate) struct ChunkSums {
    tree: Vec<u64>, // 1-indexed
    values: Vec<u64>,
    total: u64,
    max_bit: usize,
}

impl ChunkSums {
    pub(crate) fn from_values(values: Vec<u64>) -> Self {
        let n = values.len();
        let mut tree = vec![0u64; n + 1];
        let mut total = 0u64;
        for i in 1..=n {
            let v = values[i - 1];
            total = total.saturating_add(v);
            tree[i] = tree[i].saturating_add(v);
            let j = i + lsb(i);
            if j <= n {
                tree[j] = tree[j].saturating_add(tree[i]);
            }
        }
        Self {
            tree,
            values,
            total,
            max_bit: highest_power_of_two_leq(n),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.values.len()
    }

    /// Replaces the value at `index`, propagating the delta in `O(log n)`.
    pub(crate) fn set(&mut self, index: usize, value: u64) {
        let n = self.len();
        if index >= n {
            return;
        }
        let cur = self.values[index];
        if cur == value {
            return;
        }
        self.values[index] = value;
        self.total = self.total.saturating_sub(cur).saturating_add(value);

        let mut i = index + 1;
        while i <= n {
            let next = self.tree[i] as i128 - cur as i128 + value as i128;
            debug_assert!(next >= 0, "ChunkSums underflow (idx={i})");
            self.tree[i] = next.clamp(0, u64::MAX as i128) as u64;
            i += lsb(i);
        }
    }

    /// Sum of the first `count` values.
    pub(crate) fn prefix_sum(&self, count: usize) -> u64 {
        let mut i = cmp::min(count, self.len());
        let mut sum = 0u64;
        while i > 0 {
            sum = sum.saturating_add(self.tree[i]);
            i &= i - 1;
        }
        sum
    }

    pub(crate) fn total(&self) -> u64 {
        self.total
    }

    /// Returns the number of chunks whose prefix sum is <= `target`.
    ///
    /// For an offset inside the list this is the index of the chunk containing it.
    pub(crate) fn lower_bound(&self, mut target: u64) -> usize {
        let n = self.len();
        if n == 0 {
            return 0;
        }

        let mut idx = 0usize;
        let mut bit = self.max_bit;
        while bit != 0 {
            let next = idx + bit;
            if next <= n && self.tree[next] <= target {
                target -= self.tree[next];
                idx = next;
            }
            bit >>= 1;
        }
        idx
    }
}

fn lsb(i: usize) -> usize {
    i & i.wrapping_neg()
}

fn highest_power_of_two_leq(n: usize) -> usize {
    if n == 0 {
        return 0;
    }
    let mut p = 1usize;
    while p <= n / 2 {
        p <<= 1;
    }
    p
}
