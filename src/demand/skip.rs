//! Per-depth skip counters returned with every execute answer

use serde::{Deserialize, Serialize};

/// Rows skipped (or counted without being produced), per subquery depth
///
/// Index 0 is the innermost depth, matching [`super::DemandStack`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipLedger {
    counts: Vec<u64>,
}

impl SkipLedger {
    /// All-zero ledger for a stack of `depth` frames
    pub fn new(depth: usize) -> Self {
        SkipLedger {
            counts: vec![0; depth],
        }
    }

    /// Build from explicit counts, innermost first
    pub fn from_counts(counts: Vec<u64>) -> Self {
        SkipLedger { counts }
    }

    /// Number of depths tracked
    pub fn depth(&self) -> usize {
        self.counts.len()
    }

    /// Skip count at `depth`; depths beyond the ledger count as zero
    pub fn get(&self, depth: usize) -> u64 {
        self.counts.get(depth).copied().unwrap_or(0)
    }

    /// Add `n` skipped rows at `depth`
    pub fn add(&mut self, depth: usize, n: u64) {
        if depth >= self.counts.len() {
            self.counts.resize(depth + 1, 0);
        }
        self.counts[depth] = self.counts[depth].saturating_add(n);
    }

    /// Add another ledger depth by depth
    pub fn merge(&mut self, other: &SkipLedger) {
        for (depth, n) in other.iter() {
            if n > 0 {
                self.add(depth, n);
            }
        }
    }

    /// Sum over all depths
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Check that nothing was skipped
    pub fn is_empty(&self) -> bool {
        self.counts.iter().all(|n| *n == 0)
    }

    /// Zero all counters, keeping the depth
    pub fn reset(&mut self) {
        self.counts.iter_mut().for_each(|n| *n = 0);
    }

    /// Iterate `(depth, count)` pairs, innermost first
    pub fn iter(&self) -> impl Iterator<Item = (usize, u64)> + '_ {
        self.counts.iter().copied().enumerate()
    }

    /// Counts as a slice, innermost first
    pub fn as_slice(&self) -> &[u64] {
        &self.counts
    }
}
