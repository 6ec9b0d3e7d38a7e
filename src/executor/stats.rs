//! Out-of-band execution statistics

use std::ops::AddAssign;

use serde::{Deserialize, Serialize};

/// Counters reported by executors for query profiling
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStats {
    /// Rows read from a storage or index cursor
    pub scanned: u64,
    /// Rows dropped by a filter condition
    pub filtered: u64,
    /// Rows counted by a LIMIT with fullCount, including those past the limit
    pub full_count: u64,
    /// Remote requests sent
    pub requests: u64,
}

impl ExecutionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if all counters are zero
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl AddAssign for ExecutionStats {
    fn add_assign(&mut self, other: Self) {
        self.scanned += other.scanned;
        self.filtered += other.filtered;
        self.full_count += other.full_count;
        self.requests += other.requests;
    }
}
