//! Limit executor
//!
//! Implements a node-level LIMIT offset, count. With fullCount the rows
//! around the window are still read and counted into the statistics.
//! Offset and count apply per subquery iteration.

use super::error::ExecResult;
use super::stats::ExecutionStats;
use super::{state_of, Executor, ExecutorProperties, ExecutorState};
use crate::cursor::{InputRange, OutputCursor};
use crate::demand::Call;

/// Limit executor
#[derive(Debug, Clone)]
pub struct LimitExecutor {
    /// Rows to skip
    offset: u64,
    /// Maximum rows to return
    limit: u64,
    /// Count every input row into the statistics
    full_count: bool,
    /// Number of rows skipped so far
    skipped: u64,
    /// Number of rows returned so far
    returned: u64,
}

impl LimitExecutor {
    /// Create a new limit executor
    pub fn new(offset: u64, limit: u64, full_count: bool) -> Self {
        LimitExecutor {
            offset,
            limit,
            full_count,
            skipped: 0,
            returned: 0,
        }
    }

    fn remaining_offset(&self) -> u64 {
        self.offset - self.skipped
    }

    fn remaining_limit(&self) -> u64 {
        self.limit - self.returned
    }

    /// Drop input rows still covered by the node offset
    fn skip_offset(&mut self, input: &mut InputRange, stats: &mut ExecutionStats) {
        let n = input.skip_data_rows(self.remaining_offset());
        self.skipped += n;
        if self.full_count {
            stats.full_count += n;
        }
    }

    /// Count rows past the window once the limit is satisfied
    fn count_rest(&mut self, input: &mut InputRange, stats: &mut ExecutionStats) {
        if self.full_count && self.remaining_limit() == 0 {
            stats.full_count += input.skip_data_rows(u64::MAX);
        }
    }

    fn state(&self, input: &InputRange) -> ExecutorState {
        if self.remaining_limit() == 0 && !self.full_count {
            ExecutorState::Done
        } else {
            state_of(input)
        }
    }
}

impl Executor for LimitExecutor {
    const NAME: &'static str = "LimitExecutor";

    const PROPERTIES: ExecutorProperties = ExecutorProperties {
        preserves_order: true,
        allows_passthrough: false,
    };

    fn produce_rows(
        &mut self,
        input: &mut InputRange,
        output: &mut OutputCursor,
    ) -> ExecResult<(ExecutorState, ExecutionStats)> {
        let mut stats = ExecutionStats::default();
        self.skip_offset(input, &mut stats);

        while !output.is_full() && self.remaining_limit() > 0 {
            let Some(row) = input.next_data_row() else {
                break;
            };
            output.pass_row(&row)?;
            self.returned += 1;
            if self.full_count {
                stats.full_count += 1;
            }
        }

        self.count_rest(input, &mut stats);
        Ok((self.state(input), stats))
    }

    fn skip_rows_range(
        &mut self,
        input: &mut InputRange,
        call: &Call,
    ) -> ExecResult<(ExecutorState, ExecutionStats, u64)> {
        let mut stats = ExecutionStats::default();
        self.skip_offset(input, &mut stats);

        let to_skip = call.rows_to_skip().min(self.remaining_limit());
        let skipped = input.skip_data_rows(to_skip);
        self.returned += skipped;
        if self.full_count {
            stats.full_count += skipped;
        }

        self.count_rest(input, &mut stats);
        Ok((self.state(input), stats, skipped))
    }

    fn upstream_call(&self, client: &Call) -> Call {
        if client.wants_nothing() {
            return Call::fast_forward();
        }
        if self.full_count {
            return Call::new();
        }
        let wanted = if client.needs_full_count() {
            self.remaining_limit()
        } else {
            self.remaining_limit()
                .min(client.offset.saturating_add(client.limit()))
        };
        if wanted == 0 {
            return Call::fast_forward();
        }
        Call::with_soft_limit(self.remaining_offset().saturating_add(wanted))
    }

    fn reset(&mut self) {
        self.skipped = 0;
        self.returned = 0;
    }
}
