//! Filter executor

use super::error::ExecResult;
use super::expression::ExpressionRef;
use super::stats::ExecutionStats;
use super::{state_of, Executor, ExecutorProperties, ExecutorState};
use crate::cursor::{InputRange, OutputCursor};
use crate::demand::Call;

/// Keeps the rows whose condition is truthy
pub struct FilterExecutor {
    condition: ExpressionRef,
}

impl FilterExecutor {
    /// Create a new filter executor
    pub fn new(condition: ExpressionRef) -> Self {
        FilterExecutor { condition }
    }
}

impl Executor for FilterExecutor {
    const NAME: &'static str = "FilterExecutor";

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
        while !output.is_full() {
            let Some(row) = input.next_data_row() else {
                break;
            };
            if self.condition.evaluate(&row)?.is_truthy() {
                output.pass_row(&row)?;
            } else {
                stats.filtered += 1;
            }
        }
        Ok((state_of(input), stats))
    }

    fn skip_rows_range(
        &mut self,
        input: &mut InputRange,
        call: &Call,
    ) -> ExecResult<(ExecutorState, ExecutionStats, u64)> {
        let mut stats = ExecutionStats::default();
        let to_skip = call.rows_to_skip();
        let mut skipped = 0;
        while skipped < to_skip {
            let Some(row) = input.next_data_row() else {
                break;
            };
            if self.condition.evaluate(&row)?.is_truthy() {
                skipped += 1;
            } else {
                stats.filtered += 1;
            }
        }
        Ok((state_of(input), stats, skipped))
    }
}
