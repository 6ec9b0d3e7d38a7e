//! Count collect executor
//!
//! `COLLECT WITH COUNT INTO`: consumes every data row of an iteration and
//! writes a single row holding their number. The result only exists once
//! the iteration is over, so skipping it means computing it and throwing
//! it away.

use super::error::ExecResult;
use super::stats::ExecutionStats;
use super::{Executor, ExecutorProperties, ExecutorState};
use crate::block::{RegisterId, Value};
use crate::cursor::{InputRange, OutputCursor};
use crate::demand::Call;

/// Counts the rows of every iteration
#[derive(Debug, Clone)]
pub struct CountCollectExecutor {
    output_register: RegisterId,
    count: u64,
    /// The result of the current iteration was written or skipped
    emitted: bool,
    /// A shadow row was passed and no data row since
    after_boundary: bool,
}

impl CountCollectExecutor {
    pub fn new(output_register: RegisterId) -> Self {
        CountCollectExecutor {
            output_register,
            count: 0,
            emitted: false,
            after_boundary: false,
        }
    }

    /// Consume the available data rows; the count once the iteration is over
    fn aggregate(&mut self, input: &mut InputRange, stats: &mut ExecutionStats) -> Option<Value> {
        let n = input.skip_data_rows(u64::MAX);
        self.count += n;
        stats.scanned += n;
        if self.emitted || !input.at_iteration_end() {
            return None;
        }
        self.emitted = true;
        // Only a depth-0 shadow row closes an inner iteration; input that
        // ends right after a shadow row has no iteration open
        let open = match input.peek_shadow_depth() {
            Some(0) => true,
            Some(_) => self.count > 0,
            None => self.count > 0 || !self.after_boundary,
        };
        open.then(|| Value::Int(self.count as i64))
    }
}

impl Executor for CountCollectExecutor {
    const NAME: &'static str = "CountCollectExecutor";

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
        if let Some(count) = self.aggregate(input, &mut stats) {
            output.copy_values(&[])?;
            output.set_value(self.output_register, count)?;
            output.advance_row()?;
        }
        Ok((ExecutorState::Done, stats))
    }

    fn skip_rows_range(
        &mut self,
        input: &mut InputRange,
        call: &Call,
    ) -> ExecResult<(ExecutorState, ExecutionStats, u64)> {
        let mut stats = ExecutionStats::default();
        if call.rows_to_skip() == 0 {
            self.count += input.skip_data_rows(u64::MAX);
            return Ok((ExecutorState::Done, stats, 0));
        }
        let skipped = match self.aggregate(input, &mut stats) {
            Some(_) => 1,
            None => 0,
        };
        Ok((ExecutorState::Done, stats, skipped))
    }

    fn owes_rows(&self) -> bool {
        !self.emitted
    }

    fn reset(&mut self) {
        self.count = 0;
        self.emitted = false;
        self.after_boundary = true;
    }

    fn restart(&mut self) {
        self.count = 0;
        self.emitted = false;
        self.after_boundary = false;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::block::{RegisterInfos, RowBlock};
    use crate::engine::ExecutionState;

    fn range(layout: &[Option<i64>], state: ExecutionState) -> InputRange {
        let mut block = RowBlock::new(layout.len(), 1);
        for row in layout {
            match row {
                Some(v) => block.push_row(vec![Value::Int(*v)]).unwrap(),
                None => block.push_shadow_row(0).unwrap(),
            };
        }
        InputRange::new(Some(Arc::new(block)), state)
    }

    fn output() -> OutputCursor {
        let infos = RegisterInfos {
            num_input_registers: 1,
            num_output_registers: 2,
            registers_to_keep: vec![],
            registers_to_clear: vec![0],
            output_registers: vec![1],
        };
        OutputCursor::new(RowBlock::new(4, 2), Arc::new(infos), 4)
    }

    fn counts(out: OutputCursor) -> Vec<i64> {
        let block = out.into_block();
        (0..block.len())
            .map(|i| block.value(i, 1).unwrap().as_int().unwrap())
            .collect()
    }

    #[test]
    fn test_counts_across_ranges() {
        let mut exec = CountCollectExecutor::new(1);
        let mut out = output();

        let mut first = range(&[Some(1), Some(2)], ExecutionState::HasMore);
        exec.produce_rows(&mut first, &mut out).unwrap();
        assert!(out.is_empty());
        assert!(exec.owes_rows());

        let mut second = range(&[Some(3)], ExecutionState::Done);
        let (state, stats) = exec.produce_rows(&mut second, &mut out).unwrap();
        assert_eq!(state, ExecutorState::Done);
        assert_eq!(stats.scanned, 1);
        assert!(!exec.owes_rows());
        assert_eq!(counts(out), vec![3]);
    }

    #[test]
    fn test_empty_input_counts_zero() {
        let mut exec = CountCollectExecutor::new(1);
        let mut out = output();
        exec.produce_rows(&mut range(&[], ExecutionState::Done), &mut out)
            .unwrap();
        assert_eq!(counts(out), vec![0]);
    }

    #[test]
    fn test_one_row_per_iteration() {
        let mut exec = CountCollectExecutor::new(1);
        let mut out = output();
        let mut input = range(&[Some(1), None, None], ExecutionState::Done);

        exec.produce_rows(&mut input, &mut out).unwrap();
        input.next_shadow_row();
        exec.reset();
        exec.produce_rows(&mut input, &mut out).unwrap();
        input.next_shadow_row();
        exec.reset();

        // Nothing follows the last shadow row
        assert!(exec.owes_rows());
        exec.produce_rows(&mut input, &mut out).unwrap();
        assert!(!exec.owes_rows());
        assert_eq!(counts(out), vec![1, 0]);
    }

    #[test]
    fn test_outer_shadow_row_opens_no_iteration() {
        let mut exec = CountCollectExecutor::new(1);
        let mut out = output();
        let mut block = RowBlock::new(3, 1);
        block.push_row(vec![Value::Int(1)]).unwrap();
        block.push_shadow_row(0).unwrap();
        block.push_shadow_row(1).unwrap();
        let mut input = InputRange::new(Some(Arc::new(block)), ExecutionState::Done);

        exec.produce_rows(&mut input, &mut out).unwrap();
        input.next_shadow_row();
        exec.reset();
        exec.produce_rows(&mut input, &mut out).unwrap();
        assert!(!exec.owes_rows());
        assert_eq!(counts(out), vec![1]);
    }

    #[test]
    fn test_skip_discards_result() {
        let mut exec = CountCollectExecutor::new(1);
        let mut input = range(&[Some(1), Some(2)], ExecutionState::Done);
        let (_, _, skipped) = exec
            .skip_rows_range(&mut input, &Call::new().offset(1))
            .unwrap();
        assert_eq!(skipped, 1);
        assert!(!exec.owes_rows());

        exec.restart();
        let mut input = range(&[Some(1)], ExecutionState::HasMore);
        let (_, _, skipped) = exec
            .skip_rows_range(&mut input, &Call::full_count_only())
            .unwrap();
        assert_eq!(skipped, 0);
        assert!(exec.owes_rows());
    }
}
