//! Calculation executor

use std::ops::Range;

use super::error::ExecResult;
use super::expression::ExpressionRef;
use super::stats::ExecutionStats;
use super::{state_of, Executor, ExecutorProperties, ExecutorState};
use crate::block::{RegisterId, RowBlock};
use crate::cursor::{InputRange, InputRow, OutputCursor};
use crate::demand::Call;

/// Writes the result of an expression into one register of every row
pub struct CalculationExecutor {
    expression: ExpressionRef,
    output_register: RegisterId,
}

impl CalculationExecutor {
    /// Create a new calculation executor
    pub fn new(expression: ExpressionRef, output_register: RegisterId) -> Self {
        CalculationExecutor {
            expression,
            output_register,
        }
    }

    pub fn output_register(&self) -> RegisterId {
        self.output_register
    }
}

impl Executor for CalculationExecutor {
    const NAME: &'static str = "CalculationExecutor";

    const PROPERTIES: ExecutorProperties = ExecutorProperties {
        preserves_order: true,
        allows_passthrough: true,
    };

    fn produce_rows(
        &mut self,
        input: &mut InputRange,
        output: &mut OutputCursor,
    ) -> ExecResult<(ExecutorState, ExecutionStats)> {
        while !output.is_full() {
            let Some(row) = input.next_data_row() else {
                break;
            };
            let value = self.expression.evaluate(&row)?;
            output.produce_value(&row, self.output_register, value)?;
        }
        Ok((state_of(input), ExecutionStats::default()))
    }

    /// Skipped rows are never evaluated
    fn skip_rows_range(
        &mut self,
        input: &mut InputRange,
        call: &Call,
    ) -> ExecResult<(ExecutorState, ExecutionStats, u64)> {
        let skipped = input.skip_data_rows(call.rows_to_skip());
        Ok((state_of(input), ExecutionStats::default(), skipped))
    }

    fn transform_in_place(
        &mut self,
        block: &mut RowBlock,
        rows: Range<usize>,
    ) -> ExecResult<ExecutionStats> {
        for index in rows {
            let value = self.expression.evaluate(&InputRow::new(block, index))?;
            block.set_value(index, self.output_register, value)?;
        }
        Ok(ExecutionStats::default())
    }

    fn upstream_call(&self, client: &Call) -> Call {
        client.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::block::{RegisterInfos, Value};
    use crate::engine::ExecutionState;

    fn plus_one() -> ExpressionRef {
        ExpressionRef::from_fn(|row| Ok(Value::Int(row.value(0)?.as_int().unwrap_or(0) + 1)))
    }

    #[test]
    fn test_calculation_produce() {
        let block = RowBlock::from_rows(1, (0..3).map(|i| vec![Value::Int(i)]).collect()).unwrap();
        let mut input = InputRange::new(Some(Arc::new(block)), ExecutionState::Done);
        let mut exec = CalculationExecutor::new(plus_one(), 1);
        let mut out = OutputCursor::new(RowBlock::new(3, 2), Arc::new(RegisterInfos::with_output(1)), 3);
        let (state, _) = exec.produce_rows(&mut input, &mut out).unwrap();
        assert_eq!(state, ExecutorState::Done);
        let block = out.into_block();
        assert_eq!(block.row_values(2), &[Value::Int(2), Value::Int(3)]);
    }

    #[test]
    fn test_calculation_in_place() {
        let mut block =
            RowBlock::from_rows(2, (0..3).map(|i| vec![Value::Int(i), Value::Null]).collect())
                .unwrap();
        let mut exec = CalculationExecutor::new(plus_one(), 1);
        exec.transform_in_place(&mut block, 0..3).unwrap();
        assert_eq!(block.value(0, 1).unwrap(), &Value::Int(1));
        assert_eq!(block.value(2, 1).unwrap(), &Value::Int(3));
    }
}
