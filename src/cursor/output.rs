//! Write side: an output block being filled by an executor

use std::sync::Arc;

use super::InputRow;
use crate::block::{RegisterId, RegisterInfos, RowBlock, ShadowDepth, Value};
use crate::executor::error::{ExecError, ExecResult};

/// Append-only writer over a uniquely owned output block
///
/// A data row is opened by copying the kept registers of an input row,
/// then output registers are written, then the row is finalized with
/// [`OutputCursor::advance_row`]. A finalized row cannot be written again.
#[derive(Debug)]
pub struct OutputCursor {
    block: RowBlock,
    infos: Arc<RegisterInfos>,
    data_limit: usize,
    produced: usize,
    open_row: Option<usize>,
}

impl OutputCursor {
    /// Writer that accepts at most `data_limit` data rows
    pub fn new(block: RowBlock, infos: Arc<RegisterInfos>, data_limit: usize) -> Self {
        OutputCursor {
            block,
            infos,
            data_limit,
            produced: 0,
            open_row: None,
        }
    }

    /// Data rows that may still be written
    pub fn num_rows_left(&self) -> usize {
        let by_limit = self.data_limit.saturating_sub(self.produced);
        let by_capacity = self.block.capacity().saturating_sub(self.block.len());
        by_limit.min(by_capacity)
    }

    /// Check if no further data row may be written
    pub fn is_full(&self) -> bool {
        self.num_rows_left() == 0
    }

    /// Check if the block can take one more row of any kind
    pub fn has_room(&self) -> bool {
        self.open_row.is_none() && self.block.len() < self.block.capacity()
    }

    /// Data rows finalized so far
    pub fn produced(&self) -> usize {
        self.produced
    }

    /// Rows written so far (data and shadow rows)
    pub fn num_rows_written(&self) -> usize {
        self.block.len()
    }

    /// Check if nothing was written
    pub fn is_empty(&self) -> bool {
        self.block.is_empty()
    }

    fn open(&mut self) -> ExecResult<usize> {
        if self.open_row.is_some() {
            return Err(ExecError::Internal(
                "previous output row was not advanced".to_string(),
            ));
        }
        if self.is_full() {
            return Err(ExecError::OutputFull {
                capacity: self.block.capacity(),
            });
        }
        let index = self.block.push_empty_row()?;
        self.open_row = Some(index);
        Ok(index)
    }

    /// Open a new row carrying the kept registers of `row`
    pub fn copy_row(&mut self, row: &InputRow<'_>) -> ExecResult<()> {
        self.copy_values(row.values())
    }

    /// Open a new row carrying the kept registers taken from `values`
    pub fn copy_values(&mut self, values: &[Value]) -> ExecResult<()> {
        let index = self.open()?;
        for &reg in &self.infos.registers_to_keep {
            let value = values.get(reg).ok_or(ExecError::RegisterOutOfBounds {
                register: reg,
                num_registers: values.len(),
            })?;
            self.block.set_value(index, reg, value.clone())?;
        }
        Ok(())
    }

    /// Write an output register of the open row
    pub fn set_value(&mut self, reg: RegisterId, value: Value) -> ExecResult<()> {
        if !self.infos.is_output_register(reg) {
            return Err(ExecError::NotAnOutputRegister(reg));
        }
        let index = self
            .open_row
            .ok_or_else(|| ExecError::Internal("no open output row".to_string()))?;
        self.block.set_value(index, reg, value)
    }

    /// Finalize the open row
    pub fn advance_row(&mut self) -> ExecResult<()> {
        self.open_row
            .take()
            .ok_or_else(|| ExecError::Internal("no open output row".to_string()))?;
        self.produced += 1;
        Ok(())
    }

    /// Copy `row` unchanged (kept registers only)
    pub fn pass_row(&mut self, row: &InputRow<'_>) -> ExecResult<()> {
        self.copy_row(row)?;
        self.advance_row()
    }

    /// Copy `row` and write `value` into `reg`
    pub fn produce_value(
        &mut self,
        row: &InputRow<'_>,
        reg: RegisterId,
        value: Value,
    ) -> ExecResult<()> {
        self.copy_row(row)?;
        self.set_value(reg, value)?;
        self.advance_row()
    }

    /// Append a shadow row with the values of `row` and the given depth
    ///
    /// Shadow rows keep every register, not only the kept ones: they carry
    /// the outer row of their iteration. They do not count against the
    /// data limit.
    pub fn copy_shadow_row(&mut self, row: &InputRow<'_>, depth: ShadowDepth) -> ExecResult<()> {
        if self.open_row.is_some() {
            return Err(ExecError::Internal(
                "shadow row written while a data row is open".to_string(),
            ));
        }
        self.block.push_shadow_row_from(depth, row.values())?;
        Ok(())
    }

    /// Release the written block
    pub fn into_block(self) -> RowBlock {
        self.block
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> RowBlock {
        RowBlock::from_rows(
            2,
            vec![
                vec![Value::Int(1), Value::from("a")],
                vec![Value::Int(2), Value::from("b")],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_copy_and_write() {
        let infos = Arc::new(RegisterInfos::with_output(2));
        let mut out = OutputCursor::new(RowBlock::new(4, 3), infos, 10);
        let source = input();
        let row = InputRow::new(&source, 1);
        out.produce_value(&row, 2, Value::Bool(true)).unwrap();
        assert_eq!(out.produced(), 1);

        let block = out.into_block();
        assert_eq!(block.row_values(0), &[Value::Int(2), Value::from("b"), Value::Bool(true)]);
    }

    #[test]
    fn test_only_output_registers_writable() {
        let infos = Arc::new(RegisterInfos::with_output(2));
        let mut out = OutputCursor::new(RowBlock::new(4, 3), infos, 10);
        let source = input();
        out.copy_row(&InputRow::new(&source, 0)).unwrap();
        assert!(matches!(
            out.set_value(0, Value::Null),
            Err(ExecError::NotAnOutputRegister(0))
        ));
        out.advance_row().unwrap();
        assert!(out.set_value(2, Value::Null).is_err());
        assert!(out.advance_row().is_err());
    }

    #[test]
    fn test_limit_and_capacity() {
        let infos = Arc::new(RegisterInfos::passthrough(2));
        let mut out = OutputCursor::new(RowBlock::new(3, 2), infos, 1);
        let source = input();
        assert_eq!(out.num_rows_left(), 1);
        out.pass_row(&InputRow::new(&source, 0)).unwrap();
        assert!(out.is_full());
        assert!(matches!(
            out.pass_row(&InputRow::new(&source, 1)),
            Err(ExecError::OutputFull { .. })
        ));
        assert!(out.has_room());
        out.copy_shadow_row(&InputRow::new(&source, 0), 0).unwrap();
        out.copy_shadow_row(&InputRow::new(&source, 1), 1).unwrap();
        assert_eq!(out.num_rows_written(), 3);
        assert!(!out.has_room());

        let block = out.into_block();
        assert_eq!(block.shadow_depth(2), Some(1));
        assert_eq!(block.row_values(2), &[Value::Int(2), Value::from("b")]);
    }

    #[test]
    fn test_cleared_registers_not_copied() {
        let mut infos = RegisterInfos::passthrough(2);
        infos.registers_to_keep = vec![0];
        infos.registers_to_clear = vec![1];
        let mut out = OutputCursor::new(RowBlock::new(1, 2), Arc::new(infos), 1);
        let source = input();
        out.pass_row(&InputRow::new(&source, 0)).unwrap();
        let block = out.into_block();
        assert!(block.value(0, 1).unwrap().is_null());
        assert_eq!(block.value(0, 0).unwrap(), &Value::Int(1));
    }
}
