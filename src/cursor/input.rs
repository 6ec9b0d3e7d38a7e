//! Read side: a partially consumed upstream block

use crate::block::{RegisterId, RowBlock, ShadowDepth, SharedBlock, Value};
use crate::engine::ExecutionState;
use crate::executor::error::ExecResult;

/// Read-only view of one row of a block
#[derive(Debug, Clone, Copy)]
pub struct InputRow<'a> {
    block: &'a RowBlock,
    index: usize,
}

impl<'a> InputRow<'a> {
    /// View row `index` of `block`
    pub fn new(block: &'a RowBlock, index: usize) -> Self {
        InputRow { block, index }
    }

    /// Row position inside its block
    pub fn index(&self) -> usize {
        self.index
    }

    /// Register value
    pub fn value(&self, reg: RegisterId) -> ExecResult<&'a Value> {
        self.block.value(self.index, reg)
    }

    /// All register values of the row
    pub fn values(&self) -> &'a [Value] {
        self.block.row_values(self.index)
    }

    /// Number of registers of the row
    pub fn num_registers(&self) -> usize {
        self.block.num_registers()
    }
}

/// Upstream rows handed to an executor, consumed front to back
///
/// Data-row accessors stop at the next shadow row: an executor never reads
/// across an iteration boundary. The generic block handles shadow rows.
#[derive(Debug, Clone)]
pub struct InputRange {
    block: Option<SharedBlock>,
    index: usize,
    upstream_state: ExecutionState,
}

impl InputRange {
    /// Range over a whole block delivered with `upstream_state`
    pub fn new(block: Option<SharedBlock>, upstream_state: ExecutionState) -> Self {
        InputRange {
            block,
            index: 0,
            upstream_state,
        }
    }

    /// Range without rows
    pub fn empty(upstream_state: ExecutionState) -> Self {
        InputRange::new(None, upstream_state)
    }

    /// State the dependency reported together with this range
    pub fn upstream_state(&self) -> ExecutionState {
        self.upstream_state
    }

    /// The underlying block
    pub fn block(&self) -> Option<&SharedBlock> {
        self.block.as_ref()
    }

    /// Check if no row has been consumed yet
    pub fn is_fresh(&self) -> bool {
        self.index == 0
    }

    fn len(&self) -> usize {
        self.block.as_ref().map_or(0, |b| b.len())
    }

    /// Rows not consumed yet (data and shadow rows)
    pub fn remaining(&self) -> usize {
        self.len().saturating_sub(self.index)
    }

    /// Check if any row is left
    pub fn has_more(&self) -> bool {
        self.remaining() > 0
    }

    /// Check if the next row is a data row
    pub fn has_data_row(&self) -> bool {
        self.has_more() && self.peek_shadow_depth().is_none()
    }

    /// Check if the next row is a shadow row
    pub fn has_shadow_row(&self) -> bool {
        self.peek_shadow_depth().is_some()
    }

    /// Depth of the next row if it is a shadow row
    pub fn peek_shadow_depth(&self) -> Option<ShadowDepth> {
        self.block.as_ref()?.shadow_depth(self.index)
    }

    /// Next row if it is a shadow row, with its depth
    pub fn peek_shadow_row(&self) -> Option<(ShadowDepth, InputRow<'_>)> {
        let block = self.block.as_deref()?;
        let depth = block.shadow_depth(self.index)?;
        Some((depth, InputRow::new(block, self.index)))
    }

    /// Check if the data rows of the current iteration are used up and
    /// the iteration is known to be over: a shadow row is next or the
    /// dependency has nothing more
    pub fn at_iteration_end(&self) -> bool {
        !self.has_data_row()
            && (self.has_shadow_row() || self.upstream_state == ExecutionState::Done)
    }

    /// Next data row without consuming it
    pub fn peek_data_row(&self) -> Option<InputRow<'_>> {
        let block = self.block.as_deref()?;
        if self.index >= block.len() || block.is_shadow_row(self.index) {
            return None;
        }
        Some(InputRow::new(block, self.index))
    }

    /// Consume the next data row; None at a shadow row or the end
    pub fn next_data_row(&mut self) -> Option<InputRow<'_>> {
        let block = self.block.as_deref()?;
        if self.index >= block.len() || block.is_shadow_row(self.index) {
            return None;
        }
        let row = InputRow::new(block, self.index);
        self.index += 1;
        Some(row)
    }

    /// Consume up to `n` data rows without reading them
    pub fn skip_data_rows(&mut self, n: u64) -> u64 {
        let mut skipped = 0;
        while skipped < n && self.has_data_row() {
            self.index += 1;
            skipped += 1;
        }
        skipped
    }

    /// Consume the next shadow row, returning its depth
    pub fn next_shadow_row(&mut self) -> Option<ShadowDepth> {
        let depth = self.peek_shadow_depth()?;
        self.index += 1;
        Some(depth)
    }

    /// Data rows left before the next shadow row
    pub fn count_data_rows(&self) -> usize {
        let Some(block) = self.block.as_deref() else {
            return 0;
        };
        (self.index..block.len())
            .take_while(|i| !block.is_shadow_row(*i))
            .count()
    }

    /// Shadow rows left in the range
    pub fn count_shadow_rows(&self) -> usize {
        let Some(block) = self.block.as_deref() else {
            return 0;
        };
        (self.index..block.len())
            .filter(|i| block.is_shadow_row(*i))
            .count()
    }

    /// Check if every remaining data row precedes every remaining shadow row
    pub fn data_rows_first(&self) -> bool {
        self.count_data_rows() + self.count_shadow_rows() == self.remaining()
    }

    /// Hand out the whole block and leave the range empty
    pub fn take_block(&mut self) -> Option<SharedBlock> {
        self.index = 0;
        self.block.take()
    }
}
