//! Row blocks - the unit of data flow between execution blocks
//!
//! A [`RowBlock`] is a batch of rows with a fixed number of register
//! columns. A row is either a data row or a shadow row. A shadow row marks
//! the end of one subquery iteration and carries the register values of
//! the outer row that iteration ran for; it is never written to.
//!
//! Ownership follows two states:
//! - [`RowBlock`] is uniquely owned and may be written to.
//! - [`SharedBlock`] is published to one or more readers and is immutable.
//!
//! Converting back from shared to unique ([`into_unique`]) reuses the
//! allocation when the caller is the last holder and copies otherwise, so
//! a block with more than one live reader can never be mutated.

mod manager;
mod registers;
mod value;

pub use manager::BlockManager;
pub use registers::{RegisterId, RegisterInfos};
pub use value::Value;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::executor::error::{ExecError, ExecResult};

/// Depth of a shadow row, 0 = innermost subquery
pub type ShadowDepth = u64;

/// A published, shared, immutable row block
pub type SharedBlock = Arc<RowBlock>;

/// Take ownership of a shared block, copying only if it is still shared
pub fn into_unique(block: SharedBlock) -> RowBlock {
    Arc::unwrap_or_clone(block)
}

/// A batch of rows over a fixed register layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowBlock {
    num_registers: usize,
    capacity: usize,
    /// Row-major register values, `len() * num_registers` entries
    values: Vec<Value>,
    /// Per row: `Some(depth)` for shadow rows
    shadow: Vec<Option<ShadowDepth>>,
}

impl RowBlock {
    /// Create an empty block that can hold `capacity` rows
    pub fn new(capacity: usize, num_registers: usize) -> Self {
        RowBlock {
            num_registers,
            capacity,
            values: Vec::with_capacity(capacity * num_registers),
            shadow: Vec::with_capacity(capacity),
        }
    }

    /// Create a block reusing an existing value buffer
    pub(crate) fn with_buffer(capacity: usize, num_registers: usize, mut buffer: Vec<Value>) -> Self {
        buffer.clear();
        buffer.reserve(capacity * num_registers);
        RowBlock {
            num_registers,
            capacity,
            values: buffer,
            shadow: Vec::with_capacity(capacity),
        }
    }

    /// Build a block from data rows; every row must have `num_registers` values
    pub fn from_rows(num_registers: usize, rows: Vec<Vec<Value>>) -> ExecResult<Self> {
        let mut block = RowBlock::new(rows.len(), num_registers);
        for row in rows {
            block.push_row(row)?;
        }
        Ok(block)
    }

    /// Number of register columns
    pub fn num_registers(&self) -> usize {
        self.num_registers
    }

    /// Maximum number of rows
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of rows written so far (data and shadow rows)
    pub fn len(&self) -> usize {
        self.shadow.len()
    }

    /// Check if no row has been written
    pub fn is_empty(&self) -> bool {
        self.shadow.is_empty()
    }

    /// Check if no further row can be appended
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    fn ensure_room(&self) -> ExecResult<()> {
        if self.is_full() {
            return Err(ExecError::OutputFull {
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    /// Append a data row with all registers null, returning its index
    pub fn push_empty_row(&mut self) -> ExecResult<usize> {
        self.ensure_room()?;
        self.values
            .extend(std::iter::repeat_with(Value::default).take(self.num_registers));
        self.shadow.push(None);
        Ok(self.len() - 1)
    }

    /// Append a data row from a full set of register values
    pub fn push_row(&mut self, values: Vec<Value>) -> ExecResult<usize> {
        if values.len() != self.num_registers {
            return Err(ExecError::InvalidRegisterPlan(format!(
                "row has {} values, block has {} registers",
                values.len(),
                self.num_registers
            )));
        }
        self.ensure_room()?;
        self.values.extend(values);
        self.shadow.push(None);
        Ok(self.len() - 1)
    }

    /// Append a shadow row of the given depth with all registers null
    pub fn push_shadow_row(&mut self, depth: ShadowDepth) -> ExecResult<usize> {
        self.push_shadow_row_from(depth, &[])
    }

    /// Append a shadow row carrying `values`
    ///
    /// Values beyond the register count are cut off, missing ones are null.
    pub fn push_shadow_row_from(&mut self, depth: ShadowDepth, values: &[Value]) -> ExecResult<usize> {
        self.ensure_room()?;
        let n = self.num_registers;
        self.values.extend(values.iter().take(n).cloned());
        self.values
            .extend(std::iter::repeat_with(Value::default).take(n.saturating_sub(values.len())));
        self.shadow.push(Some(depth));
        Ok(self.len() - 1)
    }

    /// Check if the row at `index` is a shadow row
    pub fn is_shadow_row(&self, index: usize) -> bool {
        matches!(self.shadow.get(index), Some(Some(_)))
    }

    /// Depth of the shadow row at `index`, None for data rows
    pub fn shadow_depth(&self, index: usize) -> Option<ShadowDepth> {
        self.shadow.get(index).copied().flatten()
    }

    /// Check if any row is a shadow row
    pub fn has_shadow_rows(&self) -> bool {
        self.shadow.iter().any(Option::is_some)
    }

    /// Number of shadow rows in the block
    pub fn num_shadow_rows(&self) -> usize {
        self.shadow.iter().filter(|s| s.is_some()).count()
    }

    /// Number of data rows in the block
    pub fn num_data_rows(&self) -> usize {
        self.len() - self.num_shadow_rows()
    }

    /// Get a register value
    pub fn value(&self, row: usize, reg: RegisterId) -> ExecResult<&Value> {
        if reg >= self.num_registers {
            return Err(ExecError::RegisterOutOfBounds {
                register: reg,
                num_registers: self.num_registers,
            });
        }
        self.values
            .get(row * self.num_registers + reg)
            .ok_or_else(|| ExecError::Internal(format!("row {} out of bounds", row)))
    }

    /// Overwrite a register value of an existing data row
    pub fn set_value(&mut self, row: usize, reg: RegisterId, value: Value) -> ExecResult<()> {
        if reg >= self.num_registers {
            return Err(ExecError::RegisterOutOfBounds {
                register: reg,
                num_registers: self.num_registers,
            });
        }
        if self.is_shadow_row(row) {
            return Err(ExecError::Internal(format!(
                "cannot write register {} of shadow row {}",
                reg, row
            )));
        }
        let slot = self
            .values
            .get_mut(row * self.num_registers + reg)
            .ok_or_else(|| ExecError::Internal(format!("row {} out of bounds", row)))?;
        *slot = value;
        Ok(())
    }

    /// All register values of a row
    pub fn row_values(&self, row: usize) -> &[Value] {
        let start = row * self.num_registers;
        &self.values[start..start + self.num_registers]
    }

    /// Copy rows `[start, end)` into a new block with capacity `end - start`
    pub fn slice(&self, start: usize, end: usize) -> RowBlock {
        let end = end.min(self.len());
        let start = start.min(end);
        RowBlock {
            num_registers: self.num_registers,
            capacity: end - start,
            values: self.values[start * self.num_registers..end * self.num_registers].to_vec(),
            shadow: self.shadow[start..end].to_vec(),
        }
    }

    /// Shrink the capacity to the rows written
    pub fn shrink_to_fit(&mut self) {
        self.capacity = self.len();
    }

    pub(crate) fn into_buffer(self) -> Vec<Value> {
        self.values
    }
}
