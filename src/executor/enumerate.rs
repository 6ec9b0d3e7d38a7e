//! Enumerate executor - leaf scan over a storage cursor
//!
//! For every input row a cursor is opened through a [`CursorProvider`];
//! each value the cursor yields becomes one output row carrying the kept
//! registers of that input row plus the value in the output register.

use std::sync::Arc;

use super::error::ExecResult;
use super::stats::ExecutionStats;
use super::{Executor, ExecutorProperties, ExecutorState};
use crate::block::{RegisterId, Value};
use crate::cursor::{InputRange, InputRow, OutputCursor};
use crate::demand::Call;

/// Storage or index cursor
pub trait IndexCursor: Send {
    /// Up to `batch_size` next values; empty once exhausted
    fn next(&mut self, batch_size: usize) -> ExecResult<Vec<Value>>;

    /// Skip up to `n` values, returning how many were skipped
    fn skip(&mut self, n: u64) -> ExecResult<u64>;
}

/// Opens a cursor for an input row
pub trait CursorProvider: Send + Sync {
    fn open(&self, row: &InputRow<'_>) -> ExecResult<Box<dyn IndexCursor>>;
}

/// Cursor over an in-memory list of values
#[derive(Debug, Clone)]
pub struct VecCursor {
    values: Vec<Value>,
    pos: usize,
}

impl VecCursor {
    pub fn new(values: Vec<Value>) -> Self {
        VecCursor { values, pos: 0 }
    }
}

impl IndexCursor for VecCursor {
    fn next(&mut self, batch_size: usize) -> ExecResult<Vec<Value>> {
        let end = (self.pos + batch_size).min(self.values.len());
        let batch = self.values[self.pos..end].to_vec();
        self.pos = end;
        Ok(batch)
    }

    fn skip(&mut self, n: u64) -> ExecResult<u64> {
        let left = (self.values.len() - self.pos) as u64;
        let skipped = left.min(n);
        self.pos += skipped as usize;
        Ok(skipped)
    }
}

/// Provider that lists the elements of an array register
#[derive(Debug, Clone, Copy)]
pub struct ArrayProvider {
    register: RegisterId,
}

impl ArrayProvider {
    pub fn new(register: RegisterId) -> Self {
        ArrayProvider { register }
    }
}

impl CursorProvider for ArrayProvider {
    fn open(&self, row: &InputRow<'_>) -> ExecResult<Box<dyn IndexCursor>> {
        let values = row
            .value(self.register)?
            .as_array()
            .map(<[Value]>::to_vec)
            .unwrap_or_default();
        Ok(Box::new(VecCursor::new(values)))
    }
}

struct OpenCursor {
    cursor: Box<dyn IndexCursor>,
    row: Vec<Value>,
}

/// Produces one row per value of the cursor opened for each input row
pub struct EnumerateExecutor {
    provider: Arc<dyn CursorProvider>,
    output_register: RegisterId,
    current: Option<OpenCursor>,
}

impl EnumerateExecutor {
    /// Create a new enumerate executor
    pub fn new(provider: Arc<dyn CursorProvider>, output_register: RegisterId) -> Self {
        EnumerateExecutor {
            provider,
            output_register,
            current: None,
        }
    }

    /// Make sure a cursor is open, pulling the next input row if needed
    fn ensure_cursor(&mut self, input: &mut InputRange) -> ExecResult<bool> {
        if self.current.is_some() {
            return Ok(true);
        }
        let Some(row) = input.next_data_row() else {
            return Ok(false);
        };
        let cursor = self.provider.open(&row)?;
        self.current = Some(OpenCursor {
            cursor,
            row: row.values().to_vec(),
        });
        Ok(true)
    }

    fn state(&self, input: &InputRange) -> ExecutorState {
        if self.current.is_some() || input.has_data_row() {
            ExecutorState::HasMore
        } else {
            ExecutorState::Done
        }
    }
}

impl Executor for EnumerateExecutor {
    const NAME: &'static str = "EnumerateExecutor";

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
        while !output.is_full() && self.ensure_cursor(input)? {
            let Some(open) = self.current.as_mut() else {
                break;
            };
            let values = open.cursor.next(output.num_rows_left())?;
            if values.is_empty() {
                self.current = None;
                continue;
            }
            stats.scanned += values.len() as u64;
            for value in values {
                output.copy_values(&open.row)?;
                output.set_value(self.output_register, value)?;
                output.advance_row()?;
            }
        }
        Ok((self.state(input), stats))
    }

    fn skip_rows_range(
        &mut self,
        input: &mut InputRange,
        call: &Call,
    ) -> ExecResult<(ExecutorState, ExecutionStats, u64)> {
        let mut stats = ExecutionStats::default();
        let to_skip = call.rows_to_skip();
        let mut skipped = 0;
        while skipped < to_skip && self.ensure_cursor(input)? {
            let Some(open) = self.current.as_mut() else {
                break;
            };
            let wanted = to_skip - skipped;
            let n = open.cursor.skip(wanted)?;
            skipped += n;
            stats.scanned += n;
            if n < wanted {
                self.current = None;
            }
        }
        Ok((self.state(input), stats, skipped))
    }

    fn reset(&mut self) {
        self.current = None;
    }
}
