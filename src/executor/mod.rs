//! Executors - the per-node row transformations
//!
//! An executor only sees rows: it reads data rows from an [`InputRange`]
//! and writes into an [`OutputCursor`]. Fetching, demand bookkeeping and
//! shadow rows are handled by the generic block that drives it
//! ([`crate::engine::ExecutionBlockImpl`]).
//!
//! The set of executors is closed:
//! - [`IdExecutor`]: identity, also used for singleton, gather and
//!   distribute-consumer blocks
//! - [`FilterExecutor`]: drops rows failing a condition
//! - [`CalculationExecutor`]: writes an expression result into a register
//! - [`EnumerateExecutor`]: scans a storage cursor per input row
//! - [`LimitExecutor`]: node-level offset/count with optional fullCount
//! - [`CountCollectExecutor`]: one row per iteration with its row count

pub mod calculation;
pub mod collect;
pub mod enumerate;
pub mod error;
pub mod expression;
pub mod filter;
pub mod id;
pub mod limit;
pub mod stats;

pub use calculation::CalculationExecutor;
pub use collect::CountCollectExecutor;
pub use enumerate::{CursorProvider, EnumerateExecutor, IndexCursor};
pub use error::{ExecError, ExecResult};
pub use expression::{Expression, ExpressionRef};
pub use filter::FilterExecutor;
pub use id::IdExecutor;
pub use limit::LimitExecutor;
pub use stats::ExecutionStats;

use std::ops::Range;

use crate::block::RowBlock;
use crate::cursor::{InputRange, OutputCursor};
use crate::demand::Call;

/// Static capabilities of an executor, checked when a block is built
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorProperties {
    /// Output rows keep the relative order of their input rows
    pub preserves_order: bool,
    /// Exactly one output row per input row, so the input block can be
    /// reused as the output block
    pub allows_passthrough: bool,
}

/// Executor answer after one produce or skip round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    /// Stopped early (output full or demand met) with work left
    HasMore,
    /// Consumed every data row up to the next shadow row or the end
    Done,
}

/// Row transformation plugged into the generic block
pub trait Executor: Send {
    /// Name used in logs and construction errors
    const NAME: &'static str;

    const PROPERTIES: ExecutorProperties;

    /// Move rows from `input` to `output`
    ///
    /// Writes at most `output.num_rows_left()` data rows and never reads
    /// past a shadow row.
    fn produce_rows(
        &mut self,
        input: &mut InputRange,
        output: &mut OutputCursor,
    ) -> ExecResult<(ExecutorState, ExecutionStats)>;

    /// Drop up to `call.rows_to_skip()` rows this executor would produce,
    /// returning how many were dropped
    fn skip_rows_range(
        &mut self,
        input: &mut InputRange,
        call: &Call,
    ) -> ExecResult<(ExecutorState, ExecutionStats, u64)>;

    /// Transform `rows` of a block reused as output
    ///
    /// Only called for executors with `allows_passthrough`.
    fn transform_in_place(
        &mut self,
        _block: &mut RowBlock,
        _rows: Range<usize>,
    ) -> ExecResult<ExecutionStats> {
        Ok(ExecutionStats::default())
    }

    /// Call to send upstream while serving `client`
    ///
    /// The default asks for everything, unless the client wants nothing
    /// more from the current iteration.
    fn upstream_call(&self, client: &Call) -> Call {
        if client.wants_nothing() {
            Call::fast_forward()
        } else {
            Call::new()
        }
    }

    /// Check if a row is still owed for the current iteration
    ///
    /// Aggregating executors answer true until they wrote their result.
    /// The block then calls `produce_rows` (or `skip_rows_range`) once
    /// more on a range that sits at the end of the iteration.
    fn owes_rows(&self) -> bool {
        false
    }

    /// A subquery iteration ended
    fn reset(&mut self) {}

    /// The block was re-initialized for a new run
    fn restart(&mut self) {
        self.reset();
    }
}

/// Executor state after a round that stops at the end of the input
pub(crate) fn state_of(input: &InputRange) -> ExecutorState {
    if input.has_data_row() {
        ExecutorState::HasMore
    } else {
        ExecutorState::Done
    }
}
