//! Identity executor

use super::error::ExecResult;
use super::stats::ExecutionStats;
use super::{state_of, Executor, ExecutorProperties, ExecutorState};
use crate::cursor::{InputRange, OutputCursor};
use crate::demand::Call;

/// Forwards rows unchanged
///
/// Backs singleton, gather, scatter-client and distribute-consumer blocks.
/// A distribute consumer carries the id of the partition it reads.
#[derive(Debug, Default, Clone)]
pub struct IdExecutor {
    distribute_id: Option<String>,
}

impl IdExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity executor of a distribute consumer
    pub fn with_distribute_id(id: impl Into<String>) -> Self {
        IdExecutor {
            distribute_id: Some(id.into()),
        }
    }

    pub fn distribute_id(&self) -> Option<&str> {
        self.distribute_id.as_deref()
    }
}

impl Executor for IdExecutor {
    const NAME: &'static str = "IdExecutor";

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
            output.pass_row(&row)?;
        }
        Ok((state_of(input), ExecutionStats::default()))
    }

    fn skip_rows_range(
        &mut self,
        input: &mut InputRange,
        call: &Call,
    ) -> ExecResult<(ExecutorState, ExecutionStats, u64)> {
        let skipped = input.skip_data_rows(call.rows_to_skip());
        Ok((state_of(input), ExecutionStats::default(), skipped))
    }

    /// One row out per row in: the client demand can be served upstream
    fn upstream_call(&self, client: &Call) -> Call {
        client.clone()
    }
}
