//! Fetcher over exactly one dependency

use super::{exhausted, waiting};
use crate::block::RowBlock;
use crate::cursor::InputRange;
use crate::demand::{DemandStack, SkipLedger};
use crate::engine::{ExecutionBlock, ExecutionState};
use crate::executor::error::ExecResult;

/// Forwards the demand to its dependency and hands back its rows
pub struct SingleRowFetcher {
    dependency: Box<ExecutionBlock>,
    done: bool,
}

impl SingleRowFetcher {
    pub fn new(dependency: ExecutionBlock) -> Self {
        SingleRowFetcher {
            dependency: Box::new(dependency),
            done: false,
        }
    }

    pub fn execute(
        &mut self,
        stack: DemandStack,
    ) -> ExecResult<(ExecutionState, SkipLedger, InputRange)> {
        let depth = stack.depth();
        if self.done {
            return Ok(exhausted(depth));
        }

        let result = self.dependency.execute(stack)?;
        match result.state {
            ExecutionState::Waiting => Ok(waiting(depth)),
            state => {
                self.done = state == ExecutionState::Done;
                Ok((state, result.skipped, InputRange::new(result.block, state)))
            }
        }
    }

    pub fn shutdown(&mut self, code: i32) -> ExecResult<()> {
        self.dependency.shutdown(code)
    }

    pub fn initialize_cursor(&mut self, input: Option<&RowBlock>) -> ExecResult<()> {
        self.done = false;
        self.dependency.initialize_cursor(input)
    }
}
