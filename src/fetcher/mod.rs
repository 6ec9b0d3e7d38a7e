//! Fetchers - how a block obtains its input
//!
//! A fetcher hides the number and kind of dependencies behind one call:
//! given the upstream demand it answers with a state, the skip ledger of
//! the dependency and the next input range.

mod constant;
mod multi_dependency;
mod single_row;

pub use constant::ConstFetcher;
pub use multi_dependency::MultiDependencyFetcher;
pub use single_row::SingleRowFetcher;

use crate::block::RowBlock;
use crate::cluster::ScatterFetcher;
use crate::cursor::InputRange;
use crate::demand::{DemandStack, SkipLedger};
use crate::engine::{ExecutionBlock, ExecutionState};
use crate::executor::error::ExecResult;

/// Input side of an execution block
pub enum Fetcher {
    /// Exactly one dependency
    Single(SingleRowFetcher),
    /// Fixed rows, no dependency
    Constant(ConstFetcher),
    /// Several dependencies read in order
    Multi(MultiDependencyFetcher),
    /// One client of a scatter
    Scatter(ScatterFetcher),
}

impl Fetcher {
    pub fn single(dependency: ExecutionBlock) -> Self {
        Fetcher::Single(SingleRowFetcher::new(dependency))
    }

    pub fn constant(block: Option<RowBlock>) -> Self {
        Fetcher::Constant(ConstFetcher::new(block))
    }

    pub fn multi(dependencies: Vec<ExecutionBlock>, num_registers: usize) -> Self {
        Fetcher::Multi(MultiDependencyFetcher::new(dependencies, num_registers))
    }

    /// Fetch the next input range under `stack`
    pub fn execute(
        &mut self,
        stack: DemandStack,
    ) -> ExecResult<(ExecutionState, SkipLedger, InputRange)> {
        match self {
            Fetcher::Single(f) => f.execute(stack),
            Fetcher::Constant(f) => Ok(f.execute(&stack)),
            Fetcher::Multi(f) => f.execute(&stack),
            Fetcher::Scatter(f) => f.execute(&stack),
        }
    }

    pub fn shutdown(&mut self, code: i32) -> ExecResult<()> {
        match self {
            Fetcher::Single(f) => f.shutdown(code),
            Fetcher::Constant(_) => Ok(()),
            Fetcher::Multi(f) => f.shutdown(code),
            Fetcher::Scatter(f) => f.shutdown(code),
        }
    }

    pub fn initialize_cursor(&mut self, input: Option<&RowBlock>) -> ExecResult<()> {
        match self {
            Fetcher::Single(f) => f.initialize_cursor(input),
            Fetcher::Constant(f) => {
                f.initialize_cursor(input);
                Ok(())
            }
            Fetcher::Multi(f) => f.initialize_cursor(input),
            Fetcher::Scatter(f) => f.initialize_cursor(),
        }
    }
}

/// Answer of a fetcher whose dependency is suspended
pub(crate) fn waiting(depth: usize) -> (ExecutionState, SkipLedger, InputRange) {
    (
        ExecutionState::Waiting,
        SkipLedger::new(depth),
        InputRange::empty(ExecutionState::HasMore),
    )
}

/// Answer of an exhausted fetcher
pub(crate) fn exhausted(depth: usize) -> (ExecutionState, SkipLedger, InputRange) {
    (
        ExecutionState::Done,
        SkipLedger::new(depth),
        InputRange::empty(ExecutionState::Done),
    )
}
