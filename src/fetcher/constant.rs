//! Fetcher over fixed rows

use std::sync::Arc;

use super::exhausted;
use crate::block::{RowBlock, SharedBlock};
use crate::cursor::InputRange;
use crate::demand::{DemandStack, SkipLedger};
use crate::engine::ExecutionState;

/// Delivers one block once per run, then reports `Done`
///
/// Used by singleton blocks (the start of a query or subquery) and by the
/// receiving end of a scatter, where the input rows are injected through
/// `initialize_cursor`. Every `initialize_cursor` re-arms the fetcher, so
/// a singleton replays its row once for each new run it is reset for.
#[derive(Debug, Default)]
pub struct ConstFetcher {
    block: Option<SharedBlock>,
    delivered: bool,
}

impl ConstFetcher {
    pub fn new(block: Option<RowBlock>) -> Self {
        ConstFetcher {
            block: block.map(Arc::new),
            delivered: false,
        }
    }

    pub fn execute(&mut self, stack: &DemandStack) -> (ExecutionState, SkipLedger, InputRange) {
        if self.delivered {
            return exhausted(stack.depth());
        }
        self.delivered = true;
        (
            ExecutionState::Done,
            SkipLedger::new(stack.depth()),
            InputRange::new(self.block.clone(), ExecutionState::Done),
        )
    }

    /// Re-arm; `input` replaces the rows when given
    pub fn initialize_cursor(&mut self, input: Option<&RowBlock>) {
        if let Some(input) = input {
            self.block = Some(Arc::new(input.clone()));
        }
        self.delivered = false;
    }
}
