//! Execution blocks and the engine driving them
//!
//! Every plan node becomes one [`ExecutionBlock`]. A consumer calls
//! `execute(stack)` on the root; each block pulls from its dependencies
//! through its fetcher, applies its executor and answers with an
//! [`ExecuteResult`]. Rows flow up, demand flows down.

mod block;
mod builder;
mod query;
mod subquery;

pub use block::{BlockPhase, ExecutionBlockImpl};
pub use builder::{EngineBuilder, PlanNode};
pub use query::{ExecutionEngine, QueryContext};
pub use subquery::{SubqueryEndBlock, SubqueryStartBlock};

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::block::{RowBlock, SharedBlock};
use crate::cluster::RemoteBlock;
use crate::demand::{DemandStack, SkipLedger};
use crate::executor::error::ExecResult;
use crate::executor::{
    CalculationExecutor, CountCollectExecutor, EnumerateExecutor, FilterExecutor, IdExecutor,
    LimitExecutor,
};

/// State returned with every execute answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionState {
    /// Suspended on I/O without progress; call again with the same stack
    Waiting,
    /// Progress was made and more rows may follow
    HasMore,
    /// No more rows for this or any enclosing depth
    Done,
}

/// Answer of one `execute` call
#[derive(Debug, Clone)]
pub struct ExecuteResult {
    pub state: ExecutionState,
    pub skipped: SkipLedger,
    pub block: Option<SharedBlock>,
}

impl ExecuteResult {
    /// Suspended answer for a stack of `depth` levels
    pub fn waiting(depth: usize) -> Self {
        ExecuteResult {
            state: ExecutionState::Waiting,
            skipped: SkipLedger::new(depth),
            block: None,
        }
    }

    /// Final answer without rows
    pub fn done(depth: usize) -> Self {
        ExecuteResult {
            state: ExecutionState::Done,
            skipped: SkipLedger::new(depth),
            block: None,
        }
    }

    /// Rows delivered, zero without a block
    pub fn num_rows(&self) -> usize {
        self.block.as_ref().map_or(0, |b| b.len())
    }

    /// The delivered block, if any
    pub fn rows(&self) -> Option<&RowBlock> {
        self.block.as_deref()
    }
}

/// A block of the execution tree; the set of kinds is closed
pub enum ExecutionBlock {
    /// Constant input row (subquery start or query root)
    Singleton(ExecutionBlockImpl<IdExecutor>),
    Id(ExecutionBlockImpl<IdExecutor>),
    Filter(ExecutionBlockImpl<FilterExecutor>),
    Calculation(ExecutionBlockImpl<CalculationExecutor>),
    Enumerate(ExecutionBlockImpl<EnumerateExecutor>),
    Limit(ExecutionBlockImpl<LimitExecutor>),
    /// One count row per iteration
    Collect(ExecutionBlockImpl<CountCollectExecutor>),
    /// Opens one subquery iteration per input row
    SubqueryStart(SubqueryStartBlock),
    /// Folds every subquery iteration into its outer row
    SubqueryEnd(SubqueryEndBlock),
    /// Fan-in over several dependencies
    Gather(ExecutionBlockImpl<IdExecutor>),
    /// One named consumer of a broadcasting scatter
    ScatterClient(ExecutionBlockImpl<IdExecutor>),
    /// One partition of a distributing scatter
    DistributeConsumer(ExecutionBlockImpl<IdExecutor>),
    /// Proxy for a block on another node
    Remote(RemoteBlock),
}

macro_rules! dispatch {
    ($self:expr, $b:ident => $body:expr) => {
        match $self {
            ExecutionBlock::Singleton($b) => $body,
            ExecutionBlock::Id($b) => $body,
            ExecutionBlock::Filter($b) => $body,
            ExecutionBlock::Calculation($b) => $body,
            ExecutionBlock::Enumerate($b) => $body,
            ExecutionBlock::Limit($b) => $body,
            ExecutionBlock::Collect($b) => $body,
            ExecutionBlock::SubqueryStart($b) => $body,
            ExecutionBlock::SubqueryEnd($b) => $body,
            ExecutionBlock::Gather($b) => $body,
            ExecutionBlock::ScatterClient($b) => $body,
            ExecutionBlock::DistributeConsumer($b) => $body,
            ExecutionBlock::Remote($b) => $body,
        }
    };
}

impl ExecutionBlock {
    /// Pull rows according to `stack`
    pub fn execute(&mut self, stack: DemandStack) -> ExecResult<ExecuteResult> {
        dispatch!(self, b => b.execute(stack))
    }

    /// Release resources of this block and its dependencies
    pub fn shutdown(&mut self, code: i32) -> ExecResult<()> {
        dispatch!(self, b => b.shutdown(code))
    }

    /// Reset the block for a new run; singletons take `input` as their row
    pub fn initialize_cursor(&mut self, input: Option<&RowBlock>) -> ExecResult<()> {
        dispatch!(self, b => b.initialize_cursor(input))
    }

    /// Block id, unique within the query
    pub fn id(&self) -> usize {
        dispatch!(self, b => b.id())
    }

    /// Kind name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionBlock::Singleton(_) => "Singleton",
            ExecutionBlock::Id(_) => "Id",
            ExecutionBlock::Filter(_) => "Filter",
            ExecutionBlock::Calculation(_) => "Calculation",
            ExecutionBlock::Enumerate(_) => "Enumerate",
            ExecutionBlock::Limit(_) => "Limit",
            ExecutionBlock::Collect(_) => "Collect",
            ExecutionBlock::SubqueryStart(_) => "SubqueryStart",
            ExecutionBlock::SubqueryEnd(_) => "SubqueryEnd",
            ExecutionBlock::Gather(_) => "Gather",
            ExecutionBlock::ScatterClient(_) => "ScatterClient",
            ExecutionBlock::DistributeConsumer(_) => "DistributeConsumer",
            ExecutionBlock::Remote(_) => "Remote",
        }
    }
}

impl std::fmt::Debug for ExecutionBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.kind(), self.id())
    }
}

/// Shared handle used where a block tree outlives a single owner
pub type SharedEngine = Arc<parking_lot::Mutex<ExecutionEngine>>;
