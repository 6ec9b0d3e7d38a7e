//! aqlblock - pull-driven query execution pipeline
//!
//! Features:
//! - Row blocks with shadow rows marking subquery iterations
//! - Demand stacks (offset, soft/hard limit, full count) per subquery depth
//! - Generic execution block driving a closed set of executors
//! - Subquery start and end blocks that open and fold iterations
//! - Cooperative suspension (`Waiting`) instead of blocking
//! - Scatter, distribute and remote blocks for cluster execution

pub mod block;
pub mod cluster;
pub mod config;
pub mod cursor;
pub mod demand;
pub mod engine;
pub mod executor;
pub mod fetcher;

pub use block::{RegisterInfos, RowBlock, SharedBlock, Value};
pub use config::EngineConfig;
pub use demand::{Call, CallList, DemandStack, SkipLedger};
pub use engine::{
    EngineBuilder, ExecuteResult, ExecutionBlock, ExecutionEngine, ExecutionState, PlanNode,
    QueryContext,
};
pub use executor::{ExecError, ExecResult, ExecutionStats};
