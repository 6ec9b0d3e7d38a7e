//! Per-query context and the engine owning a block tree

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use super::{ExecuteResult, ExecutionBlock, ExecutionState};
use crate::block::{BlockManager, RowBlock};
use crate::config::EngineConfig;
use crate::demand::DemandStack;
use crate::executor::error::{ExecError, ExecResult};
use crate::executor::ExecutionStats;

/// State shared by every block of one query
#[derive(Debug)]
pub struct QueryContext {
    id: u64,
    config: EngineConfig,
    stats: Mutex<ExecutionStats>,
    killed: AtomicBool,
    wakeup: Arc<Notify>,
    blocks: BlockManager,
    next_block_id: AtomicUsize,
}

impl QueryContext {
    /// Create a context; the configuration is validated
    pub fn new(id: u64, config: EngineConfig) -> ExecResult<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new(QueryContext {
            id,
            blocks: BlockManager::new(config.max_block_rows),
            config,
            stats: Mutex::new(ExecutionStats::default()),
            killed: AtomicBool::new(false),
            wakeup: Arc::new(Notify::new()),
            next_block_id: AtomicUsize::new(1),
        }))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Abort the query; every block fails its next execute call
    pub fn kill(&self) {
        tracing::info!(query_id = self.id, "query killed");
        self.killed.store(true, Ordering::SeqCst);
        self.wakeup.notify_waiters();
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    /// Fail with `Killed` once the query was aborted
    pub fn check_killed(&self) -> ExecResult<()> {
        if self.is_killed() {
            return Err(ExecError::Killed(self.id));
        }
        Ok(())
    }

    /// Notification fired whenever suspended I/O of this query completes
    pub fn wakeup(&self) -> Arc<Notify> {
        Arc::clone(&self.wakeup)
    }

    /// Fold executor statistics into the query totals
    pub fn add_stats(&self, stats: ExecutionStats) {
        *self.stats.lock() += stats;
    }

    /// Snapshot of the statistics so far
    pub fn stats(&self) -> ExecutionStats {
        *self.stats.lock()
    }

    pub fn block_manager(&self) -> &BlockManager {
        &self.blocks
    }

    pub(crate) fn next_block_id(&self) -> usize {
        self.next_block_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// Root of a block tree plus its query context
pub struct ExecutionEngine {
    ctx: Arc<QueryContext>,
    root: ExecutionBlock,
    shutdown_result: Option<Result<(), String>>,
}

impl ExecutionEngine {
    pub fn new(ctx: Arc<QueryContext>, root: ExecutionBlock) -> Self {
        ExecutionEngine {
            ctx,
            root,
            shutdown_result: None,
        }
    }

    pub fn context(&self) -> &Arc<QueryContext> {
        &self.ctx
    }

    pub fn root(&self) -> &ExecutionBlock {
        &self.root
    }

    /// Execute the root block
    pub fn execute(&mut self, stack: DemandStack) -> ExecResult<ExecuteResult> {
        if self.shutdown_result.is_some() {
            return Err(ExecError::InvalidCall(format!(
                "query {} is shut down",
                self.ctx.id()
            )));
        }
        stack.validate()?;
        self.root.execute(stack)
    }

    /// Execute until the answer is not `Waiting`, awaiting I/O in between
    pub async fn execute_async(&mut self, stack: DemandStack) -> ExecResult<ExecuteResult> {
        let wakeup = self.ctx.wakeup();
        loop {
            let result = self.execute(stack.clone())?;
            if result.state != ExecutionState::Waiting {
                return Ok(result);
            }
            wakeup.notified().await;
            self.ctx.check_killed()?;
        }
    }

    /// Reset the tree for another run over `input`
    pub fn initialize_cursor(&mut self, input: Option<&RowBlock>) -> ExecResult<()> {
        self.root.initialize_cursor(input)
    }

    /// Release the resources of the tree
    ///
    /// The tree is shut down exactly once; later calls return the outcome
    /// of the first one.
    pub fn shutdown(&mut self, code: i32) -> ExecResult<()> {
        if let Some(result) = &self.shutdown_result {
            return result.clone().map_err(ExecError::Internal);
        }
        tracing::debug!(query_id = self.ctx.id(), code, "shutting down engine");
        let result = self.root.shutdown(code);
        self.shutdown_result = Some(result.as_ref().map(|_| ()).map_err(|e| e.to_string()));
        result
    }

    /// Check if the tree was shut down
    pub fn is_shut_down(&self) -> bool {
        self.shutdown_result.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kill() {
        let ctx = QueryContext::new(9, EngineConfig::default()).unwrap();
        ctx.check_killed().unwrap();
        ctx.kill();
        assert!(matches!(ctx.check_killed(), Err(ExecError::Killed(9))));
    }

    #[test]
    fn test_stats_accumulate() {
        let ctx = QueryContext::new(1, EngineConfig::default()).unwrap();
        ctx.add_stats(ExecutionStats {
            filtered: 2,
            ..Default::default()
        });
        ctx.add_stats(ExecutionStats {
            filtered: 1,
            scanned: 4,
            ..Default::default()
        });
        let stats = ctx.stats();
        assert_eq!(stats.filtered, 3);
        assert_eq!(stats.scanned, 4);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = EngineConfig::default().with_batch_size(0);
        assert!(QueryContext::new(1, config).is_err());
    }

    #[test]
    fn test_block_ids_unique() {
        let ctx = QueryContext::new(1, EngineConfig::default()).unwrap();
        let a = ctx.next_block_id();
        let b = ctx.next_block_id();
        assert_ne!(a, b);
    }
}
