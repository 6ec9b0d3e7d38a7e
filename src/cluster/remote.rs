//! Remote block - proxy for a block tree on another node
//!
//! The first `execute` sends the demand stack to the peer on a runtime task
//! and answers `Waiting`. When the response arrives the task fires the
//! query's wake-up notification; the next `execute` picks the response up.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

use super::wire::{ExecuteRequest, ExecuteResponse, ShutdownRequest};
use crate::block::RowBlock;
use crate::demand::DemandStack;
use crate::engine::{ExecuteResult, ExecutionState, QueryContext};
use crate::executor::error::{ExecError, ExecResult};
use crate::executor::ExecutionStats;

/// Carries remote execution requests to a peer
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    async fn execute(&self, request: ExecuteRequest) -> ExecResult<ExecuteResponse>;

    async fn shutdown(&self, request: ShutdownRequest) -> ExecResult<()>;
}

type PendingResponse = oneshot::Receiver<ExecResult<ExecuteResponse>>;

/// Block whose rows are produced by an engine on another node
pub struct RemoteBlock {
    id: usize,
    ctx: Arc<QueryContext>,
    transport: Arc<dyn RemoteTransport>,
    query_id: u64,
    client_id: String,
    runtime: Handle,
    pending: Option<PendingResponse>,
    done: bool,
    shut_down: bool,
}

impl RemoteBlock {
    pub fn new(
        ctx: Arc<QueryContext>,
        transport: Arc<dyn RemoteTransport>,
        query_id: u64,
        client_id: impl Into<String>,
        runtime: Handle,
    ) -> Self {
        let id = ctx.next_block_id();
        RemoteBlock {
            id,
            ctx,
            transport,
            query_id,
            client_id: client_id.into(),
            runtime,
            pending: None,
            done: false,
            shut_down: false,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Check if a request is outstanding
    pub fn is_waiting(&self) -> bool {
        self.pending.is_some()
    }

    /// Send `stack` to the peer or collect the outstanding answer
    ///
    /// While a request is outstanding the argument is ignored.
    pub fn execute(&mut self, stack: DemandStack) -> ExecResult<ExecuteResult> {
        self.ctx.check_killed()?;
        if stack.is_empty() && self.pending.is_none() {
            return Err(ExecError::InvalidCall("empty demand stack".to_string()));
        }
        let depth = stack.depth();

        if let Some(pending) = self.pending.as_mut() {
            return match pending.try_recv() {
                Ok(response) => {
                    self.pending = None;
                    Ok(self.accept(response?))
                }
                Err(TryRecvError::Empty) => Ok(ExecuteResult::waiting(depth)),
                Err(TryRecvError::Closed) => {
                    self.pending = None;
                    Err(ExecError::Remote(format!(
                        "request to {} ended without an answer",
                        self.client_id
                    )))
                }
            };
        }

        if self.done {
            return Ok(ExecuteResult::done(depth));
        }

        let request = ExecuteRequest {
            query_id: self.query_id,
            client_id: self.client_id.clone(),
            stack,
        };
        tracing::debug!(
            block = self.id,
            query_id = self.query_id,
            client = %self.client_id,
            stack = %request.stack,
            "sending remote execute"
        );

        let (tx, rx) = oneshot::channel();
        let transport = Arc::clone(&self.transport);
        let wakeup = self.ctx.wakeup();
        self.runtime.spawn(async move {
            let response = transport.execute(request).await;
            let _ = tx.send(response);
            wakeup.notify_one();
        });
        self.pending = Some(rx);
        self.ctx.add_stats(ExecutionStats {
            requests: 1,
            ..Default::default()
        });

        Ok(ExecuteResult::waiting(depth))
    }

    fn accept(&mut self, response: ExecuteResponse) -> ExecuteResult {
        if response.state == ExecutionState::Done {
            self.done = true;
        }
        tracing::debug!(
            block = self.id,
            client = %self.client_id,
            state = ?response.state,
            rows = response.block.as_ref().map_or(0, RowBlock::len),
            "remote answered"
        );
        ExecuteResult {
            state: response.state,
            skipped: response.skipped,
            block: response.block.map(Arc::new),
        }
    }

    /// Tell the peer to release its engine; does not wait for the answer
    pub fn shutdown(&mut self, code: i32) -> ExecResult<()> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;
        self.pending = None;

        let request = ShutdownRequest {
            query_id: self.query_id,
            client_id: self.client_id.clone(),
            code,
        };
        let transport = Arc::clone(&self.transport);
        let client = self.client_id.clone();
        self.runtime.spawn(async move {
            if let Err(e) = transport.shutdown(request).await {
                tracing::warn!(client = %client, error = %e, "remote shutdown failed");
            }
        });
        Ok(())
    }

    /// Remote engines are initialized on their own node
    pub fn initialize_cursor(&mut self, _input: Option<&RowBlock>) -> ExecResult<()> {
        tracing::trace!(block = self.id, "initialize cursor ignored for remote block");
        Ok(())
    }
}
