//! Scatter - one upstream, many named clients
//!
//! The upstream block is pulled on behalf of whichever client runs dry
//! first. Every block it delivers is queued for all registered clients
//! (broadcast) or split by a key register (distribute), so all clients see
//! rows in the same global order and only their pace differs.
//!
//! A client that is shut down or dropped is deregistered: its queue is
//! released and nothing is buffered for it anymore. The upstream is shut
//! down together with the last client.

use std::collections::{HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::Mutex;
use siphasher::sip::SipHasher13;

use crate::block::{RegisterId, RowBlock, SharedBlock, Value};
use crate::cursor::InputRange;
use crate::demand::{DemandStack, SkipLedger};
use crate::engine::{ExecutionBlock, ExecutionState};
use crate::executor::error::{ExecError, ExecResult};
use crate::fetcher::{exhausted, waiting};

/// Keys of the distribute hash; every node must route a key alike
const ROUTING_KEYS: (u64, u64) = (0x0706_0504_0302_0100, 0x0f0e_0d0c_0b0a_0908);

/// Index of the client that receives rows with key `value`
pub fn route(value: &Value, num_clients: usize) -> usize {
    let mut hasher = SipHasher13::new_with_keys(ROUTING_KEYS.0, ROUTING_KEYS.1);
    value.hash(&mut hasher);
    (hasher.finish() % num_clients.max(1) as u64) as usize
}

/// How upstream rows are spread over the clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScatterMode {
    /// Every client receives every row
    Broadcast,
    /// Each data row goes to one client chosen by hashing a register
    Distribute { key_register: RegisterId },
}

struct ClientQueue {
    id: String,
    queue: VecDeque<SharedBlock>,
    active: bool,
    /// A fetcher was handed out for this client
    claimed: bool,
    wants_reinit: bool,
}

struct ScatterState {
    upstream: ExecutionBlock,
    mode: ScatterMode,
    clients: Vec<ClientQueue>,
    upstream_state: ExecutionState,
    max_buffered: usize,
    upstream_shut_down: bool,
}

impl ScatterState {
    /// Queue a delivered upstream block for the clients
    fn dispatch(&mut self, block: SharedBlock) -> ExecResult<()> {
        match self.mode {
            ScatterMode::Broadcast => {
                for index in 0..self.clients.len() {
                    self.enqueue(index, Arc::clone(&block))?;
                }
            }
            ScatterMode::Distribute { key_register } => {
                let parts = self.partition(&block, key_register)?;
                for (index, part) in parts.into_iter().enumerate() {
                    if !part.is_empty() {
                        self.enqueue(index, Arc::new(part))?;
                    }
                }
            }
        }
        Ok(())
    }

    fn enqueue(&mut self, index: usize, block: SharedBlock) -> ExecResult<()> {
        let max = self.max_buffered;
        let client = &mut self.clients[index];
        if !client.active {
            return Ok(());
        }
        if client.queue.len() >= max {
            return Err(ExecError::ResourceLimit(format!(
                "scatter client {} has {} unread blocks",
                client.id, max
            )));
        }
        client.queue.push_back(block);
        Ok(())
    }

    /// Split `block` into one block per client; shadow rows go to all
    fn partition(&self, block: &RowBlock, key_register: RegisterId) -> ExecResult<Vec<RowBlock>> {
        let n = self.clients.len();
        let mut parts: Vec<RowBlock> = (0..n)
            .map(|_| RowBlock::new(block.len(), block.num_registers()))
            .collect();

        for row in 0..block.len() {
            if let Some(depth) = block.shadow_depth(row) {
                for part in &mut parts {
                    part.push_shadow_row_from(depth, block.row_values(row))?;
                }
                continue;
            }
            let target = route(block.value(row, key_register)?, n);
            parts[target].push_row(block.row_values(row).to_vec())?;
        }
        Ok(parts)
    }

    fn release(&mut self, index: usize, code: i32) -> ExecResult<()> {
        let client = &mut self.clients[index];
        if !client.active {
            return Ok(());
        }
        client.active = false;
        let dropped = client.queue.len();
        client.queue.clear();
        tracing::debug!(client = %client.id, dropped, "scatter client released");

        if self.clients.iter().all(|c| !c.active) && !self.upstream_shut_down {
            self.upstream_shut_down = true;
            tracing::debug!("last scatter client gone, shutting down upstream");
            return self.upstream.shutdown(code);
        }
        Ok(())
    }
}

/// Shared handle to a scatter; cloning it does not add a client
#[derive(Clone)]
pub struct Scatter {
    inner: Arc<Mutex<ScatterState>>,
}

impl Scatter {
    /// Create a scatter over `upstream` for the given client ids
    pub fn new(
        upstream: ExecutionBlock,
        mode: ScatterMode,
        client_ids: Vec<String>,
        max_buffered: usize,
    ) -> ExecResult<Self> {
        let mut seen = HashSet::new();
        for id in &client_ids {
            if !seen.insert(id.as_str()) {
                return Err(ExecError::DuplicateClient(id.clone()));
            }
        }
        if client_ids.is_empty() {
            return Err(ExecError::InvalidCall("scatter without clients".to_string()));
        }

        let clients = client_ids
            .into_iter()
            .map(|id| ClientQueue {
                id,
                queue: VecDeque::new(),
                active: true,
                claimed: false,
                wants_reinit: false,
            })
            .collect();
        Ok(Scatter {
            inner: Arc::new(Mutex::new(ScatterState {
                upstream,
                mode,
                clients,
                upstream_state: ExecutionState::HasMore,
                max_buffered,
                upstream_shut_down: false,
            })),
        })
    }

    pub fn mode(&self) -> ScatterMode {
        self.inner.lock().mode
    }

    /// Ids of all clients, registered or released
    pub fn client_ids(&self) -> Vec<String> {
        self.inner.lock().clients.iter().map(|c| c.id.clone()).collect()
    }

    /// Fetcher reading the rows of client `id`
    pub fn client(&self, id: &str) -> ExecResult<ScatterFetcher> {
        let mut state = self.inner.lock();
        let index = state
            .clients
            .iter()
            .position(|c| c.id == id && c.active)
            .ok_or_else(|| ExecError::UnknownClient(id.to_string()))?;
        let client = &mut state.clients[index];
        if client.claimed {
            return Err(ExecError::DuplicateClient(id.to_string()));
        }
        client.claimed = true;
        Ok(ScatterFetcher {
            scatter: self.clone(),
            index,
            client_id: id.to_string(),
            released: false,
        })
    }

    /// Blocks queued for client `id` and not read yet
    pub fn buffered(&self, id: &str) -> usize {
        self.inner
            .lock()
            .clients
            .iter()
            .find(|c| c.id == id)
            .map_or(0, |c| c.queue.len())
    }

    /// Number of clients still registered
    pub fn active_clients(&self) -> usize {
        self.inner.lock().clients.iter().filter(|c| c.active).count()
    }

    /// Check if the upstream was shut down
    pub fn is_upstream_shut_down(&self) -> bool {
        self.inner.lock().upstream_shut_down
    }
}

/// Fetcher of one scatter client
pub struct ScatterFetcher {
    scatter: Scatter,
    index: usize,
    client_id: String,
    released: bool,
}

impl ScatterFetcher {
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn execute(
        &mut self,
        stack: &DemandStack,
    ) -> ExecResult<(ExecutionState, SkipLedger, InputRange)> {
        if self.released {
            return Err(ExecError::UnknownClient(self.client_id.clone()));
        }
        let depth = stack.depth();
        let mut state = self.scatter.inner.lock();

        loop {
            let upstream_done = state.upstream_state == ExecutionState::Done;
            let queue = &mut state.clients[self.index].queue;
            if let Some(block) = queue.pop_front() {
                let answer = if queue.is_empty() && upstream_done {
                    ExecutionState::Done
                } else {
                    ExecutionState::HasMore
                };
                tracing::trace!(client = %self.client_id, rows = block.len(), "scatter delivers block");
                return Ok((answer, SkipLedger::new(depth), InputRange::new(Some(block), answer)));
            }
            if upstream_done {
                return Ok(exhausted(depth));
            }

            tracing::trace!(client = %self.client_id, "scatter pulls upstream");
            let result = state.upstream.execute(DemandStack::fetch_all(depth))?;
            if result.state == ExecutionState::Waiting {
                return Ok(waiting(depth));
            }
            state.upstream_state = result.state;
            if let Some(block) = result.block {
                state.dispatch(block)?;
            }
        }
    }

    /// Deregister this client
    pub fn shutdown(&mut self, code: i32) -> ExecResult<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.scatter.inner.lock().release(self.index, code)
    }

    /// Ask for a new run; the upstream restarts once every registered
    /// client asked for it
    pub fn initialize_cursor(&mut self) -> ExecResult<()> {
        let mut state = self.scatter.inner.lock();
        let client = &mut state.clients[self.index];
        client.queue.clear();
        client.wants_reinit = true;

        if state.clients.iter().all(|c| !c.active || c.wants_reinit) {
            for client in &mut state.clients {
                client.wants_reinit = false;
            }
            state.upstream_state = ExecutionState::HasMore;
            state.upstream.initialize_cursor(None)?;
        }
        Ok(())
    }
}

impl Drop for ScatterFetcher {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        tracing::warn!(client = %self.client_id, "scatter client dropped without shutdown");
        if let Err(e) = self.shutdown(0) {
            tracing::warn!(client = %self.client_id, error = %e, "releasing scatter client failed");
        }
    }
}
