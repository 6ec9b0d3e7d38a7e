//! Block allocation with storage recycling

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use super::{RowBlock, Value};
use crate::executor::error::{ExecError, ExecResult};

/// Upper bound on recycled buffers kept around
const MAX_POOLED_BUFFERS: usize = 16;

/// Hands out row blocks and recycles the register storage of blocks that
/// were returned by their last owner
#[derive(Debug)]
pub struct BlockManager {
    max_block_rows: usize,
    pool: Mutex<Vec<Vec<Value>>>,
    allocated: AtomicUsize,
    recycled: AtomicUsize,
}

impl BlockManager {
    /// Create a manager that refuses blocks larger than `max_block_rows`
    pub fn new(max_block_rows: usize) -> Self {
        BlockManager {
            max_block_rows,
            pool: Mutex::new(Vec::new()),
            allocated: AtomicUsize::new(0),
            recycled: AtomicUsize::new(0),
        }
    }

    /// Allocate an empty block of `rows` x `registers`
    pub fn request_block(&self, rows: usize, registers: usize) -> ExecResult<RowBlock> {
        if rows > self.max_block_rows {
            return Err(ExecError::ResourceLimit(format!(
                "requested {} rows, limit is {}",
                rows, self.max_block_rows
            )));
        }
        self.allocated.fetch_add(1, Ordering::Relaxed);

        let buffer = self.pool.lock().pop();
        match buffer {
            Some(buffer) => {
                self.recycled.fetch_add(1, Ordering::Relaxed);
                Ok(RowBlock::with_buffer(rows, registers, buffer))
            }
            None => Ok(RowBlock::new(rows, registers)),
        }
    }

    /// Give a block back; its storage is reused by a later request
    pub fn return_block(&self, block: RowBlock) {
        let mut pool = self.pool.lock();
        if pool.len() < MAX_POOLED_BUFFERS {
            pool.push(block.into_buffer());
        }
    }

    /// Number of blocks handed out so far
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Number of requests served from recycled storage
    pub fn recycled(&self) -> usize {
        self.recycled.load(Ordering::Relaxed)
    }
}
