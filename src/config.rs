//! Engine configuration

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::executor::error::{ExecError, ExecResult};

/// Default number of rows in an output block
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Default upper bound for a single block allocation
pub const DEFAULT_MAX_BLOCK_ROWS: usize = 10_000;

/// Default timeout for one remote round trip
pub const DEFAULT_REMOTE_TIMEOUT_MS: u64 = 30_000;

/// Default bound on one remote request or response frame
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Default bound on blocks queued for a single scatter client
pub const DEFAULT_SCATTER_MAX_BUFFERED_BLOCKS: usize = 1024;

/// Configuration shared by all blocks of a query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Rows per output block when the caller does not ask for fewer
    pub batch_size: usize,

    /// Largest block the block manager hands out
    pub max_block_rows: usize,

    /// Timeout for a remote execute or shutdown request
    pub remote_timeout_ms: u64,

    /// Largest remote frame body accepted from a peer
    pub max_frame_bytes: usize,

    /// Blocks a scatter may queue for one client before failing
    pub scatter_max_buffered_blocks: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_block_rows: DEFAULT_MAX_BLOCK_ROWS,
            remote_timeout_ms: DEFAULT_REMOTE_TIMEOUT_MS,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            scatter_max_buffered_blocks: DEFAULT_SCATTER_MAX_BUFFERED_BLOCKS,
        }
    }
}

impl EngineConfig {
    /// Create a config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overlaid with `AQLBLOCK_*` environment variables
    ///
    /// Recognized: `AQLBLOCK_BATCH_SIZE`, `AQLBLOCK_MAX_BLOCK_ROWS`,
    /// `AQLBLOCK_REMOTE_TIMEOUT_MS`, `AQLBLOCK_MAX_FRAME_BYTES`,
    /// `AQLBLOCK_SCATTER_MAX_BUFFERED_BLOCKS`.
    pub fn from_env() -> ExecResult<Self> {
        let mut config = Self::default();
        if let Some(v) = env_number("AQLBLOCK_BATCH_SIZE")? {
            config.batch_size = v as usize;
        }
        if let Some(v) = env_number("AQLBLOCK_MAX_BLOCK_ROWS")? {
            config.max_block_rows = v as usize;
        }
        if let Some(v) = env_number("AQLBLOCK_REMOTE_TIMEOUT_MS")? {
            config.remote_timeout_ms = v;
        }
        if let Some(v) = env_number("AQLBLOCK_MAX_FRAME_BYTES")? {
            config.max_frame_bytes = v as usize;
        }
        if let Some(v) = env_number("AQLBLOCK_SCATTER_MAX_BUFFERED_BLOCKS")? {
            config.scatter_max_buffered_blocks = v as usize;
        }
        config.validate()?;
        Ok(config)
    }

    /// Set the output batch size
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Set the allocation bound
    pub fn with_max_block_rows(mut self, rows: usize) -> Self {
        self.max_block_rows = rows;
        self
    }

    /// Set the remote timeout
    pub fn with_remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the remote frame bound
    pub fn with_max_frame_bytes(mut self, bytes: usize) -> Self {
        self.max_frame_bytes = bytes;
        self
    }

    /// Set the per-client scatter queue bound
    pub fn with_scatter_max_buffered_blocks(mut self, blocks: usize) -> Self {
        self.scatter_max_buffered_blocks = blocks;
        self
    }

    /// Remote timeout as a duration
    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }

    /// Reject zero sizes and a batch larger than the allocation bound
    pub fn validate(&self) -> ExecResult<()> {
        if self.batch_size == 0 {
            return Err(ExecError::Config("batch_size must be positive".to_string()));
        }
        if self.max_block_rows == 0 {
            return Err(ExecError::Config(
                "max_block_rows must be positive".to_string(),
            ));
        }
        if self.batch_size > self.max_block_rows {
            return Err(ExecError::Config(format!(
                "batch_size {} exceeds max_block_rows {}",
                self.batch_size, self.max_block_rows
            )));
        }
        if self.remote_timeout_ms == 0 {
            return Err(ExecError::Config(
                "remote_timeout_ms must be positive".to_string(),
            ));
        }
        if self.max_frame_bytes == 0 {
            return Err(ExecError::Config(
                "max_frame_bytes must be positive".to_string(),
            ));
        }
        if self.scatter_max_buffered_blocks == 0 {
            return Err(ExecError::Config(
                "scatter_max_buffered_blocks must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_number(name: &str) -> ExecResult<Option<u64>> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| ExecError::Config(format!("{}={:?}: {}", name, raw, e))),
        Err(_) => Ok(None),
    }
}
