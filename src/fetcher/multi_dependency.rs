//! Fetcher over several dependencies (gather)
//!
//! Dependencies are drained in order, one subquery iteration at a time:
//! the rows of dependency 0 up to its next shadow row, then those of
//! dependency 1, and so on. When every dependency has reached the same
//! shadow row, that shadow row is delivered once and all of them move on
//! to the next iteration.

use std::sync::Arc;

use super::{exhausted, waiting};
use crate::block::{RowBlock, ShadowDepth, SharedBlock, Value};
use crate::cursor::InputRange;
use crate::demand::{DemandStack, SkipLedger};
use crate::engine::{ExecutionBlock, ExecutionState};
use crate::executor::error::{ExecError, ExecResult};

struct Dependency {
    block: ExecutionBlock,
    /// Rows received but not delivered yet, from the given index
    pending: Option<(SharedBlock, usize)>,
    upstream_done: bool,
    /// The shadow row this dependency stopped at
    at_shadow: Option<(ShadowDepth, Vec<Value>)>,
}

impl Dependency {
    fn exhausted(&self) -> bool {
        self.upstream_done && self.pending.is_none() && self.at_shadow.is_none()
    }

    fn reset(&mut self) {
        self.pending = None;
        self.upstream_done = false;
        self.at_shadow = None;
    }
}

/// Reads several dependencies in order
pub struct MultiDependencyFetcher {
    dependencies: Vec<Dependency>,
    num_registers: usize,
}

impl MultiDependencyFetcher {
    pub fn new(dependencies: Vec<ExecutionBlock>, num_registers: usize) -> Self {
        MultiDependencyFetcher {
            dependencies: dependencies
                .into_iter()
                .map(|block| Dependency {
                    block,
                    pending: None,
                    upstream_done: false,
                    at_shadow: None,
                })
                .collect(),
            num_registers,
        }
    }

    pub fn num_dependencies(&self) -> usize {
        self.dependencies.len()
    }

    pub fn execute(
        &mut self,
        stack: &DemandStack,
    ) -> ExecResult<(ExecutionState, SkipLedger, InputRange)> {
        let depth = stack.depth();

        for (index, dep) in self.dependencies.iter_mut().enumerate() {
            while dep.at_shadow.is_none() && !dep.exhausted() {
                let (block, start) = match dep.pending.take() {
                    Some(pending) => pending,
                    None => {
                        let result = dep.block.execute(DemandStack::fetch_all(depth))?;
                        match result.state {
                            ExecutionState::Waiting => return Ok(waiting(depth)),
                            ExecutionState::Done => dep.upstream_done = true,
                            ExecutionState::HasMore => {}
                        }
                        match result.block {
                            Some(block) if !block.is_empty() => (block, 0),
                            _ => continue,
                        }
                    }
                };

                let end = block.len();
                match (start..end).find(|&i| block.is_shadow_row(i)) {
                    None => return Ok(deliver(depth, block, start, end)),
                    Some(split) if split > start => {
                        dep.pending = Some((Arc::clone(&block), split));
                        return Ok(deliver(depth, block, start, split));
                    }
                    Some(split) => {
                        dep.at_shadow = block
                            .shadow_depth(split)
                            .map(|d| (d, block.row_values(split).to_vec()));
                        tracing::trace!(
                            dependency = index,
                            depth = ?dep.at_shadow.as_ref().map(|(d, _)| *d),
                            "dependency at shadow row"
                        );
                        if split + 1 < end {
                            dep.pending = Some((block, split + 1));
                        }
                    }
                }
            }
        }

        self.close_iteration(depth)
    }

    /// Every dependency is exhausted or waits at a shadow row
    fn close_iteration(
        &mut self,
        depth: usize,
    ) -> ExecResult<(ExecutionState, SkipLedger, InputRange)> {
        if self.dependencies.iter().all(Dependency::exhausted) {
            return Ok(exhausted(depth));
        }

        // Every dependency carries the same outer row; the first one is used
        let mut shadow: Option<(ShadowDepth, &[Value])> = None;
        for dep in &self.dependencies {
            match (&dep.at_shadow, shadow) {
                (None, _) => {
                    return Err(ExecError::Internal(
                        "gather dependencies disagree on subquery boundaries".to_string(),
                    ))
                }
                (Some((d, _)), Some((seen, _))) if *d != seen => {
                    return Err(ExecError::Internal(format!(
                        "gather dependencies end iterations at depths {} and {}",
                        seen, d
                    )))
                }
                (Some(_), Some(_)) => {}
                (Some((d, values)), None) => shadow = Some((*d, values.as_slice())),
            }
        }

        let mut block = RowBlock::new(1, self.num_registers);
        if let Some((d, values)) = shadow {
            block.push_shadow_row_from(d, values)?;
        }
        for dep in &mut self.dependencies {
            dep.at_shadow = None;
        }

        let state = if self.dependencies.iter().all(Dependency::exhausted) {
            ExecutionState::Done
        } else {
            ExecutionState::HasMore
        };
        Ok((
            state,
            SkipLedger::new(depth),
            InputRange::new(Some(Arc::new(block)), state),
        ))
    }

    pub fn shutdown(&mut self, code: i32) -> ExecResult<()> {
        let mut first_error = None;
        for dep in &mut self.dependencies {
            if let Err(e) = dep.block.shutdown(code) {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn initialize_cursor(&mut self, input: Option<&RowBlock>) -> ExecResult<()> {
        for dep in &mut self.dependencies {
            dep.reset();
            dep.block.initialize_cursor(input)?;
        }
        Ok(())
    }
}

/// Range over rows `start..end` of `block`, reusing it when it is whole
fn deliver(
    depth: usize,
    block: SharedBlock,
    start: usize,
    end: usize,
) -> (ExecutionState, SkipLedger, InputRange) {
    let block = if start == 0 && end == block.len() {
        block
    } else {
        Arc::new(block.slice(start, end))
    };
    (
        ExecutionState::HasMore,
        SkipLedger::new(depth),
        InputRange::new(Some(block), ExecutionState::HasMore),
    )
}
