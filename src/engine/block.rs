//! Generic execution block
//!
//! [`ExecutionBlockImpl`] drives one executor. It owns the fetcher for its
//! dependencies and the current input range, and it does all demand
//! bookkeeping: offsets, limits, full count, shadow rows and subquery
//! skipping. Executors only ever see data rows.
//!
//! One `execute` call runs a small state machine until it has something to
//! return:
//!
//! ```text
//! CheckCall -> Skip | Produce | FastForward | ShadowRows | Return
//! Skip / Produce / FastForward -> CheckCall | Upstream | ShadowRows | Return
//! Upstream -> CheckCall (or suspend when the dependency is waiting)
//! ShadowRows -> CheckCall | Return
//! ```
//!
//! A `Waiting` upstream suspends the call: the working demand, the skip
//! ledger and any partly written output are parked and the next `execute`
//! resumes them instead of looking at its argument.

use std::sync::Arc;

use tracing::{debug, trace};

use super::query::QueryContext;
use super::{ExecuteResult, ExecutionState};
use crate::block::{into_unique, RegisterInfos, RowBlock, Value};
use crate::cursor::{InputRange, OutputCursor};
use crate::demand::{Call, CallList, DemandStack, SkipLedger};
use crate::executor::error::{ExecError, ExecResult};
use crate::executor::{ExecutionStats, Executor, ExecutorState};
use crate::fetcher::Fetcher;

/// Coarse lifecycle of a block between calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockPhase {
    /// Nothing buffered; the next call goes upstream
    Idle,
    /// Input rows or executor state left over from the previous call
    HasBufferedRange,
    /// Everything was delivered; further calls answer `Done` immediately
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    CheckCall,
    Skip,
    Produce,
    FastForward,
    Upstream,
    ShadowRows,
    Return,
}

/// Everything one `execute` call works on
struct CallState {
    /// Working copy of the caller's stack, frame 0 is this block's call
    stack: DemandStack,
    skipped: SkipLedger,
    output: Option<OutputCursor>,
    passthrough: Option<RowBlock>,
}

enum Flow {
    Return,
    Waiting,
}

/// Execution block over executor `E`
pub struct ExecutionBlockImpl<E: Executor> {
    id: usize,
    executor: E,
    fetcher: Fetcher,
    infos: Arc<RegisterInfos>,
    ctx: Arc<QueryContext>,
    range: InputRange,
    step: Step,
    executor_state: ExecutorState,
    /// The executor cannot use the rest of the current iteration
    executor_done: bool,
    /// The rest of the current iteration is dropped, executor included
    dropping_iteration: bool,
    suspended: Option<CallState>,
    stats: ExecutionStats,
}

impl<E: Executor> ExecutionBlockImpl<E> {
    /// Create a block; fails on an invalid register plan or an executor
    /// that claims pass-through without preserving order
    pub fn new(
        executor: E,
        fetcher: Fetcher,
        infos: RegisterInfos,
        ctx: Arc<QueryContext>,
    ) -> ExecResult<Self> {
        let props = E::PROPERTIES;
        if props.allows_passthrough && !props.preserves_order {
            return Err(ExecError::IncompatibleProperties { executor: E::NAME });
        }
        infos.validate()?;
        if props.allows_passthrough {
            infos.validate_passthrough()?;
        }

        let id = ctx.next_block_id();
        debug!(block = id, executor = E::NAME, "created execution block");
        Ok(ExecutionBlockImpl {
            id,
            executor,
            fetcher,
            infos: Arc::new(infos),
            ctx,
            range: InputRange::empty(ExecutionState::HasMore),
            step: Step::CheckCall,
            executor_state: ExecutorState::Done,
            executor_done: false,
            dropping_iteration: false,
            suspended: None,
            stats: ExecutionStats::default(),
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn infos(&self) -> &RegisterInfos {
        &self.infos
    }

    pub fn phase(&self) -> BlockPhase {
        if self.range.has_more()
            || self.executor_state == ExecutorState::HasMore
            || self.owes_now()
        {
            BlockPhase::HasBufferedRange
        } else if self.range.upstream_state() == ExecutionState::Done {
            BlockPhase::Done
        } else {
            BlockPhase::Idle
        }
    }

    /// Pull rows according to `stack`
    ///
    /// After a `Waiting` answer the next call resumes the suspended one and
    /// ignores its argument.
    pub fn execute(&mut self, stack: DemandStack) -> ExecResult<ExecuteResult> {
        self.ctx.check_killed()?;

        let mut cs = match self.suspended.take() {
            Some(cs) => {
                trace!(block = self.id, "resuming suspended call");
                cs
            }
            None => {
                if stack.is_empty() {
                    return Err(ExecError::InvalidCall("empty demand stack".to_string()));
                }
                if self.phase() == BlockPhase::Done {
                    return Ok(ExecuteResult::done(stack.depth()));
                }
                CallState {
                    skipped: SkipLedger::new(stack.depth()),
                    stack,
                    output: None,
                    passthrough: None,
                }
            }
        };

        debug!(block = self.id, executor = E::NAME, stack = %cs.stack, "execute");
        let flow = self.run(&mut cs);
        self.flush_stats();
        match flow {
            Ok(Flow::Return) => Ok(self.finish(cs)),
            Ok(Flow::Waiting) => {
                let depth = cs.stack.depth();
                self.suspended = Some(cs);
                debug!(block = self.id, "suspended on upstream");
                Ok(ExecuteResult::waiting(depth))
            }
            Err(e) => {
                self.step = Step::CheckCall;
                debug!(block = self.id, error = %e, "execute failed");
                Err(e)
            }
        }
    }

    /// Release resources of this block and its dependencies
    pub fn shutdown(&mut self, code: i32) -> ExecResult<()> {
        debug!(block = self.id, code, "shutdown");
        self.suspended = None;
        self.fetcher.shutdown(code)
    }

    /// Reset for a new run; a constant fetcher takes `input` as its rows
    pub fn initialize_cursor(&mut self, input: Option<&RowBlock>) -> ExecResult<()> {
        trace!(block = self.id, "initialize cursor");
        self.range = InputRange::empty(ExecutionState::HasMore);
        self.step = Step::CheckCall;
        self.executor.restart();
        self.executor_state = ExecutorState::Done;
        self.executor_done = false;
        self.dropping_iteration = false;
        self.suspended = None;
        self.fetcher.initialize_cursor(input)
    }

    fn run(&mut self, cs: &mut CallState) -> ExecResult<Flow> {
        loop {
            trace!(block = self.id, step = ?self.step, "step");
            match self.step {
                Step::CheckCall => self.step = self.next_step(cs),
                Step::Skip => {
                    let (state, stats, n) =
                        self.executor.skip_rows_range(&mut self.range, cs.stack.call())?;
                    self.stats += stats;
                    cs.stack.call_mut().did_skip(n);
                    cs.skipped.add(0, n);
                    self.step = self.after_executor(state);
                }
                Step::Produce => {
                    if !self.range.has_data_row()
                        && self.executor_state == ExecutorState::Done
                        && !self.owes_now()
                    {
                        self.step = self.after_input();
                        continue;
                    }
                    if cs.output.is_none() {
                        if self.passthrough_eligible(cs) {
                            self.produce_passthrough(cs)?;
                            self.step = Step::Return;
                            continue;
                        }
                        cs.output = Some(self.allocate_output(cs)?);
                    }
                    let output = cs
                        .output
                        .as_mut()
                        .ok_or_else(|| ExecError::Internal("no output block".to_string()))?;
                    let before = output.produced();
                    let (state, stats) = self.executor.produce_rows(&mut self.range, output)?;
                    let produced = (output.produced() - before) as u64;
                    self.stats += stats;
                    cs.stack.call_mut().did_produce(produced);
                    self.step = self.after_executor(state);
                }
                Step::FastForward => self.fast_forward(cs)?,
                Step::Upstream => {
                    if !self.fetch_upstream(cs)? {
                        return Ok(Flow::Waiting);
                    }
                    self.step = Step::CheckCall;
                }
                Step::ShadowRows => self.shadow_rows(cs)?,
                Step::Return => {
                    self.step = Step::CheckCall;
                    return Ok(Flow::Return);
                }
            }
        }
    }

    fn next_step(&self, cs: &CallState) -> Step {
        if cs.passthrough.is_some() {
            return Step::Return;
        }
        if self.executor_done || cs.stack.skip_level().is_some() {
            return Step::FastForward;
        }
        let call = cs.stack.call();
        if call.need_skip_more() {
            return Step::Skip;
        }
        if call.limit() > 0 {
            if let Some(output) = &cs.output {
                if output.is_full() {
                    return if self.range.has_shadow_row()
                        && output.has_room()
                        && self.iteration_drained()
                    {
                        Step::ShadowRows
                    } else {
                        Step::Return
                    };
                }
            }
            return Step::Produce;
        }
        if call.hard_limit_reached() {
            return Step::FastForward;
        }
        if self.range.has_shadow_row() && self.iteration_drained() {
            return Step::ShadowRows;
        }
        Step::Return
    }

    /// The executor still has to write a row for the iteration that ends here
    fn owes_now(&self) -> bool {
        !self.dropping_iteration && self.executor.owes_rows() && self.range.at_iteration_end()
    }

    /// Nothing of the current iteration is left to produce
    fn iteration_drained(&self) -> bool {
        self.executor_state == ExecutorState::Done && !self.owes_now()
    }

    /// Where to go once the executor answered `state`
    fn after_executor(&mut self, state: ExecutorState) -> Step {
        self.executor_state = state;
        match state {
            ExecutorState::HasMore => Step::CheckCall,
            ExecutorState::Done => {
                if self.range.has_data_row() {
                    self.executor_done = true;
                    Step::FastForward
                } else {
                    self.after_input()
                }
            }
        }
    }

    /// Next step once the data rows of the current iteration are gone
    fn after_input(&self) -> Step {
        if self.owes_now() {
            Step::CheckCall
        } else if self.range.has_shadow_row() {
            Step::ShadowRows
        } else if self.range.upstream_state() == ExecutionState::Done {
            Step::Return
        } else {
            Step::Upstream
        }
    }

    /// Consume the rest of the current iteration
    ///
    /// Rows are counted into the ledger when the client needs a full count
    /// and the executor can still produce them; otherwise they are dropped.
    fn fast_forward(&mut self, cs: &mut CallState) -> ExecResult<()> {
        let counting = !self.executor_done
            && cs.stack.skip_level().is_none()
            && cs.stack.call().needs_full_count();

        if counting {
            let (state, stats, n) =
                self.executor.skip_rows_range(&mut self.range, cs.stack.call())?;
            self.stats += stats;
            cs.skipped.add(0, n);
            self.executor_state = state;
            if state == ExecutorState::HasMore {
                return Ok(());
            }
            if self.range.has_data_row() {
                self.executor_done = true;
                return Ok(());
            }
        } else {
            self.dropping_iteration = true;
            let dropped = self.range.skip_data_rows(u64::MAX);
            if dropped > 0 {
                trace!(block = self.id, dropped, "dropped rows");
            }
            if self.executor_state == ExecutorState::HasMore {
                self.executor.reset();
                self.executor_state = ExecutorState::Done;
            }
        }

        self.step = self.after_input();
        Ok(())
    }

    /// Fetch the next input range; false when the dependency is waiting
    fn fetch_upstream(&mut self, cs: &mut CallState) -> ExecResult<bool> {
        // A fast-forward must not outlive the iteration it drops
        let frame = if self.executor_done || cs.stack.skip_level().is_some() {
            CallList::with_next(Call::fast_forward(), Call::new())
        } else {
            CallList::new(self.executor.upstream_call(cs.stack.call()))
        };
        let upstream = cs.stack.replace_innermost(frame);
        trace!(block = self.id, stack = %upstream, "fetching upstream");

        let (state, skipped, range) = self.fetcher.execute(upstream)?;
        if state == ExecutionState::Waiting {
            return Ok(false);
        }

        for (depth, n) in skipped.iter() {
            if n == 0 {
                continue;
            }
            if let Some(frame) = cs.stack.frame_mut(depth) {
                frame.peek_mut().did_skip(n);
            }
            cs.skipped.add(depth, n);
        }
        // Whole iterations dropped upstream end the current one here too
        if cs.stack.rotate_skipped(&skipped) {
            trace!(block = self.id, "iterations skipped upstream");
            self.end_iteration();
        }
        self.range = range;
        Ok(true)
    }

    /// Handle consecutive shadow rows at the head of the range
    fn shadow_rows(&mut self, cs: &mut CallState) -> ExecResult<()> {
        let mut emitted = false;
        while let Some(depth) = self.range.peek_shadow_depth() {
            if self.owes_now() {
                break;
            }
            let level = depth as usize + 1;
            match cs.stack.skip_level() {
                Some(skip) if skip > level => {
                    trace!(block = self.id, depth, "dropping shadow row");
                }
                Some(skip) if skip == level => {
                    if let Some(frame) = cs.stack.frame_mut(level) {
                        let call = frame.peek_mut();
                        if call.need_skip_more() {
                            call.did_skip(1);
                            cs.skipped.add(level, 1);
                        } else if call.needs_full_count() {
                            cs.skipped.add(level, 1);
                        }
                    }
                }
                _ => {
                    if cs.output.is_none() {
                        cs.output = Some(self.allocate_output(cs)?);
                    }
                    let output = cs
                        .output
                        .as_mut()
                        .ok_or_else(|| ExecError::Internal("no output block".to_string()))?;
                    if !output.has_room() {
                        self.step = Step::Return;
                        return Ok(());
                    }
                    let Some((_, row)) = self.range.peek_shadow_row() else {
                        break;
                    };
                    output.copy_shadow_row(&row, depth)?;
                    if let Some(frame) = cs.stack.frame_mut(level) {
                        frame.peek_mut().did_produce(1);
                    }
                    emitted = true;
                }
            }

            self.range.next_shadow_row();
            self.end_iteration();
            cs.stack.rotate_upto(depth as usize);
        }

        self.step = if emitted {
            Step::Return
        } else {
            Step::CheckCall
        };
        Ok(())
    }

    fn end_iteration(&mut self) {
        self.executor.reset();
        self.executor_state = ExecutorState::Done;
        self.executor_done = false;
        self.dropping_iteration = false;
    }

    fn allocate_output(&self, cs: &CallState) -> ExecResult<OutputCursor> {
        let config = self.ctx.config();
        let data_cap = cs.stack.call().limit().min(config.batch_size as u64) as usize;
        let capacity = (data_cap + self.range.count_shadow_rows())
            .min(config.max_block_rows)
            .max(1);
        let block = self
            .ctx
            .block_manager()
            .request_block(capacity, self.infos.num_output_registers)?;
        Ok(OutputCursor::new(block, Arc::clone(&self.infos), data_cap))
    }

    /// Check if the input block can be handed out as the output block
    fn passthrough_eligible(&self, cs: &CallState) -> bool {
        if !E::PROPERTIES.allows_passthrough
            || self.executor_done
            || self.executor_state == ExecutorState::HasMore
        {
            return false;
        }
        if !self.range.is_fresh() || !self.range.has_data_row() || !self.range.data_rows_first() {
            return false;
        }
        let call = cs.stack.call();
        if call.offset > 0 || cs.stack.skip_level().is_some() {
            return false;
        }
        if self.range.count_data_rows() as u64 > call.limit() {
            return false;
        }
        self.range.count_shadow_rows() == 0 || cs.stack.outer_unconstrained()
    }

    /// Reuse the input block as output, transforming its rows in place
    fn produce_passthrough(&mut self, cs: &mut CallState) -> ExecResult<()> {
        let data_rows = self.range.count_data_rows();
        let Some(shared) = self.range.take_block() else {
            return Ok(());
        };
        let mut block = into_unique(shared);

        self.stats += self.executor.transform_in_place(&mut block, 0..data_rows)?;
        for &reg in &self.infos.registers_to_clear {
            for row in 0..data_rows {
                block.set_value(row, reg, Value::Null)?;
            }
        }
        cs.stack.call_mut().did_produce(data_rows as u64);

        for row in data_rows..block.len() {
            if let Some(depth) = block.shadow_depth(row) {
                if let Some(frame) = cs.stack.frame_mut(depth as usize + 1) {
                    frame.peek_mut().did_produce(1);
                }
                cs.stack.rotate_upto(depth as usize);
            }
        }
        if block.has_shadow_rows() {
            self.end_iteration();
        }
        self.executor_state = ExecutorState::Done;

        debug!(block = self.id, rows = block.len(), "passed input block through");
        cs.passthrough = Some(block);
        Ok(())
    }

    fn finish(&mut self, cs: CallState) -> ExecuteResult {
        let CallState {
            skipped,
            output,
            passthrough,
            ..
        } = cs;

        let block = match (passthrough, output) {
            (Some(block), _) => Some(block),
            (None, Some(output)) if !output.is_empty() => {
                let mut block = output.into_block();
                block.shrink_to_fit();
                Some(block)
            }
            (None, Some(output)) => {
                self.ctx.block_manager().return_block(output.into_block());
                None
            }
            (None, None) => None,
        };

        let state = if self.executor_state == ExecutorState::HasMore
            || self.range.has_more()
            || self.owes_now()
        {
            ExecutionState::HasMore
        } else {
            self.range.upstream_state()
        };

        debug!(
            block = self.id,
            ?state,
            rows = block.as_ref().map_or(0, RowBlock::len),
            skipped = skipped.total(),
            "execute returned"
        );
        ExecuteResult {
            state,
            skipped,
            block: block.map(Arc::new),
        }
    }

    fn flush_stats(&mut self) {
        if !self.stats.is_empty() {
            self.ctx.add_stats(std::mem::take(&mut self.stats));
        }
    }
}
