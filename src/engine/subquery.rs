//! Subquery boundary blocks
//!
//! [`SubqueryStartBlock`] opens one subquery iteration per input row: the
//! row goes out as a data row for the subquery body, followed by a shadow
//! row of depth 0 carrying the same values. Every shadow row it receives
//! leaves one depth deeper. The demand stack it answers to has one more
//! frame than the one it sends upstream.
//!
//! [`SubqueryEndBlock`] is the reverse. It asks for all inner rows, folds
//! the rows of one iteration into an array and turns the closing depth-0
//! shadow row back into a data row holding that array. Deeper shadow rows
//! leave one depth shallower.

use std::sync::Arc;

use tracing::{debug, trace};

use super::query::QueryContext;
use super::{ExecuteResult, ExecutionState};
use crate::block::{RegisterId, RegisterInfos, RowBlock, ShadowDepth, Value};
use crate::cursor::{InputRange, OutputCursor};
use crate::demand::{Call, CallList, DemandStack, SkipLedger};
use crate::executor::error::{ExecError, ExecResult};
use crate::fetcher::Fetcher;

/// What happens to a shadow row of the given level under `stack`
enum ShadowAction {
    Drop,
    Skip,
    Count,
    Emit,
}

fn shadow_action(stack: &DemandStack, level: usize) -> ShadowAction {
    match stack.skip_level() {
        Some(skip) if skip > level => ShadowAction::Drop,
        Some(skip) if skip == level => match stack.frame(level).map(CallList::peek) {
            Some(call) if call.need_skip_more() => ShadowAction::Skip,
            Some(call) if call.needs_full_count() => ShadowAction::Count,
            _ => ShadowAction::Drop,
        },
        _ => ShadowAction::Emit,
    }
}

/// Account a shadow row at `level` the way `action` says
fn account_shadow(
    stack: &mut DemandStack,
    skipped: &mut SkipLedger,
    level: usize,
    action: ShadowAction,
) {
    match action {
        ShadowAction::Drop => {}
        ShadowAction::Skip => {
            if let Some(frame) = stack.frame_mut(level) {
                frame.peek_mut().did_skip(1);
            }
            skipped.add(level, 1);
        }
        ShadowAction::Count => skipped.add(level, 1),
        ShadowAction::Emit => {
            if let Some(frame) = stack.frame_mut(level) {
                frame.peek_mut().did_produce(1);
            }
        }
    }
}

fn request_output(
    ctx: &QueryContext,
    infos: &Arc<RegisterInfos>,
    data_cap: usize,
    shadow_rows: usize,
) -> ExecResult<OutputCursor> {
    let capacity = (data_cap + shadow_rows)
        .min(ctx.config().max_block_rows)
        .max(1);
    let block = ctx
        .block_manager()
        .request_block(capacity, infos.num_output_registers)?;
    Ok(OutputCursor::new(block, Arc::clone(infos), data_cap))
}

fn finish_output(ctx: &QueryContext, output: Option<OutputCursor>) -> Option<RowBlock> {
    let output = output?;
    if output.is_empty() {
        ctx.block_manager().return_block(output.into_block());
        return None;
    }
    let mut block = output.into_block();
    block.shrink_to_fit();
    Some(block)
}

/// Opens a subquery iteration for every input row
pub struct SubqueryStartBlock {
    id: usize,
    fetcher: Fetcher,
    infos: Arc<RegisterInfos>,
    ctx: Arc<QueryContext>,
    range: InputRange,
    /// The data copy of the head row is handled, its shadow row is next
    copied: bool,
}

impl SubqueryStartBlock {
    pub fn new(fetcher: Fetcher, infos: RegisterInfos, ctx: Arc<QueryContext>) -> ExecResult<Self> {
        infos.validate()?;
        infos.validate_passthrough()?;
        let id = ctx.next_block_id();
        debug!(block = id, "created subquery start block");
        Ok(SubqueryStartBlock {
            id,
            fetcher,
            infos: Arc::new(infos),
            ctx,
            range: InputRange::empty(ExecutionState::HasMore),
            copied: false,
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Pull rows according to `stack`; frame 0 is the subquery body's demand
    pub fn execute(&mut self, stack: DemandStack) -> ExecResult<ExecuteResult> {
        self.ctx.check_killed()?;
        if stack.depth() < 2 {
            return Err(ExecError::InvalidCall(format!(
                "subquery start needs an enclosing frame, got {} frames",
                stack.depth()
            )));
        }
        let depth = stack.depth();
        if !self.range.has_more() && self.range.upstream_state() == ExecutionState::Done {
            return Ok(ExecuteResult::done(depth));
        }

        debug!(block = self.id, stack = %stack, "execute");
        let mut stack = stack;
        let mut skipped = SkipLedger::new(depth);
        let mut output = None;

        loop {
            if !self.range.has_more() {
                if self.range.upstream_state() == ExecutionState::Done {
                    break;
                }
                let mut upstream = stack.clone();
                upstream.pop_innermost()?;
                trace!(block = self.id, stack = %upstream, "fetching upstream");
                let (state, theirs, range) = self.fetcher.execute(upstream)?;
                if state == ExecutionState::Waiting {
                    if output.is_none() && skipped.is_empty() {
                        return Ok(ExecuteResult::waiting(depth));
                    }
                    break;
                }
                let mut ours = SkipLedger::new(depth);
                for (d, n) in theirs.iter().filter(|(_, n)| *n > 0) {
                    if let Some(frame) = stack.frame_mut(d + 1) {
                        frame.peek_mut().did_skip(n);
                    }
                    ours.add(d + 1, n);
                }
                stack.rotate_skipped(&ours);
                skipped.merge(&ours);
                self.range = range;
                continue;
            }

            if self.range.has_data_row() {
                if !self.copied && !self.open_iteration(&mut stack, &mut skipped, &mut output)? {
                    break;
                }
                self.copied = true;
                if !self.close_iteration(&mut stack, &mut skipped, &mut output)? {
                    break;
                }
            }

            // Shadow rows of enclosing queries move one depth down
            let mut emitted = false;
            while let Some(theirs) = self.range.peek_shadow_depth() {
                let ours = theirs + 1;
                let level = ours as usize + 1;
                let action = shadow_action(&stack, level);
                let emit = matches!(action, ShadowAction::Emit);
                if emit && !self.ensure_room(&stack, &mut output)? {
                    return Ok(self.answer(skipped, output));
                }
                account_shadow(&mut stack, &mut skipped, level, action);
                if emit {
                    self.write_shadow(&mut output, ours)?;
                    emitted = true;
                }
                self.range.next_shadow_row();
                stack.rotate_upto(ours as usize);
            }
            if emitted || output.is_some() {
                break;
            }
        }

        Ok(self.answer(skipped, output))
    }

    /// Handle the data copy of the head row; false when the caller has to
    /// come back for it
    fn open_iteration(
        &mut self,
        stack: &mut DemandStack,
        skipped: &mut SkipLedger,
        output: &mut Option<OutputCursor>,
    ) -> ExecResult<bool> {
        if stack.skip_level().is_some() {
            return Ok(true);
        }
        let call = stack.call().clone();
        if call.need_skip_more() {
            stack.call_mut().did_skip(1);
            skipped.add(0, 1);
        } else if call.limit() > 0 {
            if !self.ensure_room(stack, output)? {
                return Ok(false);
            }
            let out = output
                .as_mut()
                .ok_or_else(|| ExecError::Internal("no output block".to_string()))?;
            if out.is_full() {
                return Ok(false);
            }
            let row = self
                .range
                .peek_data_row()
                .ok_or_else(|| ExecError::Internal("no input row".to_string()))?;
            out.pass_row(&row)?;
            stack.call_mut().did_produce(1);
        } else if call.hard_limit_reached() {
            if call.needs_full_count() {
                skipped.add(0, 1);
            }
        } else {
            return Ok(false);
        }
        Ok(true)
    }

    /// Write or account the depth-0 shadow row closing the head row's
    /// iteration and consume the row; false when there is no room left
    fn close_iteration(
        &mut self,
        stack: &mut DemandStack,
        skipped: &mut SkipLedger,
        output: &mut Option<OutputCursor>,
    ) -> ExecResult<bool> {
        let action = shadow_action(stack, 1);
        let emit = matches!(action, ShadowAction::Emit);
        if emit && !self.ensure_room(stack, output)? {
            return Ok(false);
        }
        if emit {
            let out = output
                .as_mut()
                .ok_or_else(|| ExecError::Internal("no output block".to_string()))?;
            let row = self
                .range
                .peek_data_row()
                .ok_or_else(|| ExecError::Internal("no input row".to_string()))?;
            out.copy_shadow_row(&row, 0)?;
        }
        account_shadow(stack, skipped, 1, action);
        self.range.next_data_row();
        self.copied = false;
        stack.rotate_upto(0);
        Ok(true)
    }

    fn ensure_room(
        &self,
        stack: &DemandStack,
        output: &mut Option<OutputCursor>,
    ) -> ExecResult<bool> {
        if output.is_none() {
            let data_cap = stack.call().limit().min(1) as usize;
            *output = Some(request_output(
                &self.ctx,
                &self.infos,
                data_cap,
                1 + self.range.count_shadow_rows(),
            )?);
        }
        Ok(output.as_ref().map_or(false, OutputCursor::has_room))
    }

    fn write_shadow(&self, output: &mut Option<OutputCursor>, depth: ShadowDepth) -> ExecResult<()> {
        let out = output
            .as_mut()
            .ok_or_else(|| ExecError::Internal("no output block".to_string()))?;
        let (_, row) = self
            .range
            .peek_shadow_row()
            .ok_or_else(|| ExecError::Internal("no shadow row".to_string()))?;
        out.copy_shadow_row(&row, depth)
    }

    fn answer(&self, skipped: SkipLedger, output: Option<OutputCursor>) -> ExecuteResult {
        let block = finish_output(&self.ctx, output);
        let state = if self.range.has_more() {
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

    pub fn shutdown(&mut self, code: i32) -> ExecResult<()> {
        debug!(block = self.id, code, "shutdown");
        self.fetcher.shutdown(code)
    }

    pub fn initialize_cursor(&mut self, input: Option<&RowBlock>) -> ExecResult<()> {
        self.range = InputRange::empty(ExecutionState::HasMore);
        self.copied = false;
        self.fetcher.initialize_cursor(input)
    }
}

/// Closes subquery iterations, collecting their rows into an array
pub struct SubqueryEndBlock {
    id: usize,
    fetcher: Fetcher,
    infos: Arc<RegisterInfos>,
    ctx: Arc<QueryContext>,
    range: InputRange,
    in_register: RegisterId,
    output_register: RegisterId,
    /// Values of the running iteration
    collected: Vec<Value>,
}

impl SubqueryEndBlock {
    /// Block writing the inner `in_register` values of each iteration into
    /// `output_register` of the outer row
    pub fn new(
        fetcher: Fetcher,
        infos: RegisterInfos,
        in_register: RegisterId,
        output_register: RegisterId,
        ctx: Arc<QueryContext>,
    ) -> ExecResult<Self> {
        infos.validate()?;
        if in_register >= infos.num_input_registers {
            return Err(ExecError::InvalidRegisterPlan(format!(
                "subquery result register {} is not an input register",
                in_register
            )));
        }
        if !infos.is_output_register(output_register) {
            return Err(ExecError::NotAnOutputRegister(output_register));
        }
        let id = ctx.next_block_id();
        debug!(block = id, "created subquery end block");
        Ok(SubqueryEndBlock {
            id,
            fetcher,
            infos: Arc::new(infos),
            ctx,
            range: InputRange::empty(ExecutionState::HasMore),
            in_register,
            output_register,
            collected: Vec::new(),
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Pull rows according to `stack`
    pub fn execute(&mut self, stack: DemandStack) -> ExecResult<ExecuteResult> {
        self.ctx.check_killed()?;
        if stack.is_empty() {
            return Err(ExecError::InvalidCall("empty demand stack".to_string()));
        }
        let depth = stack.depth();
        if !self.range.has_more() && self.range.upstream_state() == ExecutionState::Done {
            return Ok(ExecuteResult::done(depth));
        }

        debug!(block = self.id, stack = %stack, "execute");
        let mut stack = stack;
        let mut skipped = SkipLedger::new(depth);
        let mut output = None;

        loop {
            if !self.range.has_more() {
                if self.range.upstream_state() == ExecutionState::Done {
                    if !self.collected.is_empty() {
                        return Err(ExecError::Internal(
                            "subquery rows without a closing shadow row".to_string(),
                        ));
                    }
                    break;
                }
                let mut upstream = stack.clone();
                upstream.push_innermost(CallList::new(Call::new()));
                trace!(block = self.id, stack = %upstream, "fetching upstream");
                let (state, theirs, range) = self.fetcher.execute(upstream)?;
                if state == ExecutionState::Waiting {
                    if output.is_none() && skipped.is_empty() {
                        return Ok(ExecuteResult::waiting(depth));
                    }
                    break;
                }
                let mut ours = SkipLedger::new(depth);
                for (d, n) in theirs.iter().skip(1).filter(|(_, n)| *n > 0) {
                    if let Some(frame) = stack.frame_mut(d - 1) {
                        frame.peek_mut().did_skip(n);
                    }
                    ours.add(d - 1, n);
                }
                if !ours.is_empty() {
                    self.collected.clear();
                }
                stack.rotate_skipped(&ours);
                skipped.merge(&ours);
                self.range = range;
                continue;
            }

            while let Some(row) = self.range.next_data_row() {
                self.collected.push(row.value(self.in_register)?.clone());
            }

            match self.range.peek_shadow_depth() {
                Some(0) => {
                    if !self.close_iteration(&mut stack, &mut skipped, &mut output)? {
                        break;
                    }
                }
                Some(_) => {
                    if self.outer_shadow_rows(&mut stack, &mut skipped, &mut output)? {
                        break;
                    }
                }
                None => {}
            }
        }

        Ok(self.answer(skipped, output))
    }

    /// Turn the closing depth-0 shadow row into a data row; false when the
    /// caller has to come back for it
    fn close_iteration(
        &mut self,
        stack: &mut DemandStack,
        skipped: &mut SkipLedger,
        output: &mut Option<OutputCursor>,
    ) -> ExecResult<bool> {
        let call = stack.call().clone();
        if stack.skip_level().is_some() {
            trace!(block = self.id, "dropping subquery result");
        } else if call.need_skip_more() {
            stack.call_mut().did_skip(1);
            skipped.add(0, 1);
        } else if call.limit() > 0 {
            if output.is_none() {
                let data_cap = call.limit().min(self.ctx.config().batch_size as u64) as usize;
                *output = Some(request_output(
                    &self.ctx,
                    &self.infos,
                    data_cap,
                    self.range.count_shadow_rows(),
                )?);
            }
            let out = output
                .as_mut()
                .ok_or_else(|| ExecError::Internal("no output block".to_string()))?;
            if out.is_full() {
                return Ok(false);
            }
            let (_, row) = self
                .range
                .peek_shadow_row()
                .ok_or_else(|| ExecError::Internal("no shadow row".to_string()))?;
            out.copy_row(&row)?;
            out.set_value(
                self.output_register,
                Value::Array(std::mem::take(&mut self.collected)),
            )?;
            out.advance_row()?;
            stack.call_mut().did_produce(1);
        } else if call.hard_limit_reached() {
            if call.needs_full_count() {
                skipped.add(0, 1);
            }
        } else {
            return Ok(false);
        }
        self.collected.clear();
        self.range.next_shadow_row();
        Ok(true)
    }

    /// Forward shadow rows of depth 1 and more one depth up; true once
    /// something was written or the output has no room
    fn outer_shadow_rows(
        &mut self,
        stack: &mut DemandStack,
        skipped: &mut SkipLedger,
        output: &mut Option<OutputCursor>,
    ) -> ExecResult<bool> {
        let mut emitted = false;
        while let Some(theirs) = self.range.peek_shadow_depth() {
            if theirs == 0 {
                break;
            }
            let ours = theirs - 1;
            let level = ours as usize + 1;
            let action = shadow_action(stack, level);
            let emit = matches!(action, ShadowAction::Emit);
            if emit {
                if output.is_none() {
                    *output = Some(request_output(
                        &self.ctx,
                        &self.infos,
                        0,
                        self.range.count_shadow_rows(),
                    )?);
                }
                let out = output
                    .as_mut()
                    .ok_or_else(|| ExecError::Internal("no output block".to_string()))?;
                if !out.has_room() {
                    return Ok(true);
                }
                let (_, row) = self
                    .range
                    .peek_shadow_row()
                    .ok_or_else(|| ExecError::Internal("no shadow row".to_string()))?;
                out.copy_shadow_row(&row, ours)?;
                emitted = true;
            }
            account_shadow(stack, skipped, level, action);
            self.range.next_shadow_row();
            stack.rotate_upto(ours as usize);
        }
        Ok(emitted)
    }

    fn answer(&self, skipped: SkipLedger, output: Option<OutputCursor>) -> ExecuteResult {
        let block = finish_output(&self.ctx, output);
        let state = if self.range.has_more() {
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

    pub fn shutdown(&mut self, code: i32) -> ExecResult<()> {
        debug!(block = self.id, code, "shutdown");
        self.fetcher.shutdown(code)
    }

    pub fn initialize_cursor(&mut self, input: Option<&RowBlock>) -> ExecResult<()> {
        self.range = InputRange::empty(ExecutionState::HasMore);
        self.collected.clear();
        self.fetcher.initialize_cursor(input)
    }
}
