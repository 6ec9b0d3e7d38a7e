//! Demand stack: one call list per subquery depth

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{Call, SkipLedger};
use crate::block::RowBlock;
use crate::executor::error::{ExecError, ExecResult};

/// The call of one depth plus the call every new iteration starts from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallList {
    current: Call,
    default: Option<Call>,
}

impl CallList {
    /// A call that carries on across iterations
    pub fn new(call: Call) -> Self {
        CallList {
            current: call,
            default: None,
        }
    }

    /// A call that is restored for every iteration of the enclosing subquery
    pub fn with_default(call: Call) -> Self {
        CallList {
            current: call.clone(),
            default: Some(call),
        }
    }

    /// `current` for the running iteration, `next` for every later one
    pub fn with_next(current: Call, next: Call) -> Self {
        CallList {
            current,
            default: Some(next),
        }
    }

    /// The active call
    pub fn peek(&self) -> &Call {
        &self.current
    }

    /// The active call, mutable
    pub fn peek_mut(&mut self) -> &mut Call {
        &mut self.current
    }

    /// Check if the frame starts every iteration from a fresh call
    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    /// An iteration ended: restart from the default call, if any
    pub fn rotate(&mut self) {
        if let Some(default) = &self.default {
            self.current = default.clone();
        }
    }

    /// Neither this call nor its default restricts rows
    pub fn is_unconstrained(&self) -> bool {
        let free = |c: &Call| c.offset == 0 && c.hard_limit.is_none();
        free(&self.current) && self.default.as_ref().map_or(true, free)
    }
}

impl From<Call> for CallList {
    fn from(call: Call) -> Self {
        CallList::new(call)
    }
}

/// Demand for every active subquery depth, index 0 innermost
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemandStack {
    frames: Vec<CallList>,
}

impl DemandStack {
    /// Stack for a query without subqueries
    pub fn new(call: Call) -> Self {
        DemandStack {
            frames: vec![CallList::new(call)],
        }
    }

    /// Stack from explicit frames, innermost first
    pub fn from_frames(frames: Vec<CallList>) -> Self {
        DemandStack { frames }
    }

    /// Unbounded demand at every one of `depth` levels
    pub fn fetch_all(depth: usize) -> Self {
        DemandStack {
            frames: (0..depth.max(1)).map(|_| CallList::default()).collect(),
        }
    }

    /// Add an enclosing level (outermost position)
    pub fn with_outer(mut self, frame: impl Into<CallList>) -> Self {
        self.frames.push(frame.into());
        self
    }

    /// Number of levels
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Check if the stack has no frames
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frame at `depth`
    pub fn frame(&self, depth: usize) -> Option<&CallList> {
        self.frames.get(depth)
    }

    /// Frame at `depth`, mutable
    pub fn frame_mut(&mut self, depth: usize) -> Option<&mut CallList> {
        self.frames.get_mut(depth)
    }

    /// The innermost frame
    pub fn innermost(&self) -> Option<&CallList> {
        self.frames.first()
    }

    /// Remove and return the innermost frame
    pub fn pop_innermost(&mut self) -> ExecResult<CallList> {
        if self.frames.is_empty() {
            return Err(ExecError::InvalidCall("empty demand stack".to_string()));
        }
        Ok(self.frames.remove(0))
    }

    /// Put a frame back in the innermost position
    pub fn push_innermost(&mut self, frame: CallList) {
        self.frames.insert(0, frame);
    }

    /// The innermost call; the stack must not be empty
    pub(crate) fn call(&self) -> &Call {
        self.frames[0].peek()
    }

    /// The innermost call, mutable; the stack must not be empty
    pub(crate) fn call_mut(&mut self) -> &mut Call {
        self.frames[0].peek_mut()
    }

    /// Copy of the stack with the innermost frame replaced by `frame`
    pub fn replace_innermost(&self, frame: impl Into<CallList>) -> DemandStack {
        let mut stack = self.clone();
        let frame = frame.into();
        match stack.frames.first_mut() {
            Some(first) => *first = frame,
            None => stack.frames.push(frame),
        }
        stack
    }

    /// Validate every frame
    pub fn validate(&self) -> ExecResult<()> {
        if self.frames.is_empty() {
            return Err(ExecError::InvalidCall("empty demand stack".to_string()));
        }
        for frame in &self.frames {
            frame.peek().validate()?;
        }
        Ok(())
    }

    /// Outermost enclosing depth whose current iteration must be dropped
    ///
    /// A depth `d >= 1` asks for that when it still has an offset to skip
    /// or has used up its hard limit.
    pub fn skip_level(&self) -> Option<usize> {
        self.frames
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, f)| f.peek().need_skip_more() || f.peek().hard_limit_reached())
            .map(|(d, _)| d)
            .last()
    }

    /// Check if no enclosing frame restricts iterations
    pub fn outer_unconstrained(&self) -> bool {
        self.frames.iter().skip(1).all(CallList::is_unconstrained)
    }

    /// Restart every frame at depths `0..=depth`
    pub fn rotate_upto(&mut self, depth: usize) {
        for frame in self.frames.iter_mut().take(depth + 1) {
            frame.rotate();
        }
    }

    /// Restart the frames of iterations a dependency dropped
    ///
    /// A skip count at depth `d >= 1` means shadow rows of depth `d - 1`
    /// were consumed upstream without being delivered, so frames `0..d`
    /// start over just as if those shadow rows had passed. Returns whether
    /// any frame was restarted.
    pub fn rotate_skipped(&mut self, skipped: &SkipLedger) -> bool {
        let mut rotated = false;
        for (depth, n) in skipped.iter().skip(1) {
            if n > 0 {
                self.rotate_upto(depth - 1);
                rotated = true;
            }
        }
        rotated
    }

    /// Caller-side bookkeeping after an execute answer
    ///
    /// Applies the skip ledger per depth, counts data rows against depth 0
    /// and a shadow row of depth `d` against depth `d + 1`, and restarts
    /// the frames a delivered or dropped shadow row closes. Afterwards the
    /// stack can be passed to the next `execute` call.
    pub fn account(&mut self, skipped: &SkipLedger, block: Option<&RowBlock>) {
        for (depth, n) in skipped.iter() {
            if let Some(frame) = self.frames.get_mut(depth) {
                frame.peek_mut().did_skip(n);
            }
        }
        self.rotate_skipped(skipped);
        let Some(block) = block else {
            return;
        };
        for row in 0..block.len() {
            match block.shadow_depth(row) {
                None => {
                    if let Some(frame) = self.frames.get_mut(0) {
                        frame.peek_mut().did_produce(1);
                    }
                }
                Some(depth) => {
                    let depth = depth as usize;
                    if let Some(frame) = self.frames.get_mut(depth + 1) {
                        frame.peek_mut().did_produce(1);
                    }
                    self.rotate_upto(depth);
                }
            }
        }
    }
}

impl fmt::Display for DemandStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, frame) in self.frames.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", frame.peek())?;
        }
        write!(f, "]")
    }
}
