//! Demand flowing down the block tree and skip counts flowing back up
//!
//! A consumer describes what it wants with a [`DemandStack`]: one
//! [`CallList`] per active subquery depth, innermost first. Every answer
//! carries a [`SkipLedger`] with the rows skipped (or merely counted) at
//! each depth. [`DemandStack::account`] folds an answer back into the stack
//! so the next call resumes exactly where the last one stopped.

mod call;
mod skip;
mod stack;

pub use call::Call;
pub use skip::SkipLedger;
pub use stack::{CallList, DemandStack};
