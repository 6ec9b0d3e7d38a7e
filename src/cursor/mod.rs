//! Row cursors used by executors
//!
//! [`InputRange`] is the read side over upstream rows, [`OutputCursor`]
//! the write side over the block being produced.

mod input;
mod output;

pub use input::{InputRange, InputRow};
pub use output::OutputCursor;
