//! Expression callback used by filter and calculation executors
//!
//! Evaluation itself lives outside the engine; executors only hand a row
//! to an [`Expression`] and consume the resulting value.

use std::fmt;
use std::sync::Arc;

use super::error::{ExecError, ExecResult};
use crate::block::{RegisterId, Value};
use crate::cursor::InputRow;

/// Evaluates to a value for one input row
pub trait Expression: Send + Sync {
    fn evaluate(&self, row: &InputRow<'_>) -> ExecResult<Value>;
}

impl<F> Expression for F
where
    F: Fn(&InputRow<'_>) -> ExecResult<Value> + Send + Sync,
{
    fn evaluate(&self, row: &InputRow<'_>) -> ExecResult<Value> {
        self(row)
    }
}

/// Shared handle to an expression
#[derive(Clone)]
pub struct ExpressionRef(Arc<dyn Expression>);

impl ExpressionRef {
    pub fn new(expr: impl Expression + 'static) -> Self {
        ExpressionRef(Arc::new(expr))
    }

    /// Wrap a closure
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&InputRow<'_>) -> ExecResult<Value> + Send + Sync + 'static,
    {
        ExpressionRef(Arc::new(f))
    }

    /// Expression that reads a register
    pub fn register(reg: RegisterId) -> Self {
        ExpressionRef::from_fn(move |row| row.value(reg).cloned())
    }

    /// Expression that always yields `value`
    pub fn constant(value: Value) -> Self {
        ExpressionRef::from_fn(move |_| Ok(value.clone()))
    }

    /// Expression that always fails with `message`
    pub fn failing(message: impl Into<String>) -> Self {
        let message = message.into();
        ExpressionRef::from_fn(move |_| Err(ExecError::Expression(message.clone())))
    }

    pub fn evaluate(&self, row: &InputRow<'_>) -> ExecResult<Value> {
        self.0.evaluate(row)
    }
}

impl fmt::Debug for ExpressionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ExpressionRef")
    }
}
