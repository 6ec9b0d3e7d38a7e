//! Executor error types

use thiserror::Error;

use crate::block::RegisterId;

/// Result type for execution operations
pub type ExecResult<T> = Result<T, ExecError>;

/// Execution errors
///
/// Suspension is not an error: a block that has to wait for I/O returns
/// `ExecutionState::Waiting` instead.
#[derive(Error, Debug)]
pub enum ExecError {
    /// Register plan handed over by the planner is malformed
    #[error("invalid register plan: {0}")]
    InvalidRegisterPlan(String),

    /// Executor declares block pass-through without preserving order
    #[error("executor {executor} allows block pass-through but does not preserve order")]
    IncompatibleProperties { executor: &'static str },

    /// Call violates the demand contract
    #[error("invalid call: {0}")]
    InvalidCall(String),

    /// Register index outside of the block layout
    #[error("register {register} out of bounds (block has {num_registers} registers)")]
    RegisterOutOfBounds {
        register: RegisterId,
        num_registers: usize,
    },

    /// Executor wrote to a register it does not own
    #[error("register {0} is not an output register of this block")]
    NotAnOutputRegister(RegisterId),

    /// Output cursor has no room left
    #[error("output block is full (capacity {capacity})")]
    OutputFull { capacity: usize },

    /// Storage or index cursor failure
    #[error("storage error: {0}")]
    Storage(String),

    /// Expression evaluation failure
    #[error("expression error: {0}")]
    Expression(String),

    /// Scatter client id not registered
    #[error("unknown client: {0}")]
    UnknownClient(String),

    /// Scatter client id registered twice
    #[error("duplicate client: {0}")]
    DuplicateClient(String),

    /// Remote peer reported a failure or disappeared
    #[error("remote error: {0}")]
    Remote(String),

    /// Wire encoding/decoding error
    #[error("wire error: {0}")]
    Wire(String),

    /// Network IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Query was killed by its owner
    #[error("query {0} was killed")]
    Killed(u64),

    /// Engine configuration rejected
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Allocation or buffering limit exceeded
    #[error("resource limit exceeded: {0}")]
    ResourceLimit(String),

    /// Internal invariant violated
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<bincode::Error> for ExecError {
    fn from(e: bincode::Error) -> Self {
        ExecError::Wire(e.to_string())
    }
}

impl ExecError {
    /// True for errors detected while wiring a block tree
    pub fn is_construction_error(&self) -> bool {
        matches!(
            self,
            ExecError::InvalidRegisterPlan(_)
                | ExecError::IncompatibleProperties { .. }
                | ExecError::DuplicateClient(_)
                | ExecError::Config(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = ExecError::RegisterOutOfBounds {
            register: 4,
            num_registers: 2,
        };
        assert_eq!(
            err.to_string(),
            "register 4 out of bounds (block has 2 registers)"
        );
        assert_eq!(ExecError::Killed(7).to_string(), "query 7 was killed");
    }

    #[test]
    fn test_construction_errors() {
        assert!(ExecError::IncompatibleProperties { executor: "x" }.is_construction_error());
        assert!(ExecError::InvalidRegisterPlan("bad".into()).is_construction_error());
        assert!(!ExecError::Storage("disk".into()).is_construction_error());
    }

    #[test]
    fn test_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err: ExecError = io.into();
        assert!(matches!(err, ExecError::Io(_)));
    }
}
