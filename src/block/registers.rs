//! Register layout of a block, as resolved by the planner

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::executor::error::{ExecError, ExecResult};

/// Positional index of a register (column) in a row block
pub type RegisterId = usize;

/// Which registers a block reads, keeps, clears and writes
///
/// Register allocation is owned by the planner; a block only checks that
/// the plan is consistent before it is wired into a tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterInfos {
    /// Width of the rows the block receives
    pub num_input_registers: usize,
    /// Width of the rows the block produces
    pub num_output_registers: usize,
    /// Input registers copied forward into every output row
    pub registers_to_keep: Vec<RegisterId>,
    /// Input registers that are no longer needed downstream
    pub registers_to_clear: Vec<RegisterId>,
    /// Registers written by the executor
    pub output_registers: Vec<RegisterId>,
}

impl RegisterInfos {
    /// Layout that forwards all `n` registers unchanged
    pub fn passthrough(n: usize) -> Self {
        RegisterInfos {
            num_input_registers: n,
            num_output_registers: n,
            registers_to_keep: (0..n).collect(),
            registers_to_clear: Vec::new(),
            output_registers: Vec::new(),
        }
    }

    /// Layout that keeps all `n` input registers and appends one output register
    pub fn with_output(n: usize) -> Self {
        RegisterInfos {
            num_input_registers: n,
            num_output_registers: n + 1,
            registers_to_keep: (0..n).collect(),
            registers_to_clear: Vec::new(),
            output_registers: vec![n],
        }
    }

    /// Layout that keeps all `n` registers and overwrites `reg` in place
    pub fn in_place(n: usize, reg: RegisterId) -> Self {
        RegisterInfos {
            num_input_registers: n,
            num_output_registers: n,
            registers_to_keep: (0..n).filter(|r| *r != reg).collect(),
            registers_to_clear: Vec::new(),
            output_registers: vec![reg],
        }
    }

    /// Layout that drops all `n` input registers and writes register `n`
    pub fn collect(n: usize) -> Self {
        RegisterInfos {
            num_input_registers: n,
            num_output_registers: n + 1,
            registers_to_keep: Vec::new(),
            registers_to_clear: (0..n).collect(),
            output_registers: vec![n],
        }
    }

    /// Check if `reg` may be written by the executor
    pub fn is_output_register(&self, reg: RegisterId) -> bool {
        self.output_registers.contains(&reg)
    }

    /// Validate the layout
    pub fn validate(&self) -> ExecResult<()> {
        if self.num_input_registers > self.num_output_registers {
            return Err(ExecError::InvalidRegisterPlan(format!(
                "{} input registers do not fit into {} output registers",
                self.num_input_registers, self.num_output_registers
            )));
        }

        let mut seen = BTreeSet::new();
        for &reg in self.registers_to_keep.iter().chain(&self.registers_to_clear) {
            if reg >= self.num_input_registers {
                return Err(ExecError::InvalidRegisterPlan(format!(
                    "register {} is not an input register (block reads {})",
                    reg, self.num_input_registers
                )));
            }
            if !seen.insert(reg) {
                return Err(ExecError::InvalidRegisterPlan(format!(
                    "register {} is both kept and cleared",
                    reg
                )));
            }
        }

        for &reg in &self.output_registers {
            if reg >= self.num_output_registers {
                return Err(ExecError::InvalidRegisterPlan(format!(
                    "output register {} out of range (block writes {})",
                    reg, self.num_output_registers
                )));
            }
            if self.registers_to_keep.contains(&reg) {
                return Err(ExecError::InvalidRegisterPlan(format!(
                    "output register {} would overwrite a kept register",
                    reg
                )));
            }
        }

        Ok(())
    }

    /// Additional checks for executors that reuse their input block
    pub fn validate_passthrough(&self) -> ExecResult<()> {
        if self.num_input_registers != self.num_output_registers {
            return Err(ExecError::InvalidRegisterPlan(format!(
                "pass-through requires equal register counts (input {}, output {})",
                self.num_input_registers, self.num_output_registers
            )));
        }
        Ok(())
    }
}
