//! The machine's register file.
//!
//! Seven named registers:
//! - AC: accumulator, primary operand and result
//! - BR: buffer register, shields AC across CALL/RET
//! - SP: stack pointer into the separate value stack, seeded to its top
//! - PS: processor status, an NZVC bit combination
//! - IP: instruction pointer
//! - AR: address register, records the most recently routed address
//! - IR: instruction register, the only register holding an instruction
//!   rather than an integer

use crate::machine::STACK_DEPTH;
use crate::program::Instruction;
use serde::{Deserialize, Serialize};

/// The register file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registers {
    pub ac: i32,
    pub br: i32,
    pub sp: i32,
    pub ps: i32,
    pub ip: i32,
    pub ar: i32,
    pub ir: Option<Instruction>,
}

impl Registers {
    /// Fresh register file: SP at the stack top, everything else zeroed.
    pub fn new() -> Self {
        Self {
            ac: 0,
            br: 0,
            sp: STACK_DEPTH as i32,
            ps: 0,
            ip: 0,
            ar: 0,
            ir: None,
        }
    }

    /// One-line snapshot for the per-instruction trace.
    pub fn snapshot(&self) -> String {
        let ir = match &self.ir {
            Some(ins) => ins.to_string(),
            None => "-".to_string(),
        };
        format!(
            "BR:{}, AC:{}, SP:{}, PS:{}, IP:{}, AR:{}, IR:{}",
            self.br, self.ac, self.sp, self.ps, self.ip, self.ar, ir
        )
    }
}

impl Default for Registers {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{Instruction, Opcode};

    #[test]
    fn test_fresh_registers() {
        let regs = Registers::new();

        assert_eq!(regs.sp, STACK_DEPTH as i32);
        assert_eq!(regs.ac, 0);
        assert_eq!(regs.ip, 0);
        assert_eq!(regs.ir, None);
    }

    #[test]
    fn test_snapshot_format() {
        let mut regs = Registers::new();
        regs.ac = 7;
        regs.ir = Some(Instruction::with_arg(Opcode::Ld, "#7"));

        let line = regs.snapshot();
        assert!(line.contains("AC:7"));
        assert!(line.contains("IR:LD #7"));
    }
}
