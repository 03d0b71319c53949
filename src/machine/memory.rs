//! The machine's flat cell memory.
//!
//! Memory is a fixed-size arena of [`Cell`]s, one independently owned cell
//! per address. A cell carries a signed 32-bit value and, for addresses the
//! loader reserved for code, the decoded instruction stored there. Writing a
//! value never disturbs the instruction and vice versa.

use crate::program::Instruction;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Value carried by a cell (and an output-buffer slot) nothing has written.
pub const UNSET: i32 = -1;

/// One addressable memory unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    pub value: i32,
    pub instruction: Option<Instruction>,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            value: UNSET,
            instruction: None,
        }
    }
}

/// The cell arena.
#[derive(Clone, Serialize, Deserialize)]
pub struct Memory {
    cells: Vec<Cell>,
}

impl Memory {
    /// Create a memory of `size` cells, each holding the unwritten default.
    pub fn new(size: usize) -> Self {
        Self {
            cells: vec![Cell::default(); size],
        }
    }

    /// Number of addressable cells.
    pub fn size(&self) -> usize {
        self.cells.len()
    }

    /// Read the value field at `addr`.
    pub fn value_at(&self, addr: usize) -> Result<i32, MemoryError> {
        self.check(addr)?;
        Ok(self.cells[addr].value)
    }

    /// Replace only the value field at `addr`, keeping any instruction
    /// stored there.
    pub fn set_value(&mut self, addr: usize, value: i32) -> Result<(), MemoryError> {
        self.check(addr)?;
        self.cells[addr].value = value;
        Ok(())
    }

    /// Read the instruction field at `addr`.
    pub fn instruction_at(&self, addr: usize) -> Result<Option<&Instruction>, MemoryError> {
        self.check(addr)?;
        Ok(self.cells[addr].instruction.as_ref())
    }

    /// Store an instruction at `addr`, keeping the cell's value field.
    pub fn set_instruction(
        &mut self,
        addr: usize,
        instruction: Instruction,
    ) -> Result<(), MemoryError> {
        self.check(addr)?;
        self.cells[addr].instruction = Some(instruction);
        Ok(())
    }

    fn check(&self, addr: usize) -> Result<(), MemoryError> {
        if addr >= self.cells.len() {
            return Err(MemoryError::AddressOutOfRange {
                addr: addr as i64,
                size: self.cells.len(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Only count touched cells
        let touched = self
            .cells
            .iter()
            .filter(|c| **c != Cell::default())
            .count();

        f.debug_struct("Memory")
            .field("touched_cells", &touched)
            .field("total_cells", &self.cells.len())
            .finish()
    }
}

/// Errors that can occur during memory and stack accesses.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("address {addr} out of range (size {size})")]
    AddressOutOfRange { addr: i64, size: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{Instruction, Opcode};

    #[test]
    fn test_memory_read_write() {
        let mut mem = Memory::new(16);

        mem.set_value(10, 42).unwrap();
        assert_eq!(mem.value_at(10).unwrap(), 42);
    }

    #[test]
    fn test_unwritten_cells_hold_sentinel() {
        let mem = Memory::new(4);
        assert_eq!(mem.value_at(0).unwrap(), UNSET);
        assert_eq!(mem.instruction_at(0).unwrap(), None);
    }

    #[test]
    fn test_cells_are_independent() {
        let mut mem = Memory::new(4);

        mem.set_value(1, 7).unwrap();

        assert_eq!(mem.value_at(0).unwrap(), UNSET);
        assert_eq!(mem.value_at(2).unwrap(), UNSET);
    }

    #[test]
    fn test_value_write_keeps_instruction() {
        let mut mem = Memory::new(4);
        let ins = Instruction::new(Opcode::Hlt);

        mem.set_instruction(0, ins.clone()).unwrap();
        mem.set_value(0, 99).unwrap();

        assert_eq!(mem.instruction_at(0).unwrap(), Some(&ins));
        assert_eq!(mem.value_at(0).unwrap(), 99);
    }

    #[test]
    fn test_memory_bounds() {
        let mut mem = Memory::new(8);

        assert!(mem.value_at(7).is_ok());
        assert_eq!(
            mem.value_at(8),
            Err(MemoryError::AddressOutOfRange { addr: 8, size: 8 })
        );
        assert!(mem.set_value(8, 0).is_err());
    }
}
