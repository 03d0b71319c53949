//! Machine emulation.
//!
//! This module implements the complete architecture:
//! - flat cell memory with a staged input region in its upper quarter
//! - a separate 1024-deep value stack
//! - 7 registers: AC, BR, SP, PS (NZVC), IP, AR, IR
//! - an ALU with single-use operand slots and 32-bit overflow folding
//! - the fetch-decode-execute control unit and run loop

pub mod alu;
pub mod cpu;
pub mod datapath;
pub mod memory;
pub mod registers;

pub use alu::{flags, Alu, AluError, AluOp};
pub use cpu::{Cpu, CpuError, CpuOptions, CpuState, PopPolicy};
pub use datapath::{Buffer, DataPath};
pub use memory::{Cell, Memory, MemoryError, UNSET};
pub use registers::Registers;

use std::path::Path;

use thiserror::Error;

use crate::program::{Program, ProgramError};

/// Number of memory cells in the standard machine.
pub const MEMORY_SIZE: usize = 1024;

/// Depth of the value stack.
pub const STACK_DEPTH: usize = 1024;

/// Capacity of the output buffer.
pub const OUTPUT_CAPACITY: usize = 1024;

/// Load a structured program file, build the standard machine, stage the
/// optional input file, and run to completion, returning the final
/// textual result.
pub fn start(
    source: &Path,
    input: Option<&Path>,
    options: CpuOptions,
) -> Result<String, StartError> {
    let program = Program::from_path(source)?;
    let mut datapath = DataPath::new(MEMORY_SIZE);
    if let Some(path) = input {
        let text =
            std::fs::read_to_string(path).map_err(|e| StartError::Io(e.to_string()))?;
        datapath.stage_input(&text).map_err(CpuError::from)?;
    }
    let mut cpu = Cpu::new(datapath, program, options);
    cpu.decode()?;
    Ok(cpu.run()?)
}

/// Errors that can occur in the end-to-end entry point.
#[derive(Debug, Clone, Error)]
pub enum StartError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error(transparent)]
    Program(#[from] ProgramError),

    #[error(transparent)]
    Cpu(#[from] CpuError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_start_runs_a_program_file() {
        let source = write_temp(
            "accum-emu-start-test.json",
            r##"{
                "instructions": [
                    { "op": "LD", "arg": "#72" },
                    { "op": "ST", "arg": "OUTPUT" },
                    { "op": "LD", "arg": "#73" },
                    { "op": "ST", "arg": "OUTPUT" },
                    { "op": "HLT" }
                ],
                "functions": { "_START": { "self": 0 } }
            }"##,
        );

        let result = start(&source, None, CpuOptions::default()).unwrap();
        assert_eq!(result, "HI");
    }

    #[test]
    fn test_start_stages_input_file() {
        let source = write_temp(
            "accum-emu-input-test.json",
            r#"{
                "instructions": [
                    { "op": "LD", "arg": "INPUT" },
                    { "op": "ST", "arg": "OUTPUT" },
                    { "op": "HLT" }
                ],
                "functions": { "_START": { "self": 0 } }
            }"#,
        );
        let input = write_temp("accum-emu-input-test.txt", "X");

        let result = start(&source, Some(&input), CpuOptions::default()).unwrap();
        assert_eq!(result, "X");
    }

    #[test]
    fn test_start_reports_missing_file() {
        let missing = std::env::temp_dir().join("accum-emu-no-such-file.json");
        assert!(matches!(
            start(&missing, None, CpuOptions::default()),
            Err(StartError::Program(ProgramError::Io(_)))
        ));
    }
}
