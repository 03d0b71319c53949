//! The structured program form handed over by the assembler.
//!
//! The assembler front-end is a separate tool; its hand-off to the machine is
//! a JSON document with three tables:
//!
//! ```json
//! {
//!   "instructions": [
//!     { "op": "LD", "arg": "#72" },
//!     { "op": "ST", "arg": "OUTPUT" },
//!     { "op": "HLT" }
//!   ],
//!   "functions": { "_START": { "self": 0 } },
//!   "variables": [
//!     { "name": "count", "init": 5 },
//!     { "name": "greet", "init": ["hello", 8] }
//!   ]
//! }
//! ```
//!
//! - `instructions` is the ordered instruction sequence, laid out from
//!   address 0 at load time.
//! - `functions` maps each function name to its label table; the reserved
//!   [`FUNCTION_ENTRY`] key gives the function's entry address. Execution
//!   begins in the reserved [`ENTRY_FUNCTION`] function.
//! - `variables` is the ordered declaration list: an integer initializer
//!   occupies one cell, a `[text, length]` initializer occupies exactly
//!   `length` cells.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name of the function the run loop starts in.
pub const ENTRY_FUNCTION: &str = "_START";

/// Reserved label giving a function's entry address.
pub const FUNCTION_ENTRY: &str = "self";

/// Operand token naming the staged input region.
pub const INPUT_PORT: &str = "INPUT";

/// Operand token naming the output buffer.
pub const OUTPUT_PORT: &str = "OUTPUT";

/// Instruction mnemonics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Opcode {
    Add,
    Sub,
    Mul,
    Div,
    Inv,
    Cmp,
    Ld,
    St,
    Push,
    Pop,
    Jmp,
    Call,
    Ret,
    Jz,
    Jnz,
    Js,
    Hlt,
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Mul => "MUL",
            Opcode::Div => "DIV",
            Opcode::Inv => "INV",
            Opcode::Cmp => "CMP",
            Opcode::Ld => "LD",
            Opcode::St => "ST",
            Opcode::Push => "PUSH",
            Opcode::Pop => "POP",
            Opcode::Jmp => "JMP",
            Opcode::Call => "CALL",
            Opcode::Ret => "RET",
            Opcode::Jz => "JZ",
            Opcode::Jnz => "JNZ",
            Opcode::Js => "JS",
            Opcode::Hlt => "HLT",
        };
        f.write_str(name)
    }
}

/// One decoded instruction: a mnemonic plus an optional argument token.
///
/// The argument stays a raw token (`"42"`, `"#-7"`, `"'a'"`, a variable,
/// label, or function name, or an I/O port); the CPU resolves it at
/// execution time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub op: Opcode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arg: Option<String>,
}

impl Instruction {
    pub fn new(op: Opcode) -> Self {
        Self { op, arg: None }
    }

    pub fn with_arg(op: Opcode, arg: impl Into<String>) -> Self {
        Self {
            op,
            arg: Some(arg.into()),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.arg {
            Some(arg) => write!(f, "{} {}", self.op, arg),
            None => write!(f, "{}", self.op),
        }
    }
}

/// A variable's initializer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VarInit {
    /// A decimal literal, stored in one cell. Range-checked at load time.
    Int(i64),
    /// `(text, declared length)`: the encoded text fills the first cells of
    /// a `length`-cell block; the rest keep the unwritten-cell default.
    Str(String, usize),
}

/// One variable declaration. Declarations keep their order; storage is laid
/// out in that order directly after the last instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub init: VarInit,
}

/// A complete program in the structured intermediate form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Program {
    pub instructions: Vec<Instruction>,
    pub functions: HashMap<String, HashMap<String, usize>>,
    #[serde(default)]
    pub variables: Vec<Variable>,
}

impl Program {
    /// Parse a program from its JSON text.
    pub fn from_json(text: &str) -> Result<Self, ProgramError> {
        serde_json::from_str(text).map_err(|e| ProgramError::Parse(e.to_string()))
    }

    /// Load a program file from disk.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ProgramError> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ProgramError::Io(e.to_string()))?;
        Self::from_json(&text)
    }
}

/// Errors that can occur while loading a program file.
#[derive(Debug, Clone, Error)]
pub enum ProgramError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("program parse error: {0}")]
    Parse(String),
}
