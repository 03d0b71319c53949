//! The fetch-decode-execute engine.
//!
//! The CPU owns a [`DataPath`] and a decoded [`Program`]. `decode()` lays
//! the program out into memory exactly once: instructions from address 0,
//! variable storage directly after. `run()` then fetches and dispatches
//! instructions until HLT and renders the final result, either the drained
//! output buffer or the accumulator.
//!
//! Every register transfer, memory access, and ALU invocation advances a
//! logical tick counter. Ticks only feed the diagnostic trace; they never
//! affect scheduling.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::charset::{self, CharsetError};
use crate::machine::alu::{flags, Alu, AluError, AluOp};
use crate::machine::datapath::DataPath;
use crate::machine::memory::{MemoryError, UNSET};
use crate::program::{
    Instruction, Opcode, Program, VarInit, ENTRY_FUNCTION, FUNCTION_ENTRY, INPUT_PORT, OUTPUT_PORT,
};

/// CPU execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CpuState {
    /// Fetching and dispatching instructions.
    Running,
    /// Executed HLT.
    Halted,
}

/// How POP moves the stack pointer after reading its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PopPolicy {
    /// SP moves the same direction as PUSH (the machine's native
    /// microcode). Adjacent PUSH/POP and CALL/RET pairs still balance;
    /// nested calls do not.
    Decrement,
    /// SP moves opposite to PUSH, restoring its pre-push position.
    Increment,
}

/// Execution options.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CpuOptions {
    /// Stack-pointer movement after POP.
    pub pop_policy: PopPolicy,
    /// Abort the run once the tick counter reaches this ceiling. `None`
    /// runs unbounded, so a program looping unconditionally never
    /// terminates.
    pub max_ticks: Option<u64>,
    /// Print the per-instruction diagnostic line while running.
    pub trace: bool,
}

impl Default for CpuOptions {
    fn default() -> Self {
        Self {
            pop_policy: PopPolicy::Decrement,
            max_ticks: None,
            trace: false,
        }
    }
}

/// The control unit driving one [`DataPath`].
pub struct Cpu {
    pub datapath: DataPath,
    pub state: CpuState,
    program: Program,
    /// Variable name to storage address, filled by `decode()`.
    vars: HashMap<String, usize>,
    /// Call-context stack: names of the functions currently executing.
    /// JMP labels resolve against the top entry.
    position: Vec<String>,
    alu: Alu,
    tick: u64,
    options: CpuOptions,
}

impl Cpu {
    pub fn new(datapath: DataPath, program: Program, options: CpuOptions) -> Self {
        Self {
            datapath,
            state: CpuState::Running,
            program,
            vars: HashMap::new(),
            position: vec![ENTRY_FUNCTION.to_string()],
            alu: Alu::new(),
            tick: 0,
            options,
        }
    }

    /// Ticks elapsed so far.
    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    pub fn is_halted(&self) -> bool {
        self.state == CpuState::Halted
    }

    pub fn is_running(&self) -> bool {
        self.state == CpuState::Running
    }

    fn tick(&mut self) {
        self.tick += 1;
    }

    /// Lay the program out into memory: instructions from address 0,
    /// variable storage directly after.
    ///
    /// An integer variable occupies one cell; a string variable occupies
    /// exactly its declared length, filled from the encoded initializer up
    /// to its character count. Cells past the initializer keep the
    /// unwritten default.
    pub fn decode(&mut self) -> Result<(), CpuError> {
        let mut end = 0;
        for ins in &self.program.instructions {
            self.datapath.memory.set_instruction(end, ins.clone())?;
            end += 1;
        }
        for var in &self.program.variables {
            self.vars.insert(var.name.clone(), end);
            match &var.init {
                VarInit::Int(value) => {
                    let value = *value;
                    if value > i32::MAX as i64 || value < i32::MIN as i64 {
                        return Err(CpuError::VariableRange {
                            name: var.name.clone(),
                            value,
                        });
                    }
                    self.datapath.memory.set_value(end, value as i32)?;
                    end += 1;
                }
                VarInit::Str(text, len) => {
                    let codes: Vec<i32> = text.chars().map(charset::encode).collect();
                    for i in 0..*len {
                        if let Some(&code) = codes.get(i) {
                            self.datapath.memory.set_value(end, code)?;
                        }
                        end += 1;
                    }
                }
            }
        }
        Ok(())
    }

    /// Fetch: route IP to AR, advance IP, load IR from the addressed cell.
    fn read_ins(&mut self) -> Result<Instruction, CpuError> {
        // IP -> AR
        self.alu.put_right(self.datapath.registers.ip);
        self.datapath.registers.ar = self.alu.apply(AluOp::Or)?;
        self.tick();
        // IP + 1 -> IP, [AR] -> IR
        self.datapath.registers.ip += 1;
        self.tick();
        let addr = self.cell_addr(self.datapath.registers.ar)?;
        let ins = self
            .datapath
            .memory
            .instruction_at(addr)?
            .cloned()
            .ok_or(CpuError::NoInstruction(addr))?;
        self.datapath.registers.ir = Some(ins.clone());
        Ok(ins)
    }

    /// Resolve an instruction's operand to a value.
    ///
    /// In priority order: a plain non-negative integer is an absolute
    /// address and is dereferenced; a `#` literal is immediate; a quoted
    /// character goes through the encoding table; anything else must be a
    /// declared variable, whose cell is dereferenced.
    fn addressing(&mut self, ins: &Instruction) -> Result<i32, CpuError> {
        let arg = operand(ins)?;
        if let Some(addr) = absolute(arg) {
            self.datapath.registers.ar = addr;
            self.tick();
            let addr = self.cell_addr(addr)?;
            return Ok(self.datapath.memory.value_at(addr)?);
        }
        if let Some(value) = immediate(arg) {
            return Ok(value);
        }
        if let Some(code) = char_literal(arg) {
            return Ok(code);
        }
        match self.vars.get(arg).copied() {
            Some(pos) => self.read_var(pos),
            None => Err(CpuError::UndefinedVariable(arg.to_string())),
        }
    }

    /// Route a variable's address to AR, then read its cell.
    fn read_var(&mut self, pos: usize) -> Result<i32, CpuError> {
        self.alu.put_right(pos as i32);
        self.datapath.registers.ar = self.alu.apply(AluOp::Or)?;
        self.tick();
        let value = self.datapath.memory.value_at(pos)?;
        self.tick();
        Ok(value)
    }

    /// AC := AC `op` operand.
    fn math(&mut self, ins: &Instruction, op: AluOp) -> Result<(), CpuError> {
        let operand = self.addressing(ins)?;
        self.alu.put_right(operand);
        self.alu.put_left(self.datapath.registers.ac);
        self.tick();
        let result = self.alu.apply(op)?;
        self.datapath.registers.ac = result;
        self.tick();
        Ok(())
    }

    fn load(&mut self, ins: &Instruction) -> Result<(), CpuError> {
        let arg = operand(ins)?;
        if arg == OUTPUT_PORT {
            return Err(CpuError::InvalidInstructionUsage(
                "LD cannot address OUTPUT".to_string(),
            ));
        }
        if arg == INPUT_PORT {
            // next staged cell -> AR, [AR] -> AC
            let addr = self.datapath.next_input_cell()?;
            self.datapath.registers.ar = addr as i32;
            self.tick();
            self.datapath.registers.ac = self.datapath.memory.value_at(addr)?;
            self.tick();
        } else {
            self.datapath.registers.ac = self.addressing(ins)?;
            self.tick();
        }
        Ok(())
    }

    fn store(&mut self, ins: &Instruction) -> Result<(), CpuError> {
        let arg = operand(ins)?;
        if arg == INPUT_PORT {
            return Err(CpuError::InvalidInstructionUsage(
                "ST cannot address INPUT".to_string(),
            ));
        }
        if arg == OUTPUT_PORT {
            self.datapath.output.push(self.datapath.registers.ac)?;
            self.tick();
            return Ok(());
        }
        let target = match self.vars.get(arg) {
            Some(&pos) => pos as i32,
            None => store_address(arg)
                .ok_or_else(|| CpuError::UndefinedVariable(arg.to_string()))?,
        };
        // target -> AR, AC -> [AR]
        self.alu.put_right(target);
        self.datapath.registers.ar = self.alu.apply(AluOp::Or)?;
        let addr = self.cell_addr(self.datapath.registers.ar)?;
        self.datapath
            .memory
            .set_value(addr, self.datapath.registers.ac)?;
        self.tick();
        Ok(())
    }

    /// SP - 1 -> SP, AC -> STACK[SP].
    fn push_ac(&mut self) -> Result<(), CpuError> {
        let sp = self.datapath.registers.sp - 1;
        self.datapath.registers.sp = sp;
        self.tick();
        self.datapath.stack_write(sp, self.datapath.registers.ac)?;
        self.tick();
        Ok(())
    }

    /// STACK[SP] -> AC, then move SP per the configured policy.
    fn pop_ac(&mut self) -> Result<(), CpuError> {
        self.datapath.registers.ac = self.datapath.stack_read(self.datapath.registers.sp)?;
        self.tick();
        self.datapath.registers.sp += match self.options.pop_policy {
            PopPolicy::Decrement => -1,
            PopPolicy::Increment => 1,
        };
        self.tick();
        Ok(())
    }

    /// Overwrite IP with a label resolved in the currently executing
    /// function's table only.
    fn jump(&mut self, ins: &Instruction) -> Result<(), CpuError> {
        let label = operand(ins)?;
        let function = self
            .position
            .last()
            .ok_or(CpuError::EmptyCallContext)?
            .clone();
        let table = self
            .program
            .functions
            .get(&function)
            .ok_or_else(|| CpuError::UndefinedFunction(function.clone()))?;
        let target = *table.get(label).ok_or_else(|| CpuError::UndefinedLabel {
            label: label.to_string(),
            function,
        })?;
        self.datapath.registers.ip = target as i32;
        self.tick();
        Ok(())
    }

    /// The CALL choreography. The caller's AC rides into the callee as an
    /// implicit argument; the return address travels through AC onto the
    /// stack while BR shields the argument.
    fn call(&mut self, ins: &Instruction) -> Result<(), CpuError> {
        // AC -> BR
        self.alu.put_left(self.datapath.registers.ac);
        self.datapath.registers.br = self.alu.apply(AluOp::Or)?;
        self.tick();

        let callee = operand(ins)?.to_string();
        if !self.program.functions.contains_key(&callee) {
            return Err(CpuError::UndefinedFunction(callee));
        }
        // IP -> AC, AC -> STACK[SP]
        self.alu.put_right(self.datapath.registers.ip);
        self.datapath.registers.ac = self.alu.apply(AluOp::Or)?;
        self.tick();
        self.push_ac()?;

        // entry -> IP
        let entry = *self
            .program
            .functions
            .get(&callee)
            .ok_or_else(|| CpuError::UndefinedFunction(callee.clone()))?
            .get(FUNCTION_ENTRY)
            .ok_or_else(|| CpuError::UndefinedLabel {
                label: FUNCTION_ENTRY.to_string(),
                function: callee.clone(),
            })?;
        self.datapath.registers.ip = entry as i32;
        self.position.push(callee);
        self.tick();

        // BR -> AC
        self.alu.put_left(self.datapath.registers.br);
        self.datapath.registers.ac = self.alu.apply(AluOp::Or)?;
        self.tick();
        Ok(())
    }

    /// The RET choreography, mirroring CALL: BR shields the callee's
    /// result while the saved return address pops back into IP.
    fn ret(&mut self) -> Result<(), CpuError> {
        // AC -> BR
        self.datapath.registers.br = self.datapath.registers.ac;
        self.tick();
        // STACK[SP] -> AC
        self.pop_ac()?;
        self.position.pop();
        // AC -> IP
        self.alu.put_left(self.datapath.registers.ac);
        self.datapath.registers.ip = self.alu.apply(AluOp::Or)?;
        self.tick();
        // BR -> AC
        self.datapath.registers.ac = self.datapath.registers.br;
        self.tick();
        Ok(())
    }

    /// Dispatch one decoded instruction.
    fn execute(&mut self, ins: &Instruction) -> Result<(), CpuError> {
        match ins.op {
            Opcode::Hlt => {
                self.state = CpuState::Halted;
            }

            Opcode::Add => {
                self.math(ins, AluOp::Add)?;
                self.datapath.registers.ps = self.alu.nzvc;
            }
            Opcode::Sub => {
                self.math(ins, AluOp::Sub)?;
                self.datapath.registers.ps = self.alu.nzvc;
            }
            Opcode::Mul => self.math(ins, AluOp::Mul)?,
            Opcode::Div => self.math(ins, AluOp::Div)?,
            Opcode::Inv => {
                // -AC -> AC, Z -> PS
                self.alu.put_left(self.datapath.registers.ac);
                self.tick();
                self.datapath.registers.ac = self.alu.apply(AluOp::NegSum)?;
                self.alu.nzvc = flags::Z;
                self.datapath.registers.ps = self.alu.nzvc;
                self.tick();
            }
            Opcode::Cmp => {
                // AC - operand, flags -> PS, AC untouched
                let operand = self.addressing(ins)?;
                self.alu.put_right(operand);
                self.alu.put_left(self.datapath.registers.ac);
                self.alu.apply(AluOp::Sub)?;
                self.datapath.registers.ps = self.alu.nzvc;
                self.tick();
            }

            Opcode::Ld => self.load(ins)?,
            Opcode::St => self.store(ins)?,

            Opcode::Push => self.push_ac()?,
            Opcode::Pop => self.pop_ac()?,

            Opcode::Jmp => self.jump(ins)?,
            Opcode::Call => self.call(ins)?,
            Opcode::Ret => self.ret()?,
            Opcode::Jz => {
                let ps = self.datapath.registers.ps;
                if (ps | flags::Z) == flags::Z && ps != 0 {
                    self.jump(ins)?;
                }
            }
            Opcode::Js => {
                let ps = self.datapath.registers.ps;
                if (ps | flags::N) == flags::N && ps != 0 {
                    self.jump(ins)?;
                }
            }
            Opcode::Jnz => {
                // whole-status comparison against the Z-only pattern:
                // Z set alongside V or C still takes the branch
                if self.datapath.registers.ps != flags::Z {
                    self.jump(ins)?;
                }
            }
        }
        Ok(())
    }

    /// Execute a single fetch-dispatch cycle and return the executed
    /// instruction.
    pub fn step(&mut self) -> Result<Instruction, CpuError> {
        if self.state != CpuState::Running {
            return Err(CpuError::NotRunning(self.state));
        }
        let ins = self.read_ins()?;
        self.execute(&ins)?;
        if self.options.trace {
            println!("{}", self.trace_line(&ins));
        }
        Ok(ins)
    }

    /// Run until HLT, then render the result: the drained output buffer if
    /// anything was written, otherwise the accumulator in decimal.
    pub fn run(&mut self) -> Result<String, CpuError> {
        while self.state == CpuState::Running {
            if let Some(limit) = self.options.max_ticks {
                if self.tick >= limit {
                    return Err(CpuError::TickLimit(limit));
                }
            }
            self.step()?;
        }
        self.result()
    }

    /// The diagnostic line for one executed instruction.
    pub fn trace_line(&self, ins: &Instruction) -> String {
        format!(
            "{{ Tick:{}, {} }}  {}",
            self.tick,
            self.datapath.registers.snapshot(),
            ins
        )
    }

    fn result(&self) -> Result<String, CpuError> {
        let slots = self.datapath.output.slots();
        if slots.first().map_or(true, |&code| code == UNSET) {
            return Ok(self.datapath.registers.ac.to_string());
        }
        let mut text = String::new();
        for &code in slots {
            if code == UNSET {
                break;
            }
            text.push(charset::decode(code)?);
        }
        Ok(text)
    }

    fn cell_addr(&self, value: i32) -> Result<usize, CpuError> {
        usize::try_from(value).map_err(|_| {
            CpuError::Memory(MemoryError::AddressOutOfRange {
                addr: value as i64,
                size: self.datapath.memory.size(),
            })
        })
    }
}

impl fmt::Debug for Cpu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cpu")
            .field("state", &self.state)
            .field("tick", &self.tick)
            .field("registers", &self.datapath.registers)
            .finish()
    }
}

fn operand(ins: &Instruction) -> Result<&str, CpuError> {
    ins.arg.as_deref().ok_or(CpuError::MissingOperand(ins.op))
}

/// Plain non-negative integer: an absolute memory address.
fn absolute(arg: &str) -> Option<i32> {
    if arg.is_empty() || !arg.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    arg.parse().ok()
}

/// `#` immediate: optional minus and digits with no leading zero, or `#0`.
fn immediate(arg: &str) -> Option<i32> {
    let rest = arg.strip_prefix('#')?;
    if rest == "0" {
        return Some(0);
    }
    let digits = rest.strip_prefix('-').unwrap_or(rest);
    let mut chars = digits.chars();
    if !matches!(chars.next(), Some('1'..='9')) {
        return None;
    }
    if !chars.all(|c| c.is_ascii_digit()) {
        return None;
    }
    rest.parse().ok()
}

/// Single-quoted single character, or the empty pair.
fn char_literal(arg: &str) -> Option<i32> {
    if arg == "''" {
        return Some(charset::EMPTY);
    }
    let mut chars = arg.chars();
    if chars.next()? != '\'' {
        return None;
    }
    let c = chars.next()?;
    if chars.next()? != '\'' {
        return None;
    }
    if chars.next().is_some() {
        return None;
    }
    Some(charset::encode(c))
}

/// Store target: a positive integer address with no leading zero.
fn store_address(arg: &str) -> Option<i32> {
    let mut chars = arg.chars();
    if !matches!(chars.next(), Some('1'..='9')) {
        return None;
    }
    if !chars.all(|c| c.is_ascii_digit()) {
        return None;
    }
    arg.parse().ok()
}

/// Errors that can occur while loading or executing a program.
#[derive(Debug, Clone, Error)]
pub enum CpuError {
    #[error("CPU not running: {0:?}")]
    NotRunning(CpuState),

    #[error("memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("ALU error: {0}")]
    Alu(#[from] AluError),

    #[error("encoding error: {0}")]
    Charset(#[from] CharsetError),

    #[error("variable {0} is not defined")]
    UndefinedVariable(String),

    #[error("label {label} is not defined in function {function}")]
    UndefinedLabel { label: String, function: String },

    #[error("function {0} is not defined")]
    UndefinedFunction(String),

    #[error("{0}")]
    InvalidInstructionUsage(String),

    #[error("value {value} of variable {name} is out of the 32-bit signed range")]
    VariableRange { name: String, value: i64 },

    #[error("no instruction stored at address {0}")]
    NoInstruction(usize),

    #[error("{0} requires an operand")]
    MissingOperand(Opcode),

    #[error("call context stack is empty")]
    EmptyCallContext,

    #[error("tick limit {0} exceeded")]
    TickLimit(u64),
}
