//! Code after register allocation.
//!
//! [`RegisterCode`] reuses [`IrOp`], but every [`ValueId`] names a register and a register may
//! be written any number of times. Blocks are kept in their final layout order.

use std::fmt;

use crate::{
    analysis::ir::{BlockId, CatchHandler, IrOp, ValueId},
    program::{MethodId, Reg},
};

/// A block of register code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterBlock {
    /// The block's identity in the IR it was allocated from
    pub id: BlockId,
    /// Instructions over registers, terminator last
    pub instructions: Vec<IrOp>,
    /// Exceptional successors in match order
    pub catch_handlers: Vec<CatchHandler>,
}

impl RegisterBlock {
    /// Returns the terminator.
    #[must_use]
    pub fn terminator(&self) -> Option<&IrOp> {
        self.instructions.last().filter(|op| op.is_terminator())
    }

    /// Returns the target if the block is a single `goto` without handlers.
    #[must_use]
    pub fn goto_target(&self) -> Option<BlockId> {
        match self.instructions.as_slice() {
            [IrOp::Goto { target }] if self.catch_handlers.is_empty() => Some(*target),
            _ => None,
        }
    }
}

/// A method body over registers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterCode {
    /// The method
    pub method: MethodId,
    /// Blocks in layout order; the first is the entry
    pub blocks: Vec<RegisterBlock>,
    /// Number of registers
    pub registers: u16,
    /// Number of argument registers, the first `ins` registers
    pub ins: u16,
}

impl RegisterCode {
    /// Returns the register named by `value`.
    #[must_use]
    pub fn register(value: ValueId) -> Reg {
        value.index() as Reg
    }

    /// Returns the value naming `register`.
    #[must_use]
    pub fn value(register: Reg) -> ValueId {
        ValueId::new(usize::from(register))
    }

    /// Returns the layout index of `block`.
    #[must_use]
    pub fn index_of(&self, block: BlockId) -> Option<usize> {
        self.blocks.iter().position(|b| b.id == block)
    }

    /// Returns the total number of instructions.
    #[must_use]
    pub fn instruction_count(&self) -> usize {
        self.blocks.iter().map(|b| b.instructions.len()).sum()
    }

    /// Iterates all instructions in layout order.
    pub fn instructions(&self) -> impl Iterator<Item = &IrOp> {
        self.blocks.iter().flat_map(|b| b.instructions.iter())
    }
}

impl fmt::Display for RegisterCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} registers={} ins={}",
            self.method, self.registers, self.ins
        )?;
        for block in &self.blocks {
            write!(f, "{}:", block.id)?;
            for handler in &block.catch_handlers {
                match &handler.guard {
                    Some(guard) => write!(f, " catch {guard} -> {}", handler.target)?,
                    None => write!(f, " catch-all -> {}", handler.target)?,
                }
            }
            writeln!(f)?;
            for op in &block.instructions {
                // registers print as rN
                let text = op.to_string();
                writeln!(f, "  {}", rename_registers(&text))?;
            }
        }
        Ok(())
    }
}

fn rename_registers(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut previous = ' ';
    while let Some(c) = chars.next() {
        let starts_value = c == 'v'
            && !previous.is_alphanumeric()
            && chars.peek().is_some_and(char::is_ascii_digit);
        out.push(if starts_value { 'r' } else { c });
        previous = c;
    }
    out
}
