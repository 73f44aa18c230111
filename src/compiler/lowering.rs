//! Lowering of allocated code back to raw bytecode.
//!
//! Blocks are emitted in the layout order of the [`RegisterCode`]. Branches to the block that
//! follows are dropped, a two-way `if` becomes a conditional branch to its `then` block plus a
//! `goto` to its `else` block when that one does not follow, and results of invokes move into
//! their register with a `move-result`. Branch and handler targets are patched once every
//! block's start index is known.
//!
//! A few IR instructions have no single raw counterpart:
//!
//! | IR                       | raw                                          |
//! |--------------------------|----------------------------------------------|
//! | `argument`               | nothing, arguments arrive in registers       |
//! | `v1 <- check-cast v0 T`  | `move v1, v0` + `check-cast v1 T`            |
//! | `null-check v0`          | `invoke-virtual Object.getClass()(v0)`       |

use std::collections::HashMap;

use crate::{
    analysis::ir::{BlockId, IrOp, ValueId},
    compiler::regalloc::RegisterCode,
    program::{
        CatchHandler, ConstValue, InvokeKind, MethodId, Proto, RawCode, RawInstruction, Reg,
        TryBlock, TypeName,
    },
    Result,
};

/// Lowers allocated code to raw code.
pub trait CodeEncoder: Send + Sync {
    /// Lowers `code`. String constants sorting at or after `first_jumbo_string` use the wide
    /// string reference form.
    ///
    /// # Errors
    ///
    /// Returns an error if `code` branches to a block it does not contain.
    fn lower_to_code(
        &self,
        code: &RegisterCode,
        first_jumbo_string: Option<&str>,
    ) -> Result<RawCode>;
}

/// The default encoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegisterEncoder;

fn reg(value: ValueId) -> Reg {
    RegisterCode::register(value)
}

fn regs(values: &[ValueId]) -> Vec<Reg> {
    values.iter().copied().map(reg).collect()
}

fn get_class() -> MethodId {
    MethodId::new(
        TypeName::object(),
        "getClass",
        Proto::new(TypeName::new("java.lang.Class"), Vec::new()),
    )
}

/// Emission state; branch targets hold block indices until [`Emitter::patch`].
struct Emitter<'a> {
    first_jumbo_string: Option<&'a str>,
    instructions: Vec<RawInstruction>,
    fixups: Vec<usize>,
}

impl Emitter<'_> {
    fn push(&mut self, instruction: RawInstruction) {
        self.instructions.push(instruction);
    }

    fn branch(&mut self, instruction: RawInstruction) {
        self.fixups.push(self.instructions.len());
        self.instructions.push(instruction);
    }

    fn result(&mut self, dest: Option<ValueId>) {
        if let Some(dest) = dest {
            self.push(RawInstruction::MoveResult { dest: reg(dest) });
        }
    }

    fn lower(&mut self, op: &IrOp, next: Option<BlockId>) {
        match op {
            IrOp::Argument { .. } => {}
            IrOp::Const {
                dest,
                value: ConstValue::String(value),
            } => self.push(RawInstruction::ConstString {
                dest: reg(*dest),
                value: value.clone(),
                jumbo: self
                    .first_jumbo_string
                    .is_some_and(|first| &**value >= first),
            }),
            IrOp::Const { dest, value } => self.push(RawInstruction::Const {
                dest: reg(*dest),
                value: value.clone(),
            }),
            IrOp::Move { dest, src } => self.push(RawInstruction::Move {
                dest: reg(*dest),
                src: reg(*src),
            }),
            IrOp::MoveException { dest } => {
                self.push(RawInstruction::MoveException { dest: reg(*dest) });
            }
            IrOp::Binary {
                op,
                ty,
                dest,
                left,
                right,
            } => self.push(RawInstruction::Binary {
                op: *op,
                ty: *ty,
                dest: reg(*dest),
                left: reg(*left),
                right: reg(*right),
            }),
            IrOp::Unary { op, dest, src } => self.push(RawInstruction::Unary {
                op: *op,
                dest: reg(*dest),
                src: reg(*src),
            }),
            IrOp::Invoke {
                kind,
                method,
                args,
                dest,
            } => {
                self.push(RawInstruction::Invoke {
                    kind: *kind,
                    method: method.clone(),
                    args: regs(args),
                });
                self.result(*dest);
            }
            IrOp::InvokeCustom {
                call_site,
                args,
                dest,
            } => {
                self.push(RawInstruction::InvokeCustom {
                    call_site: call_site.clone(),
                    args: regs(args),
                });
                self.result(*dest);
            }
            IrOp::NewInstance { dest, ty } => self.push(RawInstruction::NewInstance {
                dest: reg(*dest),
                ty: ty.clone(),
            }),
            IrOp::NewArray { dest, size, ty } => self.push(RawInstruction::NewArray {
                dest: reg(*dest),
                size: reg(*size),
                ty: ty.clone(),
            }),
            IrOp::FilledNewArray { dest, ty, args } => {
                self.push(RawInstruction::FilledNewArray {
                    ty: ty.clone(),
                    args: regs(args),
                });
                self.result(*dest);
            }
            IrOp::ArrayGet {
                dest,
                array,
                index,
                ty,
            } => self.push(RawInstruction::ArrayGet {
                dest: reg(*dest),
                array: reg(*array),
                index: reg(*index),
                ty: *ty,
            }),
            IrOp::ArrayPut {
                value,
                array,
                index,
                ty,
            } => self.push(RawInstruction::ArrayPut {
                value: reg(*value),
                array: reg(*array),
                index: reg(*index),
                ty: *ty,
            }),
            IrOp::ArrayLength { dest, array } => self.push(RawInstruction::ArrayLength {
                dest: reg(*dest),
                array: reg(*array),
            }),
            IrOp::InstanceGet {
                dest,
                object,
                field,
            } => self.push(RawInstruction::InstanceGet {
                dest: reg(*dest),
                object: reg(*object),
                field: field.clone(),
            }),
            IrOp::InstancePut {
                value,
                object,
                field,
            } => self.push(RawInstruction::InstancePut {
                value: reg(*value),
                object: reg(*object),
                field: field.clone(),
            }),
            IrOp::StaticGet { dest, field } => self.push(RawInstruction::StaticGet {
                dest: reg(*dest),
                field: field.clone(),
            }),
            IrOp::StaticPut { value, field } => self.push(RawInstruction::StaticPut {
                value: reg(*value),
                field: field.clone(),
            }),
            IrOp::CheckCast { dest, value, ty } => {
                if dest != value {
                    self.push(RawInstruction::Move {
                        dest: reg(*dest),
                        src: reg(*value),
                    });
                }
                self.push(RawInstruction::CheckCast {
                    value: reg(*dest),
                    ty: ty.clone(),
                });
            }
            IrOp::InstanceOf { dest, value, ty } => self.push(RawInstruction::InstanceOf {
                dest: reg(*dest),
                value: reg(*value),
                ty: ty.clone(),
            }),
            IrOp::NullCheck { value } => self.push(RawInstruction::Invoke {
                kind: InvokeKind::Virtual,
                method: get_class(),
                args: vec![reg(*value)],
            }),
            IrOp::Position { line } => self.push(RawInstruction::Position { line: *line }),
            IrOp::Goto { target } => {
                if next != Some(*target) {
                    self.branch(RawInstruction::Goto {
                        target: target.index(),
                    });
                }
            }
            IrOp::If {
                cond,
                left,
                right,
                then_block,
                else_block,
            } => {
                self.branch(RawInstruction::If {
                    cond: *cond,
                    left: reg(*left),
                    right: right.map(reg),
                    target: then_block.index(),
                });
                if next != Some(*else_block) {
                    self.branch(RawInstruction::Goto {
                        target: else_block.index(),
                    });
                }
            }
            IrOp::Switch {
                value,
                keys,
                targets,
                fallthrough,
            } => {
                self.branch(RawInstruction::Switch {
                    value: reg(*value),
                    keys: keys.clone(),
                    targets: targets.iter().map(|t| t.index()).collect(),
                });
                if next != Some(*fallthrough) {
                    self.branch(RawInstruction::Goto {
                        target: fallthrough.index(),
                    });
                }
            }
            IrOp::Return { value } => self.push(RawInstruction::Return {
                value: value.map(reg),
            }),
            IrOp::Throw { value } => self.push(RawInstruction::Throw { value: reg(*value) }),
        }
    }

    fn patch(&mut self, starts: &HashMap<usize, usize>, method: &MethodId) -> Result<()> {
        let start = |block: usize| {
            starts.get(&block).copied().ok_or_else(|| {
                malformed_error!("{}: branch to missing block B{}", method, block)
            })
        };
        for &index in &self.fixups {
            match &mut self.instructions[index] {
                RawInstruction::Goto { target } | RawInstruction::If { target, .. } => {
                    *target = start(*target)?;
                }
                RawInstruction::Switch { targets, .. } => {
                    for target in targets.iter_mut() {
                        *target = start(*target)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

impl CodeEncoder for RegisterEncoder {
    fn lower_to_code(
        &self,
        code: &RegisterCode,
        first_jumbo_string: Option<&str>,
    ) -> Result<RawCode> {
        let mut emitter = Emitter {
            first_jumbo_string,
            instructions: Vec::with_capacity(code.instruction_count() + code.blocks.len()),
            fixups: Vec::new(),
        };
        let mut starts = HashMap::with_capacity(code.blocks.len());
        let mut ranges = Vec::new();
        for (index, block) in code.blocks.iter().enumerate() {
            let next = code.blocks.get(index + 1).map(|b| b.id);
            let start = emitter.instructions.len();
            starts.insert(block.id.index(), start);
            for op in &block.instructions {
                emitter.lower(op, next);
            }
            let end = emitter.instructions.len();
            if !block.catch_handlers.is_empty() && end > start {
                ranges.push((start, end, &block.catch_handlers));
            }
        }
        emitter.patch(&starts, &code.method)?;

        let mut tries: Vec<TryBlock> = Vec::with_capacity(ranges.len());
        for (start, end, handlers) in ranges {
            let handlers = handlers
                .iter()
                .map(|h| {
                    let target = starts.get(&h.target.index()).copied().ok_or_else(|| {
                        malformed_error!("{}: handler {} is missing", code.method, h.target)
                    })?;
                    Ok(CatchHandler {
                        guard: h.guard.clone(),
                        target,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            match tries.last_mut() {
                Some(previous) if previous.end == start && previous.handlers == handlers => {
                    previous.end = end;
                }
                _ => tries.push(TryBlock {
                    start,
                    end,
                    handlers,
                }),
            }
        }

        Ok(RawCode {
            registers: code.registers,
            ins: code.ins,
            instructions: emitter.instructions,
            tries,
        })
    }
}
