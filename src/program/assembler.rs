//! Label based construction of [`RawCode`].
//!
//! Used to synthesize method bodies (outline helpers, lambda classes, companion forwarders) and
//! throughout the tests.
//!
//! # Examples
//!
//! ```rust
//! use dexopt::program::{BinaryOp, CodeAssembler, IfCond, NumericType};
//!
//! // int max(int a, int b)
//! let mut asm = CodeAssembler::new(2, 2);
//! let else_label = asm.new_label();
//! asm.if_cmp(IfCond::Lt, 0, 1, else_label)
//!     .return_value(0)
//!     .bind(else_label)
//!     .return_value(1);
//! let code = asm.finish().unwrap();
//! assert_eq!(code.instructions.len(), 3);
//! ```

use std::sync::Arc;

use crate::{
    program::{
        BinaryOp, CallSiteDescriptor, CatchHandler, ConstValue, FieldId, IfCond, InvokeKind,
        MethodId, NumericType, RawCode, RawInstruction, Reg, TryBlock, TypeName, UnaryOp,
        ValueType,
    },
    Result,
};

/// A forward or backward branch target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(usize);

struct PendingTry {
    start: Label,
    end: Label,
    handlers: Vec<(Option<TypeName>, Label)>,
}

/// Builds [`RawCode`] with symbolic labels.
pub struct CodeAssembler {
    registers: u16,
    ins: u16,
    instructions: Vec<RawInstruction>,
    /// Indices of branch instructions whose targets are label numbers
    fixups: Vec<usize>,
    labels: Vec<Option<usize>>,
    tries: Vec<PendingTry>,
    rebound: Option<Label>,
}

impl CodeAssembler {
    /// Creates an assembler for a frame of `registers` registers, the first `ins` of which hold
    /// the arguments.
    #[must_use]
    pub fn new(registers: u16, ins: u16) -> Self {
        Self {
            registers,
            ins,
            instructions: Vec::new(),
            fixups: Vec::new(),
            labels: Vec::new(),
            tries: Vec::new(),
            rebound: None,
        }
    }

    /// Creates a new unbound label.
    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Binds `label` to the next instruction.
    pub fn bind(&mut self, label: Label) -> &mut Self {
        if self.labels[label.0].is_some() {
            self.rebound = Some(label);
        }
        self.labels[label.0] = Some(self.instructions.len());
        self
    }

    /// Returns the index the next instruction will get.
    #[must_use]
    pub fn position(&self) -> usize {
        self.instructions.len()
    }

    /// Appends an instruction verbatim. Branch targets are instruction indices.
    pub fn push(&mut self, instruction: RawInstruction) -> &mut Self {
        self.instructions.push(instruction);
        self
    }

    fn push_branch(&mut self, instruction: RawInstruction) -> &mut Self {
        self.fixups.push(self.instructions.len());
        self.instructions.push(instruction);
        self
    }

    /// `const`
    pub fn const_value(&mut self, dest: Reg, value: ConstValue) -> &mut Self {
        self.push(RawInstruction::Const { dest, value })
    }

    /// `const` of an `int`
    pub fn const_int(&mut self, dest: Reg, value: i32) -> &mut Self {
        self.const_value(dest, ConstValue::Int(value))
    }

    /// `const-wide` of a `long`
    pub fn const_long(&mut self, dest: Reg, value: i64) -> &mut Self {
        self.const_value(dest, ConstValue::Long(value))
    }

    /// `const` null
    pub fn const_null(&mut self, dest: Reg) -> &mut Self {
        self.const_value(dest, ConstValue::Null)
    }

    /// `const-string`
    pub fn const_string(&mut self, dest: Reg, value: &str) -> &mut Self {
        self.push(RawInstruction::ConstString {
            dest,
            value: Arc::from(value),
            jumbo: false,
        })
    }

    /// `move`
    pub fn move_reg(&mut self, dest: Reg, src: Reg) -> &mut Self {
        self.push(RawInstruction::Move { dest, src })
    }

    /// `move-result`
    pub fn move_result(&mut self, dest: Reg) -> &mut Self {
        self.push(RawInstruction::MoveResult { dest })
    }

    /// `move-exception`
    pub fn move_exception(&mut self, dest: Reg) -> &mut Self {
        self.push(RawInstruction::MoveException { dest })
    }

    /// Binary arithmetic.
    pub fn binary(
        &mut self,
        op: BinaryOp,
        ty: NumericType,
        dest: Reg,
        left: Reg,
        right: Reg,
    ) -> &mut Self {
        self.push(RawInstruction::Binary {
            op,
            ty,
            dest,
            left,
            right,
        })
    }

    /// `add-int`
    pub fn add_int(&mut self, dest: Reg, left: Reg, right: Reg) -> &mut Self {
        self.binary(BinaryOp::Add, NumericType::Int, dest, left, right)
    }

    /// `mul-int`
    pub fn mul_int(&mut self, dest: Reg, left: Reg, right: Reg) -> &mut Self {
        self.binary(BinaryOp::Mul, NumericType::Int, dest, left, right)
    }

    /// Unary arithmetic.
    pub fn unary(&mut self, op: UnaryOp, dest: Reg, src: Reg) -> &mut Self {
        self.push(RawInstruction::Unary { op, dest, src })
    }

    /// `goto`
    pub fn goto(&mut self, target: Label) -> &mut Self {
        self.push_branch(RawInstruction::Goto { target: target.0 })
    }

    /// Two-register conditional branch.
    pub fn if_cmp(&mut self, cond: IfCond, left: Reg, right: Reg, target: Label) -> &mut Self {
        self.push_branch(RawInstruction::If {
            cond,
            left,
            right: Some(right),
            target: target.0,
        })
    }

    /// Conditional branch comparing against zero.
    pub fn if_zero(&mut self, cond: IfCond, value: Reg, target: Label) -> &mut Self {
        self.push_branch(RawInstruction::If {
            cond,
            left: value,
            right: None,
            target: target.0,
        })
    }

    /// Multi-way branch.
    pub fn switch(&mut self, value: Reg, cases: &[(i32, Label)]) -> &mut Self {
        self.push_branch(RawInstruction::Switch {
            value,
            keys: cases.iter().map(|(key, _)| *key).collect(),
            targets: cases.iter().map(|(_, label)| label.0).collect(),
        })
    }

    /// `return-void`
    pub fn return_void(&mut self) -> &mut Self {
        self.push(RawInstruction::Return { value: None })
    }

    /// `return`
    pub fn return_value(&mut self, value: Reg) -> &mut Self {
        self.push(RawInstruction::Return { value: Some(value) })
    }

    /// `throw`
    pub fn throw(&mut self, value: Reg) -> &mut Self {
        self.push(RawInstruction::Throw { value })
    }

    /// Invoke of any kind.
    pub fn invoke(&mut self, kind: InvokeKind, method: MethodId, args: &[Reg]) -> &mut Self {
        self.push(RawInstruction::Invoke {
            kind,
            method,
            args: args.to_vec(),
        })
    }

    /// `invoke-static`
    pub fn invoke_static(&mut self, method: MethodId, args: &[Reg]) -> &mut Self {
        self.invoke(InvokeKind::Static, method, args)
    }

    /// `invoke-virtual`
    pub fn invoke_virtual(&mut self, method: MethodId, args: &[Reg]) -> &mut Self {
        self.invoke(InvokeKind::Virtual, method, args)
    }

    /// `invoke-direct`
    pub fn invoke_direct(&mut self, method: MethodId, args: &[Reg]) -> &mut Self {
        self.invoke(InvokeKind::Direct, method, args)
    }

    /// `invoke-custom` creating a lambda.
    pub fn invoke_custom(&mut self, call_site: CallSiteDescriptor, args: &[Reg]) -> &mut Self {
        self.push(RawInstruction::InvokeCustom {
            call_site: Arc::new(call_site),
            args: args.to_vec(),
        })
    }

    /// `new-instance`
    pub fn new_instance(&mut self, dest: Reg, ty: TypeName) -> &mut Self {
        self.push(RawInstruction::NewInstance { dest, ty })
    }

    /// `new-array`
    pub fn new_array(&mut self, dest: Reg, size: Reg, ty: TypeName) -> &mut Self {
        self.push(RawInstruction::NewArray { dest, size, ty })
    }

    /// `filled-new-array`
    pub fn filled_new_array(&mut self, ty: TypeName, args: &[Reg]) -> &mut Self {
        self.push(RawInstruction::FilledNewArray {
            ty,
            args: args.to_vec(),
        })
    }

    /// `aget`
    pub fn array_get(&mut self, dest: Reg, array: Reg, index: Reg, ty: ValueType) -> &mut Self {
        self.push(RawInstruction::ArrayGet {
            dest,
            array,
            index,
            ty,
        })
    }

    /// `aput`
    pub fn array_put(&mut self, value: Reg, array: Reg, index: Reg, ty: ValueType) -> &mut Self {
        self.push(RawInstruction::ArrayPut {
            value,
            array,
            index,
            ty,
        })
    }

    /// `array-length`
    pub fn array_length(&mut self, dest: Reg, array: Reg) -> &mut Self {
        self.push(RawInstruction::ArrayLength { dest, array })
    }

    /// `check-cast`
    pub fn check_cast(&mut self, value: Reg, ty: TypeName) -> &mut Self {
        self.push(RawInstruction::CheckCast { value, ty })
    }

    /// `instance-of`
    pub fn instance_of(&mut self, dest: Reg, value: Reg, ty: TypeName) -> &mut Self {
        self.push(RawInstruction::InstanceOf { dest, value, ty })
    }

    /// `iget`
    pub fn instance_get(&mut self, dest: Reg, object: Reg, field: FieldId) -> &mut Self {
        self.push(RawInstruction::InstanceGet {
            dest,
            object,
            field,
        })
    }

    /// `iput`
    pub fn instance_put(&mut self, value: Reg, object: Reg, field: FieldId) -> &mut Self {
        self.push(RawInstruction::InstancePut {
            value,
            object,
            field,
        })
    }

    /// `sget`
    pub fn static_get(&mut self, dest: Reg, field: FieldId) -> &mut Self {
        self.push(RawInstruction::StaticGet { dest, field })
    }

    /// `sput`
    pub fn static_put(&mut self, value: Reg, field: FieldId) -> &mut Self {
        self.push(RawInstruction::StaticPut { value, field })
    }

    /// `.line`
    pub fn line(&mut self, line: u32) -> &mut Self {
        self.push(RawInstruction::Position { line })
    }

    /// Declares a try range `[start, end)` with its handlers in match order.
    pub fn try_range(
        &mut self,
        start: Label,
        end: Label,
        handlers: &[(Option<TypeName>, Label)],
    ) -> &mut Self {
        self.tries.push(PendingTry {
            start,
            end,
            handlers: handlers.to_vec(),
        });
        self
    }

    fn resolve(&self, label: usize) -> Result<usize> {
        match self.labels.get(label) {
            Some(Some(position)) => Ok(*position),
            _ => Err(malformed_error!("Label {} is never bound", label)),
        }
    }

    /// Resolves all labels and returns the code.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if a referenced label is unbound or a label was bound
    /// twice.
    pub fn finish(mut self) -> Result<RawCode> {
        if let Some(label) = self.rebound {
            return Err(malformed_error!("Label {} is bound twice", label.0));
        }

        for index in std::mem::take(&mut self.fixups) {
            let patched = match &self.instructions[index] {
                RawInstruction::Goto { target } => RawInstruction::Goto {
                    target: self.resolve(*target)?,
                },
                RawInstruction::If {
                    cond,
                    left,
                    right,
                    target,
                } => RawInstruction::If {
                    cond: *cond,
                    left: *left,
                    right: *right,
                    target: self.resolve(*target)?,
                },
                RawInstruction::Switch {
                    value,
                    keys,
                    targets,
                } => RawInstruction::Switch {
                    value: *value,
                    keys: keys.clone(),
                    targets: targets
                        .iter()
                        .map(|t| self.resolve(*t))
                        .collect::<Result<_>>()?,
                },
                other => other.clone(),
            };
            self.instructions[index] = patched;
        }

        let tries = self
            .tries
            .iter()
            .map(|t| {
                Ok(TryBlock {
                    start: self.resolve(t.start.0)?,
                    end: self.resolve(t.end.0)?,
                    handlers: t
                        .handlers
                        .iter()
                        .map(|(guard, label)| {
                            Ok(CatchHandler {
                                guard: guard.clone(),
                                target: self.resolve(label.0)?,
                            })
                        })
                        .collect::<Result<_>>()?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(RawCode {
            registers: self.registers,
            ins: self.ins,
            instructions: self.instructions,
            tries,
        })
    }
}
