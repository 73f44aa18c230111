//! Raw register bytecode.
//!
//! This is the representation methods carry in and out of the compiler. It is a small
//! register machine in the style of Dalvik bytecode:
//!
//! - a method declares `registers` registers, the first `ins` of which hold the incoming
//!   arguments (the receiver first for instance methods);
//! - every register holds one value of any [`ValueType`], wide values included;
//! - branch targets and try ranges refer to instruction indices;
//! - invoke results are picked up by a following `MoveResult`, and a catch handler may start
//!   with `MoveException` to obtain the thrown object.
//!
//! Binary layout and per-opcode encodings are out of scope; [`RawCode`] is the exchange format
//! between the IR builder and the encoder.

use std::{fmt, sync::Arc};

use crate::program::{ConstValue, FieldId, MethodId, Proto, TypeName, ValueType};

/// A register number.
pub type Reg = u16;

/// Arithmetic and logical binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum BinaryOp {
    /// Addition
    Add,
    /// Subtraction
    Sub,
    /// Multiplication
    Mul,
    /// Division, throws on a zero divisor
    Div,
    /// Remainder, throws on a zero divisor
    Rem,
    /// Bitwise and
    And,
    /// Bitwise or
    Or,
    /// Bitwise xor
    Xor,
    /// Shift left
    Shl,
    /// Arithmetic shift right
    Shr,
    /// Logical shift right
    Ushr,
    /// Three-way comparison producing -1, 0 or 1 as an `int`
    Cmp,
}

impl BinaryOp {
    /// Returns `true` if `a op b == b op a`.
    #[must_use]
    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Mul | BinaryOp::And | BinaryOp::Or | BinaryOp::Xor
        )
    }

    /// Returns `true` if the operator can throw `ArithmeticException`.
    #[must_use]
    pub fn can_throw(self, ty: NumericType) -> bool {
        matches!(self, BinaryOp::Div | BinaryOp::Rem)
            && matches!(ty, NumericType::Int | NumericType::Long)
    }

    /// Evaluates the operator with the wrapping semantics of the register machine.
    ///
    /// `int` operands are truncated to 32 bits first, shift distances are masked to the
    /// operand width, and `Cmp` yields -1, 0 or 1. Returns `None` for a zero divisor.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use dexopt::program::{BinaryOp, NumericType};
    ///
    /// assert_eq!(BinaryOp::Add.fold(NumericType::Int, i64::from(i32::MAX), 1), Some(i64::from(i32::MIN)));
    /// assert_eq!(BinaryOp::Shl.fold(NumericType::Int, 1, 33), Some(2));
    /// assert_eq!(BinaryOp::Div.fold(NumericType::Long, 7, 0), None);
    /// ```
    #[must_use]
    pub fn fold(self, ty: NumericType, left: i64, right: i64) -> Option<i64> {
        match ty {
            NumericType::Int => {
                let (a, b) = (left as i32, right as i32);
                let value = match self {
                    BinaryOp::Add => a.wrapping_add(b),
                    BinaryOp::Sub => a.wrapping_sub(b),
                    BinaryOp::Mul => a.wrapping_mul(b),
                    BinaryOp::Div if b == 0 => return None,
                    BinaryOp::Div => a.wrapping_div(b),
                    BinaryOp::Rem if b == 0 => return None,
                    BinaryOp::Rem => a.wrapping_rem(b),
                    BinaryOp::And => a & b,
                    BinaryOp::Or => a | b,
                    BinaryOp::Xor => a ^ b,
                    BinaryOp::Shl => a.wrapping_shl((b & 31) as u32),
                    BinaryOp::Shr => a.wrapping_shr((b & 31) as u32),
                    BinaryOp::Ushr => ((a as u32) >> (b & 31)) as i32,
                    BinaryOp::Cmp => a.cmp(&b) as i32,
                };
                Some(i64::from(value))
            }
            NumericType::Long => Some(match self {
                BinaryOp::Add => left.wrapping_add(right),
                BinaryOp::Sub => left.wrapping_sub(right),
                BinaryOp::Mul => left.wrapping_mul(right),
                BinaryOp::Div if right == 0 => return None,
                BinaryOp::Div => left.wrapping_div(right),
                BinaryOp::Rem if right == 0 => return None,
                BinaryOp::Rem => left.wrapping_rem(right),
                BinaryOp::And => left & right,
                BinaryOp::Or => left | right,
                BinaryOp::Xor => left ^ right,
                BinaryOp::Shl => left.wrapping_shl((right & 63) as u32),
                BinaryOp::Shr => left.wrapping_shr((right & 63) as u32),
                BinaryOp::Ushr => ((left as u64) >> (right & 63)) as i64,
                BinaryOp::Cmp => left.cmp(&right) as i64,
            }),
        }
    }
}

/// Operand width of an arithmetic instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum NumericType {
    /// 32-bit integer
    Int,
    /// 64-bit integer
    Long,
}

impl NumericType {
    /// Returns the register kind of a value of this width.
    #[must_use]
    pub fn value_type(self) -> ValueType {
        match self {
            NumericType::Int => ValueType::Int,
            NumericType::Long => ValueType::Long,
        }
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum UnaryOp {
    /// Arithmetic negation
    Neg,
    /// Bitwise complement
    Not,
    /// Sign-extending `int` to `long` conversion
    IntToLong,
    /// Truncating `long` to `int` conversion
    LongToInt,
}

impl UnaryOp {
    /// Evaluates the operator on an operand of type `ty`.
    #[must_use]
    pub fn fold(self, value: i64, ty: ValueType) -> i64 {
        match (self, ty) {
            (UnaryOp::Neg, ValueType::Long) => value.wrapping_neg(),
            (UnaryOp::Neg, _) => i64::from((value as i32).wrapping_neg()),
            (UnaryOp::Not, ValueType::Long) => !value,
            (UnaryOp::Not, _) => i64::from(!(value as i32)),
            (UnaryOp::IntToLong, _) => i64::from(value as i32),
            (UnaryOp::LongToInt, _) => i64::from(value as i32),
        }
    }
}

/// Conditions of conditional branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum IfCond {
    /// Equal
    Eq,
    /// Not equal
    Ne,
    /// Less than
    Lt,
    /// Greater or equal
    Ge,
    /// Greater than
    Gt,
    /// Less or equal
    Le,
}

impl IfCond {
    /// Evaluates the condition on two integral operands.
    #[must_use]
    pub fn evaluate(self, left: i64, right: i64) -> bool {
        match self {
            IfCond::Eq => left == right,
            IfCond::Ne => left != right,
            IfCond::Lt => left < right,
            IfCond::Ge => left >= right,
            IfCond::Gt => left > right,
            IfCond::Le => left <= right,
        }
    }

    /// Returns the condition with swapped operands (`a < b` is `b > a`).
    #[must_use]
    pub fn swapped(self) -> Self {
        match self {
            IfCond::Eq => IfCond::Eq,
            IfCond::Ne => IfCond::Ne,
            IfCond::Lt => IfCond::Gt,
            IfCond::Ge => IfCond::Le,
            IfCond::Gt => IfCond::Lt,
            IfCond::Le => IfCond::Ge,
        }
    }
}

/// How an invoke dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum InvokeKind {
    /// Static method, no receiver
    Static,
    /// Private method or constructor, no dispatch
    Direct,
    /// Virtual dispatch on the receiver
    Virtual,
    /// Non-virtual call of the superclass (or default interface) implementation
    Super,
    /// Interface dispatch on the receiver
    Interface,
}

impl InvokeKind {
    /// Returns `true` if the first argument is a receiver.
    #[must_use]
    pub fn has_receiver(self) -> bool {
        !matches!(self, InvokeKind::Static)
    }
}

/// A lambda creation site: the functional interface it implements and the method its single
/// abstract method forwards to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallSiteDescriptor {
    /// The functional interface
    pub interface: TypeName,
    /// Name of the interface method being implemented
    pub method_name: Arc<str>,
    /// Prototype of the interface method being implemented
    pub method_proto: Proto,
    /// The implementation method
    pub implementation: MethodId,
    /// How the implementation method is invoked
    pub implementation_kind: InvokeKind,
}

/// One raw instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum RawInstruction {
    /// No operation
    Nop,
    /// Load a constant
    Const { dest: Reg, value: ConstValue },
    /// Load a string, `jumbo` marks the wide string index form
    ConstString {
        dest: Reg,
        value: Arc<str>,
        jumbo: bool,
    },
    /// Register to register copy
    Move { dest: Reg, src: Reg },
    /// Receive the result of the preceding invoke or filled-new-array
    MoveResult { dest: Reg },
    /// Receive the exception at the start of a handler
    MoveException { dest: Reg },
    /// Binary arithmetic
    Binary {
        op: BinaryOp,
        ty: NumericType,
        dest: Reg,
        left: Reg,
        right: Reg,
    },
    /// Unary arithmetic and conversions
    Unary { op: UnaryOp, dest: Reg, src: Reg },
    /// Unconditional branch
    Goto { target: usize },
    /// Conditional branch; compares against zero when `right` is `None`
    If {
        cond: IfCond,
        left: Reg,
        right: Option<Reg>,
        target: usize,
    },
    /// Multi-way branch, falls through when no key matches
    Switch {
        value: Reg,
        keys: Vec<i32>,
        targets: Vec<usize>,
    },
    /// Return, with or without a value
    Return { value: Option<Reg> },
    /// Throw the exception in `value`
    Throw { value: Reg },
    /// Call a method
    Invoke {
        kind: InvokeKind,
        method: MethodId,
        args: Vec<Reg>,
    },
    /// Create a lambda instance
    InvokeCustom {
        call_site: Arc<CallSiteDescriptor>,
        args: Vec<Reg>,
    },
    /// Allocate an uninitialized instance
    NewInstance { dest: Reg, ty: TypeName },
    /// Allocate an array of `size` elements
    NewArray { dest: Reg, size: Reg, ty: TypeName },
    /// Allocate and fill an array, the result is picked up by `MoveResult`
    FilledNewArray { ty: TypeName, args: Vec<Reg> },
    /// Read an array element
    ArrayGet {
        dest: Reg,
        array: Reg,
        index: Reg,
        ty: ValueType,
    },
    /// Write an array element
    ArrayPut {
        value: Reg,
        array: Reg,
        index: Reg,
        ty: ValueType,
    },
    /// Read the length of an array
    ArrayLength { dest: Reg, array: Reg },
    /// Read an instance field
    InstanceGet {
        dest: Reg,
        object: Reg,
        field: FieldId,
    },
    /// Write an instance field
    InstancePut {
        value: Reg,
        object: Reg,
        field: FieldId,
    },
    /// Read a static field
    StaticGet { dest: Reg, field: FieldId },
    /// Write a static field
    StaticPut { value: Reg, field: FieldId },
    /// Checked cast of the reference in `value`, in place
    CheckCast { value: Reg, ty: TypeName },
    /// Type test
    InstanceOf { dest: Reg, value: Reg, ty: TypeName },
    /// Debug line marker
    Position { line: u32 },
}

impl RawInstruction {
    /// Returns `true` if control never falls through to the next instruction.
    #[must_use]
    pub fn ends_flow(&self) -> bool {
        matches!(
            self,
            RawInstruction::Goto { .. } | RawInstruction::Return { .. } | RawInstruction::Throw { .. }
        )
    }

    /// Returns `true` for instructions that transfer control.
    #[must_use]
    pub fn is_branch(&self) -> bool {
        self.ends_flow()
            || matches!(self, RawInstruction::If { .. } | RawInstruction::Switch { .. })
    }

    /// Returns the explicit branch targets.
    #[must_use]
    pub fn targets(&self) -> Vec<usize> {
        match self {
            RawInstruction::Goto { target } | RawInstruction::If { target, .. } => vec![*target],
            RawInstruction::Switch { targets, .. } => targets.clone(),
            _ => Vec::new(),
        }
    }

    /// Returns `true` if the instruction may raise an exception.
    #[must_use]
    pub fn can_throw(&self) -> bool {
        match self {
            RawInstruction::Binary { op, ty, .. } => op.can_throw(*ty),
            RawInstruction::Throw { .. }
            | RawInstruction::Invoke { .. }
            | RawInstruction::InvokeCustom { .. }
            | RawInstruction::NewInstance { .. }
            | RawInstruction::NewArray { .. }
            | RawInstruction::FilledNewArray { .. }
            | RawInstruction::ArrayGet { .. }
            | RawInstruction::ArrayPut { .. }
            | RawInstruction::ArrayLength { .. }
            | RawInstruction::InstanceGet { .. }
            | RawInstruction::InstancePut { .. }
            | RawInstruction::StaticGet { .. }
            | RawInstruction::StaticPut { .. }
            | RawInstruction::CheckCast { .. } => true,
            RawInstruction::Const { value, .. } => matches!(value, ConstValue::Type(_)),
            _ => false,
        }
    }

    /// Returns `true` if the instruction produces a result for a following `MoveResult`.
    #[must_use]
    pub fn has_pending_result(&self) -> bool {
        matches!(
            self,
            RawInstruction::Invoke { .. }
                | RawInstruction::InvokeCustom { .. }
                | RawInstruction::FilledNewArray { .. }
        )
    }
}

/// A catch clause of a try range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatchHandler {
    /// The caught exception type, `None` for catch-all
    pub guard: Option<TypeName>,
    /// Index of the first handler instruction
    pub target: usize,
}

/// A try range `[start, end)` over instruction indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TryBlock {
    /// First covered instruction
    pub start: usize,
    /// One past the last covered instruction
    pub end: usize,
    /// Handlers in match order
    pub handlers: Vec<CatchHandler>,
}

impl TryBlock {
    /// Returns `true` if `index` is covered.
    #[must_use]
    pub fn covers(&self, index: usize) -> bool {
        self.start <= index && index < self.end
    }
}

/// A method body in raw register form.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawCode {
    /// Number of registers the method uses
    pub registers: u16,
    /// Number of argument registers, the first registers of the frame
    pub ins: u16,
    /// The instructions
    pub instructions: Vec<RawInstruction>,
    /// Try ranges, innermost first
    pub tries: Vec<TryBlock>,
}

impl RawCode {
    /// Returns the number of instructions excluding `Nop` and `Position` markers.
    #[must_use]
    pub fn instruction_count(&self) -> usize {
        self.instructions
            .iter()
            .filter(|i| !matches!(i, RawInstruction::Nop | RawInstruction::Position { .. }))
            .count()
    }

    /// Returns the handlers covering instruction `index`, first matching try range wins.
    #[must_use]
    pub fn handlers_at(&self, index: usize) -> &[CatchHandler] {
        self.tries
            .iter()
            .find(|t| t.covers(index))
            .map_or(&[], |t| t.handlers.as_slice())
    }

    /// Iterates the string literals referenced by the code.
    pub fn strings(&self) -> impl Iterator<Item = &str> {
        self.instructions.iter().filter_map(|i| match i {
            RawInstruction::ConstString { value, .. } => Some(&**value),
            RawInstruction::Const {
                value: ConstValue::String(s),
                ..
            } => Some(&**s),
            _ => None,
        })
    }

    /// Returns the lexicographically highest string literal.
    #[must_use]
    pub fn highest_string(&self) -> Option<&str> {
        self.strings().max()
    }

    /// Iterates the call targets in instruction order.
    pub fn invokes(&self) -> impl Iterator<Item = (usize, InvokeKind, &MethodId)> {
        self.instructions
            .iter()
            .enumerate()
            .filter_map(|(index, i)| match i {
                RawInstruction::Invoke { kind, method, .. } => Some((index, *kind, method)),
                _ => None,
            })
    }
}

impl fmt::Display for RawInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let regs = |regs: &[Reg]| {
            regs.iter()
                .map(|r| format!("r{r}"))
                .collect::<Vec<_>>()
                .join(", ")
        };
        match self {
            RawInstruction::Nop => f.write_str("nop"),
            RawInstruction::Const { dest, value } => write!(f, "const r{dest}, {value}"),
            RawInstruction::ConstString { dest, value, jumbo } => {
                let suffix = if *jumbo { "/jumbo" } else { "" };
                write!(f, "const-string{suffix} r{dest}, {value:?}")
            }
            RawInstruction::Move { dest, src } => write!(f, "move r{dest}, r{src}"),
            RawInstruction::MoveResult { dest } => write!(f, "move-result r{dest}"),
            RawInstruction::MoveException { dest } => write!(f, "move-exception r{dest}"),
            RawInstruction::Binary {
                op,
                ty,
                dest,
                left,
                right,
            } => write!(f, "{op}-{ty} r{dest}, r{left}, r{right}"),
            RawInstruction::Unary { op, dest, src } => write!(f, "{op} r{dest}, r{src}"),
            RawInstruction::Goto { target } => write!(f, "goto @{target}"),
            RawInstruction::If {
                cond,
                left,
                right: Some(right),
                target,
            } => write!(f, "if-{cond} r{left}, r{right}, @{target}"),
            RawInstruction::If {
                cond,
                left,
                right: None,
                target,
            } => write!(f, "if-{cond}z r{left}, @{target}"),
            RawInstruction::Switch {
                value,
                keys,
                targets,
            } => {
                write!(f, "switch r{value}")?;
                for (key, target) in keys.iter().zip(targets) {
                    write!(f, " {key}:@{target}")?;
                }
                Ok(())
            }
            RawInstruction::Return { value: Some(v) } => write!(f, "return r{v}"),
            RawInstruction::Return { value: None } => f.write_str("return-void"),
            RawInstruction::Throw { value } => write!(f, "throw r{value}"),
            RawInstruction::Invoke { kind, method, args } => {
                write!(f, "invoke-{kind} {{{}}}, {method}", regs(args))
            }
            RawInstruction::InvokeCustom { call_site, args } => write!(
                f,
                "invoke-custom {{{}}}, {}::{}",
                regs(args),
                call_site.interface,
                call_site.implementation
            ),
            RawInstruction::NewInstance { dest, ty } => write!(f, "new-instance r{dest}, {ty}"),
            RawInstruction::NewArray { dest, size, ty } => {
                write!(f, "new-array r{dest}, r{size}, {ty}")
            }
            RawInstruction::FilledNewArray { ty, args } => {
                write!(f, "filled-new-array {{{}}}, {ty}", regs(args))
            }
            RawInstruction::ArrayGet {
                dest, array, index, ..
            } => write!(f, "aget r{dest}, r{array}, r{index}"),
            RawInstruction::ArrayPut {
                value, array, index, ..
            } => write!(f, "aput r{value}, r{array}, r{index}"),
            RawInstruction::ArrayLength { dest, array } => {
                write!(f, "array-length r{dest}, r{array}")
            }
            RawInstruction::InstanceGet {
                dest,
                object,
                field,
            } => write!(f, "iget r{dest}, r{object}, {field}"),
            RawInstruction::InstancePut {
                value,
                object,
                field,
            } => write!(f, "iput r{value}, r{object}, {field}"),
            RawInstruction::StaticGet { dest, field } => write!(f, "sget r{dest}, {field}"),
            RawInstruction::StaticPut { value, field } => write!(f, "sput r{value}, {field}"),
            RawInstruction::CheckCast { value, ty } => write!(f, "check-cast r{value}, {ty}"),
            RawInstruction::InstanceOf { dest, value, ty } => {
                write!(f, "instance-of r{dest}, r{value}, {ty}")
            }
            RawInstruction::Position { line } => write!(f, ".line {line}"),
        }
    }
}

impl fmt::Display for RawCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "registers: {}, ins: {}", self.registers, self.ins)?;
        for (index, instruction) in self.instructions.iter().enumerate() {
            writeln!(f, "{index:4}: {instruction}")?;
        }
        for try_block in &self.tries {
            write!(f, "try @{}..@{}", try_block.start, try_block.end)?;
            for handler in &try_block.handlers {
                match &handler.guard {
                    Some(guard) => write!(f, " catch {guard} @{}", handler.target)?,
                    None => write!(f, " catch-all @{}", handler.target)?,
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throwing_classification() {
        let div = RawInstruction::Binary {
            op: BinaryOp::Div,
            ty: NumericType::Int,
            dest: 0,
            left: 0,
            right: 1,
        };
        let add = RawInstruction::Binary {
            op: BinaryOp::Add,
            ty: NumericType::Int,
            dest: 0,
            left: 0,
            right: 1,
        };
        assert!(div.can_throw());
        assert!(!add.can_throw());
        assert!(!RawInstruction::Goto { target: 0 }.can_throw());
    }

    #[test]
    fn test_handlers_at_innermost_first() {
        let code = RawCode {
            registers: 1,
            ins: 0,
            instructions: vec![RawInstruction::Nop; 4],
            tries: vec![
                TryBlock {
                    start: 1,
                    end: 2,
                    handlers: vec![CatchHandler {
                        guard: None,
                        target: 3,
                    }],
                },
                TryBlock {
                    start: 0,
                    end: 3,
                    handlers: vec![],
                },
            ],
        };
        assert_eq!(code.handlers_at(1).len(), 1);
        assert!(code.handlers_at(0).is_empty());
        assert!(code.handlers_at(3).is_empty());
    }

    #[test]
    fn test_if_cond_swapped() {
        assert!(IfCond::Lt.evaluate(1, 2));
        assert!(IfCond::Lt.swapped().evaluate(2, 1));
    }
}
