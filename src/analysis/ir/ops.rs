//! IR instructions.

use std::{fmt, sync::Arc};

use crate::{
    analysis::ir::{BlockId, ValueId},
    program::{
        BinaryOp, CallSiteDescriptor, ConstValue, FieldId, IfCond, InvokeKind, MethodId,
        NumericType, TypeName, UnaryOp, ValueType,
    },
};

/// One IR instruction.
///
/// Instructions with a `dest` define exactly one value. Terminators (`Goto`, `If`, `Switch`,
/// `Return`, `Throw`) end every block and appear nowhere else. After register allocation the
/// same value may be defined by several `Move`s; before it, every value has a single
/// definition.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum IrOp {
    /// Incoming argument `index`, only at the start of the entry block
    Argument { dest: ValueId, index: u16 },
    /// Constant
    Const { dest: ValueId, value: ConstValue },
    /// Copy, introduced by inlining and register allocation
    Move { dest: ValueId, src: ValueId },
    /// The caught exception, first instruction of a handler
    MoveException { dest: ValueId },
    /// Binary arithmetic
    Binary {
        op: BinaryOp,
        ty: NumericType,
        dest: ValueId,
        left: ValueId,
        right: ValueId,
    },
    /// Unary arithmetic
    Unary {
        op: UnaryOp,
        dest: ValueId,
        src: ValueId,
    },
    /// Method call; `dest` is `None` when the result is void or unused
    Invoke {
        kind: InvokeKind,
        method: MethodId,
        args: Vec<ValueId>,
        dest: Option<ValueId>,
    },
    /// Lambda creation
    InvokeCustom {
        call_site: Arc<CallSiteDescriptor>,
        args: Vec<ValueId>,
        dest: Option<ValueId>,
    },
    /// Allocation
    NewInstance { dest: ValueId, ty: TypeName },
    /// Array allocation
    NewArray {
        dest: ValueId,
        size: ValueId,
        ty: TypeName,
    },
    /// Array allocation with initial contents
    FilledNewArray {
        dest: Option<ValueId>,
        ty: TypeName,
        args: Vec<ValueId>,
    },
    /// Array element read
    ArrayGet {
        dest: ValueId,
        array: ValueId,
        index: ValueId,
        ty: ValueType,
    },
    /// Array element write
    ArrayPut {
        value: ValueId,
        array: ValueId,
        index: ValueId,
        ty: ValueType,
    },
    /// Array length
    ArrayLength { dest: ValueId, array: ValueId },
    /// Instance field read
    InstanceGet {
        dest: ValueId,
        object: ValueId,
        field: FieldId,
    },
    /// Instance field write
    InstancePut {
        value: ValueId,
        object: ValueId,
        field: FieldId,
    },
    /// Static field read
    StaticGet { dest: ValueId, field: FieldId },
    /// Static field write
    StaticPut { value: ValueId, field: FieldId },
    /// Checked cast, producing the cast value as a new value
    CheckCast {
        dest: ValueId,
        value: ValueId,
        ty: TypeName,
    },
    /// Type test
    InstanceOf {
        dest: ValueId,
        value: ValueId,
        ty: TypeName,
    },
    /// Throws `NullPointerException` if `value` is null
    NullCheck { value: ValueId },
    /// Debug line marker
    Position { line: u32 },
    /// Unconditional branch
    Goto { target: BlockId },
    /// Conditional branch; compares against zero when `right` is `None`
    If {
        cond: IfCond,
        left: ValueId,
        right: Option<ValueId>,
        then_block: BlockId,
        else_block: BlockId,
    },
    /// Multi-way branch
    Switch {
        value: ValueId,
        keys: Vec<i32>,
        targets: Vec<BlockId>,
        fallthrough: BlockId,
    },
    /// Return
    Return { value: Option<ValueId> },
    /// Throw
    Throw { value: ValueId },
}

impl IrOp {
    /// Returns the value defined by this instruction.
    #[must_use]
    pub fn dest(&self) -> Option<ValueId> {
        match self {
            IrOp::Argument { dest, .. }
            | IrOp::Const { dest, .. }
            | IrOp::Move { dest, .. }
            | IrOp::MoveException { dest }
            | IrOp::Binary { dest, .. }
            | IrOp::Unary { dest, .. }
            | IrOp::NewInstance { dest, .. }
            | IrOp::NewArray { dest, .. }
            | IrOp::ArrayGet { dest, .. }
            | IrOp::ArrayLength { dest, .. }
            | IrOp::InstanceGet { dest, .. }
            | IrOp::StaticGet { dest, .. }
            | IrOp::CheckCast { dest, .. }
            | IrOp::InstanceOf { dest, .. } => Some(*dest),
            IrOp::Invoke { dest, .. }
            | IrOp::InvokeCustom { dest, .. }
            | IrOp::FilledNewArray { dest, .. } => *dest,
            _ => None,
        }
    }

    /// Returns a mutable reference to the defined value.
    pub fn dest_mut(&mut self) -> Option<&mut ValueId> {
        match self {
            IrOp::Argument { dest, .. }
            | IrOp::Const { dest, .. }
            | IrOp::Move { dest, .. }
            | IrOp::MoveException { dest }
            | IrOp::Binary { dest, .. }
            | IrOp::Unary { dest, .. }
            | IrOp::NewInstance { dest, .. }
            | IrOp::NewArray { dest, .. }
            | IrOp::ArrayGet { dest, .. }
            | IrOp::ArrayLength { dest, .. }
            | IrOp::InstanceGet { dest, .. }
            | IrOp::StaticGet { dest, .. }
            | IrOp::CheckCast { dest, .. }
            | IrOp::InstanceOf { dest, .. } => Some(dest),
            IrOp::Invoke { dest, .. }
            | IrOp::InvokeCustom { dest, .. }
            | IrOp::FilledNewArray { dest, .. } => dest.as_mut(),
            _ => None,
        }
    }

    /// Returns the values read by this instruction, in operand order.
    #[must_use]
    pub fn uses(&self) -> Vec<ValueId> {
        let mut uses = Vec::new();
        self.for_each_use(|v| uses.push(v));
        uses
    }

    /// Calls `f` for every value read, in operand order.
    pub fn for_each_use(&self, mut f: impl FnMut(ValueId)) {
        match self {
            IrOp::Move { src, .. } | IrOp::Unary { src, .. } => f(*src),
            IrOp::Binary { left, right, .. } => {
                f(*left);
                f(*right);
            }
            IrOp::Invoke { args, .. }
            | IrOp::InvokeCustom { args, .. }
            | IrOp::FilledNewArray { args, .. } => args.iter().copied().for_each(f),
            IrOp::NewArray { size, .. } => f(*size),
            IrOp::ArrayGet { array, index, .. } => {
                f(*array);
                f(*index);
            }
            IrOp::ArrayPut {
                value,
                array,
                index,
                ..
            } => {
                f(*value);
                f(*array);
                f(*index);
            }
            IrOp::ArrayLength { array, .. } => f(*array),
            IrOp::InstanceGet { object, .. } => f(*object),
            IrOp::InstancePut { value, object, .. } => {
                f(*value);
                f(*object);
            }
            IrOp::StaticPut { value, .. }
            | IrOp::CheckCast { value, .. }
            | IrOp::InstanceOf { value, .. }
            | IrOp::NullCheck { value }
            | IrOp::Throw { value }
            | IrOp::Switch { value, .. } => f(*value),
            IrOp::If { left, right, .. } => {
                f(*left);
                if let Some(right) = right {
                    f(*right);
                }
            }
            IrOp::Return { value } => {
                if let Some(value) = value {
                    f(*value);
                }
            }
            IrOp::Argument { .. }
            | IrOp::Const { .. }
            | IrOp::MoveException { .. }
            | IrOp::NewInstance { .. }
            | IrOp::StaticGet { .. }
            | IrOp::Position { .. }
            | IrOp::Goto { .. } => {}
        }
    }

    /// Calls `f` with a mutable reference to every value read.
    pub fn for_each_use_mut(&mut self, mut f: impl FnMut(&mut ValueId)) {
        match self {
            IrOp::Move { src, .. } | IrOp::Unary { src, .. } => f(src),
            IrOp::Binary { left, right, .. } => {
                f(left);
                f(right);
            }
            IrOp::Invoke { args, .. }
            | IrOp::InvokeCustom { args, .. }
            | IrOp::FilledNewArray { args, .. } => args.iter_mut().for_each(f),
            IrOp::NewArray { size, .. } => f(size),
            IrOp::ArrayGet { array, index, .. } => {
                f(array);
                f(index);
            }
            IrOp::ArrayPut {
                value,
                array,
                index,
                ..
            } => {
                f(value);
                f(array);
                f(index);
            }
            IrOp::ArrayLength { array, .. } => f(array),
            IrOp::InstanceGet { object, .. } => f(object),
            IrOp::InstancePut { value, object, .. } => {
                f(value);
                f(object);
            }
            IrOp::StaticPut { value, .. }
            | IrOp::CheckCast { value, .. }
            | IrOp::InstanceOf { value, .. }
            | IrOp::NullCheck { value }
            | IrOp::Throw { value }
            | IrOp::Switch { value, .. } => f(value),
            IrOp::If { left, right, .. } => {
                f(left);
                if let Some(right) = right {
                    f(right);
                }
            }
            IrOp::Return { value } => {
                if let Some(value) = value {
                    f(value);
                }
            }
            IrOp::Argument { .. }
            | IrOp::Const { .. }
            | IrOp::MoveException { .. }
            | IrOp::NewInstance { .. }
            | IrOp::StaticGet { .. }
            | IrOp::Position { .. }
            | IrOp::Goto { .. } => {}
        }
    }

    /// Returns `true` for block terminators.
    #[must_use]
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            IrOp::Goto { .. }
                | IrOp::If { .. }
                | IrOp::Switch { .. }
                | IrOp::Return { .. }
                | IrOp::Throw { .. }
        )
    }

    /// Returns the normal successors of a terminator in branch order, duplicates removed.
    #[must_use]
    pub fn successors(&self) -> Vec<BlockId> {
        let mut result: Vec<BlockId> = match self {
            IrOp::Goto { target } => vec![*target],
            IrOp::If {
                then_block,
                else_block,
                ..
            } => vec![*then_block, *else_block],
            IrOp::Switch {
                targets,
                fallthrough,
                ..
            } => targets
                .iter()
                .copied()
                .chain(std::iter::once(*fallthrough))
                .collect(),
            _ => Vec::new(),
        };
        let mut seen = Vec::with_capacity(result.len());
        result.retain(|b| {
            if seen.contains(b) {
                false
            } else {
                seen.push(*b);
                true
            }
        });
        result
    }

    /// Rewrites every branch target with `f`.
    pub fn map_targets(&mut self, mut f: impl FnMut(BlockId) -> BlockId) {
        match self {
            IrOp::Goto { target } => *target = f(*target),
            IrOp::If {
                then_block,
                else_block,
                ..
            } => {
                *then_block = f(*then_block);
                *else_block = f(*else_block);
            }
            IrOp::Switch {
                targets,
                fallthrough,
                ..
            } => {
                for target in targets.iter_mut() {
                    *target = f(*target);
                }
                *fallthrough = f(*fallthrough);
            }
            _ => {}
        }
    }

    /// Returns `true` if the instruction may raise an exception.
    #[must_use]
    pub fn can_throw(&self) -> bool {
        match self {
            IrOp::Binary { op, ty, .. } => op.can_throw(*ty),
            IrOp::Const { value, .. } => matches!(value, ConstValue::Type(_)),
            IrOp::Invoke { .. }
            | IrOp::InvokeCustom { .. }
            | IrOp::NewInstance { .. }
            | IrOp::NewArray { .. }
            | IrOp::FilledNewArray { .. }
            | IrOp::ArrayGet { .. }
            | IrOp::ArrayPut { .. }
            | IrOp::ArrayLength { .. }
            | IrOp::InstanceGet { .. }
            | IrOp::InstancePut { .. }
            | IrOp::StaticGet { .. }
            | IrOp::StaticPut { .. }
            | IrOp::CheckCast { .. }
            | IrOp::NullCheck { .. }
            | IrOp::Throw { .. } => true,
            _ => false,
        }
    }

    /// Returns `true` if removing the instruction, when its result is unused, may change
    /// observable behaviour.
    ///
    /// Field reads and allocations are treated as removable: their only effects are class
    /// initialization and exceptions, which the optimizer does not preserve for dead code.
    #[must_use]
    pub fn has_side_effects(&self) -> bool {
        match self {
            IrOp::Binary { op, ty, .. } => op.can_throw(*ty),
            IrOp::Invoke { .. }
            | IrOp::InvokeCustom { .. }
            | IrOp::ArrayPut { .. }
            | IrOp::InstancePut { .. }
            | IrOp::StaticPut { .. }
            | IrOp::CheckCast { .. }
            | IrOp::NullCheck { .. }
            | IrOp::Argument { .. }
            | IrOp::Position { .. } => true,
            other => other.is_terminator(),
        }
    }

    /// Returns `true` if two executions with equal operands produce equal results and the
    /// instruction can be merged with an earlier identical one.
    #[must_use]
    pub fn is_pure(&self) -> bool {
        match self {
            IrOp::Binary { op, ty, .. } => !op.can_throw(*ty),
            IrOp::Unary { .. } | IrOp::InstanceOf { .. } => true,
            IrOp::Const { value, .. } => !matches!(value, ConstValue::Type(_)),
            _ => false,
        }
    }
}

fn list(values: &[ValueId]) -> String {
    values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for IrOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(dest) = self.dest() {
            write!(f, "{dest} <- ")?;
        }
        match self {
            IrOp::Argument { index, .. } => write!(f, "argument {index}"),
            IrOp::Const { value, .. } => write!(f, "const {value}"),
            IrOp::Move { src, .. } => write!(f, "move {src}"),
            IrOp::MoveException { .. } => f.write_str("move-exception"),
            IrOp::Binary {
                op,
                ty,
                left,
                right,
                ..
            } => write!(f, "{op}-{ty} {left}, {right}"),
            IrOp::Unary { op, src, .. } => write!(f, "{op} {src}"),
            IrOp::Invoke {
                kind, method, args, ..
            } => write!(f, "invoke-{kind} {method}({})", list(args)),
            IrOp::InvokeCustom {
                call_site, args, ..
            } => write!(
                f,
                "invoke-custom {}::{}({})",
                call_site.interface,
                call_site.implementation,
                list(args)
            ),
            IrOp::NewInstance { ty, .. } => write!(f, "new-instance {ty}"),
            IrOp::NewArray { size, ty, .. } => write!(f, "new-array {ty}[{size}]"),
            IrOp::FilledNewArray { ty, args, .. } => {
                write!(f, "filled-new-array {ty} {{{}}}", list(args))
            }
            IrOp::ArrayGet { array, index, .. } => write!(f, "aget {array}[{index}]"),
            IrOp::ArrayPut {
                value,
                array,
                index,
                ..
            } => write!(f, "aput {array}[{index}] = {value}"),
            IrOp::ArrayLength { array, .. } => write!(f, "array-length {array}"),
            IrOp::InstanceGet { object, field, .. } => write!(f, "iget {object}.{field}"),
            IrOp::InstancePut {
                value,
                object,
                field,
            } => write!(f, "iput {object}.{field} = {value}"),
            IrOp::StaticGet { field, .. } => write!(f, "sget {field}"),
            IrOp::StaticPut { value, field } => write!(f, "sput {field} = {value}"),
            IrOp::CheckCast { value, ty, .. } => write!(f, "check-cast {value} {ty}"),
            IrOp::InstanceOf { value, ty, .. } => write!(f, "instance-of {value} {ty}"),
            IrOp::NullCheck { value } => write!(f, "null-check {value}"),
            IrOp::Position { line } => write!(f, ".line {line}"),
            IrOp::Goto { target } => write!(f, "goto {target}"),
            IrOp::If {
                cond,
                left,
                right,
                then_block,
                else_block,
            } => match right {
                Some(right) => {
                    write!(f, "if-{cond} {left}, {right} then {then_block} else {else_block}")
                }
                None => write!(f, "if-{cond}z {left} then {then_block} else {else_block}"),
            },
            IrOp::Switch {
                value,
                keys,
                targets,
                fallthrough,
            } => {
                write!(f, "switch {value}")?;
                for (key, target) in keys.iter().zip(targets) {
                    write!(f, " {key}:{target}")?;
                }
                write!(f, " default:{fallthrough}")
            }
            IrOp::Return { value: Some(v) } => write!(f, "return {v}"),
            IrOp::Return { value: None } => f.write_str("return-void"),
            IrOp::Throw { value } => write!(f, "throw {value}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uses_and_dest() {
        let op = IrOp::Binary {
            op: BinaryOp::Add,
            ty: NumericType::Int,
            dest: ValueId::new(3),
            left: ValueId::new(1),
            right: ValueId::new(2),
        };
        assert_eq!(op.dest(), Some(ValueId::new(3)));
        assert_eq!(op.uses(), vec![ValueId::new(1), ValueId::new(2)]);
        assert!(op.is_pure());
        assert!(!op.has_side_effects());
        assert_eq!(op.to_string(), "v3 <- add-int v1, v2");
    }

    #[test]
    fn test_successors_deduplicated() {
        let op = IrOp::Switch {
            value: ValueId::new(0),
            keys: vec![1, 2],
            targets: vec![BlockId::new(2), BlockId::new(2)],
            fallthrough: BlockId::new(3),
        };
        assert_eq!(op.successors(), vec![BlockId::new(2), BlockId::new(3)]);
    }
}
