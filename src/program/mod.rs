//! The program model consumed and produced by the compiler.
//!
//! A [`Program`] is an ordered list of [`ProgramClass`]es, each owning its methods
//! ([`EncodedMethod`]) and fields. Method bodies are [`RawCode`], a small register bytecode;
//! [`CodeAssembler`] builds it with symbolic labels. Identities ([`TypeName`], [`MethodId`],
//! [`FieldId`]) are cheap to clone and totally ordered.
//!
//! The model is deliberately thin: it carries what the optimizer reads and writes and nothing
//! about any container file format.

mod assembler;
mod class;
mod code;
mod container;
mod method;
mod types;

pub use assembler::{CodeAssembler, Label};
pub use class::{ClassFlags, EncodedField, FieldFlags, ProgramClass};
pub use code::{
    BinaryOp, CallSiteDescriptor, CatchHandler, IfCond, InvokeKind, NumericType, RawCode,
    RawInstruction, Reg, TryBlock, UnaryOp,
};
pub use container::{Program, SwitchMap};
pub use method::{
    EncodedMethod, InliningConstraint, MethodFlags, OptimizationInfo, ProcessedState,
};
pub use types::{ConstValue, FieldId, MethodId, Proto, TypeName, ValueType};
