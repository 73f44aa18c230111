//! # dexopt Prelude
//!
//! The most commonly used types of the dexopt library. Import this module to build programs,
//! configure the compiler and run it.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all dexopt operations
pub use crate::Error;

/// The result type used throughout dexopt
pub use crate::Result;

// ================================================================================================
// Main Entry Points
// ================================================================================================

/// The compilation driver and what it returns
pub use crate::compiler::{ConversionOutput, Converter};

/// Configuration
pub use crate::compiler::{
    AttributeRemovalOptions, CompilerOptions, InliningOptions, OffOrAuto, OutlineOptions,
};

// ================================================================================================
// Program Model
// ================================================================================================

/// Classes, methods and their identities
pub use crate::program::{
    ClassFlags, EncodedMethod, InliningConstraint, MethodFlags, MethodId, Program, ProgramClass,
    Proto, TypeName,
};

/// Raw register code and the assembler that builds it
pub use crate::program::{CodeAssembler, IfCond, InvokeKind, RawCode, RawInstruction};

// ================================================================================================
// Analysis and Diagnostics
// ================================================================================================

/// SSA IR, its builder and the call graph
pub use crate::analysis::{CallGraph, GraphLens, IrBuilder, IrCode, RegisterIrBuilder};

/// Change journal and code dumps
pub use crate::compiler::{CfgPrinter, EventKind, EventLog, TextCfgPrinter};
