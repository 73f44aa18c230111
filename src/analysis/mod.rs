//! Program analysis infrastructure.
//!
//! This module provides the representations and whole-program analyses the compiler is built
//! on. It builds upon the crate's generic graph algorithms (traversal orders, dominators and
//! strongly connected components).
//!
//! # Architecture
//!
//! - [`ir`] - SSA intermediate representation, SSA construction from raw code and liveness
//! - [`callgraph`] - call graph construction and callee-first leaf scheduling
//! - [`lens`] - persistent rewrite tables for renamed or moved program members
//!
//! # Usage
//!
//! ```rust
//! use dexopt::analysis::{IrBuilder, RegisterIrBuilder};
//! use dexopt::program::{CodeAssembler, EncodedMethod, MethodFlags, MethodId};
//!
//! let mut asm = CodeAssembler::new(3, 2);
//! asm.add_int(2, 0, 1).return_value(2);
//! let method = EncodedMethod::new(
//!     MethodId::parse("p.Math.add(int,int)int").unwrap(),
//!     MethodFlags::STATIC,
//!     Some(asm.finish()?),
//! );
//!
//! let code = RegisterIrBuilder.build_ir(&method)?.unwrap();
//! code.verify_ssa()?;
//! assert_eq!(code.instruction_count(), 2);
//! # Ok::<(), dexopt::Error>(())
//! ```

pub mod callgraph;
pub mod ir;
pub mod lens;

pub use callgraph::{CallGraph, CallGraphStats, Leaves};
pub use ir::{IrBuilder, IrCode, RegisterIrBuilder};
pub use lens::{GraphLens, GraphLensBuilder};
