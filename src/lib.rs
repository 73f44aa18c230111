// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]
#![allow(clippy::too_many_arguments)]

//! # dexopt
//!
//! The method-level optimization and code generation core of a bytecode-to-bytecode compiler
//! for register-based bytecode. `dexopt` lifts every method of a [`program::Program`] into SSA
//! form, schedules the methods callee-before-caller on a call graph, optimizes them, allocates
//! registers with a linear scan and lowers the result back to register bytecode.
//!
//! ## Features
//!
//! - **Callee-first scheduling** - leaf batches from the call graph, with minimum-weight cycle
//!   breaking and parallel processing of independent batches
//! - **Optimization pipeline** - inlining, constant folding, common subexpression
//!   elimination, dead code removal, switch-map removal and more, with SSA verification after
//!   every pass
//! - **Outlining** - repeated instruction sequences across the program become calls to one
//!   synthesized support method
//! - **Desugaring** - lambdas, static interface methods and try-with-resources for older
//!   targets
//! - **Linear-scan register allocation** - live-range splitting under register pressure,
//!   parallel moves, post-allocation peephole cleanup
//!
//! ## Quick Start
//!
//! ```rust
//! use dexopt::prelude::*;
//!
//! let mut asm = CodeAssembler::new(3, 2);
//! asm.const_int(2, 4)
//!     .mul_int(2, 0, 2)
//!     .add_int(2, 2, 1)
//!     .return_value(2);
//!
//! let mut class = ProgramClass::new(TypeName::new("p.Math"), ClassFlags::PUBLIC);
//! class.add_method(EncodedMethod::new(
//!     MethodId::parse("p.Math.scale(int,int)int").unwrap(),
//!     MethodFlags::PUBLIC | MethodFlags::STATIC,
//!     Some(asm.finish()?),
//! ));
//! let mut program = Program::new();
//! program.add_class(class)?;
//!
//! let converter = Converter::new(CompilerOptions::default())?;
//! let output = converter.optimize(&mut program)?;
//! assert!(output.synthesized_classes.is_empty());
//! # Ok::<(), dexopt::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`program`] - classes, methods, raw register code and an assembler for it
//! - [`analysis`] - SSA IR and its construction, call graph, graph lens
//! - [`compiler`] - pipeline passes, inliner, outliner, desugaring, register allocation,
//!   lowering and the [`Converter`] that drives them
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T>`]. Configuration errors are reported by
//! [`Converter::new`] before any method is compiled; everything else aborts the compilation
//! of the current program. See [`Error`] for the categories.
//!
//! ## Logging
//!
//! The crate logs through the [`log`] facade: scheduling decisions at `debug`, per-pass
//! changes and final register code at `trace`. Structured change records go to the
//! [`compiler::EventLog`] of the converter.

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit tests
#[cfg(test)]
pub(crate) mod test;

pub(crate) mod utils;

/// Convenient re-exports of the most commonly used types.
///
/// # Example
///
/// ```rust
/// use dexopt::prelude::*;
///
/// let options = CompilerOptions::default();
/// let converter = Converter::new(options)?;
/// # Ok::<(), dexopt::Error>(())
/// ```
pub mod prelude;

/// Program analysis: SSA IR, call graph and graph lens.
pub mod analysis;

/// Optimization pipeline, register allocation, lowering and the converter.
pub mod compiler;

/// The program model: classes, methods and raw register code.
pub mod program;

/// `dexopt` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `dexopt` Error type
///
/// See the variants for the error categories.
pub use error::Error;

/// The compilation driver.
pub use compiler::{CompilerOptions, ConversionOutput, Converter};
