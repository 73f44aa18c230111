//! Register-based SSA intermediate representation.
//!
//! A method body is an [`IrCode`]: a dense arena of [`BasicBlock`]s, each holding
//! [`Phi`] functions and a list of [`IrOp`]s terminated by a control transfer. Values are
//! numbered densely ([`ValueId`]) and each is defined exactly once. Block [`BlockId::ENTRY`]
//! defines the arguments and has no predecessors.
//!
//! Exceptional control flow is explicit: a block lists its [`CatchHandler`]s and the handler
//! blocks list it as a predecessor. The handler entries start with `MoveException`.
//!
//! # Building
//!
//! [`RegisterIrBuilder`] lifts raw register code; see its module for the construction
//! algorithm. [`IrCode::verify_ssa`] checks the structural invariants every pass must keep.

mod block;
mod builder;
mod code;
mod liveness;
mod ops;
mod value;

pub use block::{BasicBlock, CatchHandler, Phi};
pub use builder::{IrBuilder, RegisterIrBuilder};
pub use code::{DefSite, IrCode};
pub use liveness::Liveness;
pub use ops::IrOp;
pub use value::{BlockId, ValueId};
