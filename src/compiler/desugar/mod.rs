//! Desugaring of language features the target platform does not support.
//!
//! - [`lambda`] replaces `invoke-custom` lambda creation by factories on synthesized classes;
//! - [`interfaces`] moves static interface methods to companion classes;
//! - [`twr`] routes the suppressed-exception API used by try-with-resources to a backport.
//!
//! The per-method rewrites run as pipeline passes; the classes they depend on are created by
//! the converter once every method has been processed.

pub mod interfaces;
pub mod lambda;
pub mod twr;

pub use interfaces::companion_type;
pub use lambda::LambdaRewriter;
pub use twr::BACKPORT_CLASS;
