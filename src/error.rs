use thiserror::Error;

use crate::program::MethodId;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! invariant_error {
    ($msg:expr) => {
        crate::Error::InvariantViolation {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::InvariantViolation {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Errors fall into three groups:
///
/// ## Internal errors
/// - [`Error::InvariantViolation`] - A pipeline stage left the IR in an inconsistent state, or a
///   precondition of a later stage was not met. These are bugs and abort compilation.
/// - [`Error::CallGraph`] - Leaf extraction could not make progress.
/// - [`Error::LockError`] - Thread synchronization failure
///
/// ## Input errors
/// - [`Error::Malformed`] - Raw code the IR builder cannot lift (undefined register reads,
///   branch targets outside the method, ...)
/// - [`Error::RegisterPressure`] - A method needs more registers than the configured limit
///
/// ## User errors
/// - [`Error::Configuration`] - Conflicting or invalid options. Raised by
///   [`crate::Converter::new`] before any method is touched.
///
/// Methods that cannot be represented as IR at all (abstract, native) are not errors; they are
/// skipped and marked with the most conservative inlining constraint.
///
/// # Examples
///
/// ```rust
/// use dexopt::{CompilerOptions, Converter, Error};
///
/// let mut options = CompilerOptions::default();
/// options.attributes.keep_signature = true;
/// options.minify = true;
///
/// match Converter::new(options) {
///     Err(Error::Configuration(message)) => assert!(message.contains("Signature")),
///     _ => unreachable!(),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// An internal invariant does not hold.
    ///
    /// Raised when SSA verification fails after a pass, when the register allocator receives
    /// code that violates its preconditions, or when a code path that must be unreachable is hit.
    /// This always indicates a bug in a transformation, never bad input.
    ///
    /// # Fields
    ///
    /// * `message` - Description of the violated invariant
    /// * `file` - Source file where the violation was detected
    /// * `line` - Source line where the violation was detected
    #[error("Invariant violation - {file}:{line}: {message}")]
    InvariantViolation {
        /// The message to be printed for the violation
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// The raw code of a method could not be lifted.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// Invalid or conflicting compiler options.
    ///
    /// The message names the offending option or attribute and how to fix it.
    #[error("{0}")]
    Configuration(String),

    /// Leaf extraction from the call graph failed to make progress.
    #[error("Call graph error - {0}")]
    CallGraph(String),

    /// The method needs more registers than allowed.
    #[error("Method {method} needs more than {limit} registers")]
    RegisterPressure {
        /// The method being allocated
        method: MethodId,
        /// The configured register limit
        limit: u16,
    },

    /// Failed to lock target.
    ///
    /// This error occurs when thread synchronization fails, typically
    /// when trying to acquire a mutex that was poisoned by a panicking worker.
    #[error("Failed to lock target")]
    LockError,
}
