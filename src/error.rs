use thiserror::Error;

use crate::value::Value;

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

macro_rules! invalid_target {
    ($msg:expr) => {
        crate::Error::InvalidTarget($msg.to_string())
    };

    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::InvalidTarget(format!($fmt, $($arg)*))
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// The variants fall into three groups: errors surfaced by the interception engine itself,
/// failures reported by the runtime bridge, and codec errors raised while reading or writing
/// type images and CIL bytecode.
///
/// # Error Categories
///
/// ## Interception Errors
/// - [`Error::InvalidTarget`] - The function cannot be intercepted or invoked
/// - [`Error::InstallationFailed`] - The runtime rejected the rewritten representation
/// - [`Error::IllegalState`] - The engine or a bundle was used in a state it does not support
/// - [`Error::UseAfterRelease`] - A dispatch context was used after its invocation completed
/// - [`Error::InvalidCast`] - A result or argument did not match the declared type
///
/// ## Runtime Errors
/// - [`Error::TargetInvocation`] - The managed code threw; carries the exception object
/// - [`Error::Runtime`] - A runtime bridge primitive failed
/// - [`Error::RecursionLimit`] - The call depth limit was exceeded
///
/// ## Codec Errors
/// - [`Error::Malformed`] - Corrupted or invalid image / bytecode structure
/// - [`Error::OutOfBounds`] - Attempted to read beyond buffer boundaries
/// - [`Error::InvalidMnemonic`], [`Error::InvalidBranch`], [`Error::UndefinedLabel`],
///   [`Error::DuplicateLabel`], [`Error::WrongOperandType`], [`Error::UnexpectedOperand`] -
///   instruction encoding failures
///
/// # Examples
///
/// ```rust,no_run
/// use cilplant::{Error, Engine};
/// # fn demo(engine: &Engine, target: &cilplant::metadata::method::FunctionIdentity) {
/// match engine.invoke_original(target, None, &[]) {
///     Ok(value) => println!("returned {value}"),
///     Err(Error::TargetInvocation(exception)) => eprintln!("threw {exception}"),
///     Err(Error::InvalidTarget(reason)) => eprintln!("cannot invoke: {reason}"),
///     Err(e) => eprintln!("Other error: {e}"),
/// }
/// # }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    // Interception errors
    /// The function cannot be hooked or invoked.
    ///
    /// Raised for abstract or native functions, functions declared on array or primitive
    /// types, functions on the foundational deny list, missing functions, argument count
    /// mismatches and receivers that are not instances of the declaring type.
    #[error("Invalid target - {0}")]
    InvalidTarget(String),

    /// Installing the rewritten compiled representation failed.
    ///
    /// No hook state is retained when this error is returned.
    #[error("Failed to install interception for {target}: {reason}")]
    InstallationFailed {
        /// The function that was being intercepted
        target: String,
        /// The failure reported by the interceptor or the runtime
        reason: String,
    },

    /// The engine was used in a state that does not permit the operation.
    ///
    /// Examples are initializing the same runtime twice, dispatching a bundle with an
    /// unknown hook id, or hooking after shutdown.
    #[error("Illegal state - {0}")]
    IllegalState(String),

    /// A [`crate::hook::DispatchContext`] was accessed after its invocation completed.
    #[error("Dispatch context used after release")]
    UseAfterRelease,

    /// A value did not match the type it was cast to.
    #[error("Invalid cast - expected {expected}, found {found}")]
    InvalidCast {
        /// The declared type
        expected: String,
        /// The type of the value that was provided
        found: String,
    },

    // Runtime errors
    /// The managed code raised an exception.
    ///
    /// The wrapped value is the exception object. The dispatcher unwraps it so callbacks
    /// observe the exception itself rather than this wrapper.
    #[error("Managed exception - {0}")]
    TargetInvocation(Value),

    /// A runtime bridge primitive failed.
    #[error("Runtime failure - {0}")]
    Runtime(String),

    /// Recursion limit reached.
    ///
    /// The associated value shows the call depth limit that was reached.
    #[error("Reach the maximum recursion level allowed - {0}")]
    RecursionLimit(usize),

    // Codec errors
    /// The data is damaged and could not be parsed.
    ///
    /// The error includes the source location where the malformation was detected for
    /// debugging purposes.
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

    /// An out of bound access was attempted while parsing.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// The instruction mnemonic is not known to the encoder.
    #[error("Invalid instruction mnemonic - {0}")]
    InvalidMnemonic(String),

    /// A branch instruction or offset is invalid.
    #[error("Invalid branch - {0}")]
    InvalidBranch(String),

    /// A branch referenced a label that was never defined.
    #[error("Undefined label - {0}")]
    UndefinedLabel(String),

    /// A label was defined twice.
    #[error("Duplicate label - {0}")]
    DuplicateLabel(String),

    /// The operand does not match what the instruction expects.
    #[error("Wrong operand type - expected {expected}")]
    WrongOperandType {
        /// The operand kind expected by the instruction
        expected: String,
    },

    /// An operand was supplied for an instruction that takes none.
    #[error("Unexpected operand")]
    UnexpectedOperand,

    /// Failed to lock target.
    #[error("Failed to lock target")]
    LockError,
}
