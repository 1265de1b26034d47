//! Error types for the Pyro virtual machine.
//!
//! Every fallible VM operation returns [`VmResult`]. A [`Panic`] is the
//! recoverable error condition of the language: it unwinds the interpreter
//! until a `try` expression catches it or the outermost frame reports it.
//! `$exit()` unwinds through the same channel as [`Halt::Exit`] but is never
//! catchable.

use thiserror::Error;

/// The error kinds carried by a panic, exposed to user code as small integer
/// codes in `Err` tuples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i64)]
pub enum ErrorCode {
    /// No error. Never carried by a live panic.
    Ok = 0,

    /// Generic, uncategorized failure.
    Error = 1,

    /// Allocation failed or the configured memory ceiling was breached.
    OutOfMemory = 2,

    /// Filesystem or stream I/O failure.
    OsError = 3,

    /// Wrong arity or wrong argument shape.
    ArgsError = 4,

    /// An `assert` statement evaluated a falsy expression.
    AssertionFailed = 5,

    /// Unbound global, unknown method, or unknown field.
    NameError = 6,

    /// Operand out of range, division by zero, bad index.
    ValueError = 7,

    /// Operation undefined for the operand types.
    TypeError = 8,

    /// An import path did not resolve.
    ModuleNotFound = 9,

    /// The lexer or compiler rejected the source.
    SyntaxError = 10,
}

impl ErrorCode {
    /// Returns the code as the integer value user code sees in `Err` tuples.
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    /// Returns the canonical name of the error kind.
    pub fn name(self) -> &'static str {
        match self {
            ErrorCode::Ok => "ok",
            ErrorCode::Error => "error",
            ErrorCode::OutOfMemory => "out_of_memory",
            ErrorCode::OsError => "os_error",
            ErrorCode::ArgsError => "args_error",
            ErrorCode::AssertionFailed => "assertion_failed",
            ErrorCode::NameError => "name_error",
            ErrorCode::ValueError => "value_error",
            ErrorCode::TypeError => "type_error",
            ErrorCode::ModuleNotFound => "module_not_found",
            ErrorCode::SyntaxError => "syntax_error",
        }
    }
}

/// A panic: the halt-producing error condition of the language.
///
/// A panic with `hard_panic` set is uncatchable — it skips `try` expressions
/// and terminates execution. Syntax errors additionally carry the source id
/// and line number where they occurred.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct Panic {
    /// The error kind.
    pub code: ErrorCode,

    /// The human-readable error message.
    pub message: String,

    /// True if the panic cannot be caught by a `try` expression.
    pub hard_panic: bool,

    /// The source id for syntax errors, e.g. a file path.
    pub source_id: Option<String>,

    /// The source line number for syntax errors.
    pub line: Option<usize>,
}

impl Panic {
    /// Creates a new panic with the given code and message.
    pub fn new<S: Into<String>>(code: ErrorCode, message: S) -> Self {
        Self {
            code,
            message: message.into(),
            hard_panic: false,
            source_id: None,
            line: None,
        }
    }

    /// Creates a generic panic.
    pub fn error<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorCode::Error, message)
    }

    /// Creates an out-of-memory panic.
    pub fn out_of_memory() -> Self {
        Self::new(ErrorCode::OutOfMemory, "Out of memory.")
    }

    /// Creates an OS error panic.
    pub fn os_error<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorCode::OsError, message)
    }

    /// Creates an arguments error panic.
    pub fn args_error<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorCode::ArgsError, message)
    }

    /// Creates an assertion-failed panic.
    pub fn assertion_failed() -> Self {
        Self::new(ErrorCode::AssertionFailed, "Assertion failed.")
    }

    /// Creates a name error panic.
    pub fn name_error<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorCode::NameError, message)
    }

    /// Creates a value error panic.
    pub fn value_error<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorCode::ValueError, message)
    }

    /// Creates a type error panic.
    pub fn type_error<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorCode::TypeError, message)
    }

    /// Creates a module-not-found panic.
    pub fn module_not_found<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorCode::ModuleNotFound, message)
    }

    /// Creates a syntax error panic carrying its source location.
    pub fn syntax_error<S: Into<String>>(source_id: &str, line: usize, message: S) -> Self {
        Self {
            code: ErrorCode::SyntaxError,
            message: message.into(),
            hard_panic: false,
            source_id: Some(source_id.to_string()),
            line: Some(line),
        }
    }

    /// Marks the panic as uncatchable.
    pub fn hard(mut self) -> Self {
        self.hard_panic = true;
        self
    }
}

/// The reason execution stopped: a panic, or a clean `$exit()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Halt {
    /// A panic, possibly catchable by a `try` expression.
    Panic(Panic),

    /// `$exit()` was called with the given status code. Never catchable.
    Exit(i64),
}

impl Halt {
    /// Returns true if a surrounding `try` expression may catch this halt.
    pub fn is_catchable(&self) -> bool {
        matches!(self, Halt::Panic(panic) if !panic.hard_panic)
    }

    /// Returns the status code the process should exit with.
    pub fn status_code(&self) -> i64 {
        match self {
            Halt::Panic(panic) => panic.code.as_i64(),
            Halt::Exit(code) => *code,
        }
    }
}

impl From<Panic> for Halt {
    fn from(panic: Panic) -> Self {
        Halt::Panic(panic)
    }
}

/// Result type for VM operations.
pub type VmResult<T> = std::result::Result<T, Halt>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(ErrorCode::Ok.as_i64(), 0);
        assert_eq!(ErrorCode::Error.as_i64(), 1);
        assert_eq!(ErrorCode::SyntaxError.as_i64(), 10);
        assert_eq!(ErrorCode::TypeError.name(), "type_error");
    }

    #[test]
    fn test_panic_constructors() {
        let panic = Panic::type_error("Operands to '+' must both be numbers.");
        assert_eq!(panic.code, ErrorCode::TypeError);
        assert!(!panic.hard_panic);
        assert_eq!(
            panic.to_string(),
            "Operands to '+' must both be numbers."
        );
    }

    #[test]
    fn test_hard_panics_are_not_catchable() {
        let halt = Halt::from(Panic::out_of_memory().hard());
        assert!(!halt.is_catchable());

        let halt = Halt::from(Panic::value_error("Division by zero."));
        assert!(halt.is_catchable());

        let halt = Halt::Exit(0);
        assert!(!halt.is_catchable());
    }

    #[test]
    fn test_syntax_error_location() {
        let panic = Panic::syntax_error("test.pyro", 3, "Unexpected token.");
        assert_eq!(panic.source_id.as_deref(), Some("test.pyro"));
        assert_eq!(panic.line, Some(3));
    }
}
