//! Runtime error taxonomy
//!
//! Every failure in the sandbox is a `RuntimeError` carrying one of a
//! closed set of `ErrorKind`s. Interpreted `try`/`catch` may observe any
//! error except the fatal three (`Cancelled`, `OutOfMemory`,
//! `StackOverflow`), which always unwind the whole interpretation.
//!
//! Errors are ordinary values threaded through `Result`; the runtime never
//! panics across the evaluation loop.

use std::fmt;

/// Closed set of failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Out-of-bounds address, write past block capacity, corrupt header
    SandboxViolation,
    /// Heap exhausted after defragmentation
    OutOfMemory,
    /// Stack region exhausted or call depth exceeded
    StackOverflow,
    /// Operation count, scope count, variable count or size caps exceeded
    ResourceExhausted,
    /// Cancellation token tripped
    Cancelled,
    /// Kind-versus-value incompatibility not resolvable by cast
    TypeMismatch,
    /// Checked numeric narrowing failure
    Overflow,
    /// Double free, dangling stack pointer, null dereference
    InvalidPointer,
    /// Undeclared variable/function/native, or redeclaration in a scope
    NameError,
    /// Switch expression exhaustiveness failure
    NoMatch,
    /// Arithmetic domain: divide by zero, empty sequence, single-with-many
    DomainError,
    /// Index outside the bounds of an array or string
    IndexOutOfRange,
    /// Carried opaquely from the parser
    Parse,
    /// Raised inside a host callback
    NativeFailure,
    /// `throw` of a user value
    UserThrown,
}

impl ErrorKind {
    /// Fatal errors terminate interpretation and cannot be caught by the
    /// program's `try`/`catch`.
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            ErrorKind::Cancelled | ErrorKind::OutOfMemory | ErrorKind::StackOverflow
        )
    }

    /// Diagnostic label, also the name `catch (Name e)` filters match on.
    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::SandboxViolation => "SandboxViolation",
            ErrorKind::OutOfMemory => "OutOfMemory",
            ErrorKind::StackOverflow => "StackOverflow",
            ErrorKind::ResourceExhausted => "ResourceExhausted",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::TypeMismatch => "TypeMismatch",
            ErrorKind::Overflow => "Overflow",
            ErrorKind::InvalidPointer => "InvalidPointer",
            ErrorKind::NameError => "NameError",
            ErrorKind::NoMatch => "NoMatch",
            ErrorKind::DomainError => "DomainError",
            ErrorKind::IndexOutOfRange => "IndexOutOfRange",
            ErrorKind::Parse => "ParseError",
            ErrorKind::NativeFailure => "NativeFailure",
            ErrorKind::UserThrown => "Exception",
        }
    }
}

/// A runtime failure: category, message and a short frame excerpt.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeError {
    pub kind: ErrorKind,
    pub message: String,
    /// Innermost-first function frames, trimmed to a small window by the
    /// surface layer before display.
    pub frames: Vec<String>,
}

impl RuntimeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        RuntimeError {
            kind,
            message: message.into(),
            frames: Vec::new(),
        }
    }

    /// Record the enclosing function on the way out of a call frame.
    pub fn push_frame(&mut self, frame: impl Into<String>) {
        self.frames.push(frame.into());
    }

    pub fn is_fatal(&self) -> bool {
        self.kind.is_fatal()
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.label(), self.message)
    }
}

impl std::error::Error for RuntimeError {}

/// Shorthand used throughout the runtime.
pub type RunResult<T> = Result<T, RuntimeError>;

/// Convenience constructors; call sites read `Err(err(kind, msg))`.
pub fn err(kind: ErrorKind, message: impl Into<String>) -> RuntimeError {
    RuntimeError::new(kind, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_partition() {
        assert!(ErrorKind::Cancelled.is_fatal());
        assert!(ErrorKind::OutOfMemory.is_fatal());
        assert!(ErrorKind::StackOverflow.is_fatal());
        assert!(!ErrorKind::TypeMismatch.is_fatal());
        assert!(!ErrorKind::DomainError.is_fatal());
        assert!(!ErrorKind::NativeFailure.is_fatal());
    }

    #[test]
    fn test_display() {
        let e = err(ErrorKind::DomainError, "division by zero");
        assert_eq!(e.to_string(), "DomainError: division by zero");
    }

    #[test]
    fn test_frames() {
        let mut e = err(ErrorKind::NameError, "no such function 'f'");
        e.push_frame("inner");
        e.push_frame("outer");
        assert_eq!(e.frames, vec!["inner", "outer"]);
    }
}
