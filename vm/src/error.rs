use bytecode::DecodeError;
use heap::HeapError;
use object::{FrameError, Value};
use thiserror::Error;

/// Invariant violations. These end the process.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FatalError {
    #[error(transparent)]
    Heap(#[from] HeapError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("expected {expected}, got {got:?}")]
    TypeMismatch { expected: &'static str, got: Value },
    #[error("unsupported operand for {op}: {operand:?}")]
    UnsupportedOperand { op: &'static str, operand: Value },
    #[error("integer overflow in {0}")]
    IntegerOverflow(&'static str),
    #[error("integers have no fields: {0:?}")]
    IntegerHasNoFields(Value),
    #[error("field {index} out of range ({len} fields)")]
    FieldOutOfRange { index: usize, len: usize },
    #[error("no frame is active")]
    NoFrame,
    #[error("frame {0:?} has no caller")]
    NoCaller(Value),
    #[error("context chain of {frame:?} is shorter than {level}")]
    ContextChain { frame: Value, level: u8 },
    #[error("{selector} expects {expected} arguments, invokable takes {actual}")]
    ArityMismatch {
        selector: String,
        expected: usize,
        actual: usize,
    },
    #[error("literal {index} holds {found:?}, expected {expected:?}")]
    LiteralMismatch {
        index: usize,
        expected: Value,
        found: Value,
    },
    #[error("literal index {0} out of range")]
    LiteralOutOfRange(usize),
    #[error("too many literals in {0}")]
    TooManyLiterals(String),
    #[error("jump to {0} leaves the method")]
    JumpOutOfRange(i64),
    #[error("{class} does not define #{selector}")]
    MissingHandler { class: String, selector: String },
    #[error("missing bootstrap method")]
    MissingBootstrap,
    #[error("no block class for {0} arguments")]
    NoBlockClass(usize),
    #[error("primitive {class}>>#{selector}: {reason}")]
    Primitive {
        class: String,
        selector: String,
        reason: String,
    },
    #[error("bytecode hash mismatch for primitives of {0}")]
    HashMismatch(String),
}

/// Everything that ends a run of the dispatch loop early.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VmError {
    #[error("fatal: {0}")]
    Fatal(#[from] FatalError),
    /// A language-level error that no program code handled.
    #[error("{class}: {message}")]
    Signal { class: String, message: String },
    #[error("exit with status {0}")]
    Exit(i32),
}

impl VmError {
    pub fn signal(class: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Signal {
            class: class.into(),
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

impl From<HeapError> for VmError {
    fn from(e: HeapError) -> Self {
        Self::Fatal(e.into())
    }
}

impl From<FrameError> for VmError {
    fn from(e: FrameError) -> Self {
        Self::Fatal(e.into())
    }
}

impl From<DecodeError> for VmError {
    fn from(e: DecodeError) -> Self {
        Self::Fatal(e.into())
    }
}

pub type VmResult<T> = Result<T, VmError>;
