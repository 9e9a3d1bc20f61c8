use thiserror::Error;

use crate::common::source::{SourceManager, Span};

/// The unified result type used across the optimizer and code generator.
///
/// Every fallible entry point returns `CompilerResult<T>` rather than
/// panicking; recovery is local only for [`CompilerError::NotFound`] and
/// [`CompilerError::IteratorEnd`] where an expected absence makes sense.
/// Every other variant surfaces to the caller unchanged.
pub type CompilerResult<T> = Result<T, CompilerError>;

/// Error classification, mirroring the categories a caller needs to decide
/// whether to recover locally or abort the compilation of a function.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CompilerError {
    /// Programmer error at an API boundary: null/empty handle, out-of-range
    /// index, or an operand of the wrong operation family.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A map/lookup miss where the caller did not accept absence.
    #[error("not found: {0}")]
    NotFound(String),

    /// A map insertion conflict where uniqueness is required.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A container index past its limit.
    #[error("out of bounds: {0}")]
    OutOfBounds(String),

    /// An invariant violation: broken dominance, reversed use-def, unknown
    /// opcode family, a dangling reference surviving compaction. Terminates
    /// the compilation of the affected function.
    #[error("internal compiler error: {0}")]
    InternalState(String),

    /// Allocation failure bubbled up from a container constructor.
    #[error("memory allocation failed: {0}")]
    MemoryAllocation(String),

    /// A source-program violation with a known location.
    #[error("analysis error: {message}")]
    Analysis { span: Span, message: String },

    /// Expected termination of an iterator/worklist, not a failure.
    #[error("iterator end")]
    IteratorEnd,
}

impl CompilerError {
    pub fn invalid_parameter(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn already_exists(msg: impl Into<String>) -> Self {
        Self::AlreadyExists(msg.into())
    }

    pub fn out_of_bounds(msg: impl Into<String>) -> Self {
        Self::OutOfBounds(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::InternalState(msg.into())
    }

    pub fn analysis(span: Span, msg: impl Into<String>) -> Self {
        Self::Analysis { span, message: msg.into() }
    }

    pub fn is_iterator_end(&self) -> bool {
        matches!(self, CompilerError::IteratorEnd)
    }

    /// Render the way the driver prints it: analysis errors get a resolved
    /// `<file>:<line>:<column>:` prefix, internal errors get none.
    pub fn render(&self, source_manager: &SourceManager) -> String {
        match self {
            CompilerError::Analysis { span, message } => {
                let loc = source_manager.resolve_span(*span);
                format!("{}:{}:{}: {}", loc.file, loc.line, loc.column, message)
            }
            other => other.to_string(),
        }
    }
}
