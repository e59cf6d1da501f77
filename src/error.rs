// Closed taxonomy of error kinds surfaced by the execution core.
//
// The evaluator never unwinds through panics for user-program errors: every
// fallible operation here returns `Result<T, ReasonsError>`, and the
// top-level entry points additionally snapshot the error into the runtime's
// single error slot (see `env::ErrorInfo`) so embedders that only look at
// the returned `Value` can still recover the reason.

use thiserror::Error;

// The closed set of error codes exposed to embedders.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Memory,
    Syntax,
    Type,
    Runtime,
    Argument,
    Bounds,
    NullPtr,
    Recursion,
    Timeout,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Memory => "Memory",
            ErrorCode::Syntax => "Syntax",
            ErrorCode::Type => "Type",
            ErrorCode::Runtime => "Runtime",
            ErrorCode::Argument => "Argument",
            ErrorCode::Bounds => "Bounds",
            ErrorCode::NullPtr => "NullPtr",
            ErrorCode::Recursion => "Recursion",
            ErrorCode::Timeout => "Timeout",
            ErrorCode::Internal => "Internal",
        }
    }
}

// Structural / resource / semantic / control / handler errors.
#[derive(Error, Clone, Debug, PartialEq)]
pub enum ReasonsError {
    #[error("null argument to {0}")]
    NullArgument(&'static str),

    #[error("invalid AST: {0}")]
    InvalidAst(String),

    #[error("malformed enum tag in {0}")]
    MalformedTag(&'static str),

    #[error("allocation failed while {0}")]
    AllocationFailed(&'static str),

    #[error("undefined variable: {0}")]
    UndefinedVariable(String),

    #[error("unknown function: {0}")]
    UnknownFunction(String),

    #[error("arity mismatch calling {name}: expected {min}..{max}, got {got}")]
    ArityMismatch { name: String, min: u32, max: u32, got: u32 },

    #[error("type mismatch: cannot compare {0} and {1}")]
    TypeMismatch(&'static str, &'static str),

    #[error("division by zero")]
    DivisionByZero,

    #[error("domain error: {0}")]
    DomainError(String),

    #[error("maximum recursion depth ({0}) exceeded")]
    RecursionExceeded(u32),

    #[error("rule {0} is already active on the call stack")]
    RuleSelfRecursion(String),

    #[error("consequence handler reported failure: {0}")]
    HandlerFailure(String),
}

impl ReasonsError {
    pub fn code(&self) -> ErrorCode {
        use ReasonsError::*;
        match self {
            NullArgument(_) | InvalidAst(_) | MalformedTag(_) => ErrorCode::NullPtr,
            AllocationFailed(_) => ErrorCode::Memory,
            UndefinedVariable(_) => ErrorCode::Runtime,
            UnknownFunction(_) => ErrorCode::Runtime,
            ArityMismatch { .. } => ErrorCode::Argument,
            TypeMismatch(_, _) => ErrorCode::Type,
            DivisionByZero | DomainError(_) => ErrorCode::Runtime,
            RecursionExceeded(_) | RuleSelfRecursion(_) => ErrorCode::Recursion,
            HandlerFailure(_) => ErrorCode::Runtime,
        }
    }
}

pub type Result<T> = core::result::Result<T, ReasonsError>;
