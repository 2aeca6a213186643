use thiserror::Error;

/// Errors raised while parsing or evaluating a transform/metering
/// expression. Errors are values, never panics: callers always have a
/// non-panicking fallback, skipping the affected field (transforms) or
/// clamping to a plan default (metering).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExprError {
    #[error("unexpected character {0:?} at position {1}")]
    UnexpectedChar(char, usize),

    #[error("unexpected end of expression")]
    UnexpectedEof,

    #[error("expected {0}")]
    Expected(String),

    #[error("expression exceeds maximum depth of {0}")]
    TooDeep(usize),

    #[error("string literal exceeds maximum length of {0} bytes")]
    StringTooLong(usize),

    #[error("unknown identifier {0:?}")]
    UnknownIdent(String),

    #[error("unknown function {0:?}")]
    UnknownFunction(String),

    #[error("type error: {0}")]
    TypeError(String),

    #[error("division by zero")]
    DivisionByZero,
}
