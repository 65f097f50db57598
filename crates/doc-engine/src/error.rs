use thiserror::Error;

use crate::value::ValueKind;

/// Structural corruption of a field.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    #[error("field '{field_id}' expects a {expected} value but holds a {found} value")]
    ValueTypeMismatch {
        field_id: String,
        expected: ValueKind,
        found: ValueKind,
    },
    #[error("field '{field_id}' row order does not match its rows")]
    RowOrderMismatch { field_id: String },
    #[error("field '{field_id}' column order does not match its columns")]
    ColumnOrderMismatch { field_id: String },
}

/// Failure while parsing or evaluating one formula. Never fatal to the document.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FormulaError {
    #[error("syntax error at {position}: {message}")]
    Syntax { message: String, position: usize },
    #[error("invalid reference '{0}'")]
    InvalidReference(String),
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },
    #[error("invalid arguments for {function}: {reason}")]
    InvalidArguments { function: String, reason: String },
    #[error("division by zero")]
    DivisionByZero,
    #[error("circular reference through '{0}'")]
    CircularReference(String),
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("formula resolution exceeded depth {0}")]
    ResolutionTooDeep(usize),
}

impl FormulaError {
    pub(crate) fn arguments(function: &str, reason: impl Into<String>) -> Self {
        FormulaError::InvalidArguments {
            function: function.to_ascii_uppercase(),
            reason: reason.into(),
        }
    }

    pub(crate) fn mismatch(expected: &str, found: &str) -> Self {
        FormulaError::TypeMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConditionError {
    #[error("unknown condition operator '{0}'")]
    UnknownOperator(String),
}

/// Errors surfaced to callers of the session and change pipeline.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("malformed document json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("field '{0}' does not exist")]
    UnknownField(String),
    #[error("row '{row_id}' does not exist in field '{field_id}'")]
    UnknownRow { field_id: String, row_id: String },
    #[error("invalid change: {0}")]
    InvalidChange(String),
    #[error("unsupported change target '{0}'")]
    UnsupportedTarget(String),
}
