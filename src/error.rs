//! Error taxonomy for the engine (spec §6, §7).

/// Crate-wide result alias, mirrored on the teacher's `limbo_core::Result`.
pub type Result<T> = std::result::Result<T, RdbError>;

/// A single error object per execution context (spec §7).
///
/// `NotFound` is used both as a genuine "no such record" error and, by
/// iterators, as the expected end-of-sequence signal; callers that are
/// iterating must special-case it rather than treat it as a hard failure.
#[derive(thiserror::Error, Debug)]
pub enum RdbError {
    #[error("no running transaction")]
    NoRunningTx,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("name error: {0}")]
    Name(String),

    #[error("not found")]
    NotFound,

    #[error("key violation")]
    KeyViolation,

    #[error("element exists")]
    ElementExists,

    #[error("predicate violation: {constraint}")]
    PredicateViolation { constraint: String },

    #[error("type constraint violation: {0}")]
    TypeConstraintViolation(String),

    #[error("aggregate undefined")]
    AggregateUndefined,

    #[error("operator not found: {0}")]
    OperatorNotFound(String),

    #[error("concurrency conflict (retryable={retryable})")]
    Concurrency { retryable: bool },

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("data corrupted: {0}")]
    DataCorrupted(String),

    #[error("system error: {0}")]
    System(String),

    #[error("out of memory")]
    NoMemory,
}

impl RdbError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RdbError::NotFound)
    }

    pub fn retryable(&self) -> bool {
        matches!(self, RdbError::Concurrency { retryable: true })
    }

    pub fn predicate_violation(constraint: impl Into<String>) -> Self {
        RdbError::PredicateViolation {
            constraint: constraint.into(),
        }
    }
}

/// Helper used throughout the transformer/optimizer/evaluator to bail out
/// with a `Name` error, mirroring the teacher's `bail_parse_error!` macro
/// (`limbo_core::bail_parse_error`) but bound to this crate's error type.
#[macro_export]
macro_rules! bail_name_error {
    ($($arg:tt)*) => {
        return Err($crate::error::RdbError::Name(format!($($arg)*)))
    };
}

/// Mirrors `bail_name_error!` for the `InvalidArgument` variant.
#[macro_export]
macro_rules! bail_invalid_argument {
    ($($arg:tt)*) => {
        return Err($crate::error::RdbError::InvalidArgument(format!($($arg)*)))
    };
}
