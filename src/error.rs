//! Error types for BlockDB
//!
//! Every fallible operation in the engine reports one of these variants.
//! Lock timeouts are kept distinct so callers can retry them.

use std::time::Duration;
use thiserror::Error;

/// The main error type for BlockDB
#[derive(Error, Debug)]
pub enum Error {
    // ========== Lexer Errors ==========
    #[error("Lexer error: unexpected character '{0}' at position {1}")]
    UnexpectedCharacter(char, usize),

    #[error("Lexer error: unterminated string literal starting at position {0}")]
    UnterminatedString(usize),

    #[error("Lexer error: invalid number format at position {0}")]
    InvalidNumber(usize),

    // ========== Parser Errors ==========
    #[error("Parse error: unexpected token '{found}', expected {expected}")]
    UnexpectedToken { expected: String, found: String },

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Parse error: `{0}' is an unknown function")]
    UnknownFunction(String),

    #[error("Parse error: function {function} has too many arguments (at most {max})")]
    TooManyArguments { function: String, max: usize },

    #[error("Parse error: function {function} needs at least {min} argument(s), got {got}")]
    TooFewArguments {
        function: String,
        min: usize,
        got: usize,
    },

    #[error("Parse error: parameter {0} has no value")]
    UnboundParameter(usize),

    // ========== Catalog Errors ==========
    #[error("Catalog error: table '{0}' not found")]
    TableNotFound(String),

    #[error("Catalog error: table '{0}' already exists")]
    TableAlreadyExists(String),

    #[error("Catalog error: column '{0}' not found in table '{1}'")]
    ColumnNotFound(String, String),

    #[error("Catalog error: column '{0}' is ambiguous")]
    AmbiguousColumn(String),

    #[error("Catalog error: column '{0}' already exists in table '{1}'")]
    ColumnAlreadyExists(String, String),

    #[error("Catalog error: database is closed")]
    DatabaseClosed,

    // ========== Type Errors ==========
    #[error("Type error: cannot convert {from} to {to}")]
    TypeMismatch { from: String, to: String },

    #[error("Type error: null value not allowed for column '{0}'")]
    NullNotAllowed(String),

    #[error("Type error: value too long for column '{0}'")]
    ValueTooLarge(String),

    // ========== Execution Errors ==========
    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Execution error: division by zero")]
    DivisionByZero,

    #[error("Execution error: primary key violation for table '{0}'")]
    PrimaryKeyViolation(String),

    #[error("Execution error: unique constraint violation on column '{0}'")]
    UniqueViolation(String),

    // ========== Storage Errors ==========
    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Storage error: block {0} is out of range")]
    BlockOutOfRange(u32),

    #[error("Storage error: row of {0} bytes does not fit in a block")]
    RowTooLarge(usize),

    #[error("Storage error: table '{table}' is corrupt: {reason}")]
    CorruptTable { table: String, reason: String },

    // ========== I/O Errors ==========
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Config error: {0}")]
    ConfigError(#[from] serde_json::Error),

    // ========== Lock Errors ==========
    #[error("Lock error: timed out after {timeout:?} waiting for '{resource}'")]
    LockTimeout { resource: String, timeout: Duration },

    // ========== Internal Errors ==========
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for failures caused by lock contention, which callers may retry.
    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, Error::LockTimeout { .. })
    }

    /// True for failures that mean a table's stored image cannot be trusted.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::CorruptTable { .. })
    }
}

/// Result type alias for BlockDB operations
pub type Result<T> = std::result::Result<T, Error>;
