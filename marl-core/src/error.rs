//! Errors in the library.
use thiserror::Error;

/// Errors in the library.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MarlError {
    /// Invalid setup, raised once at construction time.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A produced item cannot be used, e.g. a transition matched by no table.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Nested structures or array shapes cannot be broadcast together.
    #[error("Structure mismatch: {0}")]
    StructureMismatch(String),

    /// An item was sent to a table that does not exist.
    #[error("Unknown table: {0}")]
    UnknownTable(String),

    /// Record key error.
    #[error("Record key error: {0}")]
    RecordKeyError(String),

    /// Record value type error.
    #[error("Record value type error: {0}")]
    RecordValueTypeError(String),
}
