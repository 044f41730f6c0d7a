//! Error types for the document store.
//!
//! All public APIs return `DocResult<T>`; failures are returned, never raised as panics.

use thiserror::Error;

/// Unified error type for all document store operations.
#[derive(Debug, Error)]
pub enum DocError {
    /// Conditional create was not applied: a row already exists at the identifier
    #[error("duplicate item {identifier} in '{table}'")]
    DuplicateItem { table: String, identifier: String },

    /// Conditional update was not applied, or a read yielded no row
    #[error("item {identifier} not found in '{table}'")]
    ItemNotFound { table: String, identifier: String },

    /// Identifier arity or component types do not match the key definition
    #[error("invalid identifier: expected {expected}, got {actual}")]
    InvalidIdentifier { expected: String, actual: String },

    /// Key definition (or index field) DSL failed to parse
    #[error("key definition error: {message}\nInput: {input}")]
    KeyDefinition { message: String, input: String },

    /// Payload or name failed validation
    #[error("validation error: {0}")]
    Validation(String),

    /// Operation not supported by this repository (programming error)
    #[error("operation '{operation}' is not supported on '{table}'")]
    Unsupported { operation: String, table: String },

    /// Constraint violation (one external index engine per table, etc.)
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Underlying store failure
    #[error("storage error: {0}")]
    Storage(String),

    /// Bound values do not fit the statement they were bound to
    #[error("statement error: {message}\nCQL: {cql}")]
    Statement { message: String, cql: String },

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// sled embedded database error
    #[error("sled error: {source}")]
    Sled {
        #[from]
        source: sled::Error,
    },

    /// Standard I/O error
    #[error("io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

/// Result type alias for all document store operations.
pub type DocResult<T> = Result<T, DocError>;

impl DocError {
    pub(crate) fn key_definition(message: impl Into<String>, input: &str) -> Self {
        DocError::KeyDefinition {
            message: message.into(),
            input: input.to_string(),
        }
    }

    /// True for a conditional create that was not applied.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, DocError::DuplicateItem { .. })
    }

    /// True when the targeted row does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DocError::ItemNotFound { .. })
    }

    /// True for faults raised before any storage call was attempted.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            DocError::InvalidIdentifier { .. }
                | DocError::KeyDefinition { .. }
                | DocError::Validation(_)
                | DocError::Unsupported { .. }
        )
    }
}

// Conversions from serialization errors
impl From<serde_json::Error> for DocError {
    fn from(err: serde_json::Error) -> Self {
        DocError::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for DocError {
    fn from(err: bincode::Error) -> Self {
        DocError::Serialization(err.to_string())
    }
}

impl From<rmp_serde::encode::Error> for DocError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        DocError::Serialization(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for DocError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        DocError::Serialization(err.to_string())
    }
}
