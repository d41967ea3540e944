//! Error types for the analytics data model

use thiserror::Error;

/// Result type alias for data model operations
pub type Result<T> = std::result::Result<T, TypesError>;

/// Errors raised while interpreting data model values
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TypesError {
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    #[error("Unknown severity: {0}")]
    UnknownSeverity(String),
}
