//! Error types for the stream processor
//!
//! This module provides error handling for all engine operations including
//! decoding, windowing, keyed state, checkpointing and sink delivery.

use thiserror::Error;

/// Main processor error type
#[derive(Error, Debug)]
pub enum ProcessorError {
    /// Record decoding errors
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Window-related errors
    #[error("window error: {0}")]
    Window(#[from] WindowError),

    /// Keyed state errors
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// Checkpoint write and restore errors
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Downstream sink errors
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    /// Configuration errors
    #[error("configuration error: {source}")]
    Configuration {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Execution errors
    #[error("execution error: {source}")]
    Execution {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Source errors (poll, seek, commit)
    #[error("source error: {source}")]
    Source {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Serialization/deserialization errors
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error for unexpected conditions
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

/// A record that could not be turned into an event
///
/// Non-fatal: the record is skipped, counted and reported.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed record at partition {partition} offset {offset}: {reason} (payload: {raw_snippet})")]
pub struct DecodeError {
    pub partition: u32,
    pub offset: i64,
    pub reason: String,
    /// Leading part of the raw payload, for diagnostics
    pub raw_snippet: String,
}

/// Window assignment and management errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WindowError {
    /// Window size is invalid
    #[error("invalid window size: {size}ms, must be greater than 0")]
    InvalidWindowSize { size: i64 },

    /// Slide size is invalid for sliding windows
    #[error("invalid slide size: {slide}ms, must be greater than 0 and less than or equal to window size {window}ms")]
    InvalidSlideSize { slide: i64, window: i64 },

    /// Gap size is invalid for session windows
    #[error("invalid gap size: {gap}ms, must be greater than 0")]
    InvalidGapSize { gap: i64 },

    /// Invalid window bounds
    #[error("invalid window bounds: start {start} must be before end {end}")]
    InvalidBounds { start: i64, end: i64 },

    /// Event arrived after the watermark passed its allowed lateness
    #[error("late event: event timestamp {event_time} is before watermark {watermark} minus allowed lateness {allowed_lateness}ms")]
    LateEvent {
        event_time: i64,
        watermark: i64,
        allowed_lateness: i64,
    },
}

/// Keyed state and state backend errors
#[derive(Error, Debug)]
pub enum StateError {
    /// State key not found
    #[error("state key not found: {key}")]
    KeyNotFound { key: String },

    /// State serialization failed
    #[error("state serialization failed for '{key}': {reason}")]
    SerializationFailed { key: String, reason: String },

    /// State deserialization failed
    #[error("state deserialization failed for '{key}': {reason}")]
    DeserializationFailed { key: String, reason: String },

    /// State backend storage error
    #[error("storage error in {backend_type}: {details}")]
    StorageError {
        backend_type: String,
        details: String,
    },
}

/// Checkpoint errors
///
/// A failed write only invalidates that attempt; a failed restore is fatal
/// unless replay without state is explicitly configured.
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// Persisting a checkpoint failed; the previous checkpoint stays authoritative
    #[error("checkpoint {checkpoint_id} write failed: {reason}")]
    WriteFailed { checkpoint_id: u64, reason: String },

    /// A checkpoint is already being persisted
    #[error("checkpoint {in_flight} still in progress")]
    InProgress { in_flight: u64 },

    /// The latest checkpoint could not be read back
    #[error("restore failed from checkpoint {checkpoint}: {reason}")]
    RestoreFailed { checkpoint: String, reason: String },

    /// Stored checksum does not match the payload
    #[error("checksum mismatch in checkpoint {checkpoint_id}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        checkpoint_id: u64,
        expected: String,
        actual: String,
    },
}

/// Sink delivery errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// A write attempt failed
    #[error("write to {sink} failed: {reason}")]
    WriteFailed { sink: String, reason: String },

    /// The sink or its output queue has been closed
    #[error("sink {sink} is closed")]
    Closed { sink: String },

    /// Queued outputs were abandoned when the drain deadline passed
    #[error("{undelivered} outputs undelivered after {timeout_ms} ms drain timeout")]
    DrainTimeout { undelivered: u64, timeout_ms: u64 },
}

/// Result type alias for processor operations
pub type Result<T> = std::result::Result<T, ProcessorError>;

/// Result type alias for window operations
pub type WindowResult<T> = std::result::Result<T, WindowError>;

/// Result type alias for state operations
pub type StateResult<T> = std::result::Result<T, StateError>;

/// Result type alias for checkpoint operations
pub type CheckpointResult<T> = std::result::Result<T, CheckpointError>;

/// Result type alias for sink operations
pub type SinkResult<T> = std::result::Result<T, SinkError>;

impl From<bincode::Error> for ProcessorError {
    fn from(err: bincode::Error) -> Self {
        ProcessorError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for ProcessorError {
    fn from(err: serde_json::Error) -> Self {
        ProcessorError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for ProcessorError {
    fn from(err: anyhow::Error) -> Self {
        ProcessorError::Unexpected(err.to_string())
    }
}

impl From<figment::Error> for ProcessorError {
    fn from(err: figment::Error) -> Self {
        ProcessorError::Configuration {
            source: Box::new(err),
        }
    }
}
