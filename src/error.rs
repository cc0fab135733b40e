//! # Error Types
//!
//! Custom error types for rc-link using `thiserror`.

use thiserror::Error;

/// Main error type for rc-link
#[derive(Debug, Error)]
pub enum LinkError {
    /// Frame could not be packed (bad field, payload too large)
    #[error("Codec error: {0}")]
    Codec(String),

    /// Packed frame shorter than the transport minimum, dropped before write
    #[error("Packed frame of {len} bytes is shorter than frame_min {min}")]
    FrameTooShort { len: usize, min: usize },

    /// Ingestion chunk rejected because the ring lacked space
    #[error("Dropped {len}-byte chunk, only {free} bytes free in ring")]
    Backpressure { len: usize, free: usize },

    /// A short critical section was held elsewhere
    #[error("{0} is busy")]
    Busy(&'static str),

    /// Byte sink is gone (writer task ended)
    #[error("Byte sink closed")]
    SinkClosed,

    /// Error recorded by another context and reported on the next poll
    #[error("Deferred transport error: {0}")]
    Deferred(String),

    /// Module never became ready during bring-up
    #[error("Bring-up failed after {attempts} attempts")]
    BringUpFailed { attempts: u32 },

    /// Serial port could not be opened, read or written
    #[error("Serial port error: {0}")]
    Serial(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Configuration values that parse but make no sense together
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Frame trace record could not be serialized
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for rc-link
pub type Result<T> = std::result::Result<T, LinkError>;
