//! Error types for the stemset playback core
//!
//! Defines module-specific error types using thiserror for clear error
//! propagation.
//!
//! Per-track load failures never appear here at the public boundary: they are
//! absorbed into per-track progress state so a partially failed song still
//! plays. Device activation failure is the one condition surfaced to the host
//! application as an `Err`.

use thiserror::Error;

/// Main error type for the stemset engine and preload cache
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Track byte fetch errors (network or host transport)
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Audio decoding errors
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// Audio output device errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// Playback engine errors
    #[error("Playback error: {0}")]
    Playback(String),

    /// Preload cache errors
    #[error("Cache error: {0}")]
    Cache(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience Result type using the stemset Error
pub type Result<T> = std::result::Result<T, Error>;
