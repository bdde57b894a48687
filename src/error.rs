//! Error taxonomy for the hand landmark pipeline.
//!
//! None of these are fatal to the host: every stage catches its own errors and
//! reports them through `tracing` and `metrics` instead of unwinding.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// The detector or camera session could not start. The session stays inert.
    #[error("initialization failed: {0}")]
    Initialization(String),

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error(transparent)]
    Detector(#[from] DetectorError),

    /// Camera/session setup failed. No stream is produced but the host stays alive.
    #[error("camera binding failed: {0}")]
    Binding(String),

    #[error("capture failed: {0}")]
    Capture(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A single malformed frame. Only that frame is dropped.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConversionError {
    #[error("frame has zero size ({width}x{height})")]
    EmptyFrame { width: u32, height: u32 },

    #[error("frame buffer too small: expected {expected} bytes, got {actual}")]
    BufferTooSmall { expected: usize, actual: usize },

    #[error("unsupported rotation: {0} degrees")]
    UnsupportedRotation(i32),

    #[error("decoded size {actual_width}x{actual_height} does not match frame {width}x{height}")]
    SizeMismatch {
        width: u32,
        height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    #[error("jpeg decode failed: {0}")]
    Jpeg(String),
}

/// Reported by the detector collaborator, either synchronously on submission or
/// through its error channel. Never stops later dispatches.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("detector error{}: {message}", .timestamp_ms.map(|t| format!(" at {t} ms")).unwrap_or_default())]
pub struct DetectorError {
    /// Correlation timestamp of the failed request, when the detector knows it.
    pub timestamp_ms: Option<u64>,
    pub message: String,
}

impl DetectorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            timestamp_ms: None,
            message: message.into(),
        }
    }

    pub fn at(timestamp_ms: u64, message: impl Into<String>) -> Self {
        Self {
            timestamp_ms: Some(timestamp_ms),
            message: message.into(),
        }
    }
}
