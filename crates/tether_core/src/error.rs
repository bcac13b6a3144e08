//! Output Error Types

use thiserror::Error;

/// Errors that can occur in the output bridge
///
/// `Overflow`, `Underflow` and `DriftOutOfRange` are never returned from the
/// real-time paths. They are recorded there and rebuilt from diagnostic
/// reports on the non-real-time side.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OutputError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open output stream: {message} ({code})")]
    StreamOpenFailed { code: i32, message: String },

    #[error("Failed to start output stream: {0}")]
    StreamPlayFailed(String),

    #[error("Device enumeration failed: {0}")]
    Enumeration(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Ring buffer overflow - block dropped with {occupancy} bytes buffered")]
    Overflow { occupancy: usize },

    #[error("Ring buffer underflow - silence substituted with {occupancy} bytes buffered")]
    Underflow { occupancy: usize },

    #[error("Clock drift estimate {ppm:.1} ppm exceeds the {limit:.0} ppm bound")]
    DriftOutOfRange { ppm: f64, limit: f64 },

    #[error("DSP error: {0}")]
    Dsp(#[from] tether_dsp::DspError),
}

/// Result type alias for output operations
pub type OutputResult<T> = Result<T, OutputError>;
