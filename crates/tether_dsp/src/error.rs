//! DSP Error Types

use thiserror::Error;

/// Errors that can occur while configuring the resampler
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DspError {
    #[error("Sample rate must be positive and finite, got {0}")]
    InvalidSampleRate(f64),

    #[error("Drift limit must be non-negative and below 1e6 ppm, got {0}")]
    InvalidDriftLimit(f64),
}
