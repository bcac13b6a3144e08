//! Tether DSP - Sample-Rate Adaptation
//!
//! This crate provides the per-channel streaming resampler used by the
//! output bridge:
//! - Arbitrary positive rate ratios (device rate above or below the source)
//! - Phase continuity across calls (stateful, block-by-block)
//! - A drift-correction factor that can change between calls
//! - Zero-allocation processing path
//!
//! # Architecture
//!
//! The resampler never allocates after construction. Rate and drift setters
//! only recompute the step, so they are safe to call from a real-time
//! callback between blocks.

mod error;
mod resampler;

pub use error::DspError;
pub use resampler::{Resampler, DEFAULT_MAX_DRIFT_PPM, INTERPOLATION_MARGIN};
