//! Bridge, Stream and Control Configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Reserved device name meaning "system default output"
pub const DEFAULT_OUTPUT_NAME: &str = "default_out";

/// Bytes per sample on both sides of the bridge (32-bit float)
pub const SAMPLE_SIZE: usize = std::mem::size_of::<f32>();

/// Producer-side stream parameters passed to `start`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StreamParams {
    /// Number of channels fed by the upstream graph
    pub channels: u16,

    /// Upstream graph sample rate in Hz
    pub source_rate: u32,

    /// Frames per producer period
    pub producer_block: u32,
}

impl Default for StreamParams {
    fn default() -> Self {
        Self {
            channels: 2,
            source_rate: 48000,
            producer_block: 128,
        }
    }
}

impl StreamParams {
    /// Producer period in milliseconds
    pub fn period_ms(&self) -> f32 {
        (self.producer_block as f32 / self.source_rate as f32) * 1000.0
    }

    /// Suggested device latency, one producer period
    pub fn suggested_latency(&self) -> Duration {
        Duration::from_secs_f64(self.producer_block as f64 / self.source_rate as f64)
    }

    /// Device callback block matching one producer period at `device_rate`
    pub fn device_block(&self, device_rate: u32) -> u32 {
        let frames =
            self.producer_block as f64 * device_rate as f64 / self.source_rate as f64;
        (frames.round() as u32).max(1)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.channels == 0 || self.channels > 64 {
            return Err(format!("Invalid channel count: {}", self.channels));
        }
        if self.source_rate < 8000 || self.source_rate > 384000 {
            return Err(format!("Invalid source sample rate: {}", self.source_rate));
        }
        if self.producer_block == 0 || self.producer_block > 8192 {
            return Err(format!("Invalid producer block size: {}", self.producer_block));
        }
        Ok(())
    }
}

/// Tuning of the bridge between producer and device
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Ring capacity in device callback periods (K)
    pub buffer_periods: usize,

    /// Length of one drift measurement window
    pub drift_window: Duration,

    /// Bound on the drift correction in ppm; larger estimates are anomalies
    pub max_drift_ppm: f64,

    /// Feed drift estimates back into the resamplers
    pub auto_drift_correction: bool,

    /// Largest device callback handled in one pass (render scratch size)
    pub max_callback_frames: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            buffer_periods: 10,
            drift_window: Duration::from_secs(60),
            max_drift_ppm: 2000.0,
            auto_drift_correction: true,
            max_callback_frames: 4096,
        }
    }
}

impl BridgeConfig {
    /// Callbacks per measurement window for a given device cadence
    pub fn window_callbacks(&self, device_rate: u32, callback_frames: u32) -> usize {
        let callbacks = self.drift_window.as_secs_f64() * device_rate as f64
            / callback_frames.max(1) as f64;
        (callbacks.round() as usize).max(1)
    }

    /// Ring capacity in bytes for one channel
    pub fn ring_bytes(&self, period_frames: usize) -> usize {
        self.buffer_periods * period_frames * SAMPLE_SIZE
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.buffer_periods < 2 || self.buffer_periods > 64 {
            return Err(format!("Invalid buffer periods: {}", self.buffer_periods));
        }
        if self.drift_window.is_zero() || self.drift_window > Duration::from_secs(3600) {
            return Err(format!("Invalid drift window: {:?}", self.drift_window));
        }
        if !(self.max_drift_ppm > 0.0 && self.max_drift_ppm <= 10_000.0) {
            return Err(format!("Invalid drift bound: {} ppm", self.max_drift_ppm));
        }
        if self.max_callback_frames < 32 || self.max_callback_frames > 65536 {
            return Err(format!(
                "Invalid max callback frames: {}",
                self.max_callback_frames
            ));
        }
        Ok(())
    }
}

/// Externally settable values of the output endpoint
///
/// These are owned by the control surface; the session reads them at start
/// and whenever one of its setters is called.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputControls {
    /// `"<host>::<device>"` or [`DEFAULT_OUTPUT_NAME`]
    pub device_name: String,

    /// Rate requested from the device
    pub device_sample_rate: u32,

    /// Manual drift trim in ppm, added to the automatic correction
    pub drift_trim_ppm: f64,
}

impl Default for OutputControls {
    fn default() -> Self {
        Self {
            device_name: DEFAULT_OUTPUT_NAME.to_string(),
            device_sample_rate: 48000,
            drift_trim_ppm: 0.0,
        }
    }
}

impl OutputControls {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.device_name.is_empty() {
            return Err("Empty device name".to_string());
        }
        if self.device_sample_rate < 8000 || self.device_sample_rate > 384000 {
            return Err(format!(
                "Invalid device sample rate: {}",
                self.device_sample_rate
            ));
        }
        if !self.drift_trim_ppm.is_finite() {
            return Err("Drift trim must be finite".to_string());
        }
        Ok(())
    }
}
