//! Tether Core - Device Output Bridge
//!
//! This crate connects a fixed-period producer (an audio graph running on
//! its own clock) to an output device running on another:
//! - Output device enumeration and stream negotiation (via CPAL)
//! - Per-channel sample-rate adaptation with drift correction
//! - Lock-free byte bridges between producer and device contexts
//! - Occupancy-based clock drift estimation
//! - Fault and latency reporting from a non-real-time timer
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Producer Context                        │
//! │   submit() ──▶ Resampler (per channel) ──▶ BridgeWriter     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ rtrb (one ring per channel)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Device Context                         │
//! │   BridgeReader ──▶ device buffer        DriftEstimator      │
//! │        │                                      │             │
//! │        └──────── atomics (SharedState) ◀──────┘             │
//! │              (Zero allocation in this path)                 │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ atomics
//!                              ▼
//!            Diagnostic timer ──crossbeam-channel──▶ Events
//! ```

mod bridge;
mod config;
mod device;
mod drift;
mod error;
mod host;
mod message;
mod monitor;
mod render;
mod session;

pub use bridge::{BridgeReader, BridgeWriter, ChannelBridge};
pub use config::{BridgeConfig, OutputControls, StreamParams, DEFAULT_OUTPUT_NAME, SAMPLE_SIZE};
pub use device::{device_label, split_label, AudioDevice, DeviceRegistry, HOST_SEPARATOR};
pub use drift::{DriftEstimator, DriftMeasurement, DriftState, LatencyHistory};
pub use error::{OutputError, OutputResult};
pub use host::{
    ActiveStream, CpalHost, MockDevice, MockHost, NegotiatedStream, OutputHost, StreamRequest,
};
pub use message::Event;
pub use monitor::{ChannelState, DiagnosticReport, DiagnosticsHandle, SharedState};
pub use render::DeviceRenderer;
pub use session::DeviceSession;

// Re-export DSP types for convenience
pub use tether_dsp::{DspError, Resampler, DEFAULT_MAX_DRIFT_PPM};
