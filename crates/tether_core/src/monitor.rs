//! Fault/Latency Monitor
//!
//! Shared state between the two real-time contexts and the diagnostic timer.
//! Every field has exactly one real-time writer and is drained by the
//! non-real-time side with atomic swaps; there are no locks.
//!
//! ```text
//!   producer ──overflow──▶ ┌──────────────┐
//!                          │ ChannelState │ ──tick──▶ DiagnosticReport
//!   device ──underflow──▶  │  (per chan)  │
//!   device ──drift/latency▶└──────────────┘ ──correction──▶ producer
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::drift::DriftMeasurement;
use crate::error::OutputError;
use crate::message::Event;

/// Per-channel atomics
///
/// Rust pattern: AtomicF64 doesn't exist, so f64 values are stored as bits.
/// `NaN` stands for "no value".
pub struct ChannelState {
    // Written by the producer context
    overflowed: AtomicBool,
    overflow_occupancy: AtomicUsize,
    overflow_events: AtomicU64,

    // Written by the device context
    underflowed: AtomicBool,
    underflow_occupancy: AtomicUsize,
    underflow_events: AtomicU64,
    measured: AtomicBool,
    average_latency_bits: AtomicU64,
    drift_ppm_bits: AtomicU64,
    drift_out_of_range: AtomicBool,
    correction_ppm_bits: AtomicU64,
}

impl ChannelState {
    pub fn new() -> Self {
        Self {
            overflowed: AtomicBool::new(false),
            overflow_occupancy: AtomicUsize::new(0),
            overflow_events: AtomicU64::new(0),
            underflowed: AtomicBool::new(false),
            underflow_occupancy: AtomicUsize::new(0),
            underflow_events: AtomicU64::new(0),
            measured: AtomicBool::new(false),
            average_latency_bits: AtomicU64::new(f64::NAN.to_bits()),
            drift_ppm_bits: AtomicU64::new(f64::NAN.to_bits()),
            drift_out_of_range: AtomicBool::new(false),
            correction_ppm_bits: AtomicU64::new(0.0_f64.to_bits()),
        }
    }

    /// Producer side: a block was dropped with `occupancy` bytes buffered
    #[inline]
    pub fn record_overflow(&self, occupancy: usize) {
        self.overflow_occupancy.store(occupancy, Ordering::Relaxed);
        self.overflow_events.fetch_add(1, Ordering::Relaxed);
        self.overflowed.store(true, Ordering::Release);
    }

    /// Device side: silence was substituted with `occupancy` bytes buffered
    #[inline]
    pub fn record_underflow(&self, occupancy: usize) {
        self.underflow_occupancy.store(occupancy, Ordering::Relaxed);
        self.underflow_events.fetch_add(1, Ordering::Relaxed);
        self.underflowed.store(true, Ordering::Release);
    }

    /// Device side: a measurement window completed
    #[inline]
    pub fn publish_measurement(&self, measurement: &DriftMeasurement, apply_correction: bool) {
        self.average_latency_bits
            .store(measurement.average_frames.to_bits(), Ordering::Relaxed);
        self.drift_ppm_bits.store(
            measurement.drift_ppm.unwrap_or(f64::NAN).to_bits(),
            Ordering::Relaxed,
        );
        if measurement.out_of_range {
            self.drift_out_of_range.store(true, Ordering::Relaxed);
        }
        if apply_correction {
            self.correction_ppm_bits
                .store(measurement.correction_ppm.to_bits(), Ordering::Relaxed);
        }
        self.measured.store(true, Ordering::Release);
    }

    /// Automatic correction currently requested from the producer, in ppm
    #[inline]
    pub fn correction_ppm(&self) -> f64 {
        f64::from_bits(self.correction_ppm_bits.load(Ordering::Relaxed))
    }

    /// Drain everything accumulated since the last call into a report
    pub fn drain(&self, channel: usize, device_running: bool, drift_limit_ppm: f64) -> DiagnosticReport {
        let overflowed = self.overflowed.swap(false, Ordering::Acquire);
        let underflowed = self.underflowed.swap(false, Ordering::Acquire);
        let measured = self.measured.swap(false, Ordering::Acquire);

        let (average_latency_frames, drift_ppm, drift_out_of_range) = if measured {
            (
                finite(f64::from_bits(self.average_latency_bits.load(Ordering::Relaxed))),
                finite(f64::from_bits(self.drift_ppm_bits.load(Ordering::Relaxed))),
                self.drift_out_of_range.swap(false, Ordering::Relaxed),
            )
        } else {
            (None, None, false)
        };

        DiagnosticReport {
            channel,
            overflowed,
            overflow_occupancy: if overflowed {
                self.overflow_occupancy.load(Ordering::Relaxed)
            } else {
                0
            },
            overflow_events: self.overflow_events.swap(0, Ordering::Relaxed),
            underflowed,
            underflow_occupancy: if underflowed {
                self.underflow_occupancy.load(Ordering::Relaxed)
            } else {
                0
            },
            underflow_events: self.underflow_events.swap(0, Ordering::Relaxed),
            average_latency_frames,
            drift_ppm,
            drift_out_of_range,
            drift_limit_ppm,
            correction_ppm: self.correction_ppm(),
            device_running,
        }
    }
}

impl Default for ChannelState {
    fn default() -> Self {
        Self::new()
    }
}

fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

/// Session-wide shared state
pub struct SharedState {
    device_name: String,
    channels: Box<[ChannelState]>,
    /// Set by every device callback, cleared by every tick
    device_alive: AtomicBool,
    callbacks: AtomicU64,
    drift_trim_bits: AtomicU64,
    drift_limit_ppm: f64,
}

impl SharedState {
    pub fn new(device_name: impl Into<String>, channels: usize, drift_limit_ppm: f64) -> Self {
        Self {
            device_name: device_name.into(),
            channels: (0..channels).map(|_| ChannelState::new()).collect(),
            device_alive: AtomicBool::new(false),
            callbacks: AtomicU64::new(0),
            drift_trim_bits: AtomicU64::new(0.0_f64.to_bits()),
            drift_limit_ppm,
        }
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn channel(&self, index: usize) -> &ChannelState {
        &self.channels[index]
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn drift_limit_ppm(&self) -> f64 {
        self.drift_limit_ppm
    }

    /// Device side: called once per callback
    #[inline]
    pub fn mark_callback(&self) {
        self.callbacks.fetch_add(1, Ordering::Relaxed);
        self.device_alive.store(true, Ordering::Release);
    }

    /// Total device callbacks since the session opened
    pub fn callback_count(&self) -> u64 {
        self.callbacks.load(Ordering::Relaxed)
    }

    pub fn set_drift_trim_ppm(&self, ppm: f64) {
        self.drift_trim_bits.store(ppm.to_bits(), Ordering::Relaxed);
    }

    #[inline]
    pub fn drift_trim_ppm(&self) -> f64 {
        f64::from_bits(self.drift_trim_bits.load(Ordering::Relaxed))
    }
}

/// Diagnostic figures for one channel, covering the time since the previous tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticReport {
    pub channel: usize,

    /// At least one producer block was dropped
    pub overflowed: bool,
    /// Buffered bytes when the last block was dropped
    pub overflow_occupancy: usize,
    pub overflow_events: u64,

    /// At least one device callback was zero-filled
    pub underflowed: bool,
    /// Buffered bytes at the last zero-filled callback
    pub underflow_occupancy: usize,
    pub underflow_events: u64,

    /// Mean occupancy of the latest completed window, if one completed
    pub average_latency_frames: Option<f64>,
    /// Latest raw drift estimate, if one was made
    pub drift_ppm: Option<f64>,
    pub drift_out_of_range: bool,
    pub drift_limit_ppm: f64,

    /// Automatic correction in effect
    pub correction_ppm: f64,

    /// The device called back at least once since the previous tick
    pub device_running: bool,
}

impl DiagnosticReport {
    /// Nothing went wrong in this interval
    pub fn is_healthy(&self) -> bool {
        !self.overflowed && !self.underflowed && !self.drift_out_of_range && self.device_running
    }

    /// Real-time faults in this interval, as errors
    pub fn faults(&self) -> Vec<OutputError> {
        let mut faults = Vec::new();
        if self.overflowed {
            faults.push(OutputError::Overflow {
                occupancy: self.overflow_occupancy,
            });
        }
        if self.underflowed {
            faults.push(OutputError::Underflow {
                occupancy: self.underflow_occupancy,
            });
        }
        if self.drift_out_of_range {
            faults.push(OutputError::DriftOutOfRange {
                ppm: self.drift_ppm.unwrap_or(f64::NAN),
                limit: self.drift_limit_ppm,
            });
        }
        faults
    }
}

/// Cloneable handle for a diagnostic timer running on another thread
#[derive(Clone)]
pub struct DiagnosticsHandle {
    shared: Arc<SharedState>,
    events: Option<Sender<Event>>,
}

impl DiagnosticsHandle {
    pub fn new(shared: Arc<SharedState>, events: Option<Sender<Event>>) -> Self {
        Self { shared, events }
    }

    /// Drain counters and figures of every channel, log them and forward them
    pub fn tick(&self) -> Vec<DiagnosticReport> {
        let device = self.shared.device_name();
        let running = self.shared.device_alive.swap(false, Ordering::AcqRel);
        let limit = self.shared.drift_limit_ppm();

        if !running {
            warn!("{}: output device not running", device);
        }

        let reports: Vec<DiagnosticReport> = (0..self.shared.channel_count())
            .map(|channel| self.shared.channel(channel).drain(channel, running, limit))
            .collect();

        for report in &reports {
            log_report(device, report);
            if let Some(sender) = &self.events {
                let _ = sender.try_send(Event::Diagnostic(report.clone()));
            }
        }

        reports
    }

    pub fn shared(&self) -> &Arc<SharedState> {
        &self.shared
    }
}

fn log_report(device: &str, report: &DiagnosticReport) {
    if report.overflowed {
        warn!(
            "{}: overflow on channel {}: {} event(s), {} bytes buffered",
            device, report.channel, report.overflow_events, report.overflow_occupancy
        );
    }
    if report.underflowed {
        warn!(
            "{}: underrun on channel {}: {} event(s), {} bytes buffered",
            device, report.channel, report.underflow_events, report.underflow_occupancy
        );
    }
    if let Some(average) = report.average_latency_frames {
        info!(
            "{}: channel {} average latency: {:.1} frames",
            device, report.channel, average
        );
    }
    if let Some(drift) = report.drift_ppm {
        if report.drift_out_of_range {
            warn!(
                "{}: channel {} drift {:.1} ppm outside ±{:.0} ppm, clamped",
                device, report.channel, drift, report.drift_limit_ppm
            );
        } else {
            info!(
                "{}: channel {} drift: {:.2} ppm (correction {:.2} ppm)",
                device, report.channel, drift, report.correction_ppm
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn measurement(drift: Option<f64>, out_of_range: bool) -> DriftMeasurement {
        DriftMeasurement {
            average_frames: 640.0,
            drift_ppm: drift,
            out_of_range,
            correction_ppm: -12.5,
        }
    }

    #[test]
    fn test_channel_state_defaults() {
        let state = ChannelState::new();
        let report = state.drain(0, true, 2000.0);
        assert!(report.is_healthy());
        assert_eq!(report.average_latency_frames, None);
        assert_eq!(report.drift_ppm, None);
        assert_eq!(report.correction_ppm, 0.0);
    }

    #[test]
    fn test_faults_reported_once() {
        let state = ChannelState::new();
        state.record_overflow(100);
        state.record_overflow(200);
        state.record_underflow(12);

        let report = state.drain(3, true, 2000.0);
        assert_eq!(report.channel, 3);
        assert!(report.overflowed);
        assert_eq!(report.overflow_occupancy, 200);
        assert_eq!(report.overflow_events, 2);
        assert!(report.underflowed);
        assert_eq!(report.underflow_occupancy, 12);
        assert_eq!(report.underflow_events, 1);
        assert_eq!(report.faults().len(), 2);

        let report = state.drain(3, true, 2000.0);
        assert!(!report.overflowed);
        assert!(!report.underflowed);
        assert_eq!(report.overflow_events, 0);
        assert!(report.faults().is_empty());
    }

    #[test]
    fn test_measurement_published_and_drained() {
        let state = ChannelState::new();
        state.publish_measurement(&measurement(Some(12.5), false), true);

        assert_eq!(state.correction_ppm(), -12.5);
        let report = state.drain(0, true, 2000.0);
        assert_eq!(report.average_latency_frames, Some(640.0));
        assert_eq!(report.drift_ppm, Some(12.5));
        assert_eq!(report.correction_ppm, -12.5);

        // Figures are cleared, the correction stays in effect
        let report = state.drain(0, true, 2000.0);
        assert_eq!(report.drift_ppm, None);
        assert_eq!(report.correction_ppm, -12.5);
    }

    #[test]
    fn test_baseline_window_has_no_drift() {
        let state = ChannelState::new();
        state.publish_measurement(&measurement(None, false), true);

        let report = state.drain(0, true, 2000.0);
        assert_eq!(report.average_latency_frames, Some(640.0));
        assert_eq!(report.drift_ppm, None);
    }

    #[test]
    fn test_correction_not_applied_when_disabled() {
        let state = ChannelState::new();
        state.publish_measurement(&measurement(Some(12.5), false), false);
        assert_eq!(state.correction_ppm(), 0.0);
    }

    #[test]
    fn test_out_of_range_fault() {
        let state = ChannelState::new();
        state.publish_measurement(&measurement(Some(9000.0), true), true);

        let report = state.drain(0, true, 2000.0);
        assert!(report.drift_out_of_range);
        assert!(!report.is_healthy());
        assert!(matches!(
            report.faults().as_slice(),
            [OutputError::DriftOutOfRange { limit, .. }] if *limit == 2000.0
        ));
    }

    #[test]
    fn test_liveness_reset_each_tick() {
        let shared = Arc::new(SharedState::new("Mock::Speakers", 2, 2000.0));
        let (sender, receiver) = crossbeam_channel::unbounded();
        let handle = DiagnosticsHandle::new(Arc::clone(&shared), Some(sender));

        shared.mark_callback();
        let reports = handle.tick();
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.device_running));

        let reports = handle.tick();
        assert!(reports.iter().all(|r| !r.device_running));
        assert_eq!(shared.callback_count(), 1);

        // Every report is forwarded
        assert_eq!(receiver.try_iter().count(), 4);
    }

    #[test]
    fn test_drift_trim() {
        let shared = SharedState::new("Mock::Speakers", 1, 2000.0);
        assert_eq!(shared.drift_trim_ppm(), 0.0);
        shared.set_drift_trim_ppm(-35.0);
        assert_eq!(shared.drift_trim_ppm(), -35.0);
    }

    #[test]
    fn test_report_serialization() {
        let state = ChannelState::new();
        state.record_underflow(8);
        let report = state.drain(1, false, 2000.0);

        let json = serde_json::to_string(&report).unwrap();
        let deserialized: DiagnosticReport = serde_json::from_str(&json).unwrap();
        assert_eq!(report, deserialized);
    }
}
