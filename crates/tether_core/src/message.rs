//! Message Types for Thread Communication
//!
//! Events flow from the session, the device error callback and the
//! diagnostic timer -> whoever owns the receiver (CLI, control surface)

use serde::{Deserialize, Serialize};

use crate::monitor::DiagnosticReport;

/// Events sent from the output session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Event {
    /// Device stream opened and playing
    Started {
        device: String,
        channels: u16,
        sample_rate: u32,
        block_size: u32,
    },

    /// Device stream closed
    Stopped,

    /// One channel's figures for the last diagnostic interval
    Diagnostic(DiagnosticReport),

    /// Error reported by the device backend or the session
    Error { message: String },
}

impl Event {
    /// Create an error event from any error type
    pub fn error<E: std::fmt::Display>(err: E) -> Self {
        Event::Error {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = Event::Started {
            device: "ALSA::default".to_string(),
            channels: 2,
            sample_rate: 44100,
            block_size: 118,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("Started"));

        let deserialized: Event = serde_json::from_str(&json).unwrap();
        if let Event::Started {
            device, block_size, ..
        } = deserialized
        {
            assert_eq!(device, "ALSA::default");
            assert_eq!(block_size, 118);
        } else {
            panic!("Deserialization produced wrong variant");
        }
    }

    #[test]
    fn test_error_event() {
        let event = Event::error("Test error message");
        if let Event::Error { message } = event {
            assert_eq!(message, "Test error message");
        } else {
            panic!("Should be Error variant");
        }
    }

    #[test]
    fn test_diagnostic_serialization() {
        let report = DiagnosticReport {
            channel: 1,
            overflowed: false,
            overflow_occupancy: 0,
            overflow_events: 0,
            underflowed: true,
            underflow_occupancy: 16,
            underflow_events: 3,
            average_latency_frames: Some(590.5),
            drift_ppm: None,
            drift_out_of_range: false,
            drift_limit_ppm: 2000.0,
            correction_ppm: 0.0,
            device_running: true,
        };

        let json = serde_json::to_string(&Event::Diagnostic(report.clone())).unwrap();
        let deserialized: Event = serde_json::from_str(&json).unwrap();

        if let Event::Diagnostic(decoded) = deserialized {
            assert_eq!(decoded, report);
        } else {
            panic!("Wrong variant");
        }
    }
}
