//! Drift Estimator
//!
//! Watches how full a channel's bridge is at each device callback. Averages
//! over one measurement window are compared with the previous window; a
//! steady change in average occupancy is the relative clock-rate error
//! between producer and device.
//!
//! ```text
//!   Warming ──(first window: baseline set)──▶ Measuring ──(each window: drift)─┐
//!      ▲                                          │  ▲                         │
//!      └──(underflow: history + baseline cleared)─┘  └─────────────────────────┘
//! ```
//!
//! The correction is integrated: each window measures the residual error left
//! by the current correction, and subtracts it. Growing occupancy (positive
//! drift) therefore lowers the resampler's output factor until the backlog
//! stops growing.

/// Whether the estimator can produce drift figures yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftState {
    /// No baseline; the current window only establishes one
    Warming,
    /// Baseline held; every completed window yields a drift estimate
    Measuring,
}

/// Outcome of one completed measurement window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriftMeasurement {
    /// Mean occupancy over the window, in frames
    pub average_frames: f64,

    /// Raw drift estimate; `None` for the first window after a clear
    pub drift_ppm: Option<f64>,

    /// The raw estimate exceeded the bound and was clamped
    pub out_of_range: bool,

    /// Accumulated correction after this window
    pub correction_ppm: f64,
}

/// Bounded per-callback occupancy record
///
/// Capacity is reserved up front; pushes past capacity are ignored so the
/// device callback never allocates.
#[derive(Debug)]
pub struct LatencyHistory {
    samples: Vec<u32>,
    capacity: usize,
}

impl LatencyHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Record one sample, returning `true` once the window is full
    #[inline]
    pub fn push(&mut self, frames: u32) -> bool {
        if self.samples.len() < self.capacity {
            self.samples.push(frames);
        }
        self.is_full()
    }

    pub fn average(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: u64 = self.samples.iter().map(|&s| u64::from(s)).sum();
        Some(sum as f64 / self.samples.len() as f64)
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Window-over-window occupancy trend estimator for one channel
#[derive(Debug)]
pub struct DriftEstimator {
    history: LatencyHistory,
    previous_average: Option<f64>,
    max_drift_ppm: f64,
    correction_ppm: f64,
    state: DriftState,
}

impl DriftEstimator {
    /// Create an estimator with a window of `window_callbacks` callbacks
    pub fn new(window_callbacks: usize, max_drift_ppm: f64) -> Self {
        Self {
            history: LatencyHistory::with_capacity(window_callbacks),
            previous_average: None,
            max_drift_ppm: max_drift_ppm.abs(),
            correction_ppm: 0.0,
            state: DriftState::Warming,
        }
    }

    pub fn state(&self) -> DriftState {
        self.state
    }

    pub fn window_callbacks(&self) -> usize {
        self.history.capacity()
    }

    /// Samples collected in the current window
    pub fn collected(&self) -> usize {
        self.history.len()
    }

    /// Average of the last completed window, if one exists since the last clear
    pub fn baseline(&self) -> Option<f64> {
        self.previous_average
    }

    pub fn correction_ppm(&self) -> f64 {
        self.correction_ppm
    }

    /// Record the occupancy seen before a successful read
    ///
    /// Returns a measurement when this sample completes a window.
    ///
    /// # Real-time Safety
    /// No allocations; O(window) only on the callback that completes a window.
    pub fn record(
        &mut self,
        occupancy_frames: usize,
        callback_frames: usize,
    ) -> Option<DriftMeasurement> {
        let occupancy = u32::try_from(occupancy_frames).unwrap_or(u32::MAX);
        if !self.history.push(occupancy) {
            return None;
        }

        let average = self.history.average().unwrap_or(0.0);
        let window_frames = (self.history.len() * callback_frames.max(1)) as f64;
        self.history.clear();

        let mut measurement = DriftMeasurement {
            average_frames: average,
            drift_ppm: None,
            out_of_range: false,
            correction_ppm: self.correction_ppm,
        };

        if let Some(previous) = self.previous_average {
            let drift_ppm = 1e6 * (average - previous) / window_frames;
            let bounded = drift_ppm.clamp(-self.max_drift_ppm, self.max_drift_ppm);

            self.correction_ppm =
                (self.correction_ppm - bounded).clamp(-self.max_drift_ppm, self.max_drift_ppm);

            measurement.drift_ppm = Some(drift_ppm);
            measurement.out_of_range = bounded != drift_ppm;
            measurement.correction_ppm = self.correction_ppm;
        }

        self.previous_average = Some(average);
        self.state = DriftState::Measuring;
        Some(measurement)
    }

    /// Drop the in-progress window and the baseline after an underflow
    ///
    /// The accumulated correction is kept; only the trend is invalid.
    pub fn invalidate(&mut self) {
        self.history.clear();
        self.previous_average = None;
        self.state = DriftState::Warming;
    }

    /// Forget everything, including the accumulated correction
    pub fn reset(&mut self) {
        self.invalidate();
        self.correction_ppm = 0.0;
    }
}
