//! Device-context rendering
//!
//! Everything the device callback does: drain each channel's bridge, fill
//! silence on underflow, feed the drift estimators and publish their
//! figures. No locks, no allocations, no logging.

use std::sync::Arc;

use crate::bridge::BridgeReader;
use crate::config::SAMPLE_SIZE;
use crate::drift::DriftEstimator;
use crate::monitor::SharedState;

/// Owns the device side of every channel for one session
pub struct DeviceRenderer {
    readers: Vec<BridgeReader>,
    estimators: Vec<DriftEstimator>,
    shared: Arc<SharedState>,

    /// Occupancy in bytes seen at the start of the current callback
    occupancy: Vec<usize>,
    /// Whether the current callback has data for the channel
    ready: Vec<bool>,
    /// Deinterleave buffer, one channel at a time
    scratch: Vec<f32>,

    auto_correction: bool,
}

impl DeviceRenderer {
    /// Note: This allocates. Build it before handing it to the device.
    pub fn new(
        readers: Vec<BridgeReader>,
        window_callbacks: usize,
        max_drift_ppm: f64,
        max_callback_frames: usize,
        auto_correction: bool,
        shared: Arc<SharedState>,
    ) -> Self {
        let channels = readers.len();
        Self {
            estimators: (0..channels)
                .map(|_| DriftEstimator::new(window_callbacks, max_drift_ppm))
                .collect(),
            readers,
            shared,
            occupancy: vec![0; channels],
            ready: vec![false; channels],
            scratch: vec![0.0; max_callback_frames.max(1)],
            auto_correction,
        }
    }

    pub fn channels(&self) -> usize {
        self.readers.len()
    }

    /// Render one callback into per-channel buffers of equal length
    ///
    /// # Real-time Safety
    /// No allocations, no locks.
    pub fn render_planar(&mut self, outputs: &mut [&mut [f32]]) {
        let frames = outputs.first().map_or(0, |out| out.len());
        self.begin_callback(frames);

        for (channel, out) in outputs.iter_mut().enumerate() {
            let len = frames.min(out.len());
            let out = &mut out[..len];
            match self.readers.get_mut(channel) {
                Some(reader) if self.ready[channel] => {
                    if !reader.read_samples(out) {
                        out.fill(0.0);
                    }
                }
                _ => out.fill(0.0),
            }
        }

        self.end_callback(frames);
    }

    /// Render one callback into an interleaved buffer
    ///
    /// Callbacks longer than the scratch buffer are handled in several
    /// passes but still count as one callback for the estimators.
    ///
    /// # Real-time Safety
    /// No allocations, no locks.
    pub fn render_interleaved(&mut self, data: &mut [f32]) {
        let channels = self.readers.len();
        if channels == 0 {
            data.fill(0.0);
            return;
        }

        let frames = data.len() / channels;
        self.begin_callback(frames);

        let mut offset = 0;
        while offset < frames {
            let len = (frames - offset).min(self.scratch.len());

            for channel in 0..channels {
                let block = &mut self.scratch[..len];
                if !(self.ready[channel] && self.readers[channel].read_samples(block)) {
                    block.fill(0.0);
                }

                for (i, &sample) in block.iter().enumerate() {
                    data[(offset + i) * channels + channel] = sample;
                }
            }

            offset += len;
        }

        // Trailing partial frame, if the host hands us one
        data[frames * channels..].fill(0.0);

        self.end_callback(frames);
    }

    /// Snapshot occupancy and settle underflows for the whole callback
    #[inline]
    fn begin_callback(&mut self, frames: usize) {
        self.shared.mark_callback();
        let needed = frames * SAMPLE_SIZE;

        for (channel, reader) in self.readers.iter_mut().enumerate() {
            let available = reader.available_bytes();
            self.occupancy[channel] = available;
            self.ready[channel] = available >= needed;

            if !self.ready[channel] {
                self.shared.channel(channel).record_underflow(available);
                // Drop the partial block so the next read starts on a block boundary
                reader.discard(available);
            }
        }
    }

    #[inline]
    fn end_callback(&mut self, frames: usize) {
        if frames == 0 {
            return;
        }

        // One starved channel makes every channel's trend meaningless
        if self.ready.iter().any(|ready| !ready) {
            for estimator in &mut self.estimators {
                estimator.invalidate();
            }
            return;
        }

        for (channel, estimator) in self.estimators.iter_mut().enumerate() {
            let occupancy = self.occupancy[channel];
            if occupancy == 0 {
                continue;
            }

            if let Some(measurement) = estimator.record(occupancy / SAMPLE_SIZE, frames) {
                self.shared
                    .channel(channel)
                    .publish_measurement(&measurement, self.auto_correction);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{BridgeWriter, ChannelBridge};

    fn setup(channels: usize, window: usize) -> (Vec<BridgeWriter>, DeviceRenderer, Arc<SharedState>) {
        let shared = Arc::new(SharedState::new("Mock::Speakers", channels, 2000.0));
        let (writers, readers): (Vec<_>, Vec<_>) = (0..channels)
            .map(|_| ChannelBridge::with_capacity(4096 * SAMPLE_SIZE))
            .unzip();
        let renderer = DeviceRenderer::new(readers, window, 2000.0, 64, true, Arc::clone(&shared));
        (writers, renderer, shared)
    }

    #[test]
    fn test_interleaves_channels() {
        let (mut writers, mut renderer, shared) = setup(2, 1000);
        writers[0].write_samples(&[1.0, 2.0, 3.0]);
        writers[1].write_samples(&[-1.0, -2.0, -3.0]);

        let mut data = [9.0_f32; 6];
        renderer.render_interleaved(&mut data);
        assert_eq!(data, [1.0, -1.0, 2.0, -2.0, 3.0, -3.0]);

        let report = shared.channel(0).drain(0, true, 2000.0);
        assert!(!report.underflowed);
        assert_eq!(shared.callback_count(), 1);
    }

    #[test]
    fn test_long_callback_split_over_scratch() {
        let (mut writers, mut renderer, _shared) = setup(1, 1000);
        let ramp: Vec<f32> = (0..200).map(|i| i as f32).collect();
        writers[0].write_samples(&ramp);

        // Scratch holds 64 frames; 200 frames need four passes
        let mut data = vec![0.0_f32; 200];
        renderer.render_interleaved(&mut data);
        assert_eq!(data, ramp);
    }

    #[test]
    fn test_underflow_fills_silence_and_drops_partial() {
        let (mut writers, mut renderer, shared) = setup(2, 1000);
        writers[0].write_samples(&[0.5; 8]);
        writers[1].write_samples(&[0.5; 3]);

        let mut left = vec![1.0_f32; 8];
        let mut right = vec![1.0_f32; 8];
        renderer.render_planar(&mut [left.as_mut_slice(), right.as_mut_slice()]);

        assert_eq!(left, vec![0.5; 8]);
        assert_eq!(right, vec![0.0; 8]);

        let report = shared.channel(1).drain(1, true, 2000.0);
        assert!(report.underflowed);
        assert_eq!(report.underflow_occupancy, 3 * SAMPLE_SIZE);
        assert_eq!(report.underflow_events, 1);
        assert!(!shared.channel(0).drain(0, true, 2000.0).underflowed);

        // The three stale samples are gone
        writers[1].write_samples(&[0.25; 8]);
        renderer.render_planar(&mut [left.as_mut_slice(), right.as_mut_slice()]);
        assert_eq!(right, vec![0.25; 8]);
    }

    #[test]
    fn test_measurement_published_after_window() {
        let (mut writers, mut renderer, shared) = setup(1, 4);
        let mut out = vec![0.0_f32; 16];

        // Keep three blocks queued ahead of each read
        writers[0].write_samples(&[0.1; 48]);
        for _ in 0..4 {
            writers[0].write_samples(&[0.1; 16]);
            renderer.render_planar(&mut [out.as_mut_slice()]);
        }

        let report = shared.channel(0).drain(0, true, 2000.0);
        assert_eq!(report.average_latency_frames, Some(64.0));
        assert_eq!(report.drift_ppm, None);
    }

    /// Queue `frames` on every channel and run one planar callback of `frames`
    fn steady_callback(writers: &mut [BridgeWriter], renderer: &mut DeviceRenderer, frames: usize) {
        for writer in writers.iter_mut() {
            writer.write_samples(&vec![0.1; frames]);
        }
        let mut outs = vec![vec![0.0_f32; frames]; writers.len()];
        let mut slices: Vec<&mut [f32]> = outs.iter_mut().map(|o| o.as_mut_slice()).collect();
        renderer.render_planar(&mut slices);
    }

    #[test]
    fn test_underflow_restarts_every_window() {
        let (mut writers, mut renderer, shared) = setup(2, 4);

        // One full window establishes the baseline on both channels
        for writer in writers.iter_mut() {
            writer.write_samples(&[0.1; 48]);
        }
        for _ in 0..4 {
            steady_callback(&mut writers, &mut renderer, 16);
        }
        for channel in 0..2 {
            let report = shared.channel(channel).drain(channel, true, 2000.0);
            assert_eq!(report.average_latency_frames, Some(64.0));
            assert_eq!(report.drift_ppm, None);
        }

        // Half of the next window
        steady_callback(&mut writers, &mut renderer, 16);
        steady_callback(&mut writers, &mut renderer, 16);

        // Channel 1 starves: 48 frames queued, 64 requested
        writers[0].write_samples(&[0.1; 16]);
        let mut left = vec![0.0_f32; 64];
        let mut right = vec![1.0_f32; 64];
        renderer.render_planar(&mut [left.as_mut_slice(), right.as_mut_slice()]);
        assert_eq!(right, vec![0.0; 64]);
        assert!(shared.channel(1).drain(1, true, 2000.0).underflowed);
        assert!(!shared.channel(0).drain(0, true, 2000.0).underflowed);

        // Four good callbacks only rebuild the baseline
        for writer in writers.iter_mut() {
            writer.write_samples(&[0.1; 48]);
        }
        for _ in 0..4 {
            steady_callback(&mut writers, &mut renderer, 16);
        }
        for channel in 0..2 {
            let report = shared.channel(channel).drain(channel, true, 2000.0);
            assert_eq!(report.average_latency_frames, Some(64.0));
            assert_eq!(report.drift_ppm, None, "channel {} kept a stale baseline", channel);
        }

        // The next window measures against the fresh baseline
        for _ in 0..4 {
            steady_callback(&mut writers, &mut renderer, 16);
        }
        assert_eq!(shared.channel(0).drain(0, true, 2000.0).drift_ppm, Some(0.0));
    }

    #[test]
    fn test_planar_buffers_of_unequal_length() {
        let (mut writers, mut renderer, _shared) = setup(2, 1000);
        writers[0].write_samples(&[0.5; 8]);
        writers[1].write_samples(&[0.25; 8]);

        // Frame count comes from the first buffer; a longer one is cut to it
        let mut left = vec![0.0_f32; 4];
        let mut right = vec![1.0_f32; 6];
        renderer.render_planar(&mut [left.as_mut_slice(), right.as_mut_slice()]);
        assert_eq!(left, vec![0.5; 4]);
        assert_eq!(&right[..4], &[0.25; 4]);
        assert_eq!(&right[4..], &[1.0; 2]);
    }

    #[test]
    fn test_zero_length_callback() {
        let (_writers, mut renderer, shared) = setup(1, 1);
        let mut out: Vec<f32> = Vec::new();

        renderer.render_planar(&mut [out.as_mut_slice()]);
        let report = shared.channel(0).drain(0, true, 2000.0);
        assert!(!report.underflowed);
        assert_eq!(report.average_latency_frames, None);
    }
}
