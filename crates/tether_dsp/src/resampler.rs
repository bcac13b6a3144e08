//! Streaming Sample-Rate Adapter
//!
//! Converts one channel from a source rate to `target_rate * (1 + drift)`,
//! block by block, keeping the fractional read position and the last few
//! input samples between calls so that block boundaries are inaudible.
//!
//! # Algorithm
//!
//! 4-point Catmull-Rom interpolation over a virtual buffer made of the
//! previous block's last three samples followed by the current block:
//!
//! ```text
//!   history[0..3] | input[0..n]
//!        ^ position walks forward by `step` input frames per output frame
//! ```
//!
//! After a block the position is rebased by `n`, so it always stays in
//! `[1, 1 + step)` at the start of a call.
//!
//! There is no anti-alias filter. When the target rate is below the source
//! rate, content between the two Nyquist frequencies folds back into the
//! audible band (22.05-24 kHz at 48k -> 44.1k). Producers feeding a lower
//! device rate should keep that band empty.

use crate::error::DspError;

/// Default bound on the drift correction, in parts per million
pub const DEFAULT_MAX_DRIFT_PPM: f64 = 2000.0;

/// Extra output frames callers must reserve on top of the nominal ratio
pub const INTERPOLATION_MARGIN: usize = 2;

/// Samples carried over from the previous block
const HISTORY: usize = 3;

/// Per-channel streaming resampler
///
/// # Real-time Safety
///
/// `process`, `set_drift_factor`, `set_drift_ppm` and `set_target_rate` never
/// allocate and run in constant time (or O(n) in the block length).
#[derive(Debug, Clone)]
pub struct Resampler {
    source_rate: f64,
    target_rate: f64,
    drift_factor: f64,
    max_drift_factor: f64,
    /// Input frames consumed per output frame
    step: f64,
    /// Read position in history+input coordinates
    position: f64,
    history: [f32; HISTORY],
}

impl Resampler {
    /// Create a resampler with the default ±2000 ppm drift bound
    pub fn new(source_rate: f64, target_rate: f64) -> Result<Self, DspError> {
        Self::with_drift_limit(source_rate, target_rate, DEFAULT_MAX_DRIFT_PPM)
    }

    /// Create a resampler with a custom drift bound (in ppm)
    pub fn with_drift_limit(
        source_rate: f64,
        target_rate: f64,
        max_drift_ppm: f64,
    ) -> Result<Self, DspError> {
        validate_rate(source_rate)?;
        validate_rate(target_rate)?;
        if !(0.0..1e6).contains(&max_drift_ppm) {
            return Err(DspError::InvalidDriftLimit(max_drift_ppm));
        }

        let mut resampler = Self {
            source_rate,
            target_rate,
            drift_factor: 0.0,
            max_drift_factor: max_drift_ppm * 1e-6,
            step: 1.0,
            position: 1.0,
            history: [0.0; HISTORY],
        };
        resampler.update_step();
        Ok(resampler)
    }

    pub fn source_rate(&self) -> f64 {
        self.source_rate
    }

    pub fn target_rate(&self) -> f64 {
        self.target_rate
    }

    /// Current drift correction (fractional, e.g. 0.0001 = 100 ppm)
    pub fn drift_factor(&self) -> f64 {
        self.drift_factor
    }

    pub fn max_drift_factor(&self) -> f64 {
        self.max_drift_factor
    }

    /// Output frames produced per input frame, drift included
    pub fn ratio(&self) -> f64 {
        1.0 / self.step
    }

    /// Change the nominal output rate
    ///
    /// Buffers sized with [`Resampler::max_output_frames`] must be re-sized
    /// after raising the target rate.
    pub fn set_target_rate(&mut self, target_rate: f64) -> Result<(), DspError> {
        validate_rate(target_rate)?;
        self.target_rate = target_rate;
        self.update_step();
        Ok(())
    }

    /// Set the drift correction factor, clamped to the configured bound
    ///
    /// Returns `true` when the requested value had to be clamped. A
    /// non-finite request counts as clamped and resets the factor to zero.
    pub fn set_drift_factor(&mut self, factor: f64) -> bool {
        if !factor.is_finite() {
            self.drift_factor = 0.0;
            self.update_step();
            return true;
        }

        let clamped = factor.clamp(-self.max_drift_factor, self.max_drift_factor);
        self.drift_factor = clamped;
        self.update_step();
        clamped != factor
    }

    /// Same as [`Resampler::set_drift_factor`], expressed in ppm
    pub fn set_drift_ppm(&mut self, ppm: f64) -> bool {
        self.set_drift_factor(ppm * 1e-6)
    }

    /// Upper bound on the frames one `process` call can emit for `input_frames`
    ///
    /// Accounts for the largest drift factor the resampler accepts, so it
    /// stays valid whatever correction is applied later.
    pub fn max_output_frames(&self, input_frames: usize) -> usize {
        let max_ratio = self.target_rate * (1.0 + self.max_drift_factor) / self.source_rate;
        (input_frames as f64 * max_ratio).ceil() as usize + INTERPOLATION_MARGIN
    }

    /// Forget all history and restart at phase zero
    pub fn reset(&mut self) {
        self.position = 1.0;
        self.history = [0.0; HISTORY];
    }

    /// Resample one block
    ///
    /// Writes into `output` and returns the number of frames written. The
    /// output should hold at least `max_output_frames(input.len())` frames;
    /// frames that do not fit are skipped without breaking phase continuity.
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) -> usize {
        let n = input.len();
        if n == 0 {
            return 0;
        }

        let end = (n + 1) as f64;
        let mut position = self.position;
        let mut produced = 0;

        while position < end && produced < output.len() {
            let index = position as usize;
            let frac = (position - index as f64) as f32;

            output[produced] = catmull_rom(
                self.sample_at(input, index - 1),
                self.sample_at(input, index),
                self.sample_at(input, index + 1),
                self.sample_at(input, index + 2),
                frac,
            );
            produced += 1;
            position += self.step;
        }

        if position < end {
            // Output too small: skip the frames that did not fit
            let skipped = ((end - position) / self.step).ceil();
            position += skipped * self.step;
        }

        let mut history = [0.0; HISTORY];
        for (offset, slot) in history.iter_mut().enumerate() {
            *slot = self.sample_at(input, n + offset);
        }
        self.history = history;
        self.position = position - n as f64;

        produced
    }

    #[inline]
    fn sample_at(&self, input: &[f32], index: usize) -> f32 {
        if index < HISTORY {
            self.history[index]
        } else {
            input[index - HISTORY]
        }
    }

    fn update_step(&mut self) {
        self.step = self.source_rate / (self.target_rate * (1.0 + self.drift_factor));
    }
}

fn validate_rate(rate: f64) -> Result<(), DspError> {
    if rate.is_finite() && rate > 0.0 {
        Ok(())
    } else {
        Err(DspError::InvalidSampleRate(rate))
    }
}

#[inline]
fn catmull_rom(y0: f32, y1: f32, y2: f32, y3: f32, x: f32) -> f32 {
    let c1 = 0.5 * (y2 - y0);
    let c2 = y0 - 2.5 * y1 + 2.0 * y2 - 0.5 * y3;
    let c3 = 0.5 * (y3 - y0) + 1.5 * (y1 - y2);
    ((c3 * x + c2) * x + c1) * x + y1
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Push `blocks` blocks of `block` frames through and count the output
    fn run_blocks(resampler: &mut Resampler, block: usize, blocks: usize) -> usize {
        let input = vec![0.25_f32; block];
        let mut output = vec![0.0_f32; resampler.max_output_frames(block)];
        (0..blocks)
            .map(|_| resampler.process(&input, &mut output))
            .sum()
    }

    #[test]
    fn test_invalid_rates_rejected() {
        assert!(matches!(
            Resampler::new(0.0, 48000.0),
            Err(DspError::InvalidSampleRate(_))
        ));
        assert!(Resampler::new(48000.0, f64::NAN).is_err());
        assert!(Resampler::with_drift_limit(48000.0, 48000.0, -1.0).is_err());

        let mut resampler = Resampler::new(48000.0, 48000.0).unwrap();
        assert!(resampler.set_target_rate(-44100.0).is_err());
        assert_eq!(resampler.target_rate(), 48000.0);
    }

    #[test]
    fn test_ratio_converges_for_rate_pairs() {
        let pairs = [
            (48000.0, 44100.0),
            (44100.0, 48000.0),
            (48000.0, 96000.0),
            (96000.0, 44100.0),
            (48000.0, 48000.0),
        ];

        for (source, target) in pairs {
            for drift_ppm in [0.0, 1000.0, -500.0] {
                let mut resampler = Resampler::new(source, target).unwrap();
                resampler.set_drift_ppm(drift_ppm);

                let total_in = 128 * 1000;
                let total_out = run_blocks(&mut resampler, 128, 1000);
                let expected = total_in as f64 * target / source * (1.0 + drift_ppm * 1e-6);

                assert!(
                    (total_out as f64 - expected).abs() <= 2.0,
                    "{} -> {} @ {} ppm: got {}, expected {:.1}",
                    source,
                    target,
                    drift_ppm,
                    total_out,
                    expected
                );
            }
        }
    }

    #[test]
    fn test_output_never_exceeds_max() {
        let mut resampler = Resampler::new(44100.0, 48000.0).unwrap();
        resampler.set_drift_ppm(2000.0);

        for block in [1, 2, 3, 7, 64, 127, 128, 480, 1024] {
            let input = vec![0.0_f32; block];
            let max = resampler.max_output_frames(block);
            let mut output = vec![0.0_f32; max + 16];
            for _ in 0..50 {
                let produced = resampler.process(&input, &mut output);
                assert!(produced <= max, "block {}: {} > {}", block, produced, max);
            }
        }
    }

    #[test]
    fn test_same_rate_is_delayed_passthrough() {
        let mut resampler = Resampler::new(48000.0, 48000.0).unwrap();
        let input: Vec<f32> = (1..=8).map(|i| i as f32).collect();
        let mut output = vec![0.0_f32; 16];

        let produced = resampler.process(&input, &mut output);
        assert_eq!(produced, 8);
        // Two frames of interpolation latency
        assert_eq!(&output[..8], &[0.0, 0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

        let produced = resampler.process(&[9.0, 10.0], &mut output);
        assert_eq!(produced, 2);
        assert_eq!(&output[..2], &[7.0, 8.0]);
    }

    #[test]
    fn test_block_splitting_matches_single_pass() {
        let signal: Vec<f32> = (0..1000).map(|i| (i as f32 * 0.01).sin()).collect();

        let mut whole = Resampler::new(48000.0, 44100.0).unwrap();
        let mut expected = vec![0.0_f32; whole.max_output_frames(signal.len())];
        let n = whole.process(&signal, &mut expected);
        expected.truncate(n);

        let mut split = Resampler::new(48000.0, 44100.0).unwrap();
        let mut actual = Vec::new();
        let mut scratch = vec![0.0_f32; split.max_output_frames(128)];
        for block in signal.chunks(37) {
            let n = split.process(block, &mut scratch);
            actual.extend_from_slice(&scratch[..n]);
        }

        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(&expected) {
            assert!((a - e).abs() < 1e-4);
        }
    }

    #[test]
    fn test_sine_has_no_discontinuities_across_drift_changes() {
        let source = 48000.0;
        let target = 44100.0;
        let freq = 1000.0;
        let mut resampler = Resampler::new(source, target).unwrap();
        let mut output = vec![0.0_f32; resampler.max_output_frames(128)];
        let mut phase = 0.0_f64;
        let mut previous: Option<f32> = None;
        // Largest step between consecutive samples of a unit sine at the output rate
        let max_delta = (2.0 * std::f64::consts::PI * freq / target) as f32 * 1.05;

        for block_index in 0..400 {
            if block_index % 50 == 25 {
                let ppm = if block_index % 100 == 25 { 1500.0 } else { -1500.0 };
                resampler.set_drift_ppm(ppm);
            }

            let input: Vec<f32> = (0..128)
                .map(|_| {
                    let s = phase.sin() as f32;
                    phase += 2.0 * std::f64::consts::PI * freq / source;
                    s
                })
                .collect();

            let n = resampler.process(&input, &mut output);
            for &sample in &output[..n] {
                if let Some(prev) = previous {
                    // Skip the start-up ramp out of zero history
                    if block_index > 0 {
                        assert!((sample - prev).abs() <= max_delta);
                    }
                }
                previous = Some(sample);
            }
        }
    }

    #[test]
    fn test_drift_factor_is_clamped() {
        let mut resampler = Resampler::new(48000.0, 48000.0).unwrap();

        assert!(!resampler.set_drift_ppm(150.0));
        assert!((resampler.drift_factor() - 150e-6).abs() < 1e-12);

        assert!(resampler.set_drift_ppm(5000.0));
        assert_eq!(resampler.drift_factor(), resampler.max_drift_factor());

        assert!(resampler.set_drift_ppm(-5000.0));
        assert_eq!(resampler.drift_factor(), -resampler.max_drift_factor());

        assert!(resampler.set_drift_factor(f64::NAN));
        assert_eq!(resampler.drift_factor(), 0.0);
    }

    #[test]
    fn test_non_finite_drift_is_reported_and_reset() {
        let mut resampler = Resampler::new(48000.0, 44100.0).unwrap();
        let nominal = resampler.ratio();

        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            resampler.set_drift_ppm(500.0);
            assert!(resampler.set_drift_factor(bad), "{} not reported", bad);
            assert_eq!(resampler.drift_factor(), 0.0);
            assert!((resampler.ratio() - nominal).abs() < 1e-15);
        }

        assert!(resampler.set_drift_ppm(f64::NAN));
        assert!(!resampler.set_drift_factor(0.0));
    }

    #[test]
    fn test_small_output_keeps_phase() {
        let mut resampler = Resampler::new(48000.0, 48000.0).unwrap();
        let mut tiny = [0.0_f32; 2];
        assert_eq!(resampler.process(&[1.0; 8], &mut tiny), 2);

        // Frames that did not fit are dropped, the next block continues in step
        let mut output = [0.0_f32; 8];
        assert_eq!(resampler.process(&[1.0; 8], &mut output), 8);
    }

    #[test]
    fn test_reset_clears_history() {
        let mut resampler = Resampler::new(48000.0, 48000.0).unwrap();
        let mut output = [0.0_f32; 8];
        resampler.process(&[1.0; 8], &mut output);

        resampler.reset();
        resampler.process(&[1.0; 4], &mut output);
        assert_eq!(output[0], 0.0);
    }

    #[test]
    fn test_empty_input() {
        let mut resampler = Resampler::new(44100.0, 48000.0).unwrap();
        let mut output = [0.0_f32; 4];
        assert_eq!(resampler.process(&[], &mut output), 0);
    }
}
