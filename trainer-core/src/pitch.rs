//! # Pitch Detection Module
//!
//! This module implements the YIN fundamental-frequency estimator used to score
//! the user's sung or played note.
//!
//! ## Features
//! - Full-overlap difference function
//! - Cumulative mean normalized difference with an absolute threshold
//! - Earliest-candidate lag selection (never the global minimum)
//! - Parabolic interpolation for sub-sample accuracy
//! - Frequency band rejection
//!
//! The estimator runs once per captured frame, so [`YinDetector`] keeps its
//! scratch buffer between calls and only grows it when a longer frame arrives.

use crate::error::ConfigError;

/// Default absolute threshold on the normalized difference function.
pub const DEFAULT_THRESHOLD: f32 = 0.15;
/// Default lower bound of the accepted frequency band in Hz.
pub const DEFAULT_MIN_FREQUENCY: f32 = 50.0;
/// Default upper bound of the accepted frequency band in Hz.
pub const DEFAULT_MAX_FREQUENCY: f32 = 1000.0;

/// Tunable parameters of the YIN estimator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct YinParams {
    /// Number of samples analysed. `None` uses the whole frame.
    pub window_len: Option<usize>,
    /// Absolute threshold in (0, 1).
    pub threshold: f32,
    /// Lowest frequency accepted, in Hz.
    pub min_frequency: f32,
    /// Highest frequency accepted, in Hz.
    pub max_frequency: f32,
}

impl Default for YinParams {
    fn default() -> Self {
        Self {
            window_len: None,
            threshold: DEFAULT_THRESHOLD,
            min_frequency: DEFAULT_MIN_FREQUENCY,
            max_frequency: DEFAULT_MAX_FREQUENCY,
        }
    }
}

impl YinParams {
    /// Rejects a threshold outside (0, 1) or an empty or non-finite band.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.threshold > 0.0 && self.threshold < 1.0) {
            return Err(ConfigError::InvalidThreshold(self.threshold));
        }
        let (min, max) = (self.min_frequency, self.max_frequency);
        if !(min > 0.0 && min < max && max.is_finite()) {
            return Err(ConfigError::InvalidBand { min, max });
        }
        Ok(())
    }
}

/// A reusable YIN estimator with a pre-sized scratch buffer.
#[derive(Debug, Clone)]
pub struct YinDetector {
    params: YinParams,
    sample_rate: u32,
    yin_buffer: Vec<f32>,
}

impl YinDetector {
    /// Creates a detector for frames of roughly `frame_len` samples.
    ///
    /// The scratch buffer is allocated here so that frames up to `frame_len`
    /// never allocate on the processing path.
    pub fn new(sample_rate: u32, frame_len: usize, params: YinParams) -> Self {
        Self {
            params,
            sample_rate,
            yin_buffer: vec![0.0; frame_len / 2],
        }
    }

    pub fn params(&self) -> &YinParams {
        &self.params
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Estimates the fundamental frequency of `signal`.
    ///
    /// # Returns
    /// * `Some(frequency)` - Detected frequency in Hz, inside the configured band
    /// * `None` - No lag fell under the threshold, or the estimate was out of band
    pub fn detect(&mut self, signal: &[f32]) -> Option<f32> {
        let window_len = self
            .params
            .window_len
            .map_or(signal.len(), |w| w.min(signal.len()));
        let signal = &signal[..window_len];
        let half = window_len / 2;
        if half < 2 {
            return None;
        }
        if self.yin_buffer.len() < half {
            self.yin_buffer.resize(half, 0.0);
        }
        let yin_buffer = &mut self.yin_buffer[..half];

        // --- Step 1: Difference function over the full overlap ---
        yin_buffer[0] = 1.0;
        for tau in 1..half {
            yin_buffer[tau] = signal[..window_len - tau]
                .iter()
                .zip(&signal[tau..])
                .map(|(a, b)| {
                    let delta = a - b;
                    delta * delta
                })
                .sum();
        }

        // --- Step 2: Cumulative mean normalized difference ---
        let mut running_sum = 0.0;
        for tau in 1..half {
            running_sum += yin_buffer[tau];
            if running_sum != 0.0 {
                yin_buffer[tau] *= tau as f32 / running_sum;
            } else {
                yin_buffer[tau] = 1.0;
            }
        }

        // --- Step 3: First lag under the absolute threshold ---
        let tau = (1..half).find(|&tau| yin_buffer[tau] < self.params.threshold)?;

        // --- Step 4: Parabolic interpolation ---
        let refined_tau = if tau + 1 < half {
            let y0 = yin_buffer[tau - 1];
            let y1 = yin_buffer[tau];
            let y2 = yin_buffer[tau + 1];
            let denominator = 2.0 * (2.0 * y1 - y2 - y0);
            if denominator != 0.0 {
                tau as f32 + (y2 - y0) / denominator
            } else {
                tau as f32
            }
        } else {
            tau as f32
        };

        // --- Step 5: Lag to frequency, then band check ---
        let frequency = self.sample_rate as f32 / refined_tau;
        if frequency.is_finite()
            && frequency >= self.params.min_frequency
            && frequency <= self.params.max_frequency
        {
            Some(frequency)
        } else {
            None
        }
    }
}

/// One-shot YIN estimate that allocates its own scratch space.
///
/// Prefer [`YinDetector`] on the capture path.
pub fn detect_pitch_yin(signal: &[f32], sample_rate: u32, params: YinParams) -> Option<f32> {
    YinDetector::new(sample_rate, signal.len(), params).detect(signal)
}
