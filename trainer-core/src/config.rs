//! Session configuration.
//!
//! A [`SessionConfig`] is read once (defaults, then an optional JSON file, then
//! command-line overrides), validated, and never changed while a session runs.

use crate::clock::{self, MAX_SPAN};
use crate::error::ConfigError;
use crate::pitch::{DEFAULT_MAX_FREQUENCY, DEFAULT_MIN_FREQUENCY, DEFAULT_THRESHOLD, YinParams};
use crate::tuning;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

/// Longest capture frame accepted, in milliseconds.
pub const MAX_FRAME_DURATION_MS: f32 = 1000.0;

/// Settings for the per-frame pitch detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub yin_threshold: f32,
    pub min_frequency_hz: f32,
    pub max_frequency_hz: f32,
    /// Capture frame length in milliseconds.
    pub frame_duration_ms: f32,
    /// Slack added to one bar to form the detection timeout.
    pub grace_seconds: f32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            yin_threshold: DEFAULT_THRESHOLD,
            min_frequency_hz: DEFAULT_MIN_FREQUENCY,
            max_frequency_hz: DEFAULT_MAX_FREQUENCY,
            frame_duration_ms: 30.0,
            grace_seconds: 2.0,
        }
    }
}

impl DetectionConfig {
    pub fn yin_params(&self) -> YinParams {
        YinParams {
            window_len: None,
            threshold: self.yin_threshold,
            min_frequency: self.min_frequency_hz,
            max_frequency: self.max_frequency_hz,
        }
    }

    /// Number of samples in one capture frame at `sample_rate`.
    pub fn frame_len(&self, sample_rate: u32) -> usize {
        (sample_rate as f32 * self.frame_duration_ms / 1000.0) as usize
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub bpm: f32,
    pub beats_per_bar: u32,
    pub tonic_frequency_hz: f32,
    pub tolerance_cents: f32,
    pub repeats: u32,
    pub detection: DetectionConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            bpm: 60.0,
            beats_per_bar: 4,
            tonic_frequency_hz: 440.0,
            tolerance_cents: 50.0,
            repeats: 1,
            detection: DetectionConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Loads a configuration from a JSON file. Missing fields keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut file =
            File::open(path).with_context(|| format!("opening config {}", path.display()))?;
        let mut data = String::new();
        file.read_to_string(&mut data)?;
        let config: SessionConfig = serde_json::from_str(&data)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// Sets the tonic from a note name such as `"A4"` or `"Bb3"`.
    pub fn with_tonic_note(mut self, name: &str) -> Result<Self, ConfigError> {
        self.tonic_frequency_hz =
            tuning::note_frequency(name).ok_or_else(|| ConfigError::UnknownNote(name.to_string()))?;
        Ok(self)
    }

    /// Rejects anything a session cannot run with, including tempos and grace
    /// periods whose durations fall outside `MIN_BEAT_PERIOD..=MAX_SPAN`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let period = clock::checked_beat_period(self.bpm).ok_or(ConfigError::InvalidBpm(self.bpm))?;
        if self.beats_per_bar == 0 {
            return Err(ConfigError::InvalidBeatsPerBar);
        }
        match period.checked_mul(self.beats_per_bar) {
            Some(bar) if bar <= MAX_SPAN => {}
            bar => return Err(ConfigError::BarTooLong(bar.unwrap_or(Duration::MAX))),
        }
        if !(self.tonic_frequency_hz > 0.0 && self.tonic_frequency_hz.is_finite()) {
            return Err(ConfigError::InvalidTonic(self.tonic_frequency_hz));
        }
        if !(self.tolerance_cents >= 0.0) {
            return Err(ConfigError::InvalidTolerance(self.tolerance_cents));
        }
        if self.repeats == 0 {
            return Err(ConfigError::InvalidRepeats);
        }
        let detection = &self.detection;
        detection.yin_params().validate()?;
        if !(detection.frame_duration_ms > 0.0 && detection.frame_duration_ms <= MAX_FRAME_DURATION_MS) {
            return Err(ConfigError::InvalidFrameDuration(detection.frame_duration_ms));
        }
        let grace_fits = Duration::try_from_secs_f32(detection.grace_seconds)
            .is_ok_and(|grace| grace <= MAX_SPAN);
        if !grace_fits {
            return Err(ConfigError::InvalidGrace(detection.grace_seconds));
        }
        Ok(())
    }

    /// Time between two beats.
    pub fn beat_period(&self) -> Duration {
        clock::beat_period(self.bpm)
    }

    /// Time of one full bar; also the listening window of a trial.
    pub fn bar_duration(&self) -> Duration {
        self.beat_period().saturating_mul(self.beats_per_bar).min(MAX_SPAN)
    }

    /// Overall bound on waiting for a detection result.
    pub fn detection_timeout(&self) -> Duration {
        let grace = Duration::try_from_secs_f32(self.detection.grace_seconds.max(0.0))
            .unwrap_or(MAX_SPAN)
            .min(MAX_SPAN);
        self.bar_duration() + grace
    }
}
