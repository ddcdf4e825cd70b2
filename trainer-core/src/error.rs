//! Error types for session setup and audio device access.
//!
//! Everything that can go wrong once a session is running is contained where it
//! happens (a dropped frame, a skipped cue, a failed subscriber); only the
//! errors below ever reach the caller.

use thiserror::Error;

/// A session configuration that must be rejected before anything starts.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("bpm must give a beat between 1 ms and one hour, got {0}")]
    InvalidBpm(f32),

    #[error("beats per bar must be at least 1")]
    InvalidBeatsPerBar,

    #[error("one bar would last {0:?}, longer than the supported limit")]
    BarTooLong(std::time::Duration),

    #[error("tonic frequency must be positive, got {0} Hz")]
    InvalidTonic(f32),

    #[error("tolerance must not be negative, got {0} cents")]
    InvalidTolerance(f32),

    #[error("repeats must be at least 1")]
    InvalidRepeats,

    #[error("YIN threshold must lie in (0, 1), got {0}")]
    InvalidThreshold(f32),

    #[error("frequency band {min} Hz..{max} Hz is empty")]
    InvalidBand { min: f32, max: f32 },

    #[error("frame duration must lie in (0, 1000] ms, got {0} ms")]
    InvalidFrameDuration(f32),

    #[error("grace period must be a non-negative number of seconds within the supported limit, got {0}")]
    InvalidGrace(f32),

    #[error("no intervals selected")]
    NoIntervals,

    #[error("unknown interval `{0}`")]
    UnknownInterval(String),

    #[error("unknown note name `{0}`")]
    UnknownNote(String),
}

/// Failures while opening an audio device.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("no {0} device available")]
    NoDevice(&'static str),

    #[error("no {kind} device matching `{name}`")]
    DeviceNotFound { kind: &'static str, name: String },

    #[error("no suitable f32 {0} format found")]
    NoSupportedFormat(&'static str),

    #[error("failed to query device configurations: {0}")]
    Configs(#[from] cpal::SupportedStreamConfigsError),

    #[error("failed to build audio stream: {0}")]
    Build(#[from] cpal::BuildStreamError),

    #[error("failed to start audio stream: {0}")]
    Play(#[from] cpal::PlayStreamError),

    #[error("failed to enumerate devices: {0}")]
    Devices(#[from] cpal::DevicesError),

    #[error("failed to read device name: {0}")]
    Name(#[from] cpal::DeviceNameError),
}
