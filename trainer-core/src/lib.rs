// trainer-core/src/lib.rs

//! The core logic for the beat-synchronized interval ear trainer.
//! This crate is responsible for pitch detection, note mapping, the beat
//! clock, per-trial detection sessions and the trial scheduler. Audio
//! hardware sits behind the capture and playback traits, so everything except
//! the [`audio`] adapters runs headless in tests.

pub mod audio;
pub mod cancel;
pub mod capture;
pub mod clock;
pub mod config;
pub mod detection;
pub mod error;
pub mod intervals;
pub mod pitch;
pub mod playback;
pub mod scheduler;
pub mod sounds;
pub mod status;
pub mod tuning;

pub use cancel::CancelToken;
pub use capture::{CaptureSource, CaptureSubscription, FrameBus};
pub use clock::{BeatClock, BeatEvent, BeatState, BeatWatch, ClockHandle};
pub use config::{DetectionConfig, SessionConfig};
pub use detection::{DetectionResult, DetectionSession};
pub use error::{AudioError, ConfigError};
pub use intervals::TrialSpec;
pub use playback::{Channel, Mixer, PlaybackSink, Sound};
pub use scheduler::{SessionReport, TrialOutcome, TrialScheduler};
pub use sounds::{Cue, SoundBank, SoundStore};
pub use status::{LogStatus, StatusSink};
