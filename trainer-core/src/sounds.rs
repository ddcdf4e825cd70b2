//! # Sound Bank Module
//!
//! Resolves symbolic cues to playable [`Sound`]s. Tones keyed by frequency are
//! synthesized when the bank is built; clicks, feedback and spoken interval
//! names come from WAV files in an optional sounds directory, with synthesized
//! fallbacks for everything except the spoken names.
//!
//! ## Asset files
//! - `click_high.wav`, `click_low.wav` - metronome accent and regular click
//! - `correct.wav`, `incorrect.wav` - feedback cues
//! - `<interval_name>.wav` - spoken name, e.g. `perfect_fifth.wav`

use crate::intervals::TrialSpec;
use crate::playback::Sound;
use crate::tuning;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::f32::consts::PI;
use std::path::{Path, PathBuf};

/// Length of reference and interval tones.
pub const TONE_DURATION_MS: u32 = 600;
/// Peak amplitude of reference and interval tones.
pub const TONE_VOLUME: f32 = 0.1;

pub const CLICK_DURATION_MS: u32 = 50;
pub const CLICK_AMPLITUDE: f32 = 0.8;
/// Exponential decay rate of a click, per second.
pub const CLICK_DECAY: f32 = 60.0;
pub const ACCENT_CLICK_HZ: f32 = 1600.0;
pub const REGULAR_CLICK_HZ: f32 = 1000.0;

/// Symbolic name of a playable cue.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Cue {
    /// Reference tone at the session tonic.
    Tonic,
    /// Tone `n` semitones above the tonic.
    Interval(i32),
    /// Spoken name of an interval, by label.
    IntervalName(String),
    Correct,
    Incorrect,
    AccentClick,
    RegularClick,
}

/// Resolves cues to sounds. `None` means the cue is unavailable and is skipped.
pub trait SoundStore: Send + Sync {
    fn resolve(&self, cue: &Cue) -> Option<Sound>;
}

/// Sine tone with short linear fades to avoid clicks at the edges.
pub fn sine_tone(frequency: f32, duration_ms: u32, volume: f32, sample_rate: u32) -> Vec<f32> {
    let len = (sample_rate as u64 * duration_ms as u64 / 1000) as usize;
    let fade = (sample_rate as usize / 200).min(len / 2).max(1);
    (0..len)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            let envelope = (i.min(len - 1 - i) as f32 / fade as f32).min(1.0);
            volume * envelope * (2.0 * PI * frequency * t).sin()
        })
        .collect()
}

/// Short sine burst with an exponential decay envelope.
pub fn click_burst(frequency: f32, sample_rate: u32) -> Vec<f32> {
    let len = (sample_rate as u64 * CLICK_DURATION_MS as u64 / 1000) as usize;
    (0..len)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            CLICK_AMPLITUDE * (-CLICK_DECAY * t).exp() * (2.0 * PI * frequency * t).sin()
        })
        .collect()
}

/// Writes a click burst as a 16-bit mono PCM WAV file.
pub fn write_click_wav(path: impl AsRef<Path>, frequency: f32, sample_rate: u32) -> Result<()> {
    let path = path.as_ref();
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("creating {}", path.display()))?;
    for sample in click_burst(frequency, sample_rate) {
        writer.write_sample((sample * i16::MAX as f32) as i16)?;
    }
    writer.finalize()?;
    log::info!("Saved {}", path.display());
    Ok(())
}

/// Reads a WAV file as mono `f32`, averaging channels.
pub fn load_wav(path: impl AsRef<Path>) -> Result<Sound> {
    let path = path.as_ref();
    let mut reader =
        hound::WavReader::open(path).with_context(|| format!("opening {}", path.display()))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;
    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|s| s as f32 / scale))
                .collect::<Result<_, _>>()?
        }
    };
    let mono = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect();
    Ok(Sound::new(mono, spec.sample_rate))
}

/// All cues for one session, prepared up front.
#[derive(Debug, Clone)]
pub struct SoundBank {
    sample_rate: u32,
    tonic: Sound,
    intervals: HashMap<i32, Sound>,
    names: HashMap<String, Sound>,
    correct: Sound,
    incorrect: Sound,
    accent_click: Sound,
    regular_click: Sound,
}

impl SoundBank {
    /// Builds the bank for `intervals` at `tonic_frequency`.
    ///
    /// Files in `sounds_dir` that cannot be read, or whose sample rate differs
    /// from `sample_rate`, are skipped with a warning.
    pub fn new(
        sample_rate: u32,
        tonic_frequency: f32,
        intervals: &[TrialSpec],
        sounds_dir: Option<&Path>,
    ) -> Self {
        let tone = |frequency: f32| {
            Sound::new(sine_tone(frequency, TONE_DURATION_MS, TONE_VOLUME, sample_rate), sample_rate)
        };
        let load = |file: &str| -> Option<Sound> {
            let path: PathBuf = sounds_dir?.join(file);
            if !path.exists() {
                return None;
            }
            match load_wav(&path) {
                Ok(sound) if sound.sample_rate() == sample_rate => Some(sound),
                Ok(sound) => {
                    log::warn!(
                        "Skipping {}: {} Hz does not match output rate {} Hz",
                        path.display(),
                        sound.sample_rate(),
                        sample_rate
                    );
                    None
                }
                Err(e) => {
                    log::warn!("Skipping {}: {:#}", path.display(), e);
                    None
                }
            }
        };

        let intervals_map = intervals
            .iter()
            .map(|spec| {
                let frequency = tuning::interval_frequency(tonic_frequency, spec.semitone_offset);
                (spec.semitone_offset, tone(frequency))
            })
            .collect();
        let names = intervals
            .iter()
            .filter_map(|spec| {
                let sound = load(&format!("{}.wav", spec.cue_stem()));
                if sound.is_none() {
                    log::warn!("No name cue for {}", spec.label);
                }
                sound.map(|sound| (spec.label.clone(), sound))
            })
            .collect();

        Self {
            sample_rate,
            tonic: tone(tonic_frequency),
            intervals: intervals_map,
            names,
            correct: load("correct.wav").unwrap_or_else(|| {
                Sound::new(sine_tone(880.0, 150, 0.3, sample_rate), sample_rate)
            }),
            incorrect: load("incorrect.wav").unwrap_or_else(|| {
                Sound::new(sine_tone(220.0, 300, 0.3, sample_rate), sample_rate)
            }),
            accent_click: load("click_high.wav")
                .unwrap_or_else(|| Sound::new(click_burst(ACCENT_CLICK_HZ, sample_rate), sample_rate)),
            regular_click: load("click_low.wav")
                .unwrap_or_else(|| Sound::new(click_burst(REGULAR_CLICK_HZ, sample_rate), sample_rate)),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl SoundStore for SoundBank {
    fn resolve(&self, cue: &Cue) -> Option<Sound> {
        match cue {
            Cue::Tonic => Some(self.tonic.clone()),
            Cue::Interval(semitones) => self.intervals.get(semitones).cloned(),
            Cue::IntervalName(label) => self.names.get(label).cloned(),
            Cue::Correct => Some(self.correct.clone()),
            Cue::Incorrect => Some(self.incorrect.clone()),
            Cue::AccentClick => Some(self.accent_click.clone()),
            Cue::RegularClick => Some(self.regular_click.clone()),
        }
    }
}
