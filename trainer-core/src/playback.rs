//! # Playback Module
//!
//! Cues are played on independent channels partitioned by purpose, so a click
//! never cuts off a prompt and feedback never cuts off an interval tone.
//! Playing on a busy channel replaces whatever that channel was playing.
//!
//! [`Mixer`] implements [`PlaybackSink`] in memory and renders all channels
//! into an interleaved output buffer; the cpal adapter in [`crate::audio`]
//! pulls from it inside the output callback.

use parking_lot::Mutex;
use std::sync::Arc;

/// A decoded mono sound. Cloning shares the samples.
#[derive(Debug, Clone, PartialEq)]
pub struct Sound {
    samples: Arc<[f32]>,
    sample_rate: u32,
}

impl Sound {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn duration_secs(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// Output channels, one per cue purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Metronome,
    Interval,
    Feedback,
    Prompt,
}

impl Channel {
    pub const ALL: [Channel; 4] = [
        Channel::Metronome,
        Channel::Interval,
        Channel::Feedback,
        Channel::Prompt,
    ];

    fn index(self) -> usize {
        match self {
            Channel::Metronome => 0,
            Channel::Interval => 1,
            Channel::Feedback => 2,
            Channel::Prompt => 3,
        }
    }
}

/// Multi-channel output.
pub trait PlaybackSink: Send + Sync {
    /// Starts `sound` on `channel`, replacing anything already playing there.
    fn play(&self, channel: Channel, sound: &Sound);

    /// Whether `channel` still has samples left to play.
    fn is_playing(&self, channel: Channel) -> bool;

    /// Silences every channel.
    fn stop_all(&self);
}

#[derive(Debug, Default, Clone)]
struct Voice {
    sound: Option<Sound>,
    position: usize,
}

impl Voice {
    fn is_active(&self) -> bool {
        self.sound
            .as_ref()
            .is_some_and(|sound| self.position < sound.samples().len())
    }
}

/// Software mixer over the four playback channels.
#[derive(Debug, Default)]
pub struct Mixer {
    voices: Mutex<[Voice; 4]>,
}

impl Mixer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mixes the next `output.len() / channels` frames into `output`,
    /// duplicating the mono mix across `channels` interleaved output channels.
    ///
    /// Never blocks: if a cue is being swapped in at this instant the buffer is
    /// filled with silence for this period.
    pub fn render(&self, output: &mut [f32], channels: usize) {
        output.fill(0.0);
        let channels = channels.max(1);
        let Some(mut voices) = self.voices.try_lock() else {
            return;
        };
        for voice in voices.iter_mut() {
            let Some(sound) = voice.sound.as_ref() else {
                continue;
            };
            let samples = sound.samples();
            for frame in output.chunks_mut(channels) {
                let Some(sample) = samples.get(voice.position) else {
                    break;
                };
                for out in frame.iter_mut() {
                    *out += sample;
                }
                voice.position += 1;
            }
            if voice.position >= samples.len() {
                voice.sound = None;
                voice.position = 0;
            }
        }
        for sample in output.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }
    }
}

impl PlaybackSink for Mixer {
    fn play(&self, channel: Channel, sound: &Sound) {
        let mut voices = self.voices.lock();
        voices[channel.index()] = Voice {
            sound: Some(sound.clone()),
            position: 0,
        };
    }

    fn is_playing(&self, channel: Channel) -> bool {
        self.voices.lock()[channel.index()].is_active()
    }

    fn stop_all(&self) {
        let mut voices = self.voices.lock();
        for voice in voices.iter_mut() {
            *voice = Voice::default();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sound(value: f32, len: usize) -> Sound {
        Sound::new(vec![value; len], 8_000)
    }

    #[test]
    fn test_channels_mix_independently() {
        let mixer = Mixer::new();
        mixer.play(Channel::Metronome, &sound(0.25, 4));
        mixer.play(Channel::Feedback, &sound(0.5, 2));
        let mut out = [0.0; 4];
        mixer.render(&mut out, 1);
        assert_eq!(out, [0.75, 0.75, 0.25, 0.25]);
        assert!(!mixer.is_playing(Channel::Metronome));
        assert!(!mixer.is_playing(Channel::Feedback));
    }

    #[test]
    fn test_play_replaces_current_sound() {
        let mixer = Mixer::new();
        mixer.play(Channel::Interval, &sound(0.1, 100));
        mixer.play(Channel::Interval, &sound(0.2, 2));
        let mut out = [0.0; 3];
        mixer.render(&mut out, 1);
        assert_eq!(out, [0.2, 0.2, 0.0]);
    }

    #[test]
    fn test_is_playing_until_exhausted() {
        let mixer = Mixer::new();
        mixer.play(Channel::Prompt, &sound(0.1, 6));
        assert!(mixer.is_playing(Channel::Prompt));
        assert!(!mixer.is_playing(Channel::Interval));
        let mut out = [0.0; 4];
        mixer.render(&mut out, 2);
        assert!(mixer.is_playing(Channel::Prompt));
        mixer.render(&mut out, 1);
        assert!(!mixer.is_playing(Channel::Prompt));
    }

    #[test]
    fn test_interleaved_output_and_clamping() {
        let mixer = Mixer::new();
        mixer.play(Channel::Metronome, &sound(0.8, 2));
        mixer.play(Channel::Prompt, &sound(0.8, 2));
        let mut out = [0.0; 4];
        mixer.render(&mut out, 2);
        assert_eq!(out, [1.0; 4]);
    }

    #[test]
    fn test_stop_all() {
        let mixer = Mixer::new();
        for channel in Channel::ALL {
            mixer.play(channel, &sound(0.1, 10));
        }
        mixer.stop_all();
        assert!(Channel::ALL.iter().all(|&c| !mixer.is_playing(c)));
    }
}
