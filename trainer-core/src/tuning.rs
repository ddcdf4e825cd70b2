//! # Musical Tuning Module
//!
//! Converts between frequencies, continuous pitch numbers (MIDI scale, A4 = 69)
//! and note names, and scores a detected pitch against a target pitch class.
//!
//! ## Features
//! - Frequency ↔ continuous pitch number
//! - Note names with octave numbers (C4 = middle C)
//! - Octave-invariant pitch-class distance in cents
//! - 88-key note table (A0 to C8) for tonic selection and the tuner readout

use once_cell::sync::Lazy;
use std::collections::BTreeMap;

/// Chromatic note names starting at C.
pub const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Reference pitch: A4 in Hz.
pub const A4_FREQUENCY: f32 = 440.0;
/// Pitch number of A4.
pub const A4_PITCH_NUMBER: f32 = 69.0;

/// Represents a single musical note with its name and frequency.
#[derive(Debug, Clone)]
pub struct Note {
    /// Note name (e.g., "A4", "C#3")
    pub name: String,
    /// Frequency in Hz
    pub frequency: f32,
}

/// Equal-temperament notes of a standard 88-key piano (A0 to C8).
static NOTES: Lazy<Vec<Note>> = Lazy::new(|| {
    (0..88)
        .map(|key| {
            // Key 0 is A0, pitch number 21.
            let pitch_number = key as f32 + 21.0;
            Note {
                name: pitch_number_to_note_name(pitch_number),
                frequency: pitch_number_to_frequency(pitch_number),
            }
        })
        .collect()
});

/// Note name to frequency lookups for tonic selection.
static NOTE_MAP: Lazy<BTreeMap<String, f32>> = Lazy::new(|| {
    NOTES
        .iter()
        .map(|note| (note.name.clone(), note.frequency))
        .collect()
});

/// Maps a frequency to the continuous pitch-number scale: `69 + 12·log2(f / 440)`.
pub fn frequency_to_pitch_number(frequency: f32) -> f32 {
    A4_PITCH_NUMBER + 12.0 * (frequency / A4_FREQUENCY).log2()
}

/// Inverse of [`frequency_to_pitch_number`].
pub fn pitch_number_to_frequency(pitch_number: f32) -> f32 {
    A4_FREQUENCY * 2.0_f32.powf((pitch_number - A4_PITCH_NUMBER) / 12.0)
}

/// Names the nearest note to a continuous pitch number, e.g. `69.3` → `"A4"`.
pub fn pitch_number_to_note_name(pitch_number: f32) -> String {
    let rounded = pitch_number.round() as i32;
    let octave = rounded.div_euclid(12) - 1;
    let pitch_class = rounded.rem_euclid(12) as usize;
    format!("{}{}", NOTE_NAMES[pitch_class], octave)
}

/// Signed distance between the pitch classes of two pitch numbers, in cents.
///
/// Both pitches are rounded to the nearest semitone and reduced modulo 12, so
/// the result ignores octaves and is always a whole number of semitones. The
/// difference wraps to the shorter direction: values lie in `-500..=600`.
///
/// # Arguments
/// * `detected` - Pitch number of the detected note
/// * `target` - Pitch number of the target note
pub fn pitch_class_distance_cents(detected: f32, target: f32) -> f32 {
    let detected_class = (detected.round() as i32).rem_euclid(12);
    let target_class = (target.round() as i32).rem_euclid(12);
    let mut semitones = (detected_class - target_class).rem_euclid(12);
    if semitones > 6 {
        semitones -= 12;
    }
    semitones as f32 * 100.0
}

/// Frequency of the note `semitones` above (or below) `tonic_frequency`.
pub fn interval_frequency(tonic_frequency: f32, semitones: i32) -> f32 {
    tonic_frequency * 2.0_f32.powf(semitones as f32 / 12.0)
}

/// Looks up the equal-temperament frequency of a note name such as `"A4"`.
///
/// Flats are accepted and mapped to their enharmonic sharp (`"Bb3"` → `"A#3"`).
pub fn note_frequency(name: &str) -> Option<f32> {
    let name = name.trim();
    if let Some(frequency) = NOTE_MAP.get(name) {
        return Some(*frequency);
    }
    let mut chars = name.chars();
    let letter = chars.next()?.to_ascii_uppercase();
    let rest: String = chars.collect();
    let (accidental, octave) = match rest.strip_prefix(|c: char| c == 'b' || c == '#') {
        Some(octave) => (&rest[..1], octave),
        None => ("", rest.as_str()),
    };
    let base = NOTE_NAMES.iter().position(|n| *n == letter.to_string())? as i32;
    let class = match accidental {
        "#" => base + 1,
        "b" => base - 1,
        _ => base,
    };
    let octave: i32 = octave.parse().ok()?;
    let pitch_number = (octave + 1) * 12 + class;
    let canonical = pitch_number_to_note_name(pitch_number as f32);
    NOTE_MAP.get(&canonical).copied()
}

/// Finds the closest piano note to a given frequency.
///
/// # Returns
/// * `(note_name, target_frequency)` - Closest note name and its target frequency
pub fn find_nearest_note(freq: f32) -> (String, f32) {
    let key = (frequency_to_pitch_number(freq).round() - 21.0).clamp(0.0, 87.0) as usize;
    let note = &NOTES[key];
    (note.name.clone(), note.frequency)
}

/// Calculates the deviation from a target frequency in cents.
///
/// Positive values are sharp, negative values flat.
pub fn calculate_cents_deviation(freq: f32, target_freq: f32) -> f32 {
    1200.0 * (freq / target_freq).log2()
}
