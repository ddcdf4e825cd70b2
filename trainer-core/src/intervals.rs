//! Interval catalogue and trial sequencing.

use crate::error::ConfigError;
use rand::Rng;
use rand::seq::SliceRandom;

/// One prompt-and-detect target: an interval name and its size in semitones.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrialSpec {
    pub label: String,
    pub semitone_offset: i32,
}

impl TrialSpec {
    pub fn new(label: impl Into<String>, semitone_offset: i32) -> Self {
        Self {
            label: label.into(),
            semitone_offset,
        }
    }

    /// File stem used for this interval's spoken name cue, e.g. `perfect_fifth`.
    pub fn cue_stem(&self) -> String {
        self.label.trim().to_lowercase().replace(' ', "_")
    }
}

/// All intervals from a minor second up to the octave.
pub const ALL_INTERVALS: [(&str, i32); 12] = [
    ("Minor Second", 1),
    ("Major Second", 2),
    ("Minor Third", 3),
    ("Major Third", 4),
    ("Perfect Fourth", 5),
    ("Tritone", 6),
    ("Perfect Fifth", 7),
    ("Minor Sixth", 8),
    ("Major Sixth", 9),
    ("Minor Seventh", 10),
    ("Major Seventh", 11),
    ("Octave", 12),
];

/// The full catalogue as trial specs.
pub fn all_intervals() -> Vec<TrialSpec> {
    ALL_INTERVALS
        .iter()
        .map(|&(label, semitones)| TrialSpec::new(label, semitones))
        .collect()
}

/// Finds a catalogue interval by label, ignoring case and surrounding spaces.
pub fn find_interval(label: &str) -> Option<TrialSpec> {
    let wanted = label.trim();
    ALL_INTERVALS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(wanted))
        .map(|&(name, semitones)| TrialSpec::new(name, semitones))
}

/// Resolves a list of labels into trial specs.
pub fn select_intervals<S: AsRef<str>>(labels: &[S]) -> Result<Vec<TrialSpec>, ConfigError> {
    if labels.is_empty() {
        return Err(ConfigError::NoIntervals);
    }
    labels
        .iter()
        .map(|label| {
            find_interval(label.as_ref())
                .ok_or_else(|| ConfigError::UnknownInterval(label.as_ref().to_string()))
        })
        .collect()
}

/// Builds the session's trial order: `repeats` copies of `intervals`, each copy
/// shuffled independently.
pub fn build_trials<R: Rng + ?Sized>(
    intervals: &[TrialSpec],
    repeats: u32,
    rng: &mut R,
) -> Result<Vec<TrialSpec>, ConfigError> {
    if intervals.is_empty() {
        return Err(ConfigError::NoIntervals);
    }
    if repeats == 0 {
        return Err(ConfigError::InvalidRepeats);
    }
    let mut trials = Vec::with_capacity(intervals.len() * repeats as usize);
    for _ in 0..repeats {
        let mut round = intervals.to_vec();
        round.shuffle(rng);
        trials.extend(round);
    }
    Ok(trials)
}
