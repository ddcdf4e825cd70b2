//! Command-line arguments for the `trainer` binary.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Beat-synchronized interval ear trainer
#[derive(Parser, Debug)]
#[command(name = "trainer")]
#[command(author, version, about, long_about = None)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Commands {
    /// Run a practice session; press Enter to stop
    Train(TrainArgs),

    /// Live readout of the nearest note and its cents deviation
    Tune {
        /// Use the first input device whose name contains this text
        #[arg(long)]
        input_device: Option<String>,

        /// Lowest frequency to report, in Hz
        #[arg(long, default_value_t = 70.0)]
        min_freq: f32,

        /// Highest frequency to report, in Hz
        #[arg(long, default_value_t = 350.0)]
        max_freq: f32,
    },

    /// Write the metronome click WAV files
    GenerateClicks {
        /// Directory to write click_high.wav and click_low.wav into
        #[arg(long, default_value = "sounds")]
        out_dir: PathBuf,
    },

    /// List available input devices
    Devices,
}

#[derive(Args, Debug)]
pub(crate) struct TrainArgs {
    /// JSON session config; flags below override its values
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Tempo in beats per minute
    #[arg(long)]
    pub bpm: Option<f32>,

    /// Beats in one bar
    #[arg(long)]
    pub beats_per_bar: Option<u32>,

    /// Tonic note name, e.g. A4 or Bb3
    #[arg(long)]
    pub tonic: Option<String>,

    /// Accepted pitch-class distance, in cents
    #[arg(long)]
    pub tolerance: Option<f32>,

    /// Number of shuffled passes over the selected intervals
    #[arg(long)]
    pub repeats: Option<u32>,

    /// Comma-separated interval names (default: all twelve)
    #[arg(long, value_delimiter = ',')]
    pub intervals: Vec<String>,

    /// Directory with cue WAV files
    #[arg(long)]
    pub sounds_dir: Option<PathBuf>,

    /// Use the first input device whose name contains this text
    #[arg(long)]
    pub input_device: Option<String>,
}
