//! # Interval Trainer - Command-Line Front End
//!
//! Wires the core crate to real audio devices.
//!
//! ## Threads
//! - **Main**: runs the session scheduler (or the tuner loop)
//! - **Status printer**: prints scheduler status lines in order
//! - **Stdin watcher**: cancels the session when Enter is pressed
//! - **Audio**: cpal callbacks plus the frame dispatcher inside `trainer-core`

mod cli_args;

use anyhow::{Context, Result};
use clap::Parser;
use cli_args::{Cli, Commands, TrainArgs};
use crossbeam_channel::RecvTimeoutError;
use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use trainer_core::intervals::{self, ALL_INTERVALS};
use trainer_core::pitch::{YinDetector, YinParams};
use trainer_core::sounds::{self, ACCENT_CLICK_HZ, REGULAR_CLICK_HZ};
use trainer_core::{
    audio, tuning, CancelToken, CaptureSource, ConfigError, Mixer, SessionConfig, SoundBank,
    TrialScheduler,
};

/// Minimum RMS level for the tuner to attempt detection.
const AMPLITUDE_THRESHOLD: f32 = 0.01;
/// Frame length for the tuner; long enough for two periods at 70 Hz.
const TUNE_FRAME_MS: f32 = 50.0;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Train(args) => run_train(args),
        Commands::Tune {
            input_device,
            min_freq,
            max_freq,
        } => run_tune(input_device.as_deref(), min_freq, max_freq),
        Commands::GenerateClicks { out_dir } => generate_clicks(&out_dir),
        Commands::Devices => {
            for name in audio::list_input_devices()? {
                println!("{}", name);
            }
            Ok(())
        }
    }
}

fn session_config(args: &TrainArgs) -> Result<SessionConfig> {
    let mut config = match &args.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };
    if let Some(bpm) = args.bpm {
        config.bpm = bpm;
    }
    if let Some(beats_per_bar) = args.beats_per_bar {
        config.beats_per_bar = beats_per_bar;
    }
    if let Some(tonic) = &args.tonic {
        config = config.with_tonic_note(tonic)?;
    }
    if let Some(tolerance) = args.tolerance {
        config.tolerance_cents = tolerance;
    }
    if let Some(repeats) = args.repeats {
        config.repeats = repeats;
    }
    config.validate()?;
    Ok(config)
}

fn run_train(args: TrainArgs) -> Result<()> {
    let config = session_config(&args)?;
    let labels: Vec<String> = if args.intervals.is_empty() {
        ALL_INTERVALS.iter().map(|(label, _)| label.to_string()).collect()
    } else {
        args.intervals.iter().map(|label| label.trim().to_string()).collect()
    };
    let selected = intervals::select_intervals(&labels)?;
    let trials = intervals::build_trials(&selected, config.repeats, &mut rand::thread_rng())?;
    log::info!("Session: {} trials, tonic {:.2} Hz", trials.len(), config.tonic_frequency_hz);

    let mixer = Arc::new(Mixer::new());
    let playback = audio::start_playback(mixer.clone())?;
    let capture = audio::start_capture(args.input_device.as_deref(), config.detection.frame_duration_ms)?;
    let sounds = SoundBank::new(
        playback.sample_rate(),
        config.tonic_frequency_hz,
        &selected,
        args.sounds_dir.as_deref(),
    );

    let (status_tx, status_rx) = crossbeam_channel::unbounded::<String>();
    let printer = thread::Builder::new()
        .name("status-printer".into())
        .spawn(move || {
            for line in status_rx {
                println!("{}", line);
            }
        })?;

    let cancel = CancelToken::new();
    watch_stdin(cancel.clone())?;
    println!("Press Enter to stop.");

    let scheduler = TrialScheduler::new(
        config,
        Arc::new(capture.bus().clone()),
        mixer,
        Arc::new(sounds),
        Arc::new(status_tx),
    );
    let report = scheduler.run(&trials, &cancel);
    // Dropping the scheduler closes the status channel and ends the printer.
    drop(scheduler);
    if printer.join().is_err() {
        log::error!("Status printer panicked");
    }
    let report = report?;

    println!(
        "{}/{} correct{}",
        report.correct_count(),
        report.outcomes.len(),
        if report.cancelled { " (stopped early)" } else { "" }
    );
    drop(capture);
    drop(playback);
    Ok(())
}

/// Cancels `cancel` when a line (or EOF) arrives on stdin.
fn watch_stdin(cancel: CancelToken) -> Result<()> {
    thread::Builder::new()
        .name("stdin-watch".into())
        .spawn(move || {
            let mut line = String::new();
            if let Err(e) = std::io::stdin().lock().read_line(&mut line) {
                log::warn!("Reading stdin failed: {}", e);
            }
            log::debug!("Stop requested from stdin");
            cancel.cancel();
        })?;
    Ok(())
}

/// Detector settings for the tuner's `--min-freq`/`--max-freq` band.
fn tune_params(min_freq: f32, max_freq: f32) -> Result<YinParams, ConfigError> {
    let params = YinParams {
        min_frequency: min_freq,
        max_frequency: max_freq,
        ..YinParams::default()
    };
    params.validate()?;
    Ok(params)
}

fn run_tune(input_device: Option<&str>, min_freq: f32, max_freq: f32) -> Result<()> {
    let params = tune_params(min_freq, max_freq)?;
    let capture = audio::start_capture(input_device, TUNE_FRAME_MS)?;
    let bus = capture.bus().clone();
    let mut detector = YinDetector::new(bus.sample_rate(), capture.frame_len(), params);

    let (estimate_tx, estimate_rx) = crossbeam_channel::bounded::<f32>(4);
    let _subscription = bus.subscribe(Box::new(move |frame: &[f32]| {
        let rms = (frame.iter().map(|s| s * s).sum::<f32>() / frame.len().max(1) as f32).sqrt();
        if rms < AMPLITUDE_THRESHOLD {
            return;
        }
        if let Some(frequency) = detector.detect(frame) {
            let _ = estimate_tx.try_send(frequency);
        }
    }));

    let cancel = CancelToken::new();
    watch_stdin(cancel.clone())?;
    println!("Listening between {} and {} Hz. Press Enter to stop.", min_freq, max_freq);

    while !cancel.is_cancelled() {
        match estimate_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(frequency) => {
                let (note, target) = tuning::find_nearest_note(frequency);
                let cents = tuning::calculate_cents_deviation(frequency, target);
                println!("{:>4}  {:8.2} Hz  {:+6.1} cents", note, frequency, cents);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    Ok(())
}

fn generate_clicks(out_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("creating {}", out_dir.display()))?;
    sounds::write_click_wav(out_dir.join("click_high.wav"), ACCENT_CLICK_HZ, audio::TARGET_SAMPLE_RATE)?;
    sounds::write_click_wav(out_dir.join("click_low.wav"), REGULAR_CLICK_HZ, audio::TARGET_SAMPLE_RATE)?;
    Ok(())
}
