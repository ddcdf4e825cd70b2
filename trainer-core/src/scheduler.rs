//! # Trial Scheduler Module
//!
//! Runs a practice session: a sequence of trials laid out on the beat grid.
//!
//! Each trial moves through [`TrialPhase`]s:
//!
//! 1. `AwaitBar` - wait for the next downbeat
//! 2. `Prompt` - spoken interval name, then tonic and interval tones
//! 3. `AwaitPromptEnd` - let the prompt bar finish
//! 4. `UserTurn` - listen for one bar (plus grace for the result)
//! 5. `Feedback` - correct/incorrect cue and a status line
//! 6. `AwaitNextBar` - then on to the next trial
//!
//! Cue sequencing, detection and feedback run as scoped tasks, so none of
//! them can outlive the session. One cancel token reaches the clock, every
//! wait, and every task.

use crate::cancel::{CancelToken, POLL_QUANTUM};
use crate::capture::CaptureSource;
use crate::clock::{BeatClock, BeatState, BeatWatch};
use crate::config::SessionConfig;
use crate::detection::{DetectionResult, DetectionSession};
use crate::error::ConfigError;
use crate::intervals::TrialSpec;
use crate::playback::{Channel, PlaybackSink};
use crate::sounds::{Cue, SoundStore};
use crate::status::StatusSink;
use crate::tuning;
use anyhow::Result;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, Scope, ScopedJoinHandle};
use std::time::{Duration, Instant};

/// Longest a cue sequence waits for a channel to fall idle.
const CHANNEL_IDLE_LIMIT: Duration = Duration::from_secs(5);
const CHANNEL_POLL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialPhase {
    AwaitBar,
    Prompt,
    AwaitPromptEnd,
    UserTurn,
    Feedback,
    AwaitNextBar,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrialOutcome {
    pub trial: TrialSpec,
    pub result: DetectionResult,
}

/// Everything that happened in one session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionReport {
    pub outcomes: Vec<TrialOutcome>,
    /// Whether the session ended through cancellation.
    pub cancelled: bool,
}

impl SessionReport {
    pub fn correct_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.matched).count()
    }
}

/// Orchestrates trials against the beat clock.
pub struct TrialScheduler {
    config: SessionConfig,
    capture: Arc<dyn CaptureSource>,
    playback: Arc<dyn PlaybackSink>,
    sounds: Arc<dyn SoundStore>,
    status: Arc<dyn StatusSink>,
}

impl TrialScheduler {
    pub fn new(
        config: SessionConfig,
        capture: Arc<dyn CaptureSource>,
        playback: Arc<dyn PlaybackSink>,
        sounds: Arc<dyn SoundStore>,
        status: Arc<dyn StatusSink>,
    ) -> Self {
        Self {
            config,
            capture,
            playback,
            sounds,
            status,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Runs `trials` in order until they are exhausted or `cancel` fires.
    ///
    /// An invalid config or an empty trial list is rejected with a
    /// [`ConfigError`] before the clock starts. On return the clock is stopped,
    /// every task has finished and all playback channels are idle.
    pub fn run(&self, trials: &[TrialSpec], cancel: &CancelToken) -> Result<SessionReport> {
        self.config.validate()?;
        if trials.is_empty() {
            return Err(ConfigError::NoIntervals.into());
        }

        let mut clock = BeatClock::new(self.config.bpm, self.config.beats_per_bar);
        match (
            self.sounds.resolve(&Cue::AccentClick),
            self.sounds.resolve(&Cue::RegularClick),
        ) {
            (Some(accent), Some(regular)) => {
                clock = clock.with_click(self.playback.clone(), accent, regular);
            }
            _ => log::warn!("Metronome clicks unavailable, running silent"),
        }
        let watch = clock.watch();
        let clock = clock.start(cancel)?;

        log::info!(
            "Session started: {} trials at {} bpm, tonic {:.2} Hz",
            trials.len(),
            self.config.bpm,
            self.config.tonic_frequency_hz
        );
        let mut report = SessionReport::default();
        if watch.wait_for_bar(1, cancel) {
            report = thread::scope(|scope| self.run_trials(scope, trials, &watch, cancel));
        }
        report.cancelled = cancel.is_cancelled();

        clock.stop();
        self.playback.stop_all();
        if report.cancelled {
            self.status.publish("Session stopped.".to_string());
        }
        log::info!(
            "Session ended: {}/{} correct",
            report.correct_count(),
            report.outcomes.len()
        );
        self.status.publish("Session ended.".to_string());
        Ok(report)
    }

    fn run_trials<'scope, 'env>(
        &'env self,
        scope: &'scope Scope<'scope, 'env>,
        trials: &'env [TrialSpec],
        watch: &'env BeatWatch,
        cancel: &'env CancelToken,
    ) -> SessionReport {
        let mut report = SessionReport::default();
        let mut feedback_task: Option<ScopedJoinHandle<'scope, ()>> = None;

        for (index, trial) in trials.iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            let Some(result) = self.run_trial(scope, index, trial, watch, cancel) else {
                break;
            };

            // Feedback
            self.enter(index, TrialPhase::Feedback);
            self.status.publish(format!(
                "Detected: {} → {}",
                result.detected_note.as_deref().unwrap_or("None"),
                if result.matched { "Correct" } else { "Incorrect" }
            ));
            if let Some(previous) = feedback_task.take() {
                join_task(previous, "feedback");
            }
            let cue = if result.matched { Cue::Correct } else { Cue::Incorrect };
            feedback_task = Some(scope.spawn(move || {
                if self.play_cue(Channel::Feedback, &cue) {
                    self.wait_channel_idle(Channel::Feedback, cancel);
                }
            }));
            report.outcomes.push(TrialOutcome {
                trial: trial.clone(),
                result,
            });

            // AwaitNextBar
            self.enter(index, TrialPhase::AwaitNextBar);
            let bar = watch.snapshot().bar;
            if !watch.wait_for_bar(bar + 1, cancel) {
                break;
            }
        }

        if let Some(task) = feedback_task.take() {
            join_task(task, "feedback");
        }
        report
    }

    /// Runs one trial up to its detection result. `None` means cancelled.
    fn run_trial<'scope, 'env>(
        &'env self,
        scope: &'scope Scope<'scope, 'env>,
        index: usize,
        trial: &'env TrialSpec,
        watch: &'env BeatWatch,
        cancel: &'env CancelToken,
    ) -> Option<DetectionResult> {
        // AwaitBar
        self.enter(index, TrialPhase::AwaitBar);
        self.status.publish("Get ready...".to_string());
        let bar = watch.snapshot().bar;
        if !watch.wait_for_bar(bar + 1, cancel) {
            return None;
        }

        // Prompt
        self.enter(index, TrialPhase::Prompt);
        self.status.publish(format!("Prompt: {}", trial.label));
        self.play_cue(Channel::Prompt, &Cue::IntervalName(trial.label.clone()));
        let prompt_start = watch.snapshot();
        scope.spawn(move || self.play_interval_sequence(trial, prompt_start, watch, cancel));

        // AwaitPromptEnd
        self.enter(index, TrialPhase::AwaitPromptEnd);
        let bar = watch.snapshot().bar;
        if !watch.wait_for_bar(bar + 1, cancel) {
            return None;
        }

        // UserTurn
        self.enter(index, TrialPhase::UserTurn);
        self.status.publish(format!("Your turn: Play {}", trial.label));
        let listen_for = self.config.bar_duration();
        let timeout = self.config.detection_timeout();
        let target_pitch = tuning::frequency_to_pitch_number(self.config.tonic_frequency_hz)
            + trial.semitone_offset as f32;
        let detection = DetectionSession::new(
            self.capture.clone(),
            self.config.detection.yin_params(),
            self.config.detection.frame_len(self.capture.sample_rate()),
        );
        let tolerance = self.config.tolerance_cents;
        let (result_tx, result_rx) = crossbeam_channel::bounded(1);
        scope.spawn(move || {
            let result = detection.run(target_pitch, tolerance, listen_for, timeout, cancel);
            let _ = result_tx.send(result);
        });
        self.await_detection(&result_rx, timeout, cancel)
    }

    /// Waits for the detection worker, bounded by `timeout`. A timeout counts
    /// as a miss; only cancellation yields `None`.
    fn await_detection(
        &self,
        results: &Receiver<DetectionResult>,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Option<DetectionResult> {
        let deadline = Instant::now() + timeout;
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            let now = Instant::now();
            if now >= deadline {
                log::warn!("Detection did not report within {:?}", timeout);
                return Some(DetectionResult::unmatched());
            }
            match results.recv_timeout(POLL_QUANTUM.min(deadline - now)) {
                Ok(result) => return Some(result),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    log::error!("Detection worker exited without a result");
                    return if cancel.is_cancelled() {
                        None
                    } else {
                        Some(DetectionResult::unmatched())
                    };
                }
            }
        }
    }

    /// Tonic now; the interval tone once the beat after `start` has arrived
    /// and the tonic has finished.
    fn play_interval_sequence(
        &self,
        trial: &TrialSpec,
        start: BeatState,
        watch: &BeatWatch,
        cancel: &CancelToken,
    ) {
        let (bar, beat) = if start.beat >= self.config.beats_per_bar {
            (start.bar + 1, 1)
        } else {
            (start.bar, start.beat + 1)
        };
        self.play_cue(Channel::Interval, &Cue::Tonic);
        if !watch.wait_for_beat(bar, beat, None, cancel) {
            return;
        }
        if !self.wait_channel_idle(Channel::Interval, cancel) {
            return;
        }
        self.play_cue(Channel::Interval, &Cue::Interval(trial.semitone_offset));
    }

    /// Polls until `channel` is idle. Returns `false` if cancelled first.
    fn wait_channel_idle(&self, channel: Channel, cancel: &CancelToken) -> bool {
        let deadline = Instant::now() + CHANNEL_IDLE_LIMIT;
        while self.playback.is_playing(channel) {
            if Instant::now() >= deadline {
                log::warn!("{:?} channel still busy after {:?}", channel, CHANNEL_IDLE_LIMIT);
                break;
            }
            if cancel.wait_timeout(CHANNEL_POLL) {
                return false;
            }
        }
        !cancel.is_cancelled()
    }

    /// Plays `cue` on `channel` if the sound store has it.
    fn play_cue(&self, channel: Channel, cue: &Cue) -> bool {
        match self.sounds.resolve(cue) {
            Some(sound) => {
                self.playback.play(channel, &sound);
                true
            }
            None => {
                log::warn!("No sound for {:?}, skipping cue", cue);
                false
            }
        }
    }

    fn enter(&self, index: usize, phase: TrialPhase) {
        log::debug!("Trial {} → {:?}", index + 1, phase);
    }
}

fn join_task(task: ScopedJoinHandle<'_, ()>, name: &str) {
    if task.join().is_err() {
        log::error!("{} task panicked", name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::FrameBus;
    use crate::intervals::find_interval;
    use crate::playback::Sound;
    use crate::sounds::SoundBank;
    use parking_lot::Mutex;

    /// Records every cue and finishes them instantly.
    #[derive(Default)]
    struct RecordingSink {
        played: Mutex<Vec<Channel>>,
    }

    impl PlaybackSink for RecordingSink {
        fn play(&self, channel: Channel, _sound: &Sound) {
            self.played.lock().push(channel);
        }

        fn is_playing(&self, _channel: Channel) -> bool {
            false
        }

        fn stop_all(&self) {}
    }

    fn build(
        config: SessionConfig,
        bus: &FrameBus,
    ) -> (TrialScheduler, Arc<RecordingSink>, crossbeam_channel::Receiver<String>) {
        let (status_tx, status_rx) = crossbeam_channel::unbounded();
        let trials = crate::intervals::all_intervals();
        let sounds = SoundBank::new(44_100, config.tonic_frequency_hz, &trials, None);
        let sink = Arc::new(RecordingSink::default());
        let scheduler = TrialScheduler::new(
            config,
            Arc::new(bus.clone()),
            sink.clone(),
            Arc::new(sounds),
            Arc::new(status_tx),
        );
        (scheduler, sink, status_rx)
    }

    #[test]
    fn test_rejects_invalid_config_before_starting() {
        let bus = FrameBus::new(44_100);
        let config = SessionConfig {
            bpm: 0.0,
            ..SessionConfig::default()
        };
        let (scheduler, sink, status) = build(config, &bus);
        let trials = vec![find_interval("Octave").unwrap()];
        let err = scheduler.run(&trials, &CancelToken::new()).unwrap_err();
        assert_eq!(err.downcast_ref::<ConfigError>(), Some(&ConfigError::InvalidBpm(0.0)));
        assert!(status.try_recv().is_err());
        assert!(sink.played.lock().is_empty());
    }

    #[test]
    fn test_rejects_empty_trials() {
        let bus = FrameBus::new(44_100);
        let (scheduler, _sink, status) = build(SessionConfig::default(), &bus);
        let err = scheduler.run(&[], &CancelToken::new()).unwrap_err();
        assert_eq!(err.downcast_ref::<ConfigError>(), Some(&ConfigError::NoIntervals));
        assert!(status.try_recv().is_err());
    }

    #[test]
    fn test_pre_cancelled_session_ends_immediately() {
        let bus = FrameBus::new(44_100);
        let (scheduler, _sink, status) = build(SessionConfig::default(), &bus);
        let cancel = CancelToken::new();
        cancel.cancel();
        let trials = vec![find_interval("Octave").unwrap()];
        let report = scheduler.run(&trials, &cancel).unwrap();
        assert!(report.cancelled);
        assert!(report.outcomes.is_empty());
        let updates: Vec<String> = status.try_iter().collect();
        assert_eq!(updates, vec!["Session stopped.", "Session ended."]);
    }

    #[test]
    fn test_interval_follows_the_beat_after_the_prompt_downbeat() {
        let bus = FrameBus::new(44_100);
        let (scheduler, sink, _status) = build(SessionConfig::default(), &bus);
        let cancel = CancelToken::new();
        let clock = BeatClock::new(120.0, 4).start(&cancel).unwrap();
        assert!(clock.watch().wait_for_bar(1, &cancel));
        let prompt_start = clock.watch().snapshot();

        // A late task start must not push the interval tone back a beat.
        thread::sleep(Duration::from_millis(600));
        let trial = find_interval("Perfect Fifth").unwrap();
        let started = Instant::now();
        scheduler.play_interval_sequence(&trial, prompt_start, clock.watch(), &cancel);

        assert!(started.elapsed() < Duration::from_millis(200));
        assert_eq!(*sink.played.lock(), vec![Channel::Interval, Channel::Interval]);
        clock.stop();
    }

    #[test]
    fn test_silence_times_out_as_a_miss() {
        let bus = FrameBus::new(44_100);
        let mut config = SessionConfig {
            bpm: 1200.0, // 50 ms beats, 200 ms bars
            ..SessionConfig::default()
        };
        config.detection.grace_seconds = 0.1;
        let (scheduler, sink, status) = build(config, &bus);
        let trials = vec![find_interval("Major Third").unwrap()];
        let report = scheduler.run(&trials, &CancelToken::new()).unwrap();

        assert!(!report.cancelled);
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.outcomes[0].result, DetectionResult::unmatched());
        assert_eq!(bus.subscriber_count(), 0);
        let updates: Vec<String> = status.try_iter().collect();
        assert_eq!(
            updates,
            vec![
                "Get ready...",
                "Prompt: Major Third",
                "Your turn: Play Major Third",
                "Detected: None → Incorrect",
                "Session ended.",
            ]
        );
        let played = sink.played.lock();
        assert!(played.contains(&Channel::Metronome));
        assert!(played.contains(&Channel::Interval));
        assert!(played.contains(&Channel::Feedback));
        // No spoken-name asset, so the prompt cue is skipped.
        assert!(!played.contains(&Channel::Prompt));
    }
}
