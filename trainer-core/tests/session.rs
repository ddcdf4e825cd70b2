//! End-to-end sessions over a synthetic capture feed.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::f32::consts::PI;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use trainer_core::intervals::find_interval;
use trainer_core::{
    CancelToken, Channel, Cue, FrameBus, PlaybackSink, SessionConfig, SessionReport, Sound,
    SoundBank, SoundStore, TrialScheduler, TrialSpec,
};

const SAMPLE_RATE: u32 = 44_100;
const FRAME_LEN: usize = 1323;

/// Playback sink that treats each cue as busy for its real duration.
#[derive(Default)]
struct RecordingSink {
    busy_until: Mutex<HashMap<Channel, Instant>>,
    played: Mutex<Vec<(Channel, Sound, Instant)>>,
}

impl RecordingSink {
    fn played_on(&self, channel: Channel) -> Vec<Sound> {
        self.played_at(channel).into_iter().map(|(sound, _)| sound).collect()
    }

    fn played_at(&self, channel: Channel) -> Vec<(Sound, Instant)> {
        self.played
            .lock()
            .iter()
            .filter(|(c, _, _)| *c == channel)
            .map(|(_, sound, at)| (sound.clone(), *at))
            .collect()
    }
}

impl PlaybackSink for RecordingSink {
    fn play(&self, channel: Channel, sound: &Sound) {
        let now = Instant::now();
        let end = now + Duration::from_secs_f32(sound.duration_secs());
        self.busy_until.lock().insert(channel, end);
        self.played.lock().push((channel, sound.clone(), now));
    }

    fn is_playing(&self, channel: Channel) -> bool {
        self.busy_until
            .lock()
            .get(&channel)
            .is_some_and(|end| Instant::now() < *end)
    }

    fn stop_all(&self) {
        self.busy_until.lock().clear();
    }
}

/// Publishes a sine tone on a bus in real time until dropped.
struct SineFeed {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SineFeed {
    fn start(bus: &FrameBus, frequency: f32) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let bus = bus.clone();
        let handle = thread::spawn(move || {
            let frame: Vec<f32> = (0..FRAME_LEN)
                .map(|i| 0.5 * (2.0 * PI * frequency * i as f32 / SAMPLE_RATE as f32).sin())
                .collect();
            while !flag.load(Ordering::SeqCst) {
                bus.publish(&frame);
                thread::sleep(Duration::from_millis(30));
            }
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }
}

impl Drop for SineFeed {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            handle.join().unwrap();
        }
    }
}

struct Harness {
    bus: FrameBus,
    sink: Arc<RecordingSink>,
    sounds: SoundBank,
    scheduler: TrialScheduler,
    status: crossbeam_channel::Receiver<String>,
}

fn harness(config: SessionConfig, trials: &[TrialSpec]) -> Harness {
    let bus = FrameBus::new(SAMPLE_RATE);
    let sink = Arc::new(RecordingSink::default());
    let sounds = SoundBank::new(SAMPLE_RATE, config.tonic_frequency_hz, trials, None);
    let (status_tx, status) = crossbeam_channel::unbounded();
    let scheduler = TrialScheduler::new(
        config,
        Arc::new(bus.clone()),
        sink.clone(),
        Arc::new(sounds.clone()),
        Arc::new(status_tx),
    );
    Harness {
        bus,
        sink,
        sounds,
        scheduler,
        status,
    }
}

fn perfect_fifth() -> Vec<TrialSpec> {
    vec![find_interval("Perfect Fifth").unwrap()]
}

/// Runs the session on its own thread, so the test can cancel it.
fn spawn_session(
    scheduler: TrialScheduler,
    trials: Vec<TrialSpec>,
    cancel: CancelToken,
) -> JoinHandle<(SessionReport, Instant)> {
    thread::spawn(move || {
        let report = scheduler.run(&trials, &cancel).unwrap();
        (report, Instant::now())
    })
}

/// Reads status lines until one starts with `prefix`.
fn wait_for_status(status: &crossbeam_channel::Receiver<String>, prefix: &str) -> Vec<String> {
    let mut seen = Vec::new();
    loop {
        let line = status
            .recv_timeout(Duration::from_secs(20))
            .unwrap_or_else(|_| panic!("no `{}` status, saw {:?}", prefix, seen));
        let done = line.starts_with(prefix);
        seen.push(line);
        if done {
            return seen;
        }
    }
}

#[test]
fn test_singing_the_fifth_is_correct() {
    let trials = perfect_fifth();
    let h = harness(SessionConfig::default(), &trials);
    let _feed = SineFeed::start(&h.bus, 659.26); // E5

    let report = h.scheduler.run(&trials, &CancelToken::new()).unwrap();

    assert!(!report.cancelled);
    assert_eq!(report.outcomes.len(), 1);
    let result = &report.outcomes[0].result;
    assert!(result.matched);
    assert!(result.detected_note.as_deref().unwrap().starts_with('E'));
    assert!(result.cents_offset.unwrap().abs() <= 50.0);
    assert_eq!(report.correct_count(), 1);

    let correct = h.sounds.resolve(&Cue::Correct).unwrap();
    assert_eq!(h.sink.played_on(Channel::Feedback), vec![correct]);
    let updates: Vec<String> = h.status.try_iter().collect();
    assert!(updates.contains(&"Prompt: Perfect Fifth".to_string()));
    assert!(updates.iter().any(|u| u.starts_with("Detected: E") && u.ends_with("Correct")));
    assert_eq!(updates.last().map(String::as_str), Some("Session ended."));
    assert_eq!(h.bus.subscriber_count(), 0);
}

#[test]
fn test_singing_the_tonic_is_incorrect() {
    let trials = perfect_fifth();
    let config = SessionConfig::default();
    let (bar, timeout) = (config.bar_duration(), config.detection_timeout());
    let h = harness(config, &trials);
    let _feed = SineFeed::start(&h.bus, 440.0);

    let report = h.scheduler.run(&trials, &CancelToken::new()).unwrap();

    assert_eq!(report.outcomes.len(), 1);
    let result = &report.outcomes[0].result;
    assert!(!result.matched);
    assert!(result.detected_note.is_some());
    assert!(result.cents_offset.unwrap().abs() >= 400.0);

    let incorrect = h.sounds.resolve(&Cue::Incorrect).unwrap();
    let feedback = h.sink.played_at(Channel::Feedback);
    assert_eq!(feedback.len(), 1);
    assert_eq!(feedback[0].0, incorrect);
    let updates: Vec<String> = h.status.try_iter().collect();
    assert!(updates.iter().any(|u| u.starts_with("Detected: ") && u.ends_with("Incorrect")));

    // The user turn opens on the third downbeat: start-up, prompt, then listening.
    let accent = h.sounds.resolve(&Cue::AccentClick).unwrap();
    let downbeats: Vec<Instant> = h
        .sink
        .played_at(Channel::Metronome)
        .into_iter()
        .filter(|(sound, _)| *sound == accent)
        .map(|(_, at)| at)
        .collect();
    assert!(downbeats.len() >= 3);
    let waited = feedback[0].1 - downbeats[2];
    assert!(waited >= bar - Duration::from_millis(50), "feedback after {:?}", waited);
    assert!(waited < timeout, "feedback only after the grace timeout: {:?}", waited);
}

#[test]
fn test_prompt_plays_tonic_then_interval() {
    let trials = perfect_fifth();
    let config = SessionConfig {
        bpm: 240.0,
        ..SessionConfig::default()
    };
    let h = harness(config, &trials);

    h.scheduler.run(&trials, &CancelToken::new()).unwrap();

    let tonic = h.sounds.resolve(&Cue::Tonic).unwrap();
    let fifth = h.sounds.resolve(&Cue::Interval(7)).unwrap();
    assert_eq!(h.sink.played_on(Channel::Interval), vec![tonic, fifth]);
    let clicks = h.sink.played_on(Channel::Metronome);
    assert!(clicks.len() >= 8);
    assert_eq!(clicks[0], h.sounds.resolve(&Cue::AccentClick).unwrap());
    assert_eq!(clicks[1], h.sounds.resolve(&Cue::RegularClick).unwrap());
}

#[test]
fn test_cancel_while_waiting_for_bar_stops_within_a_beat() {
    let config = SessionConfig {
        bpm: 240.0,
        ..SessionConfig::default()
    };
    let beat = config.beat_period();
    let h = harness(config, &perfect_fifth());
    let cancel = CancelToken::new();
    let session = spawn_session(h.scheduler, perfect_fifth(), cancel.clone());

    wait_for_status(&h.status, "Get ready...");
    let cancelled_at = Instant::now();
    cancel.cancel();
    let (report, finished_at) = session.join().unwrap();

    assert!(finished_at - cancelled_at < beat);
    assert!(report.cancelled);
    assert!(report.outcomes.is_empty());
    assert_eq!(h.bus.subscriber_count(), 0);
    assert!(Channel::ALL.iter().all(|&c| !h.sink.is_playing(c)));
    let rest: Vec<String> = h.status.iter().collect();
    assert_eq!(rest, vec!["Session stopped.", "Session ended."]);
}

#[test]
fn test_cancel_during_detection_releases_capture() {
    let config = SessionConfig {
        bpm: 240.0,
        ..SessionConfig::default()
    };
    let beat = config.beat_period();
    let h = harness(config, &perfect_fifth());
    let cancel = CancelToken::new();
    let session = spawn_session(h.scheduler, perfect_fifth(), cancel.clone());

    wait_for_status(&h.status, "Your turn");
    let deadline = Instant::now() + Duration::from_secs(1);
    while h.bus.subscriber_count() == 0 {
        assert!(Instant::now() < deadline, "detection never subscribed");
        thread::sleep(Duration::from_millis(1));
    }
    let cancelled_at = Instant::now();
    cancel.cancel();
    let (report, finished_at) = session.join().unwrap();

    assert!(finished_at - cancelled_at < beat);
    assert!(report.cancelled);
    assert!(report.outcomes.is_empty());
    assert_eq!(h.bus.subscriber_count(), 0);
    let rest: Vec<String> = h.status.iter().collect();
    assert_eq!(rest, vec!["Session stopped.", "Session ended."]);
}
