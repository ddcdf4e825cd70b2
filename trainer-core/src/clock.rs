//! # Beat Clock Module
//!
//! A free-running metronome thread that advances a (bar, beat) counter on a
//! wall-clock schedule, wakes everyone waiting on it, calls its subscribers and
//! plays the click for each beat.
//!
//! ## Timing
//! Each tick is scheduled at `previous_target + period` rather than
//! `now + period`, so per-tick jitter does not accumulate. When the loop falls
//! behind (a slow subscriber, a descheduled thread) the target is reset to now
//! instead of firing a burst of catch-up ticks.
//!
//! ## Sharing
//! The [`BeatState`] has exactly one writer, the clock thread. Readers go
//! through a [`BeatWatch`], which only ever reads under the clock's lock.

use crate::cancel::{CancelToken, POLL_QUANTUM};
use crate::playback::{Channel, PlaybackSink, Sound};
use anyhow::Result;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Shortest beat period a clock runs at.
pub const MIN_BEAT_PERIOD: Duration = Duration::from_millis(1);
/// Longest beat, bar or grace period a session accepts.
pub const MAX_SPAN: Duration = Duration::from_secs(3600);

/// Beat period at `bpm`, or `None` if the tempo is not finite and positive or
/// its period falls outside `MIN_BEAT_PERIOD..=MAX_SPAN`.
pub fn checked_beat_period(bpm: f32) -> Option<Duration> {
    if !(bpm > 0.0) {
        return None;
    }
    Duration::try_from_secs_f32(60.0 / bpm)
        .ok()
        .filter(|period| (MIN_BEAT_PERIOD..=MAX_SPAN).contains(period))
}

/// Beat period at `bpm`, clamped to `MIN_BEAT_PERIOD..=MAX_SPAN`. Unusable
/// tempos get the longest period.
pub fn beat_period(bpm: f32) -> Duration {
    if !(bpm > 0.0) {
        return MAX_SPAN;
    }
    Duration::try_from_secs_f32(60.0 / bpm)
        .unwrap_or(MAX_SPAN)
        .clamp(MIN_BEAT_PERIOD, MAX_SPAN)
}

/// Position in the beat grid. `(0, 0)` until the first tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct BeatState {
    pub bar: u64,
    pub beat: u32,
}

/// Delivered to subscribers once per tick, in tick order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeatEvent {
    pub bar: u64,
    pub beat: u32,
    /// When the tick fired.
    pub at: Instant,
}

/// Called on the clock thread for every beat. Errors and panics are logged and
/// never stop the clock.
pub type BeatCallback = Box<dyn FnMut(BeatEvent) -> Result<()> + Send>;

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<BeatState>,
    ticked: Condvar,
    stopped: AtomicBool,
}

/// Read side of a clock's beat state.
#[derive(Debug, Clone)]
pub struct BeatWatch {
    shared: Arc<Shared>,
}

impl BeatWatch {
    pub fn snapshot(&self) -> BeatState {
        *self.shared.state.lock()
    }

    /// Blocks until the bar counter reaches `target_bar`.
    ///
    /// Returns `false` if `cancel` fires or the clock stops first.
    pub fn wait_for_bar(&self, target_bar: u64, cancel: &CancelToken) -> bool {
        self.wait_until(cancel, None, |state| state.bar >= target_bar)
    }

    /// Blocks until the grid reaches `beat` of `bar` (or any later position).
    ///
    /// Returns `false` on cancellation, clock stop, or when `timeout` elapses.
    pub fn wait_for_beat(
        &self,
        bar: u64,
        beat: u32,
        timeout: Option<Duration>,
        cancel: &CancelToken,
    ) -> bool {
        let target = BeatState { bar, beat };
        self.wait_until(cancel, timeout, |state| *state >= target)
    }

    fn wait_until(
        &self,
        cancel: &CancelToken,
        timeout: Option<Duration>,
        reached: impl Fn(&BeatState) -> bool,
    ) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.shared.state.lock();
        loop {
            if reached(&state) {
                return true;
            }
            if cancel.is_cancelled() || self.shared.stopped.load(Ordering::Acquire) {
                return false;
            }
            let now = Instant::now();
            let mut wake = now + POLL_QUANTUM;
            if let Some(deadline) = deadline {
                if now >= deadline {
                    return false;
                }
                wake = wake.min(deadline);
            }
            self.shared.ticked.wait_until(&mut state, wake);
        }
    }
}

struct ClickCue {
    sink: Arc<dyn PlaybackSink>,
    accent: Sound,
    regular: Sound,
}

/// Periodic beat driver. Configure it, then [`start`](BeatClock::start) it.
pub struct BeatClock {
    period: Duration,
    beats_per_bar: u32,
    subscribers: Vec<BeatCallback>,
    click: Option<ClickCue>,
    shared: Arc<Shared>,
}

impl BeatClock {
    /// Creates a stopped clock. The period is clamped as in [`beat_period`];
    /// the session config rejects tempos outside that range before a clock is
    /// built.
    pub fn new(bpm: f32, beats_per_bar: u32) -> Self {
        Self {
            period: beat_period(bpm),
            beats_per_bar: beats_per_bar.max(1),
            subscribers: Vec::new(),
            click: None,
            shared: Arc::new(Shared::default()),
        }
    }

    /// Plays `accent` on beat 1 and `regular` on other beats, on the metronome channel.
    pub fn with_click(mut self, sink: Arc<dyn PlaybackSink>, accent: Sound, regular: Sound) -> Self {
        self.click = Some(ClickCue { sink, accent, regular });
        self
    }

    /// Registers a per-beat callback. Callbacks run in registration order.
    pub fn subscribe(&mut self, callback: impl FnMut(BeatEvent) -> Result<()> + Send + 'static) {
        self.subscribers.push(Box::new(callback));
    }

    pub fn watch(&self) -> BeatWatch {
        BeatWatch {
            shared: self.shared.clone(),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Spawns the tick thread. The first beat fires immediately.
    ///
    /// The clock runs until `cancel` fires or the returned handle is stopped.
    pub fn start(self, cancel: &CancelToken) -> Result<ClockHandle> {
        let stop = cancel.child();
        let watch = self.watch();
        let token = stop.clone();
        let thread = thread::Builder::new()
            .name("beat-clock".into())
            .spawn(move || self.run(&token))?;
        Ok(ClockHandle {
            stop,
            thread: Some(thread),
            watch,
        })
    }

    fn run(mut self, stop: &CancelToken) {
        log::info!(
            "Beat clock started: {:.1} ms per beat, {} beats per bar",
            self.period.as_secs_f64() * 1000.0,
            self.beats_per_bar
        );
        let mut next_tick = Instant::now();
        let mut beat = 1;
        while !stop.is_cancelled() {
            let event = {
                let mut state = self.shared.state.lock();
                if beat == 1 {
                    state.bar += 1;
                }
                state.beat = beat;
                BeatEvent {
                    bar: state.bar,
                    beat,
                    at: Instant::now(),
                }
            };
            self.shared.ticked.notify_all();

            for (index, subscriber) in self.subscribers.iter_mut().enumerate() {
                match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| subscriber(event))) {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => log::warn!("Beat subscriber {} failed: {:#}", index, e),
                    Err(_) => log::error!("Beat subscriber {} panicked", index),
                }
            }

            if let Some(click) = &self.click {
                let sound = if beat == 1 { &click.accent } else { &click.regular };
                click.sink.play(Channel::Metronome, sound);
            }

            next_tick += self.period;
            let now = Instant::now();
            if next_tick > now {
                if stop.wait_timeout(next_tick - now) {
                    break;
                }
            } else {
                log::debug!("Beat clock running {:?} late, resetting schedule", now - next_tick);
                next_tick = now;
            }

            beat = if beat >= self.beats_per_bar { 1 } else { beat + 1 };
        }

        self.shared.stopped.store(true, Ordering::Release);
        // Taking the lock orders the store before any waiter's next check.
        drop(self.shared.state.lock());
        self.shared.ticked.notify_all();
        log::info!("Beat clock stopped");
    }
}

/// Owner of a running clock thread. Dropping it stops the clock.
pub struct ClockHandle {
    stop: CancelToken,
    thread: Option<JoinHandle<()>>,
    watch: BeatWatch,
}

impl ClockHandle {
    pub fn watch(&self) -> &BeatWatch {
        &self.watch
    }

    /// Stops the tick loop and waits for the thread to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.cancel();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Beat clock thread panicked");
            }
        }
    }
}

impl Drop for ClockHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
