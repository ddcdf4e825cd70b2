//! # Detection Session Module
//!
//! Listens to live capture for one trial and decides whether the user hit the
//! target pitch class.
//!
//! Frames are scored on the capture dispatcher thread while the caller blocks
//! on a condition variable. The first frame within tolerance latches the
//! session as matched and every later frame is ignored. Listening stops at the
//! match, when the listening window ends, or on cancellation, and the capture
//! subscription is released on every one of those paths.

use crate::cancel::{CancelToken, POLL_QUANTUM};
use crate::capture::CaptureSource;
use crate::pitch::{YinDetector, YinParams};
use crate::tuning;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Outcome of one trial's listening window.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DetectionResult {
    pub matched: bool,
    /// Name of the matching note, or of the last note heard when nothing matched.
    pub detected_note: Option<String>,
    /// Pitch-class distance of that note from the target, in cents.
    pub cents_offset: Option<f32>,
}

impl DetectionResult {
    /// No match and nothing heard.
    pub fn unmatched() -> Self {
        Self::default()
    }
}

#[derive(Debug, Default)]
struct MatchState {
    matched: bool,
    last_note: Option<String>,
    cents: Option<f32>,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<MatchState>,
    resolved: Condvar,
}

/// Per-trial pitch matcher over a capture source.
pub struct DetectionSession {
    source: Arc<dyn CaptureSource>,
    params: YinParams,
    frame_len: usize,
}

impl DetectionSession {
    /// `frame_len` sizes the estimator's scratch buffer; longer frames still
    /// work but allocate once.
    pub fn new(source: Arc<dyn CaptureSource>, params: YinParams, frame_len: usize) -> Self {
        Self {
            source,
            params,
            frame_len,
        }
    }

    /// Listens for a note whose pitch class is within `tolerance_cents` of
    /// `target_pitch` (a continuous pitch number).
    ///
    /// Listening lasts at most `duration`; `timeout` is an outer bound on the
    /// whole call and only shortens the window if it is the smaller of the two.
    pub fn run(
        &self,
        target_pitch: f32,
        tolerance_cents: f32,
        duration: Duration,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> DetectionResult {
        let shared = Arc::new(Shared::default());
        let deadline = Instant::now() + duration.min(timeout);

        let mut detector = YinDetector::new(self.source.sample_rate(), self.frame_len, self.params);
        let frame_state = shared.clone();
        let subscription = self.source.subscribe(Box::new(move |frame: &[f32]| {
            if frame_state.state.lock().matched {
                return;
            }
            let Some(frequency) = detector.detect(frame) else {
                return;
            };
            let pitch = tuning::frequency_to_pitch_number(frequency);
            let cents = tuning::pitch_class_distance_cents(pitch, target_pitch);
            let note = tuning::pitch_number_to_note_name(pitch);
            log::debug!(
                "Detected {:.2} Hz → {}, target {}, pitch class diff {:.0} cents",
                frequency,
                note,
                tuning::pitch_number_to_note_name(target_pitch),
                cents
            );

            let mut state = frame_state.state.lock();
            if state.matched {
                return;
            }
            state.last_note = Some(note);
            state.cents = Some(cents);
            if cents.abs() <= tolerance_cents {
                state.matched = true;
                drop(state);
                frame_state.resolved.notify_all();
            }
        }));

        let result = {
            let mut state = shared.state.lock();
            while !state.matched && !cancel.is_cancelled() {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                shared.resolved.wait_until(&mut state, (now + POLL_QUANTUM).min(deadline));
            }
            DetectionResult {
                matched: state.matched,
                detected_note: state.last_note.clone(),
                cents_offset: state.cents,
            }
        };
        drop(subscription);

        if cancel.is_cancelled() && !result.matched {
            log::debug!("Detection cancelled");
        }
        result
    }
}
