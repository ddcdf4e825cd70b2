//! # Audio Device Module
//!
//! Connects the core to real hardware through CPAL (Cross-Platform Audio
//! Library).
//!
//! ## Capture
//! The input callback neither allocates nor locks: it downmixes each incoming
//! sample to mono and pushes it into a pre-sized `rtrb` ring, counting the
//! samples that do not fit. A dispatcher thread drains the ring into a reused
//! frame buffer and publishes every full frame to a [`FrameBus`], where
//! detection sessions subscribe.
//!
//! ## Playback
//! The output callback asks a shared [`Mixer`] to render the next buffer.
//!
//! Both streams stop when their handle is dropped.

use crate::capture::{CaptureSource, FrameBus};
use crate::error::AudioError;
use crate::playback::Mixer;
use anyhow::Result;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SupportedStreamConfigRange;
use rtrb::{Consumer, Producer, RingBuffer};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Preferred sample rate for both directions.
pub const TARGET_SAMPLE_RATE: u32 = 44_100;

/// Frames of samples held between the capture callback and the dispatcher.
/// When the dispatcher falls this far behind, new samples are dropped.
const FRAME_QUEUE_LEN: usize = 8;

/// Dispatcher sleep while the ring is empty.
const DISPATCH_POLL: Duration = Duration::from_millis(5);

/// Picks the input device whose name contains `name`, or the default one.
pub fn select_input_device(host: &cpal::Host, name: Option<&str>) -> Result<cpal::Device, AudioError> {
    match name {
        None => host.default_input_device().ok_or(AudioError::NoDevice("input")),
        Some(wanted) => {
            for device in host.input_devices()? {
                if device.name()?.contains(wanted) {
                    return Ok(device);
                }
            }
            Err(AudioError::DeviceNotFound {
                kind: "input",
                name: wanted.to_string(),
            })
        }
    }
}

pub fn select_output_device(host: &cpal::Host) -> Result<cpal::Device, AudioError> {
    host.default_output_device().ok_or(AudioError::NoDevice("output"))
}

/// Names of every input device on the default host.
pub fn list_input_devices() -> Result<Vec<String>, AudioError> {
    let host = cpal::default_host();
    let mut names = Vec::new();
    for device in host.input_devices()? {
        names.push(device.name()?);
    }
    Ok(names)
}

/// A running input stream feeding a [`FrameBus`].
pub struct CaptureHandle {
    stream: Option<cpal::Stream>,
    dispatcher: Option<JoinHandle<()>>,
    bus: FrameBus,
    frame_len: usize,
}

impl CaptureHandle {
    /// The bus live frames are published on.
    pub fn bus(&self) -> &FrameBus {
        &self.bus
    }

    pub fn sample_rate(&self) -> u32 {
        self.bus.sample_rate()
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        // Dropping the stream drops the callback and with it the ring producer,
        // which ends the dispatcher loop.
        self.stream.take();
        if let Some(dispatcher) = self.dispatcher.take() {
            if dispatcher.join().is_err() {
                log::error!("Frame dispatcher panicked");
            }
        }
    }
}

/// Starts capturing from the input device matching `device_name` (or the
/// default device) in frames of `frame_duration_ms`.
///
/// Multi-channel input is averaged down to mono.
pub fn start_capture(device_name: Option<&str>, frame_duration_ms: f32) -> Result<CaptureHandle> {
    let host = cpal::default_host();
    let device = select_input_device(&host, device_name)?;
    log::info!("Using audio input device: {}", device.name()?);

    let configs = device.supported_input_configs()?.collect::<Vec<_>>();
    let supported = find_supported_config(configs, TARGET_SAMPLE_RATE)
        .ok_or(AudioError::NoSupportedFormat("input"))?;
    let sample_rate = clamp_rate(&supported, TARGET_SAMPLE_RATE);
    let config: cpal::StreamConfig = supported.with_sample_rate(cpal::SampleRate(sample_rate)).into();
    let channels = config.channels.max(1) as usize;
    let frame_len = ((sample_rate as f32 * frame_duration_ms / 1000.0) as usize).max(1);
    log::info!(
        "Capture: {} Hz, {} channel(s), {} samples per frame",
        sample_rate,
        channels,
        frame_len
    );

    let bus = FrameBus::new(sample_rate);
    let (mut producer, consumer) = RingBuffer::new(frame_len * FRAME_QUEUE_LEN);
    let dropped = Arc::new(AtomicU64::new(0));
    let callback_dropped = dropped.clone();

    let stream = device.build_input_stream(
        &config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            push_samples(&mut producer, data, channels, &callback_dropped)
        },
        |err| log::warn!("Input stream error: {}", err),
        None,
    )?;

    let dispatch_bus = bus.clone();
    let dispatcher = thread::Builder::new()
        .name("frame-dispatch".into())
        .spawn(move || dispatch_frames(consumer, frame_len, dispatch_bus, dropped))?;

    stream.play().map_err(AudioError::from)?;

    Ok(CaptureHandle {
        stream: Some(stream),
        dispatcher: Some(dispatcher),
        bus,
        frame_len,
    })
}

/// Downmixes interleaved `data` to mono and pushes it into the ring. Runs on
/// the audio callback, so a full ring only bumps `dropped`.
fn push_samples(producer: &mut Producer<f32>, data: &[f32], channels: usize, dropped: &AtomicU64) {
    for frame in data.chunks(channels) {
        let sample = frame.iter().sum::<f32>() / frame.len() as f32;
        if producer.push(sample).is_err() {
            dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Cuts the ring into frames of `frame_len` and publishes them until the
/// producer is gone and the ring is empty. A trailing partial frame is discarded.
fn dispatch_frames(mut samples: Consumer<f32>, frame_len: usize, bus: FrameBus, dropped: Arc<AtomicU64>) {
    let mut frame = Vec::with_capacity(frame_len);
    let mut reported = 0u64;
    loop {
        let abandoned = samples.is_abandoned();
        while let Ok(sample) = samples.pop() {
            frame.push(sample);
            if frame.len() == frame_len {
                bus.publish(&frame);
                frame.clear();
            }
        }

        let lost = dropped.load(Ordering::Relaxed);
        if lost > reported {
            if lost.checked_ilog2() != reported.checked_ilog2() {
                log::warn!("Frame dispatcher behind, {} samples dropped", lost);
            }
            reported = lost;
        }

        if abandoned {
            break;
        }
        thread::sleep(DISPATCH_POLL);
    }
    log::debug!("Frame dispatcher finished");
}

/// A running output stream rendering a [`Mixer`].
pub struct PlaybackHandle {
    _stream: cpal::Stream,
    sample_rate: u32,
}

impl PlaybackHandle {
    /// Output rate; cue sounds must be prepared at this rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Starts the default output device rendering `mixer`.
pub fn start_playback(mixer: Arc<Mixer>) -> Result<PlaybackHandle> {
    let host = cpal::default_host();
    let device = select_output_device(&host)?;
    log::info!("Using audio output device: {}", device.name()?);

    let configs = device.supported_output_configs()?.collect::<Vec<_>>();
    let supported = find_supported_config(configs, TARGET_SAMPLE_RATE)
        .ok_or(AudioError::NoSupportedFormat("output"))?;
    let sample_rate = clamp_rate(&supported, TARGET_SAMPLE_RATE);
    let config: cpal::StreamConfig = supported.with_sample_rate(cpal::SampleRate(sample_rate)).into();
    let channels = config.channels as usize;
    log::info!("Playback: {} Hz, {} channel(s)", sample_rate, channels);

    let stream = device.build_output_stream(
        &config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| mixer.render(data, channels),
        |err| log::warn!("Output stream error: {}", err),
        None,
    )?;
    stream.play().map_err(AudioError::from)?;

    Ok(PlaybackHandle {
        _stream: stream,
        sample_rate,
    })
}

/// Picks the f32 configuration closest to `target_rate`, preferring mono and
/// then stereo layouts.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| c.sample_format() == cpal::SampleFormat::F32)
        .min_by_key(|c| {
            let rate_diff = (clamp_rate(c, target_rate) as i64 - target_rate as i64).abs();
            (c.channels().min(3), rate_diff)
        })
}

fn clamp_rate(config: &SupportedStreamConfigRange, target_rate: u32) -> u32 {
    target_rate.clamp(config.min_sample_rate().0, config.max_sample_rate().0)
}
