//! Audio output through cpal.
//!
//! The audio thread pushes interleaved f32 samples into a bounded queue; the
//! cpal callback pops them, applies volume, and advances the
//! [`DeviceClock`] by the frames it actually played. Silence emitted on
//! underrun or while paused does not move the clock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample};
use parking_lot::{Condvar, Mutex};

use crate::audio::{AudioDevice, AudioError, AudioOutput, AudioSamples, DeviceClock};

/// Queued audio beyond which `write` blocks.
const QUEUE_SECONDS: f64 = 0.2;

/// How long `write` or `drain` may wait on a device that stopped pulling.
const STALL_TIMEOUT: Duration = Duration::from_secs(2);

struct SharedQueue {
    samples: Mutex<VecDeque<f32>>,
    space: Condvar,
    playing: AtomicBool,
    /// f32 bits
    volume: AtomicU32,
}

/// The default output device, not yet opened.
pub struct CpalDevice {
    clock: DeviceClock,
    channels: u16,
}

impl CpalDevice {
    /// Queries the default output device's sample rate and channel count.
    pub fn default_output() -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| AudioError::DeviceUnavailable("no default output device".into()))?;
        let config = device
            .default_output_config()
            .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?;

        Ok(Self {
            clock: DeviceClock::new(config.sample_rate().0),
            channels: config.channels(),
        })
    }

    /// Rate decoders should produce samples at.
    pub fn sample_rate(&self) -> u32 {
        self.clock.sample_rate()
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }
}

impl AudioDevice for CpalDevice {
    fn clock(&self) -> DeviceClock {
        self.clock.clone()
    }

    fn open(self: Box<Self>) -> Result<Box<dyn AudioOutput>, AudioError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| AudioError::DeviceUnavailable("no default output device".into()))?;
        let supported = device
            .default_output_config()
            .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?;
        let config: cpal::StreamConfig = supported.config();

        if config.sample_rate.0 != self.clock.sample_rate() {
            return Err(AudioError::DeviceUnavailable(format!(
                "default device changed rate ({} Hz, expected {} Hz)",
                config.sample_rate.0,
                self.clock.sample_rate()
            )));
        }

        let shared = Arc::new(SharedQueue {
            samples: Mutex::new(VecDeque::new()),
            space: Condvar::new(),
            playing: AtomicBool::new(false),
            volume: AtomicU32::new(1.0f32.to_bits()),
        });

        let stream = match supported.sample_format() {
            SampleFormat::F32 => build_stream::<f32>(&device, &config, &shared, &self.clock),
            SampleFormat::I16 => build_stream::<i16>(&device, &config, &shared, &self.clock),
            SampleFormat::U16 => build_stream::<u16>(&device, &config, &shared, &self.clock),
            SampleFormat::I32 => build_stream::<i32>(&device, &config, &shared, &self.clock),
            other => Err(AudioError::DeviceUnavailable(format!(
                "unsupported sample format {other:?}"
            ))),
        }?;

        tracing::info!(
            "Audio output opened (cpal, {}Hz, {}ch)",
            config.sample_rate.0,
            config.channels
        );

        let capacity =
            (QUEUE_SECONDS * config.sample_rate.0 as f64) as usize * config.channels as usize;
        Ok(Box::new(CpalOutput {
            stream,
            shared,
            channels: config.channels,
            capacity,
            sample_rate: config.sample_rate.0,
            warned_rate: false,
        }))
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    shared: &Arc<SharedQueue>,
    clock: &DeviceClock,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + FromSample<f32>,
{
    let shared = Arc::clone(shared);
    let clock = clock.clone();
    let channels = config.channels.max(1) as usize;

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let zero = T::from_sample(0.0f32);
                if !shared.playing.load(Ordering::Acquire) {
                    data.fill(zero);
                    return;
                }

                let volume = f32::from_bits(shared.volume.load(Ordering::Relaxed));
                let mut queue = shared.samples.lock();
                let available = queue.len() / channels;
                let frames = (data.len() / channels).min(available);
                let (played, silent) = data.split_at_mut(frames * channels);
                for (out, sample) in played.iter_mut().zip(queue.drain(..frames * channels)) {
                    *out = T::from_sample(sample * volume);
                }
                silent.fill(zero);
                drop(queue);

                if frames > 0 {
                    clock.advance(frames as u64);
                    shared.space.notify_one();
                }
            },
            |err| tracing::error!("cpal stream error: {}", err),
            None,
        )
        .map_err(|e| AudioError::StreamFailed(e.to_string()))
}

/// An open cpal stream fed from a bounded queue.
pub struct CpalOutput {
    stream: cpal::Stream,
    shared: Arc<SharedQueue>,
    channels: u16,
    capacity: usize,
    sample_rate: u32,
    warned_rate: bool,
}

impl CpalOutput {
    /// Maps interleaved input onto the device's channel count.
    fn remix(&self, samples: &AudioSamples) -> Vec<f32> {
        let src = samples.channels.max(1) as usize;
        let dst = self.channels.max(1) as usize;
        if src == dst {
            return samples.data.clone();
        }

        let mut out = Vec::with_capacity(samples.frames() * dst);
        for frame in samples.data.chunks_exact(src) {
            let mono = frame.iter().sum::<f32>() / src as f32;
            for ch in 0..dst {
                out.push(frame.get(ch).copied().unwrap_or(mono));
            }
        }
        out
    }
}

impl AudioOutput for CpalOutput {
    fn start(&mut self) -> Result<(), AudioError> {
        self.shared.playing.store(true, Ordering::Release);
        self.stream
            .play()
            .map_err(|e| AudioError::StreamFailed(e.to_string()))
    }

    fn pause(&mut self) -> Result<(), AudioError> {
        self.shared.playing.store(false, Ordering::Release);
        self.stream
            .pause()
            .map_err(|e| AudioError::StreamFailed(e.to_string()))
    }

    fn flush(&mut self) {
        self.shared.playing.store(false, Ordering::Release);
        if let Err(e) = self.stream.pause() {
            tracing::warn!("cpal pause during flush failed: {}", e);
        }
        self.shared.samples.lock().clear();
        self.shared.space.notify_all();
    }

    fn drain(&mut self) {
        let deadline = Instant::now() + STALL_TIMEOUT;
        let mut queue = self.shared.samples.lock();
        while !queue.is_empty() {
            if self.shared.space.wait_until(&mut queue, deadline).timed_out() {
                tracing::warn!("Audio drain timed out with {} samples queued", queue.len());
                queue.clear();
                break;
            }
        }
        drop(queue);
        self.shared.playing.store(false, Ordering::Release);
    }

    fn write(&mut self, samples: &AudioSamples) -> Result<(), AudioError> {
        if samples.sample_rate != self.sample_rate && !self.warned_rate {
            tracing::warn!(
                "Audio samples at {}Hz written to {}Hz device; pitch will be off",
                samples.sample_rate,
                self.sample_rate
            );
            self.warned_rate = true;
        }

        let data = self.remix(samples);
        let deadline = Instant::now() + STALL_TIMEOUT;
        let mut queue = self.shared.samples.lock();
        while !queue.is_empty() && queue.len() + data.len() > self.capacity {
            if self.shared.space.wait_until(&mut queue, deadline).timed_out() {
                return Err(AudioError::StreamFailed(
                    "output device stopped consuming samples".into(),
                ));
            }
        }
        queue.extend(data);
        Ok(())
    }

    fn set_volume(&mut self, volume: f32) {
        self.shared
            .volume
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }
}
