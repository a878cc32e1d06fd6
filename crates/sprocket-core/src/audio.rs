//! Audio track and master clock.
//!
//! Each source with audio owns one [`AudioTrack`]: a dedicated thread that
//! pulls decoded samples and blocks on device writes. The control thread
//! talks to it through a mutex-guarded control block and a condvar:
//!
//! - state changes (`play`/`pause`/`stop`) overwrite a flag
//! - seeks go into a single slot; a newer seek replaces an unconsumed one
//! - `close` raises `shutdown` and waits a bounded time for the thread
//!
//! The audio clock is `seek_target + (device_now - device_at_seek)`, read
//! from atomics so the control thread never waits on the audio thread.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use parking_lot::{Condvar, Mutex};

use crate::video::{PlaybackState, VideoError};

/// How long `close` waits for the audio thread to exit.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Consecutive decode errors tolerated before the track gives up.
const MAX_DECODE_ERRORS: u32 = 8;

// =============================================================================
// Errors and collaborator traits
// =============================================================================

#[derive(Debug, Clone)]
pub enum AudioError {
    /// No usable output device
    DeviceUnavailable(String),
    /// The output stream failed to start or write
    StreamFailed(String),
    /// Sample decoding failed
    DecodeFailed(String),
    /// The playback thread could not be started
    ThreadSpawn(String),
}

impl std::fmt::Display for AudioError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudioError::DeviceUnavailable(msg) => write!(f, "Audio device unavailable: {msg}"),
            AudioError::StreamFailed(msg) => write!(f, "Audio stream failed: {msg}"),
            AudioError::DecodeFailed(msg) => write!(f, "Audio decode failed: {msg}"),
            AudioError::ThreadSpawn(msg) => write!(f, "Audio thread spawn failed: {msg}"),
        }
    }
}

impl std::error::Error for AudioError {}

impl From<AudioError> for VideoError {
    fn from(err: AudioError) -> Self {
        VideoError::Generic(err.to_string())
    }
}

/// Interleaved f32 samples with their presentation time.
#[derive(Debug, Clone)]
pub struct AudioSamples {
    pub data: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
    pub pts: Duration,
}

impl AudioSamples {
    /// Number of sample frames (one sample per channel each).
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.data.len() / self.channels as usize
    }
}

/// Decoder for the audio stream of a source.
pub trait AudioStreamDecoder: Send {
    /// Returns the next chunk, or None at end of stream.
    fn decode_next(&mut self) -> Result<Option<AudioSamples>, AudioError>;

    fn seek(&mut self, position: Duration) -> Result<(), AudioError>;
}

/// Output device description, handed to the audio thread and opened there.
///
/// Device streams are frequently tied to the thread that created them, so
/// only this description needs to be `Send`.
pub trait AudioDevice: Send {
    /// Clock the opened output will advance.
    fn clock(&self) -> DeviceClock;

    fn open(self: Box<Self>) -> Result<Box<dyn AudioOutput>, AudioError>;
}

/// An open output stream. Lives on the audio thread only.
pub trait AudioOutput {
    fn start(&mut self) -> Result<(), AudioError>;

    fn pause(&mut self) -> Result<(), AudioError>;

    /// Stops playback and discards queued samples.
    fn flush(&mut self);

    /// Blocks until queued samples have played.
    fn drain(&mut self);

    /// Queues samples, blocking while the device buffer is full.
    fn write(&mut self, samples: &AudioSamples) -> Result<(), AudioError>;

    /// Linear gain, 0.0..=1.0.
    fn set_volume(&mut self, volume: f32);
}

/// Monotonic count of sample frames the device has played.
///
/// The output advances it; everyone else only reads it.
#[derive(Debug, Clone)]
pub struct DeviceClock {
    frames: Arc<AtomicU64>,
    sample_rate: u32,
}

impl DeviceClock {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            frames: Arc::new(AtomicU64::new(0)),
            sample_rate: sample_rate.max(1),
        }
    }

    pub fn advance(&self, frames: u64) {
        self.frames.fetch_add(frames, Ordering::Release);
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn frames_to_secs(&self, frames: u64) -> f64 {
        frames as f64 / self.sample_rate as f64
    }
}

// =============================================================================
// Shared state
// =============================================================================

/// A seek waiting for the audio thread.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeekRequest {
    pub target: Duration,
    pub was_playing: bool,
}

#[derive(Debug)]
struct Control {
    state: PlaybackState,
    pending_seek: Option<SeekRequest>,
    shutdown: bool,
}

struct Shared {
    control: Mutex<Control>,
    wake: Condvar,
    clock: DeviceClock,
    /// Seek target in microseconds
    anchor_us: AtomicU64,
    /// Device frames at the last reposition
    anchor_frames: AtomicU64,
    seeking: AtomicBool,
    /// Set when the stream reached its end
    finished: AtomicBool,
    /// Set when the device failed and the thread exited
    failed: AtomicBool,
    /// f32 bits
    volume: AtomicU32,
}

impl Shared {
    fn set_anchor(&self, target: Duration) {
        self.anchor_us
            .store(target.as_micros() as u64, Ordering::Release);
        self.anchor_frames
            .store(self.clock.frames(), Ordering::Release);
    }

    fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }
}

// =============================================================================
// AudioTrack
// =============================================================================

/// Audio playback thread plus the clock derived from it.
pub struct AudioTrack {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
    /// Disconnects when the thread returns.
    exited: Receiver<()>,
}

impl AudioTrack {
    /// Spawns the playback thread. The track starts stopped at position zero.
    pub fn spawn(
        decoder: Box<dyn AudioStreamDecoder>,
        device: Box<dyn AudioDevice>,
    ) -> Result<Self, AudioError> {
        let shared = Arc::new(Shared {
            control: Mutex::new(Control {
                state: PlaybackState::Stopped,
                pending_seek: None,
                shutdown: false,
            }),
            wake: Condvar::new(),
            clock: device.clock(),
            anchor_us: AtomicU64::new(0),
            anchor_frames: AtomicU64::new(0),
            seeking: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            volume: AtomicU32::new(1.0f32.to_bits()),
        });
        shared.set_anchor(Duration::ZERO);

        let (exit_tx, exited) = crossbeam_channel::bounded::<()>(0);
        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("sprocket-audio".into())
            .spawn(move || {
                let _exit_guard = exit_tx;
                audio_thread_main(thread_shared, decoder, device);
            })
            .map_err(|e| AudioError::ThreadSpawn(e.to_string()))?;

        Ok(Self {
            shared,
            handle: Some(handle),
            exited,
        })
    }

    pub fn play(&self) {
        self.set_state(PlaybackState::Playing);
    }

    pub fn pause(&self) {
        self.set_state(PlaybackState::Paused);
    }

    /// Stops playback and rewinds to zero.
    pub fn stop(&self) {
        let mut ctl = self.shared.control.lock();
        ctl.state = PlaybackState::Stopped;
        self.queue_seek(&mut ctl, Duration::ZERO);
        self.shared.wake.notify_one();
    }

    /// Queues a reposition. Replaces any seek the thread has not consumed.
    pub fn seek(&self, target: Duration) {
        let mut ctl = self.shared.control.lock();
        self.queue_seek(&mut ctl, target);
        self.shared.wake.notify_one();
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.control.lock().state
    }

    /// True between a seek request and the thread finishing the reposition.
    pub fn is_seeking(&self) -> bool {
        self.shared.seeking.load(Ordering::Acquire)
    }

    /// True once the stream reached its end and the device drained.
    pub fn is_finished(&self) -> bool {
        self.shared.finished.load(Ordering::Acquire)
    }

    /// True if the device failed and the thread has exited.
    pub fn has_failed(&self) -> bool {
        self.shared.failed.load(Ordering::Acquire)
    }

    /// Current audio clock, or None after a device failure.
    ///
    /// Approximate while [`is_seeking`](Self::is_seeking) is true.
    pub fn position(&self) -> Option<Duration> {
        if self.has_failed() {
            return None;
        }
        let shared = &self.shared;
        let anchor = Duration::from_micros(shared.anchor_us.load(Ordering::Acquire));
        let at_seek = shared.anchor_frames.load(Ordering::Acquire);
        let played = shared.clock.frames().saturating_sub(at_seek);
        Some(anchor + Duration::from_secs_f64(shared.clock.frames_to_secs(played)))
    }

    pub fn volume(&self) -> f32 {
        self.shared.volume()
    }

    /// Sets linear volume, clamped to 0.0..=1.0.
    pub fn set_volume(&self, volume: f32) {
        let volume = if volume.is_finite() {
            volume.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.shared
            .volume
            .store(volume.to_bits(), Ordering::Relaxed);
        let _ctl = self.shared.control.lock();
        self.shared.wake.notify_one();
    }

    /// Signals the thread to exit and waits up to [`CLOSE_TIMEOUT`].
    ///
    /// Safe to call more than once.
    pub fn close(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        {
            let mut ctl = self.shared.control.lock();
            ctl.shutdown = true;
            ctl.pending_seek = None;
        }
        self.shared.wake.notify_all();

        match self.exited.recv_timeout(CLOSE_TIMEOUT) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if handle.join().is_err() {
                    tracing::error!("Audio thread panicked");
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    "Audio thread did not exit within {:?}; detaching",
                    CLOSE_TIMEOUT
                );
            }
        }
    }

    fn set_state(&self, state: PlaybackState) {
        let mut ctl = self.shared.control.lock();
        ctl.state = state;
        self.shared.wake.notify_one();
    }

    fn queue_seek(&self, ctl: &mut Control, target: Duration) {
        let request = SeekRequest {
            target,
            was_playing: ctl.state == PlaybackState::Playing,
        };
        if let Some(superseded) = ctl.pending_seek.replace(request) {
            tracing::trace!("Audio seek to {:?} superseded", superseded.target);
        }
        self.shared.seeking.store(true, Ordering::Release);
        self.shared.finished.store(false, Ordering::Release);
        // Report the target straight away; the thread re-anchors after flushing.
        self.shared.set_anchor(target);
    }
}

impl Drop for AudioTrack {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for AudioTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioTrack")
            .field("state", &self.state())
            .field("position", &self.position())
            .field("seeking", &self.is_seeking())
            .finish()
    }
}

// =============================================================================
// Playback thread
// =============================================================================

fn audio_thread_main(
    shared: Arc<Shared>,
    decoder: Box<dyn AudioStreamDecoder>,
    device: Box<dyn AudioDevice>,
) {
    let output = match device.open() {
        Ok(output) => output,
        Err(e) => {
            tracing::error!("Failed to open audio output: {}", e);
            shared.failed.store(true, Ordering::Release);
            return;
        }
    };

    let mut player = Playback {
        shared,
        decoder,
        output,
        device_running: false,
        applied_volume: None,
        decode_errors: 0,
    };

    if let Err(e) = player.run() {
        tracing::error!("Audio playback stopped: {}", e);
        player.shared.failed.store(true, Ordering::Release);
    }
    tracing::debug!("Audio thread exiting");
}

struct Playback {
    shared: Arc<Shared>,
    decoder: Box<dyn AudioStreamDecoder>,
    output: Box<dyn AudioOutput>,
    device_running: bool,
    applied_volume: Option<f32>,
    decode_errors: u32,
}

impl Playback {
    fn run(&mut self) -> Result<(), AudioError> {
        loop {
            let (state, seek) = {
                let mut ctl = self.shared.control.lock();
                if ctl.shutdown {
                    break;
                }
                (ctl.state, ctl.pending_seek.take())
            };

            self.apply_volume();

            if let Some(request) = seek {
                self.reposition(request)?;
            }

            match state {
                PlaybackState::Playing if !self.shared.finished.load(Ordering::Acquire) => {
                    if !self.device_running {
                        self.output.start()?;
                        self.device_running = true;
                    }
                    self.pump()?;
                }
                _ => {
                    if self.device_running {
                        self.output.pause()?;
                        self.device_running = false;
                    }
                    self.wait_for_change(state);
                }
            }
        }

        self.output.flush();
        Ok(())
    }

    /// Sleeps until the control block changes from what this iteration saw.
    fn wait_for_change(&self, seen: PlaybackState) {
        let mut ctl = self.shared.control.lock();
        let volume_seen = self.applied_volume;
        while !ctl.shutdown
            && ctl.pending_seek.is_none()
            && ctl.state == seen
            && volume_seen == Some(self.shared.volume())
            && (seen != PlaybackState::Playing || self.shared.finished.load(Ordering::Acquire))
        {
            self.shared.wake.wait(&mut ctl);
        }
    }

    fn apply_volume(&mut self) {
        let volume = self.shared.volume();
        if self.applied_volume != Some(volume) {
            self.output.set_volume(volume);
            self.applied_volume = Some(volume);
        }
    }

    fn reposition(&mut self, request: SeekRequest) -> Result<(), AudioError> {
        self.output.flush();
        self.device_running = false;

        if let Err(e) = self.decoder.seek(request.target) {
            tracing::warn!("Audio seek to {:?} failed: {}", request.target, e);
        }
        self.shared.set_anchor(request.target);
        self.shared.finished.store(false, Ordering::Release);
        self.decode_errors = 0;

        if request.was_playing {
            self.output.start()?;
            self.device_running = true;
        }

        // A newer request may have landed while we were busy.
        let ctl = self.shared.control.lock();
        if ctl.pending_seek.is_none() {
            self.shared.seeking.store(false, Ordering::Release);
        }
        tracing::debug!("Audio repositioned to {:?}", request.target);
        Ok(())
    }

    /// Decodes and writes one chunk.
    fn pump(&mut self) -> Result<(), AudioError> {
        match self.decoder.decode_next() {
            Ok(Some(samples)) => {
                self.decode_errors = 0;
                self.output.write(&samples)
            }
            Ok(None) => {
                tracing::debug!("Audio: end of stream");
                self.output.drain();
                self.device_running = false;
                let mut ctl = self.shared.control.lock();
                if ctl.state == PlaybackState::Playing && ctl.pending_seek.is_none() {
                    ctl.state = PlaybackState::Stopped;
                }
                self.shared.finished.store(true, Ordering::Release);
                Ok(())
            }
            Err(e) => {
                self.decode_errors += 1;
                tracing::warn!(
                    "Audio decode error ({}/{}): {}",
                    self.decode_errors,
                    MAX_DECODE_ERRORS,
                    e
                );
                if self.decode_errors >= MAX_DECODE_ERRORS {
                    return Err(e);
                }
                thread::sleep(Duration::from_millis(10));
                Ok(())
            }
        }
    }
}
