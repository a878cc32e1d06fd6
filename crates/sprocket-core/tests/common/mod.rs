//! Fake collaborators shared by the integration tests.
//!
//! Every GPU resource, decoder and audio output logs its drop into an
//! [`Events`] list so tests can check release order and count leaks.

#![allow(dead_code)]

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use sprocket_core::audio::{AudioSamples, DeviceClock};
use sprocket_core::cascade::AudioParts;
use sprocket_core::{
    AudioDevice, AudioError, AudioOutput, AudioStreamDecoder, BindOutcome, CpuFrame,
    DecodedFrame, DecoderBackends, FrameBinder, HwAccelKind, HwFrame, PixelFormat, RawDecoder,
    RenderContext, TextureInfo, TextureKind, VideoError, VideoFrame, VideoMetadata, WrappedImage,
    ZeroCopyError,
};

pub const SAMPLE_RATE: u32 = 48_000;

// =============================================================================
// Drop log
// =============================================================================

#[derive(Clone, Default)]
pub struct Events(Arc<Mutex<Vec<&'static str>>>);

impl Events {
    pub fn push(&self, event: &'static str) {
        self.0.lock().push(event);
    }

    pub fn snapshot(&self) -> Vec<&'static str> {
        self.0.lock().clone()
    }

    pub fn count(&self, event: &'static str) -> usize {
        self.0.lock().iter().filter(|e| **e == event).count()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

/// Logs `name` when dropped.
pub struct Tracked {
    name: &'static str,
    events: Events,
}

impl Tracked {
    pub fn new(name: &'static str, events: &Events) -> Self {
        Self {
            name,
            events: events.clone(),
        }
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.events.push(self.name);
    }
}

/// Routes engine logs to the test harness; set `RUST_LOG` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    false
}

pub fn tick(fps: f64) -> Duration {
    Duration::from_secs_f64(1.0 / fps)
}

// =============================================================================
// Video decoder
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Cpu,
    HardwareRgba,
    HardwareNv12,
}

pub struct FakeDecoder {
    metadata: VideoMetadata,
    kind: FrameKind,
    next_index: u64,
    frame_count: u64,
    events: Events,
    decoded: Arc<AtomicUsize>,
    /// Every seek errors and leaves the read position alone
    seek_fails: bool,
    /// This frame index errors once and is lost
    fail_at: Option<u64>,
}

impl FakeDecoder {
    pub fn new(fps: f32, seconds: f64, kind: FrameKind, has_audio: bool, events: &Events) -> Self {
        Self {
            metadata: VideoMetadata {
                width: 64,
                height: 36,
                duration: Some(Duration::from_secs_f64(seconds)),
                frame_rate: fps,
                codec: "fake".into(),
                has_audio,
            },
            kind,
            next_index: 0,
            frame_count: (seconds * fps as f64).round() as u64,
            events: events.clone(),
            decoded: Arc::new(AtomicUsize::new(0)),
            seek_fails: false,
            fail_at: None,
        }
    }

    pub fn decoded_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.decoded)
    }

    fn frame(&self, index: u64) -> DecodedFrame {
        let (w, h) = (self.metadata.width, self.metadata.height);
        match self.kind {
            FrameKind::Cpu => DecodedFrame::Cpu(CpuFrame::new(
                PixelFormat::Rgba,
                w,
                h,
                vec![sprocket_core::video::Plane {
                    data: vec![index as u8; (w * h * 4) as usize],
                    stride: (w * 4) as usize,
                }],
            )),
            FrameKind::HardwareRgba => DecodedFrame::Hardware(HwFrame::new(
                index,
                w,
                h,
                PixelFormat::Rgba,
                Arc::new(index),
            )),
            FrameKind::HardwareNv12 => DecodedFrame::Hardware(HwFrame::new(
                index,
                w,
                h,
                PixelFormat::Nv12,
                Arc::new(index),
            )),
        }
    }
}

impl RawDecoder for FakeDecoder {
    fn decode_next(&mut self) -> Result<Option<VideoFrame>, VideoError> {
        if self.next_index >= self.frame_count {
            return Ok(None);
        }
        let index = self.next_index;
        self.next_index += 1;
        if self.fail_at == Some(index) {
            return Err(VideoError::DecodeFailed(format!("corrupt frame {index}")));
        }
        self.decoded.fetch_add(1, Ordering::SeqCst);
        let pts = Duration::from_secs_f64(index as f64 / self.metadata.frame_rate as f64);
        Ok(Some(VideoFrame::new(pts, self.frame(index))))
    }

    fn seek(&mut self, position: Duration) -> Result<(), VideoError> {
        if self.seek_fails {
            return Err(VideoError::SeekFailed(format!("cannot seek to {position:?}")));
        }
        let index = (position.as_secs_f64() * self.metadata.frame_rate as f64 + 1e-9).floor();
        self.next_index = (index as u64).min(self.frame_count);
        Ok(())
    }

    fn metadata(&self) -> &VideoMetadata {
        &self.metadata
    }
}

impl Drop for FakeDecoder {
    fn drop(&mut self) {
        self.events.push("decoder");
    }
}

// =============================================================================
// Binder and render context
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinderMode {
    /// Creates one texture, then updates it in place
    InPlace,
    /// Returns a new texture for every frame
    Replacing,
    /// Errors on every bind
    Failing,
    /// Returns `Declined` on every bind
    Declining,
    /// Reports the surface type as unsupported
    Unsupported,
}

pub struct FakeBinder {
    mode: BinderMode,
    events: Events,
    calls: Arc<AtomicUsize>,
    next_id: u64,
}

impl FakeBinder {
    pub fn new(mode: BinderMode, events: &Events, calls: Arc<AtomicUsize>) -> Self {
        Self {
            mode,
            events: events.clone(),
            calls,
            next_id: 0,
        }
    }

    fn texture(&mut self, frame: &HwFrame) -> TextureInfo {
        self.next_id += 1;
        TextureInfo::new(
            TextureKind::for_format(frame.format),
            frame.width,
            frame.height,
            self.next_id,
            Tracked::new("texture", &self.events),
        )
    }
}

impl FrameBinder for FakeBinder {
    fn bind(
        &mut self,
        frame: &HwFrame,
        texture: Option<&mut TextureInfo>,
    ) -> Result<BindOutcome, ZeroCopyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            BinderMode::InPlace => match texture {
                Some(_) => Ok(BindOutcome::Updated),
                None => Ok(BindOutcome::Replaced(self.texture(frame))),
            },
            BinderMode::Replacing => Ok(BindOutcome::Replaced(self.texture(frame))),
            BinderMode::Failing => Err(ZeroCopyError::ImportFailed("fake import failure".into())),
            BinderMode::Declining => Ok(BindOutcome::Declined),
            BinderMode::Unsupported => Err(ZeroCopyError::UnsupportedBackend(format!(
                "{:?} surfaces",
                frame.format
            ))),
        }
    }

    fn name(&self) -> &str {
        "fake-binder"
    }
}

impl Drop for FakeBinder {
    fn drop(&mut self) {
        self.events.push("binder");
    }
}

#[derive(Default)]
pub struct FakeContext {
    pub events: Events,
    pub uploads: usize,
    pub wraps: usize,
    pub conversions: usize,
    next_id: u64,
}

impl FakeContext {
    pub fn new(events: &Events) -> Self {
        Self {
            events: events.clone(),
            ..Self::default()
        }
    }
}

impl RenderContext for FakeContext {
    fn upload(
        &mut self,
        frame: &CpuFrame,
        cached: Option<&mut TextureInfo>,
    ) -> Result<BindOutcome, ZeroCopyError> {
        self.uploads += 1;
        match cached {
            Some(tex) if tex.width == frame.width && tex.height == frame.height => {
                Ok(BindOutcome::Updated)
            }
            _ => {
                self.next_id += 1;
                Ok(BindOutcome::Replaced(TextureInfo::new(
                    TextureKind::for_format(frame.format),
                    frame.width,
                    frame.height,
                    self.next_id,
                    Tracked::new("texture", &self.events),
                )))
            }
        }
    }

    fn wrap(&mut self, texture: &TextureInfo) -> Result<WrappedImage, ZeroCopyError> {
        self.wraps += 1;
        let resource: Arc<dyn Any + Send + Sync> = Arc::new(Tracked::new("image", &self.events));
        Ok(WrappedImage::new(
            texture.width,
            texture.height,
            texture.id,
            resource,
        ))
    }

    fn convert_biplanar(&mut self, texture: &TextureInfo) -> Result<TextureInfo, ZeroCopyError> {
        self.conversions += 1;
        self.next_id += 1;
        Ok(TextureInfo::new(
            TextureKind::Packed(PixelFormat::Rgba),
            texture.width,
            texture.height,
            self.next_id,
            Tracked::new("transient", &self.events),
        ))
    }
}

// =============================================================================
// Audio
// =============================================================================

/// Silence in 10ms chunks.
pub struct FakeAudioDecoder {
    next_frame: u64,
    total_frames: u64,
}

impl FakeAudioDecoder {
    pub fn new(seconds: f64) -> Self {
        Self {
            next_frame: 0,
            total_frames: (seconds * SAMPLE_RATE as f64) as u64,
        }
    }
}

impl AudioStreamDecoder for FakeAudioDecoder {
    fn decode_next(&mut self) -> Result<Option<AudioSamples>, AudioError> {
        if self.next_frame >= self.total_frames {
            return Ok(None);
        }
        let chunk = (SAMPLE_RATE as u64 / 100).min(self.total_frames - self.next_frame);
        let pts = Duration::from_secs_f64(self.next_frame as f64 / SAMPLE_RATE as f64);
        self.next_frame += chunk;
        Ok(Some(AudioSamples {
            data: vec![0.0; chunk as usize * 2],
            sample_rate: SAMPLE_RATE,
            channels: 2,
            pts,
        }))
    }

    fn seek(&mut self, position: Duration) -> Result<(), AudioError> {
        self.next_frame =
            ((position.as_secs_f64() * SAMPLE_RATE as f64) as u64).min(self.total_frames);
        Ok(())
    }
}

/// Device whose clock only moves when the test advances it.
pub struct FakeAudioDevice {
    pub clock: DeviceClock,
    pub fail_open: bool,
    pub events: Events,
}

impl AudioDevice for FakeAudioDevice {
    fn clock(&self) -> DeviceClock {
        self.clock.clone()
    }

    fn open(self: Box<Self>) -> Result<Box<dyn AudioOutput>, AudioError> {
        if self.fail_open {
            return Err(AudioError::DeviceUnavailable("fake device unplugged".into()));
        }
        Ok(Box::new(FakeAudioOutput {
            clock: self.clock.clone(),
            queued: self.clock.frames(),
            events: self.events.clone(),
        }))
    }
}

/// Buffers up to 100ms ahead of the clock, like a real device would.
pub struct FakeAudioOutput {
    clock: DeviceClock,
    /// Frames written, in device clock units
    queued: u64,
    events: Events,
}

impl FakeAudioOutput {
    const CAPACITY: u64 = SAMPLE_RATE as u64 / 10;
}

impl AudioOutput for FakeAudioOutput {
    fn start(&mut self) -> Result<(), AudioError> {
        Ok(())
    }

    fn pause(&mut self) -> Result<(), AudioError> {
        Ok(())
    }

    fn flush(&mut self) {
        self.queued = self.clock.frames();
    }

    fn drain(&mut self) {}

    fn write(&mut self, samples: &AudioSamples) -> Result<(), AudioError> {
        self.queued += samples.frames() as u64;
        let deadline = Instant::now() + Duration::from_millis(50);
        while self.queued.saturating_sub(self.clock.frames()) > Self::CAPACITY
            && Instant::now() < deadline
        {
            thread::sleep(Duration::from_millis(1));
        }
        Ok(())
    }

    fn set_volume(&mut self, _volume: f32) {}
}

impl Drop for FakeAudioOutput {
    fn drop(&mut self) {
        self.events.push("audio");
    }
}

// =============================================================================
// Backends
// =============================================================================

pub struct FakeBackends {
    pub events: Events,
    pub fps: f32,
    pub seconds: f64,
    pub hw_kind: HwAccelKind,
    /// `None`: no binder for this platform
    pub binder: Option<BinderMode>,
    pub zero_copy_ok: bool,
    pub hardware_ok: bool,
    pub software_ok: bool,
    /// Kind of frames the zero-copy decoder emits
    pub surface: FrameKind,
    /// Audio stream length; `None` for a silent container
    pub audio_seconds: Option<f64>,
    pub audio_fails: bool,
    pub seek_fails: bool,
    pub decode_fails_at: Option<u64>,
    pub clock: DeviceClock,
    pub binder_calls: Arc<AtomicUsize>,
    pub attempts: Mutex<Vec<&'static str>>,
}

impl FakeBackends {
    /// Software-only 30fps source of `seconds`, no audio.
    pub fn software(seconds: f64) -> Self {
        Self {
            events: Events::default(),
            fps: 30.0,
            seconds,
            hw_kind: HwAccelKind::None,
            binder: None,
            zero_copy_ok: false,
            hardware_ok: false,
            software_ok: true,
            surface: FrameKind::HardwareRgba,
            audio_seconds: None,
            audio_fails: false,
            seek_fails: false,
            decode_fails_at: None,
            clock: DeviceClock::new(SAMPLE_RATE),
            binder_calls: Arc::new(AtomicUsize::new(0)),
            attempts: Mutex::new(Vec::new()),
        }
    }

    /// Hardware platform where every stage can succeed.
    pub fn hardware(seconds: f64, binder: BinderMode) -> Self {
        Self {
            hw_kind: HwAccelKind::Vaapi,
            binder: Some(binder),
            zero_copy_ok: true,
            hardware_ok: true,
            ..Self::software(seconds)
        }
    }

    pub fn with_audio(mut self, seconds: f64) -> Self {
        self.audio_seconds = Some(seconds);
        self
    }

    pub fn attempts(&self) -> Vec<&'static str> {
        self.attempts.lock().clone()
    }

    fn record(&self, stage: &'static str) {
        self.attempts.lock().push(stage);
    }

    fn decoder(&self, kind: FrameKind) -> Box<dyn RawDecoder> {
        let mut decoder = FakeDecoder::new(
            self.fps,
            self.seconds,
            kind,
            self.audio_seconds.is_some(),
            &self.events,
        );
        decoder.seek_fails = self.seek_fails;
        decoder.fail_at = self.decode_fails_at;
        Box::new(decoder)
    }
}

impl DecoderBackends for FakeBackends {
    fn detect_hw_accel(&self, _path: &str) -> HwAccelKind {
        self.hw_kind
    }

    fn resolve_binder(
        &self,
        _path: &str,
        _kind: HwAccelKind,
    ) -> Result<Option<Box<dyn FrameBinder>>, VideoError> {
        self.record("binder");
        Ok(self.binder.map(|mode| {
            Box::new(FakeBinder::new(
                mode,
                &self.events,
                Arc::clone(&self.binder_calls),
            )) as Box<dyn FrameBinder>
        }))
    }

    fn open_zero_copy(
        &self,
        _path: &str,
        _kind: HwAccelKind,
    ) -> Result<Box<dyn RawDecoder>, VideoError> {
        self.record("zero-copy");
        if !self.zero_copy_ok {
            return Err(VideoError::DecoderInit("zero-copy decoder refused".into()));
        }
        Ok(self.decoder(self.surface))
    }

    fn open_hardware(
        &self,
        _path: &str,
        _kind: HwAccelKind,
    ) -> Result<Box<dyn RawDecoder>, VideoError> {
        self.record("hardware");
        if !self.hardware_ok {
            return Err(VideoError::DecoderInit("hardware decoder refused".into()));
        }
        Ok(self.decoder(FrameKind::Cpu))
    }

    fn open_software(&self, _path: &str) -> Result<Box<dyn RawDecoder>, VideoError> {
        self.record("software");
        if !self.software_ok {
            return Err(VideoError::DecoderInit("software decoder refused".into()));
        }
        Ok(self.decoder(FrameKind::Cpu))
    }

    fn open_audio(&self, _path: &str) -> Result<Option<AudioParts>, AudioError> {
        let Some(seconds) = self.audio_seconds else {
            return Ok(None);
        };
        Ok(Some((
            Box::new(FakeAudioDecoder::new(seconds)),
            Box::new(FakeAudioDevice {
                clock: self.clock.clone(),
                fail_open: self.audio_fails,
                events: self.events.clone(),
            }),
        )))
    }
}
