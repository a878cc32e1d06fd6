//! Synthetic gradient video and sine-tone audio.
//!
//! Paths of the form `pattern:WIDTHxHEIGHT@FPS:SECONDS` (e.g.
//! `pattern:640x360@30:10`) open a [`TestPatternDecoder`]. Every field after
//! `pattern:` is optional and falls back to 1280x720, 30fps, 10 seconds.
//! Useful for headless runs and for exercising the renderer without media.

use std::time::Duration;

use crate::audio::{AudioError, AudioSamples, AudioStreamDecoder};
use crate::cascade::DecoderBackends;
use crate::texture::FrameBinder;
use crate::video::{
    CpuFrame, DecodedFrame, HwAccelKind, PixelFormat, Plane, RawDecoder, VideoError, VideoFrame,
    VideoMetadata, MIN_FRAME_RATE,
};

pub const PATTERN_PREFIX: &str = "pattern:";

/// Highest frame rate a pattern path may ask for.
pub const MAX_PATTERN_FPS: f32 = 1000.0;

/// Parsed `pattern:` path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatternSpec {
    pub width: u32,
    pub height: u32,
    pub fps: f32,
    pub duration: Duration,
}

impl Default for PatternSpec {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 30.0,
            duration: Duration::from_secs(10),
        }
    }
}

impl PatternSpec {
    pub fn parse(path: &str) -> Result<Self, VideoError> {
        let rest = path
            .strip_prefix(PATTERN_PREFIX)
            .ok_or_else(|| VideoError::OpenFailed(format!("{path} is not a pattern path")))?;
        let bad = || VideoError::OpenFailed(format!("malformed pattern path: {path}"));

        let mut spec = Self::default();
        let (geometry, seconds) = match rest.split_once(':') {
            Some((g, s)) => (g, Some(s)),
            None => (rest, None),
        };
        let (size, fps) = match geometry.split_once('@') {
            Some((size, fps)) => (size, Some(fps)),
            None => (geometry, None),
        };

        if !size.is_empty() {
            let (w, h) = size.split_once('x').ok_or_else(bad)?;
            spec.width = w.parse().map_err(|_| bad())?;
            spec.height = h.parse().map_err(|_| bad())?;
        }
        if let Some(fps) = fps {
            spec.fps = fps.parse().map_err(|_| bad())?;
        }
        if let Some(seconds) = seconds {
            let seconds: f64 = seconds.parse().map_err(|_| bad())?;
            spec.duration = Duration::try_from_secs_f64(seconds).map_err(|_| bad())?;
        }

        if spec.width == 0 || spec.height == 0 {
            return Err(bad());
        }
        if !(MIN_FRAME_RATE..=MAX_PATTERN_FPS).contains(&spec.fps) {
            return Err(VideoError::UnsupportedFormat(format!(
                "pattern frame rate {} outside {}..={}",
                spec.fps, MIN_FRAME_RATE, MAX_PATTERN_FPS
            )));
        }
        Ok(spec)
    }

    fn frame_count(&self) -> u64 {
        (self.duration.as_secs_f64() * self.fps as f64).round() as u64
    }
}

/// Software decoder producing an RGBA gradient whose blue channel tracks
/// the frame number.
pub struct TestPatternDecoder {
    spec: PatternSpec,
    metadata: VideoMetadata,
    next_index: u64,
}

impl TestPatternDecoder {
    pub fn new(spec: PatternSpec) -> Self {
        let metadata = VideoMetadata {
            width: spec.width,
            height: spec.height,
            duration: Some(spec.duration),
            frame_rate: spec.fps,
            codec: "test-pattern".to_string(),
            has_audio: false,
        };
        Self {
            spec,
            metadata,
            next_index: 0,
        }
    }

    pub fn open(path: &str) -> Result<Self, VideoError> {
        PatternSpec::parse(path).map(Self::new)
    }

    fn generate_frame(&self, index: u64) -> CpuFrame {
        let width = self.spec.width;
        let height = self.spec.height;
        let b = (index as u8).wrapping_mul(3);

        let mut pixels = Vec::with_capacity((width * height * 4) as usize);
        for y in 0..height {
            let g = ((y as f32 / height as f32) * 255.0) as u8;
            for x in 0..width {
                let r = ((x as f32 / width as f32) * 255.0) as u8;
                pixels.extend_from_slice(&[r, g, b, 255]);
            }
        }

        CpuFrame::new(
            PixelFormat::Rgba,
            width,
            height,
            vec![Plane {
                data: pixels,
                stride: (width * 4) as usize,
            }],
        )
    }
}

impl RawDecoder for TestPatternDecoder {
    fn decode_next(&mut self) -> Result<Option<VideoFrame>, VideoError> {
        if self.next_index >= self.spec.frame_count() {
            return Ok(None);
        }
        let index = self.next_index;
        self.next_index += 1;
        let pts = Duration::from_secs_f64(index as f64 / self.spec.fps as f64);
        Ok(Some(VideoFrame::new(
            pts,
            DecodedFrame::Cpu(self.generate_frame(index)),
        )))
    }

    fn seek(&mut self, position: Duration) -> Result<(), VideoError> {
        let index = (position.as_secs_f64() * self.spec.fps as f64).floor() as u64;
        self.next_index = index.min(self.spec.frame_count());
        Ok(())
    }

    fn metadata(&self) -> &VideoMetadata {
        &self.metadata
    }
}

/// Interleaved stereo sine tone in 10ms chunks.
pub struct SineAudioDecoder {
    sample_rate: u32,
    frequency: f32,
    duration: Duration,
    next_frame: u64,
}

impl SineAudioDecoder {
    const CHANNELS: u16 = 2;

    pub fn new(sample_rate: u32, frequency: f32, duration: Duration) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            frequency,
            duration,
            next_frame: 0,
        }
    }

    fn total_frames(&self) -> u64 {
        (self.duration.as_secs_f64() * self.sample_rate as f64) as u64
    }
}

impl AudioStreamDecoder for SineAudioDecoder {
    fn decode_next(&mut self) -> Result<Option<AudioSamples>, AudioError> {
        let total = self.total_frames();
        if self.next_frame >= total {
            return Ok(None);
        }
        let chunk = (self.sample_rate as u64 / 100).min(total - self.next_frame);
        let rate = self.sample_rate as f32;
        let mut data = Vec::with_capacity(chunk as usize * Self::CHANNELS as usize);
        for i in 0..chunk {
            let t = (self.next_frame + i) as f32 / rate;
            let s = (t * self.frequency * std::f32::consts::TAU).sin() * 0.2;
            data.push(s);
            data.push(s);
        }

        let pts = Duration::from_secs_f64(self.next_frame as f64 / self.sample_rate as f64);
        self.next_frame += chunk;
        Ok(Some(AudioSamples {
            data,
            sample_rate: self.sample_rate,
            channels: Self::CHANNELS,
            pts,
        }))
    }

    fn seek(&mut self, position: Duration) -> Result<(), AudioError> {
        self.next_frame =
            ((position.as_secs_f64() * self.sample_rate as f64) as u64).min(self.total_frames());
        Ok(())
    }
}

/// Software-only backends serving `pattern:` paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyntheticBackends;

impl DecoderBackends for SyntheticBackends {
    fn detect_hw_accel(&self, _path: &str) -> HwAccelKind {
        HwAccelKind::None
    }

    fn resolve_binder(
        &self,
        _path: &str,
        _kind: HwAccelKind,
    ) -> Result<Option<Box<dyn FrameBinder>>, VideoError> {
        Ok(None)
    }

    fn open_zero_copy(
        &self,
        _path: &str,
        kind: HwAccelKind,
    ) -> Result<Box<dyn RawDecoder>, VideoError> {
        Err(VideoError::DecoderInit(format!(
            "test patterns have no {kind} decoder"
        )))
    }

    fn open_hardware(
        &self,
        _path: &str,
        kind: HwAccelKind,
    ) -> Result<Box<dyn RawDecoder>, VideoError> {
        Err(VideoError::DecoderInit(format!(
            "test patterns have no {kind} decoder"
        )))
    }

    fn open_software(&self, path: &str) -> Result<Box<dyn RawDecoder>, VideoError> {
        Ok(Box::new(TestPatternDecoder::open(path)?))
    }
}
