//! Core video types shared by every decoder backend.
//!
//! A raw decoder yields [`VideoFrame`]s whose payload is either CPU pixels
//! ([`CpuFrame`]) or an opaque hardware surface ([`HwFrame`]). Nothing in this
//! module knows about a GPU API; binding and upload live behind the traits in
//! [`crate::texture`].

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

/// Playback state of a source or audio track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    /// Not playing; position is at the start.
    #[default]
    Stopped,
    /// Actively advancing.
    Playing,
    /// Holding position.
    Paused,
}

/// Errors surfaced while opening or driving a video source.
#[derive(Debug, Clone)]
pub enum VideoError {
    /// Failed to open the video source
    OpenFailed(String),
    /// Decoder initialization failed
    DecoderInit(String),
    /// Frame decoding error
    DecodeFailed(String),
    /// Seek operation failed
    SeekFailed(String),
    /// Unsupported codec or format
    UnsupportedFormat(String),
    /// Generic error
    Generic(String),
}

impl std::fmt::Display for VideoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VideoError::OpenFailed(msg) => write!(f, "Failed to open video: {msg}"),
            VideoError::DecoderInit(msg) => write!(f, "Decoder initialization failed: {msg}"),
            VideoError::DecodeFailed(msg) => write!(f, "Frame decode failed: {msg}"),
            VideoError::SeekFailed(msg) => write!(f, "Seek failed: {msg}"),
            VideoError::UnsupportedFormat(msg) => write!(f, "Unsupported format: {msg}"),
            VideoError::Generic(msg) => write!(f, "Video error: {msg}"),
        }
    }
}

impl std::error::Error for VideoError {}

/// Pixel format for decoded video frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUV 4:2:0 planar
    Yuv420p,
    /// NV12 (Y plane + interleaved UV, what most hardware decoders emit)
    Nv12,
    /// RGBA 32-bit
    Rgba,
    /// BGRA 32-bit
    Bgra,
}

impl PixelFormat {
    /// Returns the number of planes for this format.
    pub fn num_planes(&self) -> usize {
        match self {
            PixelFormat::Yuv420p => 3,
            PixelFormat::Nv12 => 2,
            PixelFormat::Rgba | PixelFormat::Bgra => 1,
        }
    }

    /// Returns true for a single-plane colour format that can be sampled directly.
    pub fn is_packed(&self) -> bool {
        matches!(self, PixelFormat::Rgba | PixelFormat::Bgra)
    }

    /// Returns true for a luma + interleaved chroma layout.
    pub fn is_biplanar(&self) -> bool {
        matches!(self, PixelFormat::Nv12)
    }
}

/// A single plane of pixel data.
#[derive(Debug, Clone)]
pub struct Plane {
    /// Raw bytes, `stride * rows`
    pub data: Vec<u8>,
    /// Bytes per row, including any padding
    pub stride: usize,
}

/// A decoded frame held in CPU memory.
#[derive(Debug, Clone)]
pub struct CpuFrame {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub planes: Vec<Plane>,
}

impl CpuFrame {
    pub fn new(format: PixelFormat, width: u32, height: u32, planes: Vec<Plane>) -> Self {
        Self {
            format,
            width,
            height,
            planes,
        }
    }

    /// Returns the plane at `index`, if present.
    pub fn plane(&self, index: usize) -> Option<&Plane> {
        self.planes.get(index)
    }
}

/// A frame that still lives in decoder-owned GPU/driver memory.
///
/// `handle` is whatever the platform uses to name the surface (an IOSurface
/// id, a DMA-BUF fd, a D3D11 shared handle). The `owner` keeps the underlying
/// object alive for as long as any clone of this frame exists, so a binder can
/// keep sampling from it after the decoder has moved on.
#[derive(Clone)]
pub struct HwFrame {
    pub handle: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    owner: Arc<dyn Any + Send + Sync>,
}

impl HwFrame {
    pub fn new(
        handle: u64,
        width: u32,
        height: u32,
        format: PixelFormat,
        owner: Arc<dyn Any + Send + Sync>,
    ) -> Self {
        Self {
            handle,
            width,
            height,
            format,
            owner,
        }
    }

    /// Returns the object keeping the surface alive.
    pub fn owner(&self) -> &Arc<dyn Any + Send + Sync> {
        &self.owner
    }
}

impl std::fmt::Debug for HwFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HwFrame")
            .field("handle", &self.handle)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

/// Payload of a decoded frame.
#[derive(Debug, Clone)]
pub enum DecodedFrame {
    /// Pixels already downloaded to system memory
    Cpu(CpuFrame),
    /// Opaque hardware surface for zero-copy binding
    Hardware(HwFrame),
}

impl DecodedFrame {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            DecodedFrame::Cpu(f) => (f.width, f.height),
            DecodedFrame::Hardware(f) => (f.width, f.height),
        }
    }
}

/// A decoded frame with its presentation timestamp.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub pts: Duration,
    pub frame: DecodedFrame,
}

impl VideoFrame {
    pub fn new(pts: Duration, frame: DecodedFrame) -> Self {
        Self { pts, frame }
    }
}

/// Stream-level information reported by a decoder.
#[derive(Debug, Clone)]
pub struct VideoMetadata {
    /// Video width in pixels
    pub width: u32,
    /// Video height in pixels
    pub height: u32,
    /// Duration of the video (if known)
    pub duration: Option<Duration>,
    /// Frame rate (frames per second)
    pub frame_rate: f32,
    /// Codec name
    pub codec: String,
    /// Whether the container carries an audio stream
    pub has_audio: bool,
}

/// Frame rates below this are treated as unknown.
pub const MIN_FRAME_RATE: f32 = 0.01;

/// Frame period used when the reported rate is unusable (~30fps).
const DEFAULT_FRAME_DURATION: Duration = Duration::from_millis(33);

impl VideoMetadata {
    /// Returns the frame duration based on frame rate.
    ///
    /// Rates that are not finite or below [`MIN_FRAME_RATE`] fall back to
    /// ~30fps.
    pub fn frame_duration(&self) -> Duration {
        if !self.frame_rate.is_finite() || self.frame_rate < MIN_FRAME_RATE {
            return DEFAULT_FRAME_DURATION;
        }
        Duration::try_from_secs_f64(1.0 / self.frame_rate as f64)
            .unwrap_or(DEFAULT_FRAME_DURATION)
    }
}

/// Hardware acceleration API a decoder runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwAccelKind {
    /// No hardware acceleration (software decode)
    None,
    /// macOS / iOS VideoToolbox
    VideoToolbox,
    /// Linux VA-API
    Vaapi,
    /// Linux VDPAU
    Vdpau,
    /// NVIDIA NVDEC
    Nvdec,
    /// Windows D3D11
    D3d11va,
    /// Windows DXVA2
    Dxva2,
    /// Intel Quick Sync
    Qsv,
    /// Android MediaCodec
    MediaCodec,
}

impl HwAccelKind {
    /// Returns the most likely acceleration API for the current platform.
    pub fn platform_default() -> Self {
        #[cfg(any(target_os = "macos", target_os = "ios"))]
        return HwAccelKind::VideoToolbox;

        #[cfg(target_os = "windows")]
        return HwAccelKind::D3d11va;

        #[cfg(target_os = "linux")]
        return HwAccelKind::Vaapi;

        #[cfg(target_os = "android")]
        return HwAccelKind::MediaCodec;

        #[cfg(not(any(
            target_os = "macos",
            target_os = "ios",
            target_os = "windows",
            target_os = "linux",
            target_os = "android"
        )))]
        return HwAccelKind::None;
    }

    pub fn name(&self) -> &'static str {
        match self {
            HwAccelKind::None => "none",
            HwAccelKind::VideoToolbox => "videotoolbox",
            HwAccelKind::Vaapi => "vaapi",
            HwAccelKind::Vdpau => "vdpau",
            HwAccelKind::Nvdec => "nvdec",
            HwAccelKind::D3d11va => "d3d11va",
            HwAccelKind::Dxva2 => "dxva2",
            HwAccelKind::Qsv => "qsv",
            HwAccelKind::MediaCodec => "mediacodec",
        }
    }

    pub fn is_hardware(&self) -> bool {
        !matches!(self, HwAccelKind::None)
    }
}

impl std::fmt::Display for HwAccelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A bitstream decoder producing frames in presentation order.
///
/// Implementations are supplied by the platform (FFmpeg, AVFoundation,
/// MediaCodec, ...). Closing happens on drop.
pub trait RawDecoder: Send {
    /// Decodes and returns the next video frame, or None at end of stream.
    fn decode_next(&mut self) -> Result<Option<VideoFrame>, VideoError>;

    /// Repositions the decoder so the next frame is at or before `position`.
    fn seek(&mut self, position: Duration) -> Result<(), VideoError>;

    /// Returns the video metadata.
    fn metadata(&self) -> &VideoMetadata;

    /// Returns the total duration if known.
    fn duration(&self) -> Option<Duration> {
        self.metadata().duration
    }
}

impl RawDecoder for Box<dyn RawDecoder> {
    fn decode_next(&mut self) -> Result<Option<VideoFrame>, VideoError> {
        (**self).decode_next()
    }

    fn seek(&mut self, position: Duration) -> Result<(), VideoError> {
        (**self).seek(position)
    }

    fn metadata(&self) -> &VideoMetadata {
        (**self).metadata()
    }

    fn duration(&self) -> Option<Duration> {
        (**self).duration()
    }
}
