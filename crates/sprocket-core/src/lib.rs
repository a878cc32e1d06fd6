//! sprocket-core: video playback engine without a GPU API dependency.
//!
//! - Core types: [`video`], [`texture`], [`zero_copy`]
//! - Decoder selection: [`cascade`], [`options`], [`platform`]
//! - Audio clock and A/V pacing: [`audio`], [`sync`], [`sync_metrics`]
//! - The playable source and its owner: [`source`], [`registry`]
//! - Synthetic media for tests and demos: [`test_pattern`]
//!
//! The rendering layer implements [`RenderContext`]; platform decoder crates
//! implement [`DecoderBackends`]. The `sprocket` crate provides a wgpu
//! render context.
//!
//! ```
//! use std::time::Duration;
//! use sprocket_core::{open, OpenOptions};
//!
//! let mut source = open("pattern:320x180@30:2", OpenOptions::default())?;
//! source.play();
//! source.advance_frame(Duration::from_secs_f64(1.0 / 30.0));
//! assert!(source.is_playing());
//! # Ok::<(), sprocket_core::VideoError>(())
//! ```

pub mod audio;
pub mod cascade;
pub mod options;
pub mod platform;
pub mod registry;
pub mod source;
pub mod sync;
pub mod sync_metrics;
pub mod test_pattern;
pub mod texture;
pub mod video;
pub mod zero_copy;

#[cfg(feature = "cpal-output")]
pub mod cpal_output;

pub use audio::{AudioDevice, AudioError, AudioOutput, AudioStreamDecoder, AudioTrack, DeviceClock};
pub use cascade::{Decoder, DecoderBackends, DecoderInfo, DecoderStage};
pub use options::{DecoderPreference, OpenOptions};
pub use platform::PlatformBackends;
pub use registry::{RegistryStats, SourceId, SourceRegistry};
pub use source::VideoSource;
pub use sync::{SyncDecision, SyncState};
pub use sync_metrics::{SyncMetrics, SyncMetricsSnapshot};
pub use texture::{BindOutcome, FrameBinder, RenderContext, TextureInfo, TextureKind, WrappedImage};
pub use video::{
    CpuFrame, DecodedFrame, HwAccelKind, HwFrame, PixelFormat, PlaybackState, RawDecoder,
    VideoError, VideoFrame, VideoMetadata,
};
pub use zero_copy::{ZeroCopyError, ZeroCopyStats};

/// Opens `path` with the built-in [`PlatformBackends`].
pub fn open(path: &str, options: OpenOptions) -> Result<VideoSource, VideoError> {
    VideoSource::open_with(path, options, &PlatformBackends)
}

/// Opens `path` with caller-supplied backends.
pub fn open_with(
    path: &str,
    options: OpenOptions,
    backends: &dyn DecoderBackends,
) -> Result<VideoSource, VideoError> {
    VideoSource::open_with(path, options, backends)
}
