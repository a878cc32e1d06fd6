//! Compile-time regression test for the sprocket public API surface.
//!
//! Verifies that core types remain reachable through the `sprocket` crate
//! root. If this file compiles, the re-exports work.

use std::time::Duration;

// Core types accessible via sprocket:: (compile-time import check)
#[allow(unused_imports)]
use sprocket::{
    AudioDevice, AudioError, AudioOutput, AudioStreamDecoder, BindOutcome, CpuFrame,
    DecodedFrame, DecoderBackends, DecoderInfo, DecoderPreference, DecoderStage, FrameBinder,
    HwAccelKind, HwFrame, OpenOptions, PixelFormat, PlatformBackends, PlaybackState, RawDecoder,
    RenderContext, SourceId, SourceRegistry, SyncDecision, SyncMetrics, SyncMetricsSnapshot,
    TextureInfo, TextureKind, VideoError, VideoFrame, VideoMetadata, VideoSource, WrappedImage,
    ZeroCopyError, ZeroCopyStats,
};

// GPU types
#[allow(unused_imports)]
use sprocket::{WgpuContext, WgpuImage, WgpuTexture};

// Module paths
#[allow(unused_imports)]
use sprocket::test_pattern::{PatternSpec, TestPatternDecoder};

#[test]
fn public_types_are_accessible() {
    // Compile-time only.
    fn _assert_types() {
        let _: fn() -> PlaybackState = || PlaybackState::Stopped;
        let _: fn() -> HwAccelKind = || HwAccelKind::None;
        let _: fn() -> PixelFormat = || PixelFormat::Nv12;
        let _: fn() -> DecoderStage = || DecoderStage::Software;
    }
}

#[test]
fn open_through_reexport() {
    let mut source = sprocket::open("pattern:32x18@30:1", OpenOptions::default()).expect("open");
    assert_eq!(source.state(), PlaybackState::Stopped);
    assert_eq!((source.width(), source.height()), (32, 18));

    source.play().advance_frame(Duration::from_millis(33));
    assert!(source.is_playing());
}

#[test]
fn registry_through_reexport() {
    let mut registry = SourceRegistry::new();
    let id = registry
        .open("pattern:16x16@24:1", OpenOptions::default(), &PlatformBackends)
        .expect("open");
    assert!(registry.contains(id));
    assert!(registry.close(id));
    assert!(registry.is_empty());
}
