//! Built-in backends used by [`open`](crate::open).
//!
//! Platform decoders (VideoToolbox, VA-API, MediaCodec, ...) live in their
//! own crates and plug in through [`DecoderBackends`] with
//! [`open_with`](crate::open_with). What ships here serves `pattern:` paths
//! and reports everything else as unsupported.

use crate::audio::AudioError;
use crate::cascade::{AudioParts, DecoderBackends};
use crate::test_pattern::{SyntheticBackends, PATTERN_PREFIX};
use crate::texture::FrameBinder;
use crate::video::{HwAccelKind, RawDecoder, VideoError};

#[derive(Debug, Clone, Copy, Default)]
pub struct PlatformBackends;

impl PlatformBackends {
    fn is_pattern(path: &str) -> bool {
        path.starts_with(PATTERN_PREFIX)
    }

    fn unavailable(path: &str) -> VideoError {
        VideoError::DecoderInit(format!(
            "No video decoder available for this platform ({path})"
        ))
    }
}

impl DecoderBackends for PlatformBackends {
    fn detect_hw_accel(&self, path: &str) -> HwAccelKind {
        if Self::is_pattern(path) {
            return HwAccelKind::None;
        }
        HwAccelKind::platform_default()
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
        path: &str,
        _kind: HwAccelKind,
    ) -> Result<Box<dyn RawDecoder>, VideoError> {
        Err(Self::unavailable(path))
    }

    fn open_hardware(
        &self,
        path: &str,
        _kind: HwAccelKind,
    ) -> Result<Box<dyn RawDecoder>, VideoError> {
        Err(Self::unavailable(path))
    }

    fn open_software(&self, path: &str) -> Result<Box<dyn RawDecoder>, VideoError> {
        if Self::is_pattern(path) {
            return SyntheticBackends.open_software(path);
        }
        Err(Self::unavailable(path))
    }

    fn open_audio(&self, _path: &str) -> Result<Option<AudioParts>, AudioError> {
        Ok(None)
    }
}
