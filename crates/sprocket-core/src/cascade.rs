//! Decoder selection cascade.
//!
//! Stages run in a fixed order and the first to construct wins:
//!
//! 1. zero-copy: hardware decoder plus a [`FrameBinder`] for its surfaces
//! 2. hardware-with-copy: hardware decoder that downloads frames to the CPU
//! 3. software: always attempted last; its failure fails `open`
//!
//! The outcome is recorded once in [`DecoderInfo`] and never revisited.

use crate::audio::{AudioDevice, AudioError, AudioStreamDecoder};
use crate::options::{DecoderPreference, OpenOptions};
use crate::texture::FrameBinder;
use crate::video::{HwAccelKind, RawDecoder, VideoError, VideoFrame, VideoMetadata};

use std::time::Duration;

/// Audio decoder and device for one source.
pub type AudioParts = (Box<dyn AudioStreamDecoder>, Box<dyn AudioDevice>);

/// The collaborators a platform supplies to build a source.
pub trait DecoderBackends {
    /// Hardware API worth trying for `path`, or [`HwAccelKind::None`].
    fn detect_hw_accel(&self, path: &str) -> HwAccelKind;

    /// Frame binder for surfaces of `kind`; `Ok(None)` if the platform has none.
    fn resolve_binder(
        &self,
        path: &str,
        kind: HwAccelKind,
    ) -> Result<Option<Box<dyn FrameBinder>>, VideoError>;

    /// Hardware decoder that hands out [`HwFrame`](crate::video::HwFrame)s.
    fn open_zero_copy(&self, path: &str, kind: HwAccelKind)
        -> Result<Box<dyn RawDecoder>, VideoError>;

    /// Hardware decoder that hands out [`CpuFrame`](crate::video::CpuFrame)s.
    fn open_hardware(&self, path: &str, kind: HwAccelKind)
        -> Result<Box<dyn RawDecoder>, VideoError>;

    fn open_software(&self, path: &str) -> Result<Box<dyn RawDecoder>, VideoError>;

    /// Audio for `path`; `Ok(None)` when the container has no audio stream.
    fn open_audio(&self, _path: &str) -> Result<Option<AudioParts>, AudioError> {
        Ok(None)
    }
}

/// Which cascade stage produced the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderStage {
    ZeroCopy,
    HardwareCopy,
    Software,
}

impl DecoderStage {
    pub fn name(&self) -> &'static str {
        match self {
            DecoderStage::ZeroCopy => "zero-copy",
            DecoderStage::HardwareCopy => "hardware-copy",
            DecoderStage::Software => "software",
        }
    }
}

impl std::fmt::Display for DecoderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Immutable record of the cascade outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderInfo {
    /// Hardware API in use; `None` for software
    pub hw_kind: HwAccelKind,
    /// An earlier stage was attempted and failed
    pub fallback: bool,
    pub zero_copy: bool,
    pub stage: DecoderStage,
    /// Source path the decoder was opened for
    pub path: String,
}

/// The decoder a source runs on, one variant per cascade stage.
pub enum Decoder {
    ZeroCopy {
        decoder: Box<dyn RawDecoder>,
        binder: Box<dyn FrameBinder>,
    },
    HardwareCopy(Box<dyn RawDecoder>),
    Software(Box<dyn RawDecoder>),
}

impl Decoder {
    pub fn stage(&self) -> DecoderStage {
        match self {
            Decoder::ZeroCopy { .. } => DecoderStage::ZeroCopy,
            Decoder::HardwareCopy(_) => DecoderStage::HardwareCopy,
            Decoder::Software(_) => DecoderStage::Software,
        }
    }

    /// Splits into decoder and binder so both can be borrowed at once.
    pub fn parts_mut(&mut self) -> (&mut dyn RawDecoder, Option<&mut dyn FrameBinder>) {
        match self {
            Decoder::ZeroCopy { decoder, binder } => (decoder.as_mut(), Some(binder.as_mut())),
            Decoder::HardwareCopy(decoder) | Decoder::Software(decoder) => (decoder.as_mut(), None),
        }
    }

    fn raw(&self) -> &dyn RawDecoder {
        match self {
            Decoder::ZeroCopy { decoder, .. } => decoder.as_ref(),
            Decoder::HardwareCopy(decoder) | Decoder::Software(decoder) => decoder.as_ref(),
        }
    }
}

impl RawDecoder for Decoder {
    fn decode_next(&mut self) -> Result<Option<VideoFrame>, VideoError> {
        self.parts_mut().0.decode_next()
    }

    fn seek(&mut self, position: Duration) -> Result<(), VideoError> {
        self.parts_mut().0.seek(position)
    }

    fn metadata(&self) -> &VideoMetadata {
        self.raw().metadata()
    }
}

impl std::fmt::Debug for Decoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decoder")
            .field("stage", &self.stage())
            .field("metadata", self.metadata())
            .finish()
    }
}

/// Runs the cascade for `path`.
///
/// Only a software-stage failure is returned as an error; earlier stage
/// failures are logged and mark the result as a fallback.
pub fn select_decoder(
    path: &str,
    options: &OpenOptions,
    backends: &dyn DecoderBackends,
) -> Result<(Decoder, DecoderInfo), VideoError> {
    let hw_kind = if options.hardware_allowed() {
        match options.decoder {
            DecoderPreference::Hardware(kind) => kind,
            _ => backends.detect_hw_accel(path),
        }
    } else {
        HwAccelKind::None
    };

    let mut fallback = false;

    if hw_kind.is_hardware() && options.zero_copy {
        match open_zero_copy(path, hw_kind, backends) {
            Ok(decoder) => return Ok(finish(path, decoder, hw_kind, fallback, options)),
            Err(e) => {
                tracing::warn!(
                    "Zero-copy {} decoder unavailable for {}, trying hardware copy: {}",
                    hw_kind,
                    path,
                    e
                );
                fallback = true;
            }
        }
    }

    if hw_kind.is_hardware() {
        match backends.open_hardware(path, hw_kind) {
            Ok(decoder) => {
                let decoder = Decoder::HardwareCopy(decoder);
                return Ok(finish(path, decoder, hw_kind, fallback, options));
            }
            Err(e) => {
                tracing::warn!(
                    "{} hardware decoder failed for {}, falling back to software: {}",
                    hw_kind,
                    path,
                    e
                );
                fallback = true;
            }
        }
    }

    match backends.open_software(path) {
        Ok(decoder) => {
            let decoder = Decoder::Software(decoder);
            Ok(finish(path, decoder, HwAccelKind::None, fallback, options))
        }
        Err(e) => {
            tracing::error!("No decoder could open {}: {}", path, e);
            Err(e)
        }
    }
}

fn open_zero_copy(
    path: &str,
    kind: HwAccelKind,
    backends: &dyn DecoderBackends,
) -> Result<Decoder, VideoError> {
    let binder = backends.resolve_binder(path, kind)?.ok_or_else(|| {
        VideoError::UnsupportedFormat(format!("no frame binder for {kind} surfaces"))
    })?;
    let decoder = backends.open_zero_copy(path, kind)?;
    Ok(Decoder::ZeroCopy { decoder, binder })
}

fn finish(
    path: &str,
    decoder: Decoder,
    hw_kind: HwAccelKind,
    fallback: bool,
    options: &OpenOptions,
) -> (Decoder, DecoderInfo) {
    let info = DecoderInfo {
        hw_kind,
        fallback,
        zero_copy: matches!(decoder, Decoder::ZeroCopy { .. }),
        stage: decoder.stage(),
        path: path.to_string(),
    };

    let meta = decoder.metadata();
    if options.debug {
        tracing::info!(
            "Opened {} with {} decoder (hw={}, fallback={}, {}x{} @ {:.2}fps)",
            path,
            info.stage,
            info.hw_kind,
            info.fallback,
            meta.width,
            meta.height,
            meta.frame_rate
        );
    } else {
        tracing::debug!(
            "Opened {} with {} decoder (hw={}, fallback={})",
            path,
            info.stage,
            info.hw_kind,
            info.fallback
        );
    }

    (decoder, info)
}
