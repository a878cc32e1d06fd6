//! Zero-copy error type and per-source statistics.

use std::fmt;

/// Error returned by a [`FrameBinder`](crate::texture::FrameBinder) or a
/// [`RenderContext`](crate::texture::RenderContext).
#[derive(Debug, Clone)]
pub enum ZeroCopyError {
    /// The GPU backend cannot import this kind of surface
    UnsupportedBackend(String),
    /// The external resource is invalid or incompatible
    InvalidResource(String),
    /// Texture creation failed
    TextureCreationFailed(String),
    /// Feature not available on this platform
    NotAvailable(String),
    /// Resource format doesn't match expected format
    FormatMismatch(String),
    /// Import operation failed
    ImportFailed(String),
    /// Biplanar to packed conversion failed
    ConversionFailed(String),
}

impl fmt::Display for ZeroCopyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ZeroCopyError::UnsupportedBackend(msg) => write!(f, "Unsupported backend: {}", msg),
            ZeroCopyError::InvalidResource(msg) => write!(f, "Invalid resource: {}", msg),
            ZeroCopyError::TextureCreationFailed(msg) => {
                write!(f, "Texture creation failed: {}", msg)
            }
            ZeroCopyError::NotAvailable(msg) => write!(f, "Not available: {}", msg),
            ZeroCopyError::FormatMismatch(msg) => write!(f, "Format mismatch: {}", msg),
            ZeroCopyError::ImportFailed(msg) => write!(f, "Import failed: {}", msg),
            ZeroCopyError::ConversionFailed(msg) => write!(f, "Conversion failed: {}", msg),
        }
    }
}

impl std::error::Error for ZeroCopyError {}

impl From<ZeroCopyError> for crate::video::VideoError {
    fn from(err: ZeroCopyError) -> Self {
        crate::video::VideoError::DecoderInit(err.to_string())
    }
}

/// Counts of frames presented through each path.
///
/// `total_frames` is the sum of the other three. Software and hardware-copy
/// sources only ever count copied frames. On the zero-copy path, frames
/// decoded after the path has been disabled count as fallback frames.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ZeroCopyStats {
    /// Total frames processed
    pub total_frames: u64,
    /// Frames bound via zero-copy path
    pub zero_copy_frames: u64,
    /// Frames a copying decoder uploaded from CPU memory
    pub copied_frames: u64,
    /// Frames the zero-copy path could not bind
    pub fallback_frames: u64,
}

impl ZeroCopyStats {
    /// Returns the percentage of frames bound via zero-copy (0.0 - 100.0).
    ///
    /// Returns `0.0` if no frames have been processed yet.
    pub fn zero_copy_percentage(&self) -> f64 {
        if self.total_frames == 0 {
            return 0.0;
        }
        (self.zero_copy_frames as f64 / self.total_frames as f64) * 100.0
    }

    pub(crate) fn record_zero_copy(&mut self) {
        self.total_frames += 1;
        self.zero_copy_frames += 1;
    }

    pub(crate) fn record_copy(&mut self) {
        self.total_frames += 1;
        self.copied_frames += 1;
    }

    pub(crate) fn record_fallback(&mut self) {
        self.total_frames += 1;
        self.fallback_frames += 1;
    }
}
