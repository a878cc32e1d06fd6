//! Texture descriptors, hardware frame binding and format dispatch.
//!
//! A source owns exactly one [`FrameSlot`]. Decoded frames reach the slot by
//! one of two routes:
//!
//! ```text
//!  HwFrame ──FrameBinder::bind──▶ TextureInfo ─┐
//!                                              ├─▶ dispatch ──▶ WrappedImage
//!  CpuFrame ──(staged)──RenderContext::upload──┘
//! ```
//!
//! Dispatch depends on the texture layout. Packed colour textures are wrapped
//! directly. Biplanar (Y + interleaved UV) textures are converted on the GPU
//! to a transient packed texture, the transient is wrapped, and the slot drops
//! its handle to the transient straight away.
//!
//! GPU objects are released by dropping the last handle to them. The slot
//! always drops its wrapped image before the texture it was made from.

use std::any::Any;
use std::sync::Arc;

use crate::video::{CpuFrame, HwFrame, PixelFormat};
use crate::zero_copy::ZeroCopyError;

/// Memory layout of a bound texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureKind {
    /// Single-plane colour texture
    Packed(PixelFormat),
    /// Luma plane plus interleaved chroma plane
    Biplanar,
}

impl TextureKind {
    /// Layout used for a frame of `format`.
    pub fn for_format(format: PixelFormat) -> Self {
        if format.is_packed() {
            TextureKind::Packed(format)
        } else {
            TextureKind::Biplanar
        }
    }
}

/// Backend texture handle owned by a source.
///
/// `resource` is the backend's own GPU object; dropping the last reference
/// releases it. Render contexts downcast it back to their concrete type.
pub struct TextureInfo {
    pub kind: TextureKind,
    pub width: u32,
    pub height: u32,
    /// Backend identifier, useful in logs
    pub id: u64,
    resource: Arc<dyn Any + Send + Sync>,
}

impl TextureInfo {
    pub fn new<R: Any + Send + Sync>(
        kind: TextureKind,
        width: u32,
        height: u32,
        id: u64,
        resource: R,
    ) -> Self {
        Self {
            kind,
            width,
            height,
            id,
            resource: Arc::new(resource),
        }
    }

    /// Returns the shared backend resource.
    pub fn resource(&self) -> &Arc<dyn Any + Send + Sync> {
        &self.resource
    }

    /// Returns the backend resource as `R`, if that is its type.
    pub fn downcast_ref<R: Any>(&self) -> Option<&R> {
        self.resource.downcast_ref::<R>()
    }

    /// Returns a mutable reference to the backend resource when no image or
    /// other handle shares it.
    pub fn downcast_mut<R: Any>(&mut self) -> Option<&mut R> {
        Arc::get_mut(&mut self.resource).and_then(|r| r.downcast_mut::<R>())
    }
}

impl std::fmt::Debug for TextureInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextureInfo")
            .field("kind", &self.kind)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Image handed to the renderer.
///
/// Cloning is cheap. The backing resource lives until the last clone drops.
#[derive(Clone)]
pub struct WrappedImage {
    pub width: u32,
    pub height: u32,
    pub id: u64,
    resource: Arc<dyn Any + Send + Sync>,
}

impl WrappedImage {
    pub fn new(width: u32, height: u32, id: u64, resource: Arc<dyn Any + Send + Sync>) -> Self {
        Self {
            width,
            height,
            id,
            resource,
        }
    }

    pub fn resource(&self) -> &Arc<dyn Any + Send + Sync> {
        &self.resource
    }

    pub fn downcast_ref<R: Any>(&self) -> Option<&R> {
        self.resource.downcast_ref::<R>()
    }
}

impl std::fmt::Debug for WrappedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WrappedImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Result of a bind or upload.
#[derive(Debug)]
pub enum BindOutcome {
    /// The existing texture now holds the new frame.
    Updated,
    /// The frame lives in a new texture; the old one must be discarded.
    Replaced(TextureInfo),
    /// The backend refused the frame.
    Declined,
}

/// Imports decoder surfaces into the GPU without a CPU round trip.
///
/// Copy and in-place backends mutate `texture` and return
/// [`BindOutcome::Updated`]. Identity-replacing backends return
/// [`BindOutcome::Replaced`] with a fresh descriptor. `texture` is `None`
/// before the first frame, so every binder must be able to create one.
pub trait FrameBinder: Send {
    fn bind(
        &mut self,
        frame: &HwFrame,
        texture: Option<&mut TextureInfo>,
    ) -> Result<BindOutcome, ZeroCopyError>;

    /// Short label for logs.
    fn name(&self) -> &str {
        "binder"
    }
}

/// GPU operations the rendering layer provides to a source.
pub trait RenderContext {
    /// Uploads CPU pixels, updating `cached` in place when it fits.
    fn upload(
        &mut self,
        frame: &CpuFrame,
        cached: Option<&mut TextureInfo>,
    ) -> Result<BindOutcome, ZeroCopyError>;

    /// Wraps a packed texture as a renderer image.
    fn wrap(&mut self, texture: &TextureInfo) -> Result<WrappedImage, ZeroCopyError>;

    /// Converts a biplanar texture into a new packed texture.
    fn convert_biplanar(&mut self, texture: &TextureInfo) -> Result<TextureInfo, ZeroCopyError>;
}

/// Per-source texture cache: staged pixels, bound texture and wrapped image.
#[derive(Debug, Default)]
pub struct FrameSlot {
    texture: Option<TextureInfo>,
    image: Option<WrappedImage>,
    staged: Option<CpuFrame>,
    /// Texture contents changed since `image` was produced.
    dirty: bool,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a hardware frame through `binder`.
    ///
    /// On error the previous texture and image stay current.
    pub fn bind_hardware(
        &mut self,
        binder: &mut dyn FrameBinder,
        frame: &HwFrame,
    ) -> Result<(), ZeroCopyError> {
        let had_texture = self.texture.is_some();
        match binder.bind(frame, self.texture.as_mut())? {
            BindOutcome::Updated if had_texture => {
                self.dirty = true;
                Ok(())
            }
            BindOutcome::Updated => Err(ZeroCopyError::InvalidResource(format!(
                "{} reported an in-place update with no texture",
                binder.name()
            ))),
            BindOutcome::Replaced(texture) => {
                self.replace_texture(texture);
                Ok(())
            }
            BindOutcome::Declined => Err(ZeroCopyError::ImportFailed(format!(
                "{} declined {}x{} {:?} frame",
                binder.name(),
                frame.width,
                frame.height,
                frame.format
            ))),
        }
    }

    /// Holds CPU pixels until the next [`resolve`](Self::resolve).
    ///
    /// A newer frame supersedes one that was never uploaded.
    pub fn stage(&mut self, frame: CpuFrame) {
        self.staged = Some(frame);
    }

    pub fn has_staged(&self) -> bool {
        self.staged.is_some()
    }

    pub fn has_texture(&self) -> bool {
        self.texture.is_some()
    }

    pub fn texture(&self) -> Option<&TextureInfo> {
        self.texture.as_ref()
    }

    /// Uploads staged pixels, dispatches on texture layout and returns the
    /// current image.
    ///
    /// Failures are logged and leave the last good image in place.
    pub fn resolve(&mut self, ctx: &mut dyn RenderContext) -> Option<WrappedImage> {
        if let Some(frame) = self.staged.take() {
            if let Err(e) = self.upload(ctx, &frame) {
                tracing::warn!("Frame upload failed: {}", e);
            }
        }

        if self.dirty || self.image.is_none() {
            if let Err(e) = self.refresh_image(ctx) {
                tracing::warn!("Failed to produce image from texture: {}", e);
            }
        }

        self.image.clone()
    }

    /// Drops the image, then the texture, then any staged pixels.
    ///
    /// Safe to call repeatedly.
    pub fn release(&mut self) {
        self.image = None;
        self.texture = None;
        self.staged = None;
        self.dirty = false;
    }

    fn upload(&mut self, ctx: &mut dyn RenderContext, frame: &CpuFrame) -> Result<(), ZeroCopyError> {
        let had_texture = self.texture.is_some();
        match ctx.upload(frame, self.texture.as_mut())? {
            BindOutcome::Updated if had_texture => {
                self.dirty = true;
                Ok(())
            }
            BindOutcome::Updated => Err(ZeroCopyError::InvalidResource(
                "upload reported an in-place update with no texture".into(),
            )),
            BindOutcome::Replaced(texture) => {
                self.replace_texture(texture);
                Ok(())
            }
            BindOutcome::Declined => Err(ZeroCopyError::FormatMismatch(format!(
                "render context declined {:?} upload",
                frame.format
            ))),
        }
    }

    fn replace_texture(&mut self, texture: TextureInfo) {
        // The image may reference the old texture; release it first.
        self.image = None;
        self.texture = Some(texture);
        self.dirty = true;
    }

    fn refresh_image(&mut self, ctx: &mut dyn RenderContext) -> Result<(), ZeroCopyError> {
        let Some(texture) = self.texture.as_ref() else {
            return Ok(());
        };

        let image = match texture.kind {
            TextureKind::Packed(_) => ctx.wrap(texture)?,
            TextureKind::Biplanar => {
                let transient = ctx.convert_biplanar(texture)?;
                let image = ctx.wrap(&transient)?;
                drop(transient);
                image
            }
        };

        self.image = Some(image);
        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts drops of the GPU resource it stands in for.
    struct Tracked(Arc<AtomicUsize>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct Ctx {
        released: Arc<AtomicUsize>,
        wraps: usize,
        conversions: usize,
        next_id: u64,
    }

    impl RenderContext for Ctx {
        fn upload(
            &mut self,
            frame: &CpuFrame,
            cached: Option<&mut TextureInfo>,
        ) -> Result<BindOutcome, ZeroCopyError> {
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
                        Tracked(self.released.clone()),
                    )))
                }
            }
        }

        fn wrap(&mut self, texture: &TextureInfo) -> Result<WrappedImage, ZeroCopyError> {
            self.wraps += 1;
            Ok(WrappedImage::new(
                texture.width,
                texture.height,
                texture.id,
                texture.resource().clone(),
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
                Tracked(self.released.clone()),
            ))
        }
    }

    fn rgba(width: u32, height: u32) -> CpuFrame {
        CpuFrame::new(
            PixelFormat::Rgba,
            width,
            height,
            vec![crate::video::Plane {
                data: vec![0; (width * height * 4) as usize],
                stride: (width * 4) as usize,
            }],
        )
    }

    #[test]
    fn test_packed_upload_wraps_once() {
        let mut ctx = Ctx::default();
        let mut slot = FrameSlot::new();
        assert!(slot.resolve(&mut ctx).is_none());

        slot.stage(rgba(16, 16));
        let first = slot.resolve(&mut ctx).expect("image");
        assert_eq!(first.id, 1);
        assert_eq!(ctx.wraps, 1);

        // Same size updates in place and rewraps the same texture.
        slot.stage(rgba(16, 16));
        let second = slot.resolve(&mut ctx).expect("image");
        assert_eq!(second.id, 1);
        assert_eq!(ctx.wraps, 2);

        // Nothing new staged: cached image is reused.
        slot.resolve(&mut ctx).expect("image");
        assert_eq!(ctx.wraps, 2);
        assert_eq!(ctx.conversions, 0);
    }

    #[test]
    fn test_biplanar_converts_and_drops_transient() {
        let mut ctx = Ctx::default();
        let mut slot = FrameSlot::new();
        let nv12 = CpuFrame::new(PixelFormat::Nv12, 8, 8, Vec::new());

        slot.stage(nv12.clone());
        let image = slot.resolve(&mut ctx).expect("image");
        assert_eq!(ctx.conversions, 1);
        // The image keeps the converted texture alive, not the slot.
        assert_eq!(Arc::strong_count(image.resource()), 2);
        drop(image);

        slot.stage(nv12);
        slot.resolve(&mut ctx).expect("image");
        assert_eq!(ctx.conversions, 2);
        // First transient released once its image was replaced.
        assert_eq!(ctx.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut ctx = Ctx::default();
        let mut slot = FrameSlot::new();
        slot.stage(rgba(4, 4));
        drop(slot.resolve(&mut ctx));

        slot.release();
        slot.release();
        assert_eq!(ctx.released.load(Ordering::SeqCst), 1);
        assert!(!slot.has_texture());
    }
}
