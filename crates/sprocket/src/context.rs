//! wgpu implementation of [`RenderContext`].
//!
//! Packed frames (RGBA, BGRA) live in one texture. NV12 and YUV420p frames
//! live in a Y texture plus an interleaved UV texture; YUV420p chroma is
//! interleaved on the CPU during upload. Biplanar textures are drawn into a
//! fresh RGBA texture by [`Nv12Converter`] before they can be wrapped.
//!
//! Frame binders feeding a source rendered through this context must hand
//! out [`WgpuTexture`] resources.

use std::any::Any;
use std::sync::Arc;

use sprocket_core::{
    BindOutcome, CpuFrame, PixelFormat, RenderContext, TextureInfo, TextureKind, WrappedImage,
    ZeroCopyError,
};

use crate::convert::Nv12Converter;
use crate::upload::{interleave_uv, pad_plane_data};

/// GPU planes behind a [`TextureInfo`]: one texture when packed, Y and UV
/// when biplanar.
pub struct WgpuTexture {
    planes: Vec<wgpu::Texture>,
}

impl WgpuTexture {
    pub fn from_planes(planes: Vec<wgpu::Texture>) -> Self {
        Self { planes }
    }

    pub fn planes(&self) -> &[wgpu::Texture] {
        &self.planes
    }

    fn plane(&self, index: usize) -> Result<&wgpu::Texture, ZeroCopyError> {
        self.planes.get(index).ok_or_else(|| {
            ZeroCopyError::InvalidResource(format!(
                "texture has {} planes, plane {} requested",
                self.planes.len(),
                index
            ))
        })
    }
}

/// Renderer image behind a [`WrappedImage`].
///
/// Holds the texture it views, so the image stays valid after the source
/// has moved on to another texture.
pub struct WgpuImage {
    view: wgpu::TextureView,
    _texture: Arc<dyn Any + Send + Sync>,
}

impl WgpuImage {
    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }
}

pub struct WgpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    converter: Nv12Converter,
    next_id: u64,
}

impl WgpuContext {
    /// Wraps an existing device, treating YUV input as limited range.
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self::with_range(device, queue, false)
    }

    pub fn with_range(device: wgpu::Device, queue: wgpu::Queue, full_range: bool) -> Self {
        let converter = Nv12Converter::new(&device, full_range);
        Self {
            device,
            queue,
            converter,
            next_id: 0,
        }
    }

    /// Creates a context on the default adapter with no surface.
    pub fn headless() -> Result<Self, ZeroCopyError> {
        pollster::block_on(async {
            let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
                backends: wgpu::Backends::all(),
                ..Default::default()
            });

            let adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await
                .ok_or_else(|| ZeroCopyError::NotAvailable("no GPU adapter found".into()))?;

            let info = adapter.get_info();
            tracing::info!("Using GPU: {} ({:?})", info.name, info.backend);

            let (device, queue) = adapter
                .request_device(
                    &wgpu::DeviceDescriptor {
                        label: Some("sprocket_device"),
                        required_features: wgpu::Features::empty(),
                        required_limits: adapter.limits(),
                        memory_hints: wgpu::MemoryHints::Performance,
                    },
                    None,
                )
                .await
                .map_err(|e| ZeroCopyError::NotAvailable(e.to_string()))?;

            Ok(Self::new(device, queue))
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn create_plane(
        &self,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
        label: &str,
    ) -> wgpu::Texture {
        self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        })
    }

    fn create_texture(
        &self,
        kind: TextureKind,
        width: u32,
        height: u32,
    ) -> Result<WgpuTexture, ZeroCopyError> {
        let max = self.device.limits().max_texture_dimension_2d;
        if width > max || height > max {
            return Err(ZeroCopyError::TextureCreationFailed(format!(
                "{}x{} exceeds the device limit of {}",
                width, height, max
            )));
        }

        let planes = match kind {
            TextureKind::Packed(PixelFormat::Rgba) => vec![self.create_plane(
                width,
                height,
                wgpu::TextureFormat::Rgba8Unorm,
                "sprocket_rgba",
            )],
            TextureKind::Packed(PixelFormat::Bgra) => vec![self.create_plane(
                width,
                height,
                wgpu::TextureFormat::Bgra8Unorm,
                "sprocket_bgra",
            )],
            TextureKind::Packed(other) => {
                return Err(ZeroCopyError::FormatMismatch(format!(
                    "{:?} is not a packed format",
                    other
                )))
            }
            TextureKind::Biplanar => vec![
                self.create_plane(width, height, wgpu::TextureFormat::R8Unorm, "sprocket_y"),
                self.create_plane(
                    width.div_ceil(2),
                    height.div_ceil(2),
                    wgpu::TextureFormat::Rg8Unorm,
                    "sprocket_uv",
                ),
            ],
        };
        Ok(WgpuTexture::from_planes(planes))
    }

    fn write_plane(
        &self,
        texture: &wgpu::Texture,
        data: &[u8],
        stride: usize,
        width: u32,
        height: u32,
    ) {
        let (bytes_per_row, data) = pad_plane_data(data, stride, height);
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
    }

    fn write_frame(&self, texture: &WgpuTexture, frame: &CpuFrame) -> Result<(), ZeroCopyError> {
        let missing = |index: usize| {
            ZeroCopyError::FormatMismatch(format!(
                "{:?} frame is missing plane {}",
                frame.format, index
            ))
        };
        let plane = |index: usize| frame.plane(index).ok_or_else(|| missing(index));
        let (width, height) = (frame.width, frame.height);
        let (uv_width, uv_height) = (width.div_ceil(2), height.div_ceil(2));

        match frame.format {
            PixelFormat::Rgba | PixelFormat::Bgra => {
                let rgba = plane(0)?;
                self.write_plane(texture.plane(0)?, &rgba.data, rgba.stride, width, height);
            }
            PixelFormat::Nv12 => {
                let y = plane(0)?;
                let uv = plane(1)?;
                self.write_plane(texture.plane(0)?, &y.data, y.stride, width, height);
                self.write_plane(texture.plane(1)?, &uv.data, uv.stride, uv_width, uv_height);
            }
            PixelFormat::Yuv420p => {
                let y = plane(0)?;
                let uv = interleave_uv(plane(1)?, plane(2)?, uv_width, uv_height);
                self.write_plane(texture.plane(0)?, &y.data, y.stride, width, height);
                self.write_plane(
                    texture.plane(1)?,
                    &uv,
                    uv_width as usize * 2,
                    uv_width,
                    uv_height,
                );
            }
        }
        Ok(())
    }
}

impl RenderContext for WgpuContext {
    fn upload(
        &mut self,
        frame: &CpuFrame,
        cached: Option<&mut TextureInfo>,
    ) -> Result<BindOutcome, ZeroCopyError> {
        if frame.width == 0 || frame.height == 0 {
            return Err(ZeroCopyError::InvalidResource(format!(
                "{:?} frame has no pixels ({}x{})",
                frame.format, frame.width, frame.height
            )));
        }
        let kind = TextureKind::for_format(frame.format);

        if let Some(texture) = cached {
            if texture.kind == kind && texture.width == frame.width && texture.height == frame.height
            {
                if let Some(planes) = texture.downcast_ref::<WgpuTexture>() {
                    self.write_frame(planes, frame)?;
                    return Ok(BindOutcome::Updated);
                }
            }
        }

        let planes = self.create_texture(kind, frame.width, frame.height)?;
        self.write_frame(&planes, frame)?;
        let id = self.next_id();
        tracing::debug!(
            "Created {:?} texture #{} ({}x{})",
            kind,
            id,
            frame.width,
            frame.height
        );
        Ok(BindOutcome::Replaced(TextureInfo::new(
            kind,
            frame.width,
            frame.height,
            id,
            planes,
        )))
    }

    fn wrap(&mut self, texture: &TextureInfo) -> Result<WrappedImage, ZeroCopyError> {
        if texture.kind == TextureKind::Biplanar {
            return Err(ZeroCopyError::FormatMismatch(
                "biplanar textures must be converted before wrapping".into(),
            ));
        }
        let planes = texture.downcast_ref::<WgpuTexture>().ok_or_else(|| {
            ZeroCopyError::InvalidResource(format!("texture #{} is not a wgpu texture", texture.id))
        })?;

        let view = planes
            .plane(0)?
            .create_view(&wgpu::TextureViewDescriptor::default());
        let image = WgpuImage {
            view,
            _texture: Arc::clone(texture.resource()),
        };
        Ok(WrappedImage::new(
            texture.width,
            texture.height,
            texture.id,
            Arc::new(image),
        ))
    }

    fn convert_biplanar(&mut self, texture: &TextureInfo) -> Result<TextureInfo, ZeroCopyError> {
        let planes = texture.downcast_ref::<WgpuTexture>().ok_or_else(|| {
            ZeroCopyError::InvalidResource(format!("texture #{} is not a wgpu texture", texture.id))
        })?;
        if planes.planes().len() != 2 {
            return Err(ZeroCopyError::ConversionFailed(format!(
                "expected Y and UV planes, found {}",
                planes.planes().len()
            )));
        }

        let rgba = self
            .converter
            .convert(&self.device, &self.queue, planes.plane(0)?, planes.plane(1)?);
        let id = self.next_id();
        Ok(TextureInfo::new(
            TextureKind::Packed(PixelFormat::Rgba),
            texture.width,
            texture.height,
            id,
            WgpuTexture::from_planes(vec![rgba]),
        ))
    }
}
