//! sprocket: video playback with wgpu rendering.
//!
//! Re-exports the whole of `sprocket_core` and adds [`WgpuContext`], a
//! [`RenderContext`] that uploads CPU frames into wgpu textures and converts
//! NV12/YUV420p on the GPU.
//!
//! ```no_run
//! use std::time::Duration;
//! use sprocket::{open, OpenOptions, WgpuContext};
//!
//! let mut ctx = WgpuContext::headless()?;
//! let mut source = open("pattern:640x360@30:5", OpenOptions::default())?;
//! source.play();
//! loop {
//!     source.advance_frame(Duration::from_secs_f64(1.0 / 60.0));
//!     if let Some(image) = source.current_frame(&mut ctx) {
//!         let _view = image.downcast_ref::<sprocket::WgpuImage>().map(|i| i.view());
//!     }
//!     if !source.is_playing() {
//!         break;
//!     }
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod context;
pub mod convert;
pub mod upload;

pub use context::{WgpuContext, WgpuImage, WgpuTexture};
pub use sprocket_core::*;

/// wgpu version this crate is built against.
pub use wgpu;
