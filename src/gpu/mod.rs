// SPDX-License-Identifier: GPL-3.0-only

//! GPU abstraction for the preview pipeline
//!
//! The pipeline talks to the GPU through two traits:
//!
//! - [`GpuDevice`]: the physical device/driver. Creates and destroys contexts.
//! - [`GpuApi`]: the object namespace of one share group. Textures, programs and
//!   surfaces created through it are visible to every context in the group.
//!
//! [`context`] layers thread ownership ("current" bindings) on top of these.
//! Two backends are provided: a deterministic CPU rasterizer ([`software`]) and
//! an off-screen [`wgpu_backend`].

pub mod context;
pub mod matrix;
pub mod software;
pub mod wgpu_backend;

pub use context::{
    ContextManager, DrawableSurface, FrameSink, RenderContext, SharedContextHandle, SurfaceTarget,
};
pub use matrix::Mat4;

use crate::errors::GpuResult;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Extension a backend must expose before frames from a capture stream can be sampled
pub const EXTERNAL_TEXTURE_EXTENSION: &str = "OES_EGL_image_external";

/// GPU texture handle, unique within a share group
pub type TextureId = u32;
/// GPU program handle, unique within a share group
pub type ProgramId = u32;
/// Render target handle, unique within a share group
pub type SurfaceId = u32;
/// Rendering context identifier, unique per [`ContextManager`]
pub type ContextId = u64;

/// Viewport rectangle in framebuffer pixels, origin at the bottom-left corner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Full-surface viewport
    pub const fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }
}

/// Kind of texture to allocate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureKind {
    /// Bound to a live capture stream
    External,
    /// Static image (glyphs, watermark)
    Normal,
}

/// Quad program variants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramKind {
    /// Samples an external (capture stream) texture
    ExternalQuad,
    /// Samples a normal 2D texture
    Quad,
}

impl ProgramKind {
    /// Program able to sample the given texture kind
    pub fn for_texture(kind: TextureKind) -> Self {
        match kind {
            TextureKind::External => ProgramKind::ExternalQuad,
            TextureKind::Normal => ProgramKind::Quad,
        }
    }
}

/// One textured quad draw
#[derive(Debug, Clone, Copy)]
pub struct QuadDraw<'a> {
    pub program: ProgramId,
    pub texture: TextureId,
    /// Texture coordinate transform
    pub tex_matrix: &'a Mat4,
    /// Model-view-projection applied to the quad vertices
    pub mvp: &'a Mat4,
}

/// Byte order of pixels returned by a readback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelOrder {
    Rgba,
    Bgra,
}

/// Which framebuffer row comes first in a readback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOrigin {
    BottomLeft,
    TopLeft,
}

/// Raw pixels read back from a render target, 4 bytes per pixel, no row padding
#[derive(Debug, Clone)]
pub struct Readback {
    pub width: u32,
    pub height: u32,
    pub order: PixelOrder,
    pub origin: RowOrigin,
    pub data: Vec<u8>,
}

/// Tightly packed RGBA pixels, top row first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbaFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Readback {
    /// Normalize to RGBA with the top row first.
    ///
    /// Bottom-left readbacks are flipped vertically and BGRA pixels have their
    /// red and blue channels swapped.
    pub fn into_rgba_top_left(self) -> RgbaFrame {
        let row_bytes = self.width as usize * 4;
        let mut data = match self.origin {
            RowOrigin::TopLeft => self.data,
            RowOrigin::BottomLeft if row_bytes == 0 => self.data,
            RowOrigin::BottomLeft => self
                .data
                .chunks_exact(row_bytes)
                .rev()
                .flatten()
                .copied()
                .collect(),
        };
        if self.order == PixelOrder::Bgra {
            for px in data.chunks_exact_mut(4) {
                px.swap(0, 2);
            }
        }
        RgbaFrame {
            width: self.width,
            height: self.height,
            data,
        }
    }
}

/// Object namespace of a share group
///
/// Every call is made by the thread whose context is current; the context
/// layer enforces that before delegating here.
pub trait GpuApi: Send + Sync {
    /// Extensions/features exposed by the driver
    fn extensions(&self) -> Vec<String>;

    /// Allocate an empty texture
    fn create_texture(&self, kind: TextureKind) -> GpuResult<TextureId>;

    /// Replace the texture image with tightly packed RGBA rows, first row at `t = 0`
    fn upload_texture(&self, texture: TextureId, width: u32, height: u32, rgba: &[u8])
    -> GpuResult<()>;

    /// Delete a texture; unknown ids are ignored
    fn delete_texture(&self, texture: TextureId);

    /// Compile the quad program of the given kind
    fn create_program(&self, kind: ProgramKind) -> GpuResult<ProgramId>;

    /// Delete a program; unknown ids are ignored
    fn delete_program(&self, program: ProgramId);

    /// Allocate a render target
    fn create_surface(&self, width: u32, height: u32) -> GpuResult<SurfaceId>;

    /// Reallocate a render target, discarding its contents
    fn resize_surface(&self, surface: SurfaceId, width: u32, height: u32) -> GpuResult<()>;

    /// Free a render target; unknown ids are ignored
    fn destroy_surface(&self, surface: SurfaceId);

    /// Clear the whole target
    fn clear(&self, surface: SurfaceId, color: [f32; 4]) -> GpuResult<()>;

    /// Draw one quad into `viewport` with premultiplied alpha blending
    fn draw_quad(&self, surface: SurfaceId, viewport: Viewport, draw: &QuadDraw<'_>)
    -> GpuResult<()>;

    /// Read back the pixels of `rect`
    fn read_pixels(&self, surface: SurfaceId, rect: Viewport) -> GpuResult<Readback>;

    /// Submit pending work for the target (swap/present point)
    fn flush(&self, surface: SurfaceId) -> GpuResult<()>;
}

/// Physical device / driver
pub trait GpuDevice: Send + Sync {
    /// Human readable adapter name
    fn name(&self) -> String;

    /// Create the object namespace for a new context.
    ///
    /// With `share_with`, the returned namespace must be the same one so that
    /// objects are visible to both contexts.
    fn create_context(
        &self,
        id: ContextId,
        share_with: Option<&Arc<dyn GpuApi>>,
    ) -> GpuResult<Arc<dyn GpuApi>>;

    /// Notification that a context has been destroyed
    fn destroy_context(&self, id: ContextId);
}

/// Selectable backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GpuBackendKind {
    /// CPU rasterizer, always available
    #[default]
    Software,
    /// wgpu off-screen rendering
    Wgpu,
}

impl std::fmt::Display for GpuBackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GpuBackendKind::Software => write!(f, "software"),
            GpuBackendKind::Wgpu => write!(f, "wgpu"),
        }
    }
}

/// Open the device for the requested backend
pub fn open_device(kind: GpuBackendKind) -> GpuResult<Arc<dyn GpuDevice>> {
    match kind {
        GpuBackendKind::Software => Ok(Arc::new(software::SoftwareDevice::new())),
        GpuBackendKind::Wgpu => Ok(Arc::new(wgpu_backend::WgpuDevice::open("camera-compositor")?)),
    }
}
