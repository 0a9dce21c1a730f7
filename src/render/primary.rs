// SPDX-License-Identifier: GPL-3.0-only

//! Primary preview renderer
//!
//! Runs on the surface thread with the primary context current. Each tick
//! latches the newest capture frame, draws it through the scale-mode policy,
//! stamps the overlay, serves a pending snapshot and hands every Nth frame to
//! the attached encoder.

use super::encoder::{DutyCycle, EncoderHandoff, EncoderSlot, VideoEncoder};
use super::external_texture::{ExternalTexture, FrameStream};
use super::overlay::{self, GlyphRasterizer, OverlayCompositor, OverlayGlyphSet, OverlayLayout};
use super::quad_drawer::QuadDrawer;
use super::snapshot::{self, PersistenceSink, SnapshotRequest};
use super::viewport::{ScaleMode, compute_layout};
use crate::constants::{CLEAR_COLOR, DEFAULT_ENCODER_DUTY_CYCLE};
use crate::errors::{AppError, AppResult, GpuError, GpuResult};
use crate::gpu::matrix::{self, Mat4};
use crate::gpu::{
    DrawableSurface, EXTERNAL_TEXTURE_EXTENSION, RenderContext, SharedContextHandle, TextureKind,
    Viewport,
};
use image::RgbaImage;
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Renderer options taken from configuration
#[derive(Debug, Clone)]
pub struct RendererSettings {
    pub scale_mode: ScaleMode,
    pub encoder_duty_cycle: u32,
    pub overlay_enabled: bool,
    pub overlay_layout: OverlayLayout,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            scale_mode: ScaleMode::default(),
            encoder_duty_cycle: DEFAULT_ENCODER_DUTY_CYCLE,
            overlay_enabled: true,
            overlay_layout: OverlayLayout::default(),
        }
    }
}

/// What one tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameReport {
    /// A new capture frame was latched
    pub consumed: bool,
    /// A snapshot was read back and handed off
    pub snapshot_taken: bool,
    /// The frame was forwarded to the encoder
    pub forwarded: bool,
}

struct Overlay {
    compositor: OverlayCompositor,
    glyphs: OverlayGlyphSet,
}

/// GPU objects alive between surface creation and destruction
struct GpuObjects {
    texture: ExternalTexture,
    drawer: QuadDrawer,
    overlay: Option<Overlay>,
    share: SharedContextHandle,
}

/// Renderer for the on-screen surface
pub struct PreviewRenderer {
    settings: RendererSettings,
    rasterizer: Arc<GlyphRasterizer>,
    watermark: Option<RgbaImage>,
    snapshot: Arc<SnapshotRequest>,
    encoder: Arc<EncoderSlot>,
    persistence: Option<Arc<dyn PersistenceSink>>,
    gpu: Option<GpuObjects>,
    view_size: (u32, u32),
    video_size: Option<(NonZeroU32, NonZeroU32)>,
    layout_dirty: bool,
    viewport: Viewport,
    mvp: Mat4,
    duty: DutyCycle,
    frames_drawn: u64,
}

impl PreviewRenderer {
    pub fn new(
        settings: RendererSettings,
        rasterizer: Arc<GlyphRasterizer>,
        snapshot: Arc<SnapshotRequest>,
        encoder: Arc<EncoderSlot>,
    ) -> Self {
        let duty = DutyCycle::new(settings.encoder_duty_cycle);
        Self {
            settings,
            rasterizer,
            watermark: None,
            snapshot,
            encoder,
            persistence: None,
            gpu: None,
            view_size: (0, 0),
            video_size: None,
            layout_dirty: true,
            viewport: Viewport::default(),
            mvp: matrix::IDENTITY,
            duty,
            frames_drawn: 0,
        }
    }

    /// Image drawn at the watermark rect; the default badge is used otherwise
    pub fn with_watermark(mut self, watermark: RgbaImage) -> Self {
        self.watermark = Some(watermark);
        self
    }

    /// Collaborator receiving snapshot pixels
    pub fn with_persistence(mut self, sink: Arc<dyn PersistenceSink>) -> Self {
        self.persistence = Some(sink);
        self
    }

    /// Producer handle of the external texture, once the surface exists
    pub fn stream(&self) -> Option<FrameStream> {
        self.gpu.as_ref().map(|g| g.texture.stream())
    }

    pub fn is_ready(&self) -> bool {
        self.gpu.is_some()
    }

    pub fn frames_drawn(&self) -> u64 {
        self.frames_drawn
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn mvp(&self) -> &Mat4 {
        &self.mvp
    }

    /// Allocate the external texture, drawer and overlay resources.
    ///
    /// Fails with [`GpuError::UnsupportedFeature`] when the driver cannot sample
    /// capture streams; the surface is unusable in that case.
    pub fn on_surface_created(&mut self, context: &RenderContext) -> GpuResult<()> {
        if !context.has_extension(EXTERNAL_TEXTURE_EXTENSION) {
            return Err(GpuError::UnsupportedFeature(
                EXTERNAL_TEXTURE_EXTENSION.to_string(),
            ));
        }

        let texture = ExternalTexture::create(context)?;
        let drawer = QuadDrawer::new(context, TextureKind::External)?;
        let overlay = if self.settings.overlay_enabled {
            let badge;
            let watermark = match &self.watermark {
                Some(img) => img,
                None => {
                    badge = self.rasterizer.watermark_badge();
                    &badge
                }
            };
            let glyphs = OverlayGlyphSet::load(
                context,
                &self.rasterizer.glyph_images(),
                Some(watermark),
            )?;
            let compositor = OverlayCompositor::new(context, self.settings.overlay_layout)?;
            Some(Overlay { compositor, glyphs })
        } else {
            None
        };

        info!(
            texture = texture.id(),
            overlay = overlay.is_some(),
            "Preview renderer ready"
        );
        self.gpu = Some(GpuObjects {
            texture,
            drawer,
            overlay,
            share: context.share_handle(),
        });
        self.layout_dirty = true;
        Ok(())
    }

    /// Record the new surface size and recompute the layout
    pub fn on_surface_changed(&mut self, width: u32, height: u32) {
        debug!(width, height, "Surface changed");
        self.view_size = (width, height);
        self.layout_dirty = true;
        self.update_viewport();
    }

    /// Negotiated video size; zero dimensions are ignored until valid
    pub fn set_video_size(&mut self, width: u32, height: u32) {
        self.video_size = NonZeroU32::new(width).zip(NonZeroU32::new(height));
        self.layout_dirty = true;
        self.update_viewport();
    }

    pub fn set_scale_mode(&mut self, mode: ScaleMode) {
        if self.settings.scale_mode != mode {
            self.settings.scale_mode = mode;
            self.layout_dirty = true;
            self.update_viewport();
        }
    }

    pub fn scale_mode(&self) -> ScaleMode {
        self.settings.scale_mode
    }

    /// Recompute viewport and MVP from view size, video size and scale mode
    pub fn update_viewport(&mut self) {
        let (view_w, view_h) = self.view_size;
        let Some((video_w, video_h)) = self.video_size else {
            self.viewport = Viewport::full(view_w, view_h);
            return;
        };
        let layout = compute_layout(view_w, view_h, video_w, video_h, self.settings.scale_mode);
        debug!(
            view_width = view_w,
            view_height = view_h,
            video_width = video_w.get(),
            video_height = video_h.get(),
            mode = %self.settings.scale_mode,
            viewport = ?layout.viewport,
            "Viewport updated"
        );
        self.viewport = layout.viewport;
        self.mvp = layout.mvp;
        if let Some(gpu) = self.gpu.as_mut() {
            gpu.drawer.set_matrix(&self.mvp);
        }
        self.layout_dirty = false;
    }

    /// Attach or detach the encoder. Runs on the surface thread.
    pub fn attach_encoder(&mut self, encoder: Option<Arc<dyn VideoEncoder>>) -> AppResult<()> {
        if let Some(encoder) = &encoder {
            let gpu = self
                .gpu
                .as_ref()
                .ok_or_else(|| AppError::Worker("surface not ready for an encoder".into()))?;
            encoder.on_attach(gpu.share.clone(), gpu.texture.id())?;
        }
        let attached = encoder.is_some();
        if let Some(previous) = self.encoder.set(encoder) {
            previous.on_detach();
        }
        info!(attached, "Video encoder changed");
        Ok(())
    }

    /// Draw one frame
    pub fn on_draw_frame(&mut self, surface: &mut DrawableSurface) -> GpuResult<FrameReport> {
        let mut report = FrameReport::default();
        if self.gpu.is_none() {
            return Ok(report);
        }

        surface.set_viewport(Viewport::full(surface.width(), surface.height()));
        surface.clear(CLEAR_COLOR)?;

        if let Some(gpu) = self.gpu.as_mut() {
            report.consumed = gpu.texture.consume_if_dirty()?;
        }
        if self.layout_dirty {
            self.update_viewport();
        }

        let Some(gpu) = self.gpu.as_ref() else {
            return Ok(report);
        };
        surface.set_viewport(self.viewport);
        gpu.drawer
            .draw(surface, gpu.texture.id(), gpu.texture.transform_matrix())?;

        if let Some(overlay) = &gpu.overlay {
            overlay
                .compositor
                .draw_overlay(surface, &overlay.glyphs, &overlay::current_timestamp())?;
        }

        if let Some(path) = self.snapshot.take() {
            match snapshot::capture(surface) {
                Ok(frame) => match &self.persistence {
                    Some(sink) => {
                        debug!(path = %path.display(), "Snapshot read back");
                        sink.persist(frame, path);
                        report.snapshot_taken = true;
                    }
                    None => warn!("Snapshot requested without a persistence sink"),
                },
                Err(e) => warn!(error = %e, "Snapshot readback failed, skipping"),
            }
        }

        if self.duty.tick() {
            report.forwarded = self.encoder.forward(&EncoderHandoff {
                texture: gpu.texture.id(),
                tex_matrix: *gpu.texture.transform_matrix(),
                mvp: self.mvp,
            });
        }

        surface.swap()?;
        self.frames_drawn += 1;
        Ok(report)
    }

    /// Release drawer, overlay glyphs and external texture, in that order.
    /// Idempotent.
    pub fn on_surface_destroyed(&mut self) {
        if let Some(previous) = self.encoder.set(None) {
            previous.on_detach();
        }
        let Some(mut gpu) = self.gpu.take() else {
            return;
        };
        gpu.drawer.release();
        if let Some(overlay) = gpu.overlay.as_mut() {
            overlay.compositor.release();
            overlay.glyphs.release();
        }
        gpu.texture.release();
        info!(frames = self.frames_drawn, "Preview renderer released");
    }
}

impl Drop for PreviewRenderer {
    fn drop(&mut self) {
        self.on_surface_destroyed();
    }
}
