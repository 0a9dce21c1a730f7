// SPDX-License-Identifier: GPL-3.0-only

//! Application layer
//!
//! [`CameraView`] binds a preview to one surface at a time. [`Services`]
//! builds the collaborators a view needs from the user configuration: the GPU
//! device, the glyph rasterizer, the optional watermark image and the
//! snapshot writer.

pub mod camera_view;

pub use camera_view::{CameraView, CameraViewConfig};

use crate::backends::camera::CameraProvider;
use crate::config::Config;
use crate::errors::AppResult;
use crate::gpu::{self, ContextManager};
use crate::pipelines::photo::{EncodingQuality, PhotoEncoder, PhotoWriter, SaveCallback};
use crate::pipelines::video::VideoRecorder;
use crate::render::primary::RendererSettings;
use crate::render::{GlyphRasterizer, PersistenceSink, overlay};
use image::RgbaImage;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Long-lived collaborators shared by views and recorders
pub struct Services {
    pub manager: ContextManager,
    pub rasterizer: Arc<GlyphRasterizer>,
    pub watermark: Option<RgbaImage>,
    pub photos: Arc<PhotoWriter>,
    config: Config,
}

impl Services {
    /// Open the configured GPU backend and load overlay assets.
    ///
    /// A font or watermark that cannot be loaded falls back to the built-in
    /// glyphs or the text badge.
    pub fn from_config(config: &Config, on_saved: Option<SaveCallback>) -> AppResult<Self> {
        let device = gpu::open_device(config.gpu_backend)?;
        info!(backend = %config.gpu_backend, "GPU device opened");

        let overlay_settings = &config.overlay;
        let rasterizer = match &overlay_settings.font_path {
            Some(path) => GlyphRasterizer::from_ttf_file(path, overlay_settings.font_size)
                .unwrap_or_else(|e| {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "Font not usable, using built-in glyphs"
                    );
                    GlyphRasterizer::new(overlay_settings.font_size)
                }),
            None => GlyphRasterizer::new(overlay_settings.font_size),
        };
        let watermark = overlay_settings.watermark_path.as_deref().and_then(|path| {
            overlay::load_watermark(path)
                .inspect_err(|e| {
                    warn!(path = %path.display(), error = %e, "Watermark not usable, using badge")
                })
                .ok()
        });

        let encoder = PhotoEncoder::new(
            config.photo_format.into(),
            EncodingQuality::from_percent(config.jpeg_quality),
        );
        let photos = Arc::new(PhotoWriter::spawn(encoder, on_saved)?);

        Ok(Self {
            manager: ContextManager::new(device),
            rasterizer: Arc::new(rasterizer),
            watermark,
            photos,
            config: config.clone(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// A view on `provider` that saves snapshots through the photo writer
    pub fn camera_view(&self, provider: Arc<dyn CameraProvider>) -> CameraView {
        let config = &self.config;
        let view_config = CameraViewConfig {
            camera_id: config.camera_id,
            preview_size: (config.preview_size.width, config.preview_size.height),
            renderer: RendererSettings {
                scale_mode: config.scale_mode,
                encoder_duty_cycle: config.encoder_duty_cycle,
                overlay_enabled: config.overlay.enabled,
                overlay_layout: config.overlay.layout(),
            },
            rasterizer: Arc::clone(&self.rasterizer),
            watermark: self.watermark.clone(),
            persistence: Some(Arc::clone(&self.photos) as Arc<dyn PersistenceSink>),
            snapshot_dir: config.output_dir(),
            snapshot_extension: config.photo_format.extension().to_string(),
        };
        CameraView::new(self.manager.clone(), provider, view_config)
    }

    /// A recorder writing `width`×`height` frames with the configured overlay
    pub fn recorder(&self, output: &Path, width: u32, height: u32) -> AppResult<VideoRecorder> {
        VideoRecorder::new(
            output,
            width,
            height,
            Arc::clone(&self.rasterizer),
            self.config.overlay.layout(),
            self.watermark.clone(),
        )
    }
}
