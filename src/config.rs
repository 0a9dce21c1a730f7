// SPDX-License-Identifier: GPL-3.0-only

use crate::constants::{self, overlay as overlay_consts};
use crate::errors::{AppError, AppResult};
use crate::gpu::{GpuBackendKind, Viewport};
use crate::render::{OverlayLayout, ScaleMode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Directory name under the user's config and pictures directories
pub const APP_DIR: &str = "camera-compositor";

/// Still image output format
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum PhotoOutputFormat {
    /// Lossless, keeps alpha
    #[default]
    Png,
    /// Lossy, alpha dropped
    Jpeg,
}

impl PhotoOutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            PhotoOutputFormat::Png => "png",
            PhotoOutputFormat::Jpeg => "jpg",
        }
    }
}

/// Requested preview size
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PreviewSize {
    pub width: u32,
    pub height: u32,
}

impl Default for PreviewSize {
    fn default() -> Self {
        Self {
            width: constants::DEFAULT_PREVIEW_WIDTH,
            height: constants::DEFAULT_PREVIEW_HEIGHT,
        }
    }
}

/// Timestamp and watermark settings
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct OverlaySettings {
    pub enabled: bool,
    /// Bottom-left framebuffer coordinates of the first timestamp glyph
    pub timestamp_origin: (i32, i32),
    pub glyph_stride: i32,
    pub glyph_viewport: (u32, u32),
    /// x, y, width, height
    pub watermark_rect: (i32, i32, u32, u32),
    /// Image drawn at the watermark rect; a text badge is drawn without one
    pub watermark_path: Option<PathBuf>,
    /// TTF font for the glyphs; the built-in bitmap font is used without one
    pub font_path: Option<PathBuf>,
    pub font_size: f32,
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            timestamp_origin: overlay_consts::TIMESTAMP_ORIGIN,
            glyph_stride: overlay_consts::GLYPH_STRIDE,
            glyph_viewport: (
                overlay_consts::GLYPH_VIEWPORT_WIDTH,
                overlay_consts::GLYPH_VIEWPORT_HEIGHT,
            ),
            watermark_rect: overlay_consts::WATERMARK_RECT,
            watermark_path: None,
            font_path: None,
            font_size: overlay_consts::GLYPH_TEXT_SIZE,
        }
    }
}

impl OverlaySettings {
    pub fn layout(&self) -> OverlayLayout {
        let (x, y, w, h) = self.watermark_rect;
        OverlayLayout {
            timestamp_origin: self.timestamp_origin,
            glyph_stride: self.glyph_stride,
            glyph_viewport: self.glyph_viewport,
            watermark_rect: Viewport::new(x, y, w, h),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct Config {
    /// Camera opened by the preview
    pub camera_id: u32,
    /// Size requested from the camera; the closest supported size is used
    pub preview_size: PreviewSize,
    pub scale_mode: ScaleMode,
    pub gpu_backend: GpuBackendKind,
    pub photo_format: PhotoOutputFormat,
    /// JPEG quality, 0-100
    pub jpeg_quality: u8,
    /// Snapshot and recording directory; the pictures directory when unset
    pub output_dir: Option<PathBuf>,
    /// Forward every Nth preview frame to the encoder
    pub encoder_duty_cycle: u32,
    pub overlay: OverlaySettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_id: constants::DEFAULT_CAMERA_ID,
            preview_size: PreviewSize::default(),
            scale_mode: ScaleMode::default(),
            gpu_backend: GpuBackendKind::default(),
            photo_format: PhotoOutputFormat::default(),
            jpeg_quality: 92,
            output_dir: None,
            encoder_duty_cycle: constants::DEFAULT_ENCODER_DUTY_CYCLE,
            overlay: OverlaySettings::default(),
        }
    }
}

impl Config {
    /// Default location of the config file
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.json"))
    }

    /// Load from the default location, falling back to defaults
    pub fn load() -> Self {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => {
                warn!("No config directory available, using defaults");
                Self::default()
            }
        }
    }

    /// Load from `path`. A missing or malformed file yields the defaults.
    pub fn load_from(path: &Path) -> Self {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file, using defaults");
                return Self::default();
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read config, using defaults");
                return Self::default();
            }
        };
        match serde_json::from_str(&text) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Malformed config, using defaults");
                Self::default()
            }
        }
    }

    /// Write as pretty JSON, creating the directory
    pub fn save_to(&self, path: &Path) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| AppError::Config(format!("serialize failed: {}", e)))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Effective output directory
    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(crate::storage::default_output_dir)
    }
}
