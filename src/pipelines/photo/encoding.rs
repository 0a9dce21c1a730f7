// SPDX-License-Identifier: GPL-3.0-only

//! Still image encoding
//!
//! Snapshot pixels arrive as top-left-origin RGBA. PNG keeps the alpha
//! channel; JPEG drops it.

use crate::errors::PhotoError;
use crate::gpu::RgbaFrame;
use image::{ImageFormat, RgbImage, RgbaImage};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Supported encoding formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingFormat {
    /// JPEG format (lossy compression)
    Jpeg,
    /// PNG format (lossless compression)
    Png,
}

impl EncodingFormat {
    /// Get file extension for this format
    pub fn extension(&self) -> &'static str {
        match self {
            EncodingFormat::Jpeg => "jpg",
            EncodingFormat::Png => "png",
        }
    }

    /// Format named by a path's extension, if it is one we write
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_string_lossy().to_ascii_lowercase();
        match ext.as_str() {
            "png" => Some(EncodingFormat::Png),
            "jpg" | "jpeg" => Some(EncodingFormat::Jpeg),
            _ => None,
        }
    }

    fn to_image_format(self) -> ImageFormat {
        match self {
            EncodingFormat::Jpeg => ImageFormat::Jpeg,
            EncodingFormat::Png => ImageFormat::Png,
        }
    }
}

impl From<crate::config::PhotoOutputFormat> for EncodingFormat {
    fn from(format: crate::config::PhotoOutputFormat) -> Self {
        match format {
            crate::config::PhotoOutputFormat::Jpeg => EncodingFormat::Jpeg,
            crate::config::PhotoOutputFormat::Png => EncodingFormat::Png,
        }
    }
}

/// Encoding quality settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingQuality {
    /// Low quality (high compression)
    Low,
    /// Medium quality (balanced)
    Medium,
    /// High quality (low compression)
    High,
    /// Maximum quality (minimal compression)
    Maximum,
}

impl EncodingQuality {
    /// Get JPEG quality value (0-100)
    pub fn jpeg_quality(&self) -> u8 {
        match self {
            EncodingQuality::Low => 60,
            EncodingQuality::Medium => 80,
            EncodingQuality::High => 92,
            EncodingQuality::Maximum => 98,
        }
    }

    /// Nearest named quality for a 0-100 value
    pub fn from_percent(percent: u8) -> Self {
        match percent {
            0..=70 => EncodingQuality::Low,
            71..=86 => EncodingQuality::Medium,
            87..=95 => EncodingQuality::High,
            _ => EncodingQuality::Maximum,
        }
    }
}

/// Encoded image data ready for saving
pub struct EncodedImage {
    pub data: Vec<u8>,
    pub format: EncodingFormat,
    pub width: u32,
    pub height: u32,
}

/// Still image encoder
#[derive(Debug, Clone)]
pub struct PhotoEncoder {
    /// Used when a target path has no recognised extension
    default_format: EncodingFormat,
    quality: EncodingQuality,
}

impl Default for PhotoEncoder {
    fn default() -> Self {
        Self::new(EncodingFormat::Png, EncodingQuality::High)
    }
}

impl PhotoEncoder {
    pub fn new(default_format: EncodingFormat, quality: EncodingQuality) -> Self {
        Self {
            default_format,
            quality,
        }
    }

    pub fn default_format(&self) -> EncodingFormat {
        self.default_format
    }

    /// Final path and format for a requested path.
    ///
    /// The extension decides the format. Without a recognised extension the
    /// default format is used and its extension is put on the path, so file
    /// name and content always agree.
    pub fn resolve(&self, path: &Path) -> (PathBuf, EncodingFormat) {
        match EncodingFormat::from_path(path) {
            Some(format) => (path.to_path_buf(), format),
            None => {
                let format = self.default_format;
                let fixed = path.with_extension(format.extension());
                warn!(
                    requested = %path.display(),
                    path = %fixed.display(),
                    "Unrecognised snapshot extension"
                );
                (fixed, format)
            }
        }
    }

    /// Encode a snapshot
    pub fn encode(
        &self,
        frame: RgbaFrame,
        format: EncodingFormat,
    ) -> Result<EncodedImage, PhotoError> {
        let (width, height) = (frame.width, frame.height);
        let image = RgbaImage::from_raw(width, height, frame.data).ok_or_else(|| {
            PhotoError::InvalidBuffer(format!("buffer does not hold {}x{} RGBA", width, height))
        })?;
        let data = match format {
            EncodingFormat::Jpeg => Self::encode_jpeg(image, self.quality)?,
            EncodingFormat::Png => Self::encode_png(image)?,
        };
        debug!(size = data.len(), ?format, "Encoding complete");
        Ok(EncodedImage {
            data,
            format,
            width,
            height,
        })
    }

    /// Write encoded bytes to `path`, creating the parent directory
    pub fn save(&self, encoded: &EncodedImage, path: &Path) -> Result<(), PhotoError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, &encoded.data)?;
        info!(
            path = %path.display(),
            width = encoded.width,
            height = encoded.height,
            "Photo saved"
        );
        Ok(())
    }

    /// Encode as JPEG; alpha is discarded
    fn encode_jpeg(image: RgbaImage, quality: EncodingQuality) -> Result<Vec<u8>, PhotoError> {
        let rgb: RgbImage = image::DynamicImage::ImageRgba8(image).to_rgb8();
        let mut buffer = Vec::new();
        let mut cursor = std::io::Cursor::new(&mut buffer);
        let mut encoder =
            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut cursor, quality.jpeg_quality());
        encoder
            .encode(
                rgb.as_raw(),
                rgb.width(),
                rgb.height(),
                image::ExtendedColorType::Rgb8,
            )
            .map_err(|e| PhotoError::EncodingFailed(format!("JPEG encoding failed: {}", e)))?;
        Ok(buffer)
    }

    fn encode_png(image: RgbaImage) -> Result<Vec<u8>, PhotoError> {
        let mut buffer = Vec::new();
        image
            .write_to(
                &mut std::io::Cursor::new(&mut buffer),
                EncodingFormat::Png.to_image_format(),
            )
            .map_err(|e| PhotoError::EncodingFailed(format!("PNG encoding failed: {}", e)))?;
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> RgbaFrame {
        RgbaFrame {
            width: 2,
            height: 2,
            data: vec![
                255, 0, 0, 255, 0, 255, 0, 255, //
                0, 0, 255, 255, 255, 255, 255, 128,
            ],
        }
    }

    #[test]
    fn test_extension_decides_format() {
        let encoder = PhotoEncoder::new(EncodingFormat::Jpeg, EncodingQuality::High);
        assert_eq!(
            encoder.resolve(Path::new("/tmp/a.PNG")),
            (PathBuf::from("/tmp/a.PNG"), EncodingFormat::Png)
        );
        assert_eq!(
            encoder.resolve(Path::new("/tmp/a.jpeg")).1,
            EncodingFormat::Jpeg
        );
        assert_eq!(
            encoder.resolve(Path::new("/tmp/a.bmp")),
            (PathBuf::from("/tmp/a.jpg"), EncodingFormat::Jpeg)
        );
    }

    #[test]
    fn test_png_is_lossless() {
        let encoded = PhotoEncoder::default()
            .encode(frame(), EncodingFormat::Png)
            .unwrap();
        let decoded = image::load_from_memory(&encoded.data).unwrap().to_rgba8();
        assert_eq!(decoded.into_raw(), frame().data);
    }

    #[test]
    fn test_jpeg_has_jpeg_signature() {
        let encoded = PhotoEncoder::default()
            .encode(frame(), EncodingFormat::Jpeg)
            .unwrap();
        assert_eq!(&encoded.data[..2], &[0xFF, 0xD8]);
        assert_eq!(
            image::guess_format(&encoded.data).unwrap(),
            ImageFormat::Jpeg
        );
    }

    #[test]
    fn test_short_buffer_is_rejected() {
        let bad = RgbaFrame {
            width: 4,
            height: 4,
            data: vec![0; 8],
        };
        assert!(matches!(
            PhotoEncoder::default().encode(bad, EncodingFormat::Png),
            Err(PhotoError::InvalidBuffer(_))
        ));
    }
}
