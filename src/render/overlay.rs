// SPDX-License-Identifier: GPL-3.0-only

//! Overlay compositing: timestamp glyphs and a static watermark
//!
//! Glyphs are rasterized once per context into 12 textures (digits, '-' and
//! ':') and stamped one per character through a small viewport that advances by
//! a fixed stride.

use crate::constants::overlay as consts;
use crate::errors::{AppError, AppResult, GpuError, GpuResult};
use crate::gpu::matrix::{self, Mat4};
use crate::gpu::{DrawableSurface, GpuApi, RenderContext, TextureId, TextureKind, Viewport};
use crate::render::QuadDrawer;
use image::{Rgba, RgbaImage};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Characters with a glyph texture, in texture order
pub const GLYPH_CHARS: [char; consts::GLYPH_COUNT] =
    ['0', '1', '2', '3', '4', '5', '6', '7', '8', '9', '-', ':'];

/// 5x7 bitmap font, one row per byte, bit 4 is the leftmost column
const BITMAP_FONT: [[u8; 7]; consts::GLYPH_COUNT] = [
    [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E], // 0
    [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E], // 1
    [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F], // 2
    [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E], // 3
    [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02], // 4
    [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E], // 5
    [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E], // 6
    [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08], // 7
    [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E], // 8
    [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C], // 9
    [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00], // -
    [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00], // :
];

/// Texture index of `ch`: digits map to 0-9, '-' to 10, ':' to 11
pub fn glyph_index(ch: char) -> Option<usize> {
    match ch {
        '0'..='9' => Some(ch as usize - '0' as usize),
        '-' => Some(consts::DASH_GLYPH),
        ':' => Some(consts::COLON_GLYPH),
        _ => None,
    }
}

/// Wall-clock time formatted for the timestamp overlay
pub fn current_timestamp() -> String {
    chrono::Local::now()
        .format(consts::TIMESTAMP_FORMAT)
        .to_string()
}

enum GlyphFont {
    Bitmap,
    Ttf(Box<fontdue::Font>),
}

/// Turns short strings into white-on-transparent images
///
/// Constructed once by the composition root and shared by every renderer.
pub struct GlyphRasterizer {
    font: GlyphFont,
    size: f32,
}

impl Default for GlyphRasterizer {
    fn default() -> Self {
        Self::new(consts::GLYPH_TEXT_SIZE)
    }
}

impl GlyphRasterizer {
    /// Rasterizer using the embedded bitmap font
    pub fn new(size: f32) -> Self {
        Self {
            font: GlyphFont::Bitmap,
            size,
        }
    }

    /// Rasterizer using a TrueType font
    pub fn from_ttf_bytes(bytes: &[u8], size: f32) -> AppResult<Self> {
        let font = fontdue::Font::from_bytes(bytes, fontdue::FontSettings::default())
            .map_err(|e| AppError::Config(format!("Invalid font: {}", e)))?;
        Ok(Self {
            font: GlyphFont::Ttf(Box::new(font)),
            size,
        })
    }

    pub fn from_ttf_file(path: &Path, size: f32) -> AppResult<Self> {
        let bytes = std::fs::read(path)?;
        let rasterizer = Self::from_ttf_bytes(&bytes, size)?;
        info!(font = %path.display(), size, "Loaded overlay font");
        Ok(rasterizer)
    }

    pub fn size(&self) -> f32 {
        self.size
    }

    /// Render `text` at the baseline of a glyph canvas
    pub fn text_to_image(&self, text: &str) -> RgbaImage {
        let mut canvas = RgbaImage::new(consts::GLYPH_CANVAS_WIDTH, consts::GLYPH_CANVAS_HEIGHT);
        let baseline = consts::GLYPH_BASELINE as i32;
        let mut pen_x = 0i32;

        for ch in text.chars() {
            match &self.font {
                GlyphFont::Bitmap => {
                    let cell = (self.size / 7.0).floor().max(1.0) as i32;
                    if let Some(index) = glyph_index(ch) {
                        let top = baseline - 7 * cell;
                        for (row, bits) in BITMAP_FONT[index].iter().enumerate() {
                            for col in 0..5 {
                                if bits & (0x10 >> col) != 0 {
                                    fill_cell(
                                        &mut canvas,
                                        pen_x + col * cell,
                                        top + row as i32 * cell,
                                        cell,
                                    );
                                }
                            }
                        }
                    }
                    pen_x += 6 * cell;
                }
                GlyphFont::Ttf(font) => {
                    let (metrics, coverage) = font.rasterize(ch, self.size);
                    let left = pen_x + metrics.xmin;
                    let top = baseline - (metrics.ymin + metrics.height as i32);
                    for y in 0..metrics.height {
                        for x in 0..metrics.width {
                            let a = coverage[y * metrics.width + x];
                            if a > 0 {
                                put(&mut canvas, left + x as i32, top + y as i32, a);
                            }
                        }
                    }
                    pen_x += metrics.advance_width.round() as i32;
                }
            }
        }
        canvas
    }

    /// The 12 glyph images in texture order
    pub fn glyph_images(&self) -> Vec<RgbaImage> {
        GLYPH_CHARS
            .iter()
            .map(|ch| self.text_to_image(&ch.to_string()))
            .collect()
    }

    /// Default watermark: a framed badge the size of the watermark rect
    pub fn watermark_badge(&self) -> RgbaImage {
        let (_, _, w, h) = consts::WATERMARK_RECT;
        let mut badge = RgbaImage::new(w, h);
        let border = 3;
        for y in 0..h {
            for x in 0..w {
                let edge = x < border || y < border || x >= w - border || y >= h - border;
                if edge {
                    badge.put_pixel(x, y, Rgba([255, 255, 255, 255]));
                } else {
                    // 25% white, premultiplied
                    badge.put_pixel(x, y, Rgba([64, 64, 64, 64]));
                }
            }
        }
        badge
    }
}

fn fill_cell(canvas: &mut RgbaImage, x: i32, y: i32, cell: i32) {
    for dy in 0..cell {
        for dx in 0..cell {
            put(canvas, x + dx, y + dy, 255);
        }
    }
}

/// Premultiplied white with coverage `a`
fn put(canvas: &mut RgbaImage, x: i32, y: i32, a: u8) {
    if x >= 0 && y >= 0 && (x as u32) < canvas.width() && (y as u32) < canvas.height() {
        canvas.put_pixel(x as u32, y as u32, Rgba([a, a, a, a]));
    }
}

/// Load a watermark image from disk, premultiplying its alpha
pub fn load_watermark(path: &Path) -> AppResult<RgbaImage> {
    let mut img = image::open(path)
        .map_err(|e| AppError::Config(format!("Cannot load watermark {}: {}", path.display(), e)))?
        .to_rgba8();
    for px in img.pixels_mut() {
        let [r, g, b, a] = px.0;
        let premultiply = |c: u8| ((c as u32 * a as u32 + 127) / 255) as u8;
        px.0 = [premultiply(r), premultiply(g), premultiply(b), a];
    }
    Ok(img)
}

/// Geometry of the overlay, in framebuffer pixels (bottom-left origin)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayLayout {
    pub timestamp_origin: (i32, i32),
    pub glyph_stride: i32,
    pub glyph_viewport: (u32, u32),
    pub watermark_rect: Viewport,
}

impl Default for OverlayLayout {
    fn default() -> Self {
        let (x, y, w, h) = consts::WATERMARK_RECT;
        Self {
            timestamp_origin: consts::TIMESTAMP_ORIGIN,
            glyph_stride: consts::GLYPH_STRIDE,
            glyph_viewport: (consts::GLYPH_VIEWPORT_WIDTH, consts::GLYPH_VIEWPORT_HEIGHT),
            watermark_rect: Viewport::new(x, y, w, h),
        }
    }
}

/// Glyph textures of one share group, plus the watermark texture
pub struct OverlayGlyphSet {
    api: Arc<dyn GpuApi>,
    glyphs: Vec<TextureId>,
    watermark: Option<TextureId>,
    released: bool,
}

impl OverlayGlyphSet {
    /// Upload 12 glyph images (in [`GLYPH_CHARS`] order) and an optional watermark
    pub fn load(
        context: &RenderContext,
        images: &[RgbaImage],
        watermark: Option<&RgbaImage>,
    ) -> GpuResult<Self> {
        if !context.is_current() {
            return Err(GpuError::NotCurrent);
        }
        if images.len() != consts::GLYPH_COUNT {
            return Err(GpuError::Backend(format!(
                "expected {} glyph images, got {}",
                consts::GLYPH_COUNT,
                images.len()
            )));
        }
        let api = Arc::clone(context.api());
        let mut set = Self {
            api,
            glyphs: Vec::with_capacity(images.len()),
            watermark: None,
            released: false,
        };
        for img in images {
            let id = set.upload(img)?;
            set.glyphs.push(id);
        }
        if let Some(img) = watermark {
            set.watermark = Some(set.upload(img)?);
        }
        debug!(
            glyphs = set.glyphs.len(),
            watermark = set.watermark.is_some(),
            "Overlay glyphs loaded"
        );
        Ok(set)
    }

    fn upload(&self, img: &RgbaImage) -> GpuResult<TextureId> {
        let id = self.api.create_texture(TextureKind::Normal)?;
        self.api
            .upload_texture(id, img.width(), img.height(), img.as_raw())?;
        Ok(id)
    }

    /// Texture of `ch`, if it has a glyph
    pub fn texture_for(&self, ch: char) -> Option<TextureId> {
        if self.released {
            return None;
        }
        glyph_index(ch).map(|i| self.glyphs[i])
    }

    pub fn watermark(&self) -> Option<TextureId> {
        if self.released { None } else { self.watermark }
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Delete every texture. Idempotent.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        for id in self.glyphs.iter().copied().chain(self.watermark) {
            self.api.delete_texture(id);
        }
        debug!("Overlay glyphs released");
    }
}

impl Drop for OverlayGlyphSet {
    fn drop(&mut self) {
        self.release();
    }
}

/// Stamps timestamps and watermarks into the bound framebuffer
///
/// Both draw calls change the surface viewport; callers restore it if they keep
/// drawing afterwards.
pub struct OverlayCompositor {
    drawer: QuadDrawer,
    tex_matrix: Mat4,
    layout: OverlayLayout,
}

impl OverlayCompositor {
    pub fn new(context: &RenderContext, layout: OverlayLayout) -> GpuResult<Self> {
        Ok(Self {
            drawer: QuadDrawer::new(context, TextureKind::Normal)?,
            // Images are uploaded top row first
            tex_matrix: matrix::flip_vertical(),
            layout,
        })
    }

    pub fn layout(&self) -> &OverlayLayout {
        &self.layout
    }

    /// Stamp `text` one glyph per character starting at `(origin_x, origin_y)`.
    ///
    /// Position `i` is drawn at `origin_x + stride * i`; a space advances without
    /// drawing. Any other character without a glyph fails before anything is
    /// drawn.
    pub fn draw_timestamp(
        &self,
        surface: &mut DrawableSurface,
        glyphs: &OverlayGlyphSet,
        text: &str,
        origin_x: i32,
        origin_y: i32,
    ) -> GpuResult<()> {
        let mut plan = Vec::with_capacity(text.len());
        for (i, ch) in text.chars().enumerate() {
            if ch == ' ' {
                continue;
            }
            let texture = glyphs.texture_for(ch).ok_or(GpuError::InvalidGlyph(ch))?;
            plan.push((i as i32, texture));
        }

        let (w, h) = self.layout.glyph_viewport;
        for (i, texture) in plan {
            surface.set_viewport(Viewport::new(
                origin_x + self.layout.glyph_stride * i,
                origin_y,
                w,
                h,
            ));
            self.drawer.draw(surface, texture, &self.tex_matrix)?;
        }
        Ok(())
    }

    /// Draw a static image into `rect`
    pub fn draw_watermark(
        &self,
        surface: &mut DrawableSurface,
        texture: TextureId,
        rect: Viewport,
    ) -> GpuResult<()> {
        surface.set_viewport(rect);
        self.drawer.draw(surface, texture, &self.tex_matrix)
    }

    /// Watermark at its configured rect, then `text` at the timestamp origin.
    /// Restores the surface viewport afterwards.
    pub fn draw_overlay(
        &self,
        surface: &mut DrawableSurface,
        glyphs: &OverlayGlyphSet,
        text: &str,
    ) -> GpuResult<()> {
        let saved = surface.viewport();
        let result = self.stamp(surface, glyphs, text);
        surface.set_viewport(saved);
        result
    }

    fn stamp(
        &self,
        surface: &mut DrawableSurface,
        glyphs: &OverlayGlyphSet,
        text: &str,
    ) -> GpuResult<()> {
        if let Some(watermark) = glyphs.watermark() {
            self.draw_watermark(surface, watermark, self.layout.watermark_rect)?;
        }
        let (x, y) = self.layout.timestamp_origin;
        self.draw_timestamp(surface, glyphs, text, x, y)
    }

    /// Free the program. Idempotent.
    pub fn release(&mut self) {
        self.drawer.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glyph_index_mapping() {
        assert_eq!(glyph_index('0'), Some(0));
        assert_eq!(glyph_index('9'), Some(9));
        assert_eq!(glyph_index('-'), Some(10));
        assert_eq!(glyph_index(':'), Some(11));
        assert_eq!(glyph_index(' '), None);
        assert_eq!(glyph_index('x'), None);
    }

    #[test]
    fn test_glyph_images_are_canvas_sized() {
        let images = GlyphRasterizer::default().glyph_images();
        assert_eq!(images.len(), consts::GLYPH_COUNT);
        for img in &images {
            assert_eq!(img.dimensions(), (consts::GLYPH_CANVAS_WIDTH, consts::GLYPH_CANVAS_HEIGHT));
        }
    }

    #[test]
    fn test_bitmap_glyph_sits_on_baseline() {
        let img = GlyphRasterizer::default().text_to_image("1");
        let inked_rows: Vec<u32> = (0..img.height())
            .filter(|&y| (0..img.width()).any(|x| img.get_pixel(x, y)[3] > 0))
            .collect();
        assert_eq!(inked_rows.last().copied(), Some(consts::GLYPH_BASELINE - 1));
        assert!(inked_rows[0] >= consts::GLYPH_BASELINE - 30);
    }

    #[test]
    fn test_dash_differs_from_colon() {
        let r = GlyphRasterizer::default();
        assert_ne!(r.text_to_image("-"), r.text_to_image(":"));
    }

    #[test]
    fn test_timestamp_has_fixed_width() {
        assert_eq!(current_timestamp().chars().count(), 19);
    }

    #[test]
    fn test_default_layout_matches_constants() {
        let layout = OverlayLayout::default();
        assert_eq!(layout.timestamp_origin, (160, 300));
        assert_eq!(layout.glyph_stride, 15);
        assert_eq!(layout.glyph_viewport, (220, 60));
        assert_eq!(layout.watermark_rect, Viewport::new(20, 20, 100, 50));
    }
}
