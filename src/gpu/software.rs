// SPDX-License-Identifier: GPL-3.0-only

//! CPU rasterizer backend
//!
//! Deterministic implementation of [`GpuApi`] used for headless runs and tests.
//! Every textured quad is rasterized with nearest-neighbour sampling and
//! premultiplied alpha blending into a BGRA framebuffer stored bottom row first,
//! the layout a GL driver hands back from `glReadPixels` on little-endian
//! hardware.
//!
//! The device keeps a trace of draw calls and object deletions so callers can
//! check call ordering without inspecting pixels.

use super::matrix::{inverse_affine_2d, transform_point};
use super::{
    ContextId, EXTERNAL_TEXTURE_EXTENSION, GpuApi, GpuDevice, PixelOrder, ProgramId, ProgramKind,
    QuadDraw, Readback, RowOrigin, SurfaceId, TextureId, TextureKind, Viewport,
};
use crate::errors::{GpuError, GpuResult};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, trace};

/// One draw call as seen by the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawRecord {
    pub surface: SurfaceId,
    pub viewport: Viewport,
    pub program: ProgramId,
    pub program_kind: ProgramKind,
    pub texture: TextureId,
    pub texture_kind: TextureKind,
}

/// Device-level event, in call order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    Clear { surface: SurfaceId },
    Draw(DrawRecord),
    Flush { surface: SurfaceId },
    DeleteTexture(TextureId),
    DeleteProgram(ProgramId),
    DestroySurface(SurfaceId),
    DestroyContext(ContextId),
}

type Trace = Arc<Mutex<Vec<TraceEvent>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Software "driver"
pub struct SoftwareDevice {
    extensions: Vec<String>,
    trace: Trace,
    contexts: Mutex<HashSet<ContextId>>,
}

impl Default for SoftwareDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareDevice {
    /// Device exposing external texture support
    pub fn new() -> Self {
        Self::with_extensions(&[EXTERNAL_TEXTURE_EXTENSION])
    }

    /// Device lacking external textures, for exercising the unsupported path
    pub fn without_external_textures() -> Self {
        Self::with_extensions(&[])
    }

    fn with_extensions(extensions: &[&str]) -> Self {
        Self {
            extensions: extensions.iter().map(|e| e.to_string()).collect(),
            trace: Arc::new(Mutex::new(Vec::new())),
            contexts: Mutex::new(HashSet::new()),
        }
    }

    /// Snapshot of every event recorded so far
    pub fn trace(&self) -> Vec<TraceEvent> {
        lock(&self.trace).clone()
    }

    /// Draw calls recorded so far
    pub fn draws(&self) -> Vec<DrawRecord> {
        lock(&self.trace)
            .iter()
            .filter_map(|e| match e {
                TraceEvent::Draw(d) => Some(d.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear_trace(&self) {
        lock(&self.trace).clear();
    }

    /// Contexts created and not yet destroyed
    pub fn live_contexts(&self) -> usize {
        lock(&self.contexts).len()
    }
}

impl GpuDevice for SoftwareDevice {
    fn name(&self) -> String {
        "software rasterizer".to_string()
    }

    fn create_context(
        &self,
        id: ContextId,
        share_with: Option<&Arc<dyn GpuApi>>,
    ) -> GpuResult<Arc<dyn GpuApi>> {
        lock(&self.contexts).insert(id);
        match share_with {
            Some(api) => Ok(Arc::clone(api)),
            None => Ok(Arc::new(SoftwareApi {
                extensions: self.extensions.clone(),
                trace: Arc::clone(&self.trace),
                state: Mutex::new(State::default()),
            })),
        }
    }

    fn destroy_context(&self, id: ContextId) {
        lock(&self.contexts).remove(&id);
        lock(&self.trace).push(TraceEvent::DestroyContext(id));
    }
}

struct Texture {
    kind: TextureKind,
    width: u32,
    height: u32,
    /// RGBA, premultiplied, row 0 at `t = 0`
    data: Vec<u8>,
}

struct Framebuffer {
    width: u32,
    height: u32,
    /// BGRA, row 0 is the bottom row
    data: Vec<u8>,
}

impl Framebuffer {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize * 4],
        }
    }
}

#[derive(Default)]
struct State {
    next_id: u32,
    textures: HashMap<TextureId, Texture>,
    programs: HashMap<ProgramId, ProgramKind>,
    surfaces: HashMap<SurfaceId, Framebuffer>,
}

impl State {
    fn alloc_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }
}

/// Object namespace of one software share group
pub struct SoftwareApi {
    extensions: Vec<String>,
    trace: Trace,
    state: Mutex<State>,
}

impl SoftwareApi {
    fn record(&self, event: TraceEvent) {
        lock(&self.trace).push(event);
    }
}

fn to_u8(c: f32) -> u8 {
    (c.clamp(0.0, 1.0) * 255.0).round() as u8
}

impl GpuApi for SoftwareApi {
    fn extensions(&self) -> Vec<String> {
        self.extensions.clone()
    }

    fn create_texture(&self, kind: TextureKind) -> GpuResult<TextureId> {
        let mut state = lock(&self.state);
        let id = state.alloc_id();
        state.textures.insert(
            id,
            Texture {
                kind,
                width: 0,
                height: 0,
                data: Vec::new(),
            },
        );
        Ok(id)
    }

    fn upload_texture(
        &self,
        texture: TextureId,
        width: u32,
        height: u32,
        rgba: &[u8],
    ) -> GpuResult<()> {
        let expected = width as usize * height as usize * 4;
        if rgba.len() != expected {
            return Err(GpuError::Backend(format!(
                "texture upload of {} bytes for {}x{}",
                rgba.len(),
                width,
                height
            )));
        }
        let mut state = lock(&self.state);
        let tex = state
            .textures
            .get_mut(&texture)
            .ok_or(GpuError::InvalidTexture(texture))?;
        tex.width = width;
        tex.height = height;
        tex.data.clear();
        tex.data.extend_from_slice(rgba);
        Ok(())
    }

    fn delete_texture(&self, texture: TextureId) {
        if lock(&self.state).textures.remove(&texture).is_some() {
            self.record(TraceEvent::DeleteTexture(texture));
        }
    }

    fn create_program(&self, kind: ProgramKind) -> GpuResult<ProgramId> {
        if kind == ProgramKind::ExternalQuad
            && !self.extensions.iter().any(|e| e == EXTERNAL_TEXTURE_EXTENSION)
        {
            return Err(GpuError::UnsupportedFeature(
                EXTERNAL_TEXTURE_EXTENSION.to_string(),
            ));
        }
        let mut state = lock(&self.state);
        let id = state.alloc_id();
        state.programs.insert(id, kind);
        Ok(id)
    }

    fn delete_program(&self, program: ProgramId) {
        if lock(&self.state).programs.remove(&program).is_some() {
            self.record(TraceEvent::DeleteProgram(program));
        }
    }

    fn create_surface(&self, width: u32, height: u32) -> GpuResult<SurfaceId> {
        let mut state = lock(&self.state);
        let id = state.alloc_id();
        state.surfaces.insert(id, Framebuffer::new(width, height));
        debug!(surface = id, width, height, "Software surface allocated");
        Ok(id)
    }

    fn resize_surface(&self, surface: SurfaceId, width: u32, height: u32) -> GpuResult<()> {
        let mut state = lock(&self.state);
        let fb = state
            .surfaces
            .get_mut(&surface)
            .ok_or(GpuError::InvalidSurface(surface))?;
        *fb = Framebuffer::new(width, height);
        Ok(())
    }

    fn destroy_surface(&self, surface: SurfaceId) {
        if lock(&self.state).surfaces.remove(&surface).is_some() {
            self.record(TraceEvent::DestroySurface(surface));
        }
    }

    fn clear(&self, surface: SurfaceId, color: [f32; 4]) -> GpuResult<()> {
        {
            let mut state = lock(&self.state);
            let fb = state
                .surfaces
                .get_mut(&surface)
                .ok_or(GpuError::InvalidSurface(surface))?;
            let [r, g, b, a] = color.map(to_u8);
            for px in fb.data.chunks_exact_mut(4) {
                px.copy_from_slice(&[b, g, r, a]);
            }
        }
        self.record(TraceEvent::Clear { surface });
        Ok(())
    }

    fn draw_quad(
        &self,
        surface: SurfaceId,
        viewport: Viewport,
        draw: &QuadDraw<'_>,
    ) -> GpuResult<()> {
        let record = {
            let mut guard = lock(&self.state);
            let state = &mut *guard;
            let program_kind = *state
                .programs
                .get(&draw.program)
                .ok_or(GpuError::InvalidProgram(draw.program))?;
            let tex = state
                .textures
                .get(&draw.texture)
                .ok_or(GpuError::InvalidTexture(draw.texture))?;
            if ProgramKind::for_texture(tex.kind) != program_kind {
                return Err(GpuError::Backend(format!(
                    "program {:?} cannot sample {:?} texture",
                    program_kind, tex.kind
                )));
            }
            let fb = state
                .surfaces
                .get_mut(&surface)
                .ok_or(GpuError::InvalidSurface(surface))?;

            rasterize(fb, viewport, tex, draw);

            DrawRecord {
                surface,
                viewport,
                program: draw.program,
                program_kind,
                texture: draw.texture,
                texture_kind: tex.kind,
            }
        };
        trace!(?record, "Quad drawn");
        self.record(TraceEvent::Draw(record));
        Ok(())
    }

    fn read_pixels(&self, surface: SurfaceId, rect: Viewport) -> GpuResult<Readback> {
        let state = lock(&self.state);
        let fb = state
            .surfaces
            .get(&surface)
            .ok_or(GpuError::InvalidSurface(surface))?;
        if rect.x < 0
            || rect.y < 0
            || rect.x as u32 + rect.width > fb.width
            || rect.y as u32 + rect.height > fb.height
        {
            return Err(GpuError::Readback(format!(
                "rect {:?} outside {}x{} surface",
                rect, fb.width, fb.height
            )));
        }

        let row_bytes = rect.width as usize * 4;
        let mut data = Vec::with_capacity(row_bytes * rect.height as usize);
        for row in rect.y as usize..rect.y as usize + rect.height as usize {
            let start = (row * fb.width as usize + rect.x as usize) * 4;
            data.extend_from_slice(&fb.data[start..start + row_bytes]);
        }
        Ok(Readback {
            width: rect.width,
            height: rect.height,
            order: PixelOrder::Bgra,
            origin: RowOrigin::BottomLeft,
            data,
        })
    }

    fn flush(&self, surface: SurfaceId) -> GpuResult<()> {
        if !lock(&self.state).surfaces.contains_key(&surface) {
            return Err(GpuError::InvalidSurface(surface));
        }
        self.record(TraceEvent::Flush { surface });
        Ok(())
    }
}

/// Rasterize a unit quad (`[-1, 1]` in both axes) through `draw.mvp` into the
/// viewport, sampling `tex` at `draw.tex_matrix * (s, t)`.
fn rasterize(fb: &mut Framebuffer, viewport: Viewport, tex: &Texture, draw: &QuadDraw<'_>) {
    if viewport.width == 0 || viewport.height == 0 || tex.width == 0 || tex.height == 0 {
        return;
    }
    let Some(inv) = inverse_affine_2d(draw.mvp) else {
        return;
    };

    let x0 = viewport.x.max(0);
    let y0 = viewport.y.max(0);
    let x1 = (viewport.x + viewport.width as i32).min(fb.width as i32);
    let y1 = (viewport.y + viewport.height as i32).min(fb.height as i32);

    for py in y0..y1 {
        for px in x0..x1 {
            let nx = ((px - viewport.x) as f32 + 0.5) / viewport.width as f32 * 2.0 - 1.0;
            let ny = ((py - viewport.y) as f32 + 0.5) / viewport.height as f32 * 2.0 - 1.0;
            let qx = inv[0] * nx + inv[1] * ny + inv[4];
            let qy = inv[2] * nx + inv[3] * ny + inv[5];
            if !(-1.0..=1.0).contains(&qx) || !(-1.0..=1.0).contains(&qy) {
                continue;
            }

            let (s, t) = transform_point(draw.tex_matrix, (qx + 1.0) * 0.5, (qy + 1.0) * 0.5);
            let tx =
                ((s * tex.width as f32).floor() as i64).clamp(0, tex.width as i64 - 1) as usize;
            let ty =
                ((t * tex.height as f32).floor() as i64).clamp(0, tex.height as i64 - 1) as usize;
            let si = (ty * tex.width as usize + tx) * 4;
            let src = &tex.data[si..si + 4];

            let di = (py as usize * fb.width as usize + px as usize) * 4;
            let dst = &mut fb.data[di..di + 4];
            blend_premultiplied(dst, src);
        }
    }
}

/// `dst = src + dst * (1 - src.a)`; `src` is RGBA, `dst` is BGRA
fn blend_premultiplied(dst: &mut [u8], src: &[u8]) {
    let inv_alpha = 255 - src[3] as u32;
    let mix =
        |s: u8, d: u8| -> u8 { (s as u32 + (d as u32 * inv_alpha + 127) / 255).min(255) as u8 };
    dst[0] = mix(src[2], dst[0]);
    dst[1] = mix(src[1], dst[1]);
    dst[2] = mix(src[0], dst[2]);
    dst[3] = mix(src[3], dst[3]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::matrix::{IDENTITY, flip_vertical};

    fn api() -> (SoftwareDevice, Arc<dyn GpuApi>) {
        let device = SoftwareDevice::new();
        let api = device.create_context(1, None).unwrap();
        (device, api)
    }

    fn pixel(api: &Arc<dyn GpuApi>, surface: SurfaceId, x: i32, y: i32) -> [u8; 4] {
        let rb = api.read_pixels(surface, Viewport::new(x, y, 1, 1)).unwrap();
        [rb.data[0], rb.data[1], rb.data[2], rb.data[3]]
    }

    #[test]
    fn test_clear_stores_bgra() {
        let (_device, api) = api();
        let s = api.create_surface(2, 2).unwrap();
        api.clear(s, [1.0, 1.0, 0.0, 1.0]).unwrap();
        assert_eq!(pixel(&api, s, 1, 1), [0, 255, 255, 255]);
    }

    #[test]
    fn test_draw_respects_viewport() {
        let (device, api) = api();
        let s = api.create_surface(8, 8).unwrap();
        api.clear(s, [0.0, 0.0, 0.0, 1.0]).unwrap();
        let t = api.create_texture(TextureKind::Normal).unwrap();
        api.upload_texture(t, 1, 1, &[255, 0, 0, 255]).unwrap();
        let p = api.create_program(ProgramKind::Quad).unwrap();
        let draw = QuadDraw {
            program: p,
            texture: t,
            tex_matrix: &IDENTITY,
            mvp: &IDENTITY,
        };
        api.draw_quad(s, Viewport::new(0, 0, 4, 4), &draw).unwrap();

        assert_eq!(pixel(&api, s, 0, 0), [0, 0, 255, 255]);
        assert_eq!(pixel(&api, s, 3, 3), [0, 0, 255, 255]);
        assert_eq!(pixel(&api, s, 4, 4), [0, 0, 0, 255]);
        assert_eq!(device.draws().len(), 1);
    }

    #[test]
    fn test_texture_rows_follow_tex_matrix() {
        let (_device, api) = api();
        let s = api.create_surface(1, 2).unwrap();
        let t = api.create_texture(TextureKind::Normal).unwrap();
        // Row 0 red, row 1 green
        api.upload_texture(t, 1, 2, &[255, 0, 0, 255, 0, 255, 0, 255])
            .unwrap();
        let p = api.create_program(ProgramKind::Quad).unwrap();
        let flip = flip_vertical();
        let draw = QuadDraw {
            program: p,
            texture: t,
            tex_matrix: &flip,
            mvp: &IDENTITY,
        };
        api.draw_quad(s, Viewport::full(1, 2), &draw).unwrap();
        // Flipped: first uploaded row lands at the top of the framebuffer
        assert_eq!(pixel(&api, s, 0, 1), [0, 0, 255, 255]);
        assert_eq!(pixel(&api, s, 0, 0), [0, 255, 0, 255]);
    }

    #[test]
    fn test_transparent_texel_keeps_destination() {
        let (_device, api) = api();
        let s = api.create_surface(1, 1).unwrap();
        api.clear(s, [1.0, 1.0, 0.0, 1.0]).unwrap();
        let t = api.create_texture(TextureKind::Normal).unwrap();
        api.upload_texture(t, 1, 1, &[0, 0, 0, 0]).unwrap();
        let p = api.create_program(ProgramKind::Quad).unwrap();
        let draw = QuadDraw {
            program: p,
            texture: t,
            tex_matrix: &IDENTITY,
            mvp: &IDENTITY,
        };
        api.draw_quad(s, Viewport::full(1, 1), &draw).unwrap();
        assert_eq!(pixel(&api, s, 0, 0), [0, 255, 255, 255]);
    }

    #[test]
    fn test_external_program_requires_extension() {
        let device = SoftwareDevice::without_external_textures();
        let api = device.create_context(1, None).unwrap();
        assert_eq!(
            api.create_program(ProgramKind::ExternalQuad),
            Err(GpuError::UnsupportedFeature(
                EXTERNAL_TEXTURE_EXTENSION.to_string()
            ))
        );
    }

    #[test]
    fn test_deleted_texture_is_invalid() {
        let (device, api) = api();
        let t = api.create_texture(TextureKind::Normal).unwrap();
        api.delete_texture(t);
        api.delete_texture(t);
        assert_eq!(
            api.upload_texture(t, 1, 1, &[0; 4]),
            Err(GpuError::InvalidTexture(t))
        );
        let deletes = device
            .trace()
            .iter()
            .filter(|e| matches!(e, TraceEvent::DeleteTexture(_)))
            .count();
        assert_eq!(deletes, 1);
    }
}
