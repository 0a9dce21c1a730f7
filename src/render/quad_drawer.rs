// SPDX-License-Identifier: GPL-3.0-only

//! Textured quad drawer

use crate::errors::{GpuError, GpuResult};
use crate::gpu::matrix::{self, Mat4};
use crate::gpu::{
    DrawableSurface, GpuApi, ProgramId, ProgramKind, QuadDraw, RenderContext, TextureId,
    TextureKind,
};
use std::sync::Arc;
use tracing::debug;

/// Draws a full-viewport quad sampling one texture
///
/// Holds a compiled program and the MVP applied to every draw. Must be released
/// before its context is destroyed.
pub struct QuadDrawer {
    api: Arc<dyn GpuApi>,
    program: ProgramId,
    kind: ProgramKind,
    mvp: Mat4,
    released: bool,
}

impl QuadDrawer {
    /// Compile a drawer for textures of `kind`
    pub fn new(context: &RenderContext, kind: TextureKind) -> GpuResult<Self> {
        if !context.is_current() {
            return Err(GpuError::NotCurrent);
        }
        let api = Arc::clone(context.api());
        let kind = ProgramKind::for_texture(kind);
        let program = api.create_program(kind)?;
        debug!(program, ?kind, "Quad drawer created");
        Ok(Self {
            api,
            program,
            kind,
            mvp: matrix::IDENTITY,
            released: false,
        })
    }

    pub fn kind(&self) -> ProgramKind {
        self.kind
    }

    /// Set the MVP used by subsequent draws
    pub fn set_matrix(&mut self, mvp: &Mat4) {
        self.mvp = *mvp;
    }

    pub fn matrix(&self) -> &Mat4 {
        &self.mvp
    }

    /// Draw `texture` through `tex_matrix` into the surface's current viewport
    pub fn draw(
        &self,
        surface: &DrawableSurface,
        texture: TextureId,
        tex_matrix: &Mat4,
    ) -> GpuResult<()> {
        if self.released {
            return Err(GpuError::InvalidProgram(self.program));
        }
        surface.draw_quad(&QuadDraw {
            program: self.program,
            texture,
            tex_matrix,
            mvp: &self.mvp,
        })
    }

    /// Free the program. Idempotent.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.api.delete_program(self.program);
        debug!(program = self.program, "Quad drawer released");
    }
}

impl Drop for QuadDrawer {
    fn drop(&mut self) {
        self.release();
    }
}
