// SPDX-License-Identifier: GPL-3.0-only

//! Secondary off-screen render worker
//!
//! Renders hand-offs from the primary thread into an auxiliary target (an
//! encoder input, a file sink) through a peer context sharing the primary's
//! textures. Setup and release are synchronous handshakes; draws are posted
//! without blocking and counted in a backlog.

use super::overlay::{self, GlyphRasterizer, OverlayCompositor, OverlayGlyphSet, OverlayLayout};
use super::quad_drawer::QuadDrawer;
use crate::constants::{CLEAR_COLOR, timeouts};
use crate::errors::{AppError, AppResult, GpuResult};
use crate::gpu::matrix::Mat4;
use crate::gpu::{
    DrawableSurface, RenderContext, SharedContextHandle, SurfaceTarget, TextureId, TextureKind,
    Viewport,
};
use image::RgbaImage;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy)]
struct DrawRequest {
    texture: TextureId,
    tex_matrix: Mat4,
    mvp: Mat4,
}

struct TargetRequest {
    share: SharedContextHandle,
    texture: TextureId,
    target: SurfaceTarget,
    generation: u64,
}

#[derive(Default)]
struct WorkerState {
    pending_target: Option<TargetRequest>,
    target_generation: u64,
    applied_generation: u64,
    target_error: Option<String>,
    has_target: bool,
    latest: Option<DrawRequest>,
    backlog: u64,
    release_requested: bool,
    exited: bool,
    frames: u64,
}

impl WorkerState {
    fn queued_draw(&self) -> Option<DrawRequest> {
        if self.has_target && self.backlog > 0 {
            self.latest
        } else {
            None
        }
    }
}

struct Shared {
    state: Mutex<WorkerState>,
    cond: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, WorkerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

enum Work {
    Target(TargetRequest),
    Draw(DrawRequest),
    Release,
}

/// Handle to an off-screen render worker
pub struct RenderHandler {
    name: String,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl RenderHandler {
    /// Start an idle worker. It renders nothing until [`Self::set_target`].
    pub fn spawn(
        name: &str,
        rasterizer: Arc<GlyphRasterizer>,
        layout: OverlayLayout,
        watermark: Option<RgbaImage>,
    ) -> AppResult<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(WorkerState::default()),
            cond: Condvar::new(),
        });
        let worker = Worker {
            name: name.to_string(),
            shared: Arc::clone(&shared),
            rasterizer,
            layout,
            watermark,
            target: None,
        };
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker.run())
            .map_err(|e| AppError::Worker(format!("failed to spawn {}: {}", name, e)))?;
        info!(name, "Off-screen render worker started");
        Ok(Self {
            name: name.to_string(),
            shared,
            handle: Some(handle),
        })
    }

    /// Bind the worker to a new target, sampling `texture` through a peer of
    /// `share`. Blocks until the worker has created its surface and glyph set.
    pub fn set_target(
        &self,
        share: SharedContextHandle,
        texture: TextureId,
        target: SurfaceTarget,
    ) -> AppResult<()> {
        let mut state = self.shared.lock();
        if state.exited || state.release_requested {
            return Err(AppError::Worker(format!("{} already released", self.name)));
        }
        state.target_generation += 1;
        let generation = state.target_generation;
        state.pending_target = Some(TargetRequest {
            share,
            texture,
            target,
            generation,
        });
        self.shared.cond.notify_all();

        let (mut state, timeout) = self
            .shared
            .cond
            .wait_timeout_while(state, timeouts::WORKER_ACK, |s| {
                s.applied_generation < generation && !s.exited
            })
            .unwrap_or_else(|e| e.into_inner());
        if timeout.timed_out() {
            error!(name = %self.name, "Worker did not acknowledge target");
            return Err(AppError::Worker(format!(
                "{} did not acknowledge target",
                self.name
            )));
        }
        if state.applied_generation < generation {
            return Err(AppError::Worker(format!("{} exited", self.name)));
        }
        match state.target_error.take() {
            Some(e) => Err(AppError::Worker(e)),
            None => Ok(()),
        }
    }

    /// Queue one draw. Never blocks on rendering; the newest request wins but
    /// every call adds to the backlog.
    pub fn request_draw(&self, texture: TextureId, tex_matrix: &Mat4, mvp: &Mat4) {
        let mut state = self.shared.lock();
        if state.release_requested {
            return;
        }
        state.latest = Some(DrawRequest {
            texture,
            tex_matrix: *tex_matrix,
            mvp: *mvp,
        });
        state.backlog += 1;
        self.shared.cond.notify_all();
    }

    /// Whether the worker has a usable target
    pub fn is_valid(&self) -> bool {
        let state = self.shared.lock();
        state.has_target && !state.exited && !state.release_requested
    }

    pub fn backlog(&self) -> u64 {
        self.shared.lock().backlog
    }

    pub fn frames_rendered(&self) -> u64 {
        self.shared.lock().frames
    }

    /// Block until every queued draw has been rendered or dropped
    pub fn wait_idle(&self) -> AppResult<()> {
        let state = self.shared.lock();
        let (_state, timeout) = self
            .shared
            .cond
            .wait_timeout_while(state, timeouts::WORKER_ACK, |s| {
                s.has_target && s.backlog > 0 && !s.exited
            })
            .unwrap_or_else(|e| e.into_inner());
        if timeout.timed_out() {
            return Err(AppError::Worker(format!("{} did not drain", self.name)));
        }
        Ok(())
    }

    /// Tear the worker down: GPU resources, peer context, thread. Blocks until
    /// the worker acknowledges. Idempotent.
    ///
    /// A worker that fails to acknowledge is abandoned; the error only
    /// concerns this worker.
    pub fn release(&mut self) -> AppResult<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        let state = {
            let mut state = self.shared.lock();
            state.release_requested = true;
            self.shared.cond.notify_all();
            state
        };
        let (_state, timeout) = self
            .shared
            .cond
            .wait_timeout_while(state, timeouts::WORKER_ACK, |s| !s.exited)
            .unwrap_or_else(|e| e.into_inner());
        if timeout.timed_out() {
            error!(name = %self.name, "Worker did not acknowledge release");
            return Err(AppError::Worker(format!(
                "{} did not acknowledge release",
                self.name
            )));
        }
        if handle.join().is_err() {
            warn!(name = %self.name, "Off-screen worker panicked");
        }
        info!(name = %self.name, "Off-screen render worker released");
        Ok(())
    }
}

impl Drop for RenderHandler {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(error = %e, "Off-screen worker teardown failed");
        }
    }
}

/// GPU objects of the current target, all in the peer context
struct Target {
    context: RenderContext,
    surface: DrawableSurface,
    drawer: QuadDrawer,
    compositor: OverlayCompositor,
    glyphs: OverlayGlyphSet,
}

impl Target {
    fn release(mut self) {
        self.drawer.release();
        self.compositor.release();
        self.glyphs.release();
        self.surface.release();
        self.context.release_current();
        if let Err(e) = self.context.destroy() {
            warn!(error = %e, "Peer context destroy failed");
        }
    }
}

struct Worker {
    name: String,
    shared: Arc<Shared>,
    rasterizer: Arc<GlyphRasterizer>,
    layout: OverlayLayout,
    watermark: Option<RgbaImage>,
    target: Option<Target>,
}

impl Worker {
    fn run(mut self) {
        debug!(name = %self.name, "Off-screen worker loop started");
        loop {
            match self.next_work() {
                Work::Target(request) => self.apply_target(request),
                Work::Draw(request) => self.render(request),
                Work::Release => break,
            }
        }

        if let Some(target) = self.target.take() {
            target.release();
        }
        let mut state = self.shared.lock();
        state.exited = true;
        state.has_target = false;
        state.backlog = 0;
        self.shared.cond.notify_all();
        debug!(name = %self.name, frames = state.frames, "Off-screen worker loop exited");
    }

    /// Draw work leaves the backlog untouched; [`Self::render`] decrements it
    /// once the frame is out
    fn next_work(&self) -> Work {
        let mut state = self.shared.lock();
        loop {
            if state.release_requested {
                return Work::Release;
            }
            if let Some(request) = state.pending_target.take() {
                return Work::Target(request);
            }
            if let Some(request) = state.queued_draw() {
                return Work::Draw(request);
            }
            state = self
                .shared
                .cond
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    fn prepare(&self, request: &TargetRequest) -> GpuResult<Target> {
        let context = request.share.create_peer()?;
        let surface = context.attach_surface(request.target.clone())?;
        context.make_current(&surface)?;
        let drawer = QuadDrawer::new(&context, TextureKind::External)?;
        let compositor = OverlayCompositor::new(&context, self.layout)?;
        let badge;
        let watermark = match &self.watermark {
            Some(img) => img,
            None => {
                badge = self.rasterizer.watermark_badge();
                &badge
            }
        };
        let glyphs =
            OverlayGlyphSet::load(&context, &self.rasterizer.glyph_images(), Some(watermark))?;
        Ok(Target {
            context,
            surface,
            drawer,
            compositor,
            glyphs,
        })
    }

    fn apply_target(&mut self, request: TargetRequest) {
        if let Some(previous) = self.target.take() {
            previous.release();
        }
        let result = self.prepare(&request);
        let mut state = self.shared.lock();
        match result {
            Ok(target) => {
                info!(
                    name = %self.name,
                    texture = request.texture,
                    label = target.surface.label(),
                    width = target.surface.width(),
                    height = target.surface.height(),
                    recordable = target.surface.is_recordable(),
                    "Off-screen target ready"
                );
                self.target = Some(target);
                state.has_target = true;
                state.target_error = None;
            }
            Err(e) => {
                warn!(name = %self.name, error = %e, "Off-screen target setup failed");
                state.has_target = false;
                state.target_error = Some(e.to_string());
            }
        }
        state.applied_generation = request.generation;
        self.shared.cond.notify_all();
    }

    fn render(&mut self, request: DrawRequest) {
        let Some(target) = self.target.as_mut() else {
            return;
        };
        let result = Self::draw(target, &request);

        let mut state = self.shared.lock();
        state.backlog = state.backlog.saturating_sub(1);
        match result {
            Ok(()) => state.frames += 1,
            Err(e) => warn!(name = %self.name, error = %e, "Off-screen draw failed"),
        }
        self.shared.cond.notify_all();
    }

    fn draw(target: &mut Target, request: &DrawRequest) -> GpuResult<()> {
        let (width, height) = (target.surface.width(), target.surface.height());
        target.surface.set_viewport(Viewport::full(width, height));
        target.surface.clear(CLEAR_COLOR)?;
        target.drawer.set_matrix(&request.mvp);
        target
            .drawer
            .draw(&target.surface, request.texture, &request.tex_matrix)?;
        target.compositor.draw_overlay(
            &mut target.surface,
            &target.glyphs,
            &overlay::current_timestamp(),
        )?;
        target.surface.swap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::software::{SoftwareDevice, TraceEvent};
    use crate::gpu::{ContextManager, FrameSink, ProgramKind};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSink {
        frames: AtomicUsize,
    }

    impl FrameSink for CountingSink {
        fn present(&self, width: u32, height: u32, rgba: &[u8]) {
            assert_eq!(rgba.len(), (width * height * 4) as usize);
            self.frames.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn handler() -> RenderHandler {
        RenderHandler::spawn(
            "test-offscreen",
            Arc::new(GlyphRasterizer::default()),
            OverlayLayout::default(),
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_backlog_is_drained_into_sink() {
        let device = Arc::new(SoftwareDevice::new());
        let manager = ContextManager::new(device.clone());
        let primary = manager.create_context(None).unwrap();
        let texture = primary.api().create_texture(TextureKind::External).unwrap();

        let sink = Arc::new(CountingSink::default());
        let mut handler = handler();
        assert!(!handler.is_valid());
        handler
            .set_target(
                primary.share_handle(),
                texture,
                SurfaceTarget::offscreen("encoder", 400, 400)
                    .with_sink(sink.clone())
                    .recordable(true),
            )
            .unwrap();
        assert!(handler.is_valid());

        let identity = crate::gpu::matrix::IDENTITY;
        for _ in 0..3 {
            handler.request_draw(texture, &identity, &identity);
        }
        handler.wait_idle().unwrap();
        assert_eq!(handler.frames_rendered(), 3);
        assert_eq!(sink.frames.load(Ordering::SeqCst), 3);
        assert_eq!(handler.backlog(), 0);

        let main_draws = device
            .draws()
            .iter()
            .filter(|d| d.texture == texture && d.program_kind == ProgramKind::ExternalQuad)
            .count();
        assert_eq!(main_draws, 3);

        handler.release().unwrap();
        handler.release().unwrap();
        assert!(!handler.is_valid());
        // Only the primary context is left
        assert_eq!(manager.live_contexts(), 1);
        assert!(device
            .trace()
            .iter()
            .any(|e| matches!(e, TraceEvent::DestroyContext(_))));
    }

    #[test]
    fn test_draws_before_target_wait_for_it() {
        let device = Arc::new(SoftwareDevice::new());
        let manager = ContextManager::new(device);
        let primary = manager.create_context(None).unwrap();
        let texture = primary.api().create_texture(TextureKind::External).unwrap();

        let handler = handler();
        let identity = crate::gpu::matrix::IDENTITY;
        handler.request_draw(texture, &identity, &identity);
        assert_eq!(handler.backlog(), 1);
        handler
            .set_target(
                primary.share_handle(),
                texture,
                SurfaceTarget::offscreen("late", 300, 400),
            )
            .unwrap();
        handler.wait_idle().unwrap();
        assert_eq!(handler.frames_rendered(), 1);
    }

    #[test]
    fn test_draws_sample_the_requested_texture() {
        let device = Arc::new(SoftwareDevice::new());
        let manager = ContextManager::new(device.clone());
        let primary = manager.create_context(None).unwrap();
        let bound = primary.api().create_texture(TextureKind::External).unwrap();
        let handed_off = primary.api().create_texture(TextureKind::External).unwrap();

        let handler = handler();
        handler
            .set_target(
                primary.share_handle(),
                bound,
                SurfaceTarget::offscreen("encoder", 64, 64),
            )
            .unwrap();
        // Nothing is drawn until a request arrives
        assert_eq!(handler.frames_rendered(), 0);

        let identity = crate::gpu::matrix::IDENTITY;
        handler.request_draw(handed_off, &identity, &identity);
        handler.wait_idle().unwrap();

        let sampled: Vec<_> = device
            .draws()
            .iter()
            .filter(|d| d.program_kind == ProgramKind::ExternalQuad)
            .map(|d| d.texture)
            .collect();
        assert_eq!(sampled, vec![handed_off]);
    }

    #[test]
    fn test_set_target_after_release_fails() {
        let device = Arc::new(SoftwareDevice::new());
        let manager = ContextManager::new(device);
        let primary = manager.create_context(None).unwrap();
        let mut handler = handler();
        handler.release().unwrap();
        let result = handler.set_target(
            primary.share_handle(),
            1,
            SurfaceTarget::offscreen("x", 8, 8),
        );
        assert!(matches!(result, Err(AppError::Worker(_))));
    }
}
