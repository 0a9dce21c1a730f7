// SPDX-License-Identifier: GPL-3.0-only

//! Primary render thread
//!
//! Owns the primary context and the display surface. Draws are driven by
//! [`RenderEvent::Render`], which is posted whenever a capture frame arrives
//! or the layout changes; there is no fixed clock.

use super::encoder::VideoEncoder;
use super::external_texture::FrameStream;
use super::primary::PreviewRenderer;
use super::viewport::ScaleMode;
use crate::constants::timeouts;
use crate::errors::{AppError, AppResult, GpuResult};
use crate::gpu::{ContextManager, DrawableSurface, RenderContext, SurfaceTarget};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Owner of the display surface, as seen from the render thread
///
/// Held weakly; every call first checks that the owner is still alive.
pub trait PreviewHost: Send + Sync {
    /// Start capturing into `output` at roughly `width`×`height`
    fn start_preview(&self, output: FrameStream, width: u32, height: u32);

    /// Stop capturing; with `wait` the call returns only once the device is
    /// released
    fn stop_preview(&self, wait: bool);
}

/// Message handled by the render thread
pub enum RenderEvent {
    Resize { width: u32, height: u32 },
    VideoSize { width: u32, height: u32 },
    ScaleMode(ScaleMode),
    SetEncoder(Option<Arc<dyn VideoEncoder>>),
    Render,
    Destroy { ack: Sender<()> },
}

impl std::fmt::Debug for RenderEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RenderEvent::Resize { width, height } => write!(f, "Resize({}x{})", width, height),
            RenderEvent::VideoSize { width, height } => {
                write!(f, "VideoSize({}x{})", width, height)
            }
            RenderEvent::ScaleMode(mode) => write!(f, "ScaleMode({})", mode),
            RenderEvent::SetEncoder(encoder) => write!(f, "SetEncoder({})", encoder.is_some()),
            RenderEvent::Render => write!(f, "Render"),
            RenderEvent::Destroy { .. } => write!(f, "Destroy"),
        }
    }
}

/// Posts [`RenderEvent::Render`], collapsing requests the thread has not
/// picked up yet into one
#[derive(Clone)]
pub struct RenderRequester {
    pending: Arc<AtomicBool>,
    tx: Sender<RenderEvent>,
}

impl RenderRequester {
    pub fn request(&self) {
        if !self.pending.swap(true, Ordering::AcqRel) {
            // The thread may already be gone; nothing to draw then
            let _ = self.tx.send(RenderEvent::Render);
        }
    }

    fn clear(&self) {
        self.pending.store(false, Ordering::Release);
    }
}

enum SetupState {
    Pending,
    Done(GpuResult<()>),
    Abandoned,
}

/// Setup handshake between [`SurfaceThread::spawn`] and the render thread.
///
/// The outcome is decided once under the lock: either the thread reports a
/// result or the caller gives up waiting, never both.
struct Setup {
    state: Mutex<SetupState>,
    cond: Condvar,
}

impl Setup {
    fn new() -> Self {
        Self {
            state: Mutex::new(SetupState::Pending),
            cond: Condvar::new(),
        }
    }

    /// Returns `false` if the caller already gave up
    fn report(&self, result: GpuResult<()>) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if matches!(*state, SetupState::Abandoned) {
            return false;
        }
        *state = SetupState::Done(result);
        self.cond.notify_all();
        true
    }

    fn is_abandoned(&self) -> bool {
        matches!(
            *self.state.lock().unwrap_or_else(|e| e.into_inner()),
            SetupState::Abandoned
        )
    }

    /// `None` on timeout; the thread then tears itself down
    fn wait(&self, timeout: Duration) -> Option<GpuResult<()>> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let (mut state, _) = self
            .cond
            .wait_timeout_while(state, timeout, |s| matches!(s, SetupState::Pending))
            .unwrap_or_else(|e| e.into_inner());
        match std::mem::replace(&mut *state, SetupState::Abandoned) {
            SetupState::Done(result) => Some(result),
            SetupState::Pending | SetupState::Abandoned => None,
        }
    }
}

/// Handle to the primary render thread
pub struct SurfaceThread {
    tx: Sender<RenderEvent>,
    requester: RenderRequester,
    frames: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl SurfaceThread {
    /// Spawn the thread, create the primary context on it and bind `target`.
    ///
    /// Returns once the renderer is ready and preview has been requested from
    /// `host`. GPU setup failures (including a missing external texture
    /// extension) are returned here and the thread exits.
    ///
    /// If setup outlasts [`timeouts::WORKER_ACK`] an error is returned and the
    /// thread releases everything it created once setup finishes.
    pub fn spawn(
        manager: ContextManager,
        target: SurfaceTarget,
        renderer: PreviewRenderer,
        host: Weak<dyn PreviewHost>,
        preview_size: (u32, u32),
    ) -> AppResult<Self> {
        Self::spawn_with_timeout(
            manager,
            target,
            renderer,
            host,
            preview_size,
            timeouts::WORKER_ACK,
        )
    }

    fn spawn_with_timeout(
        manager: ContextManager,
        target: SurfaceTarget,
        renderer: PreviewRenderer,
        host: Weak<dyn PreviewHost>,
        preview_size: (u32, u32),
        setup_timeout: Duration,
    ) -> AppResult<Self> {
        let (tx, rx) = mpsc::channel();
        let requester = RenderRequester {
            pending: Arc::new(AtomicBool::new(false)),
            tx: tx.clone(),
        };
        let frames = Arc::new(AtomicU64::new(0));
        let setup = Arc::new(Setup::new());

        let worker = Worker {
            manager,
            renderer,
            host,
            requester: requester.clone(),
            frames: Arc::clone(&frames),
            preview_size,
        };
        let handle = thread::Builder::new()
            .name("surface-render".into())
            .spawn({
                let setup = Arc::clone(&setup);
                move || worker.run(target, rx, &setup)
            })
            .map_err(|e| AppError::Worker(format!("failed to spawn render thread: {}", e)))?;

        match setup.wait(setup_timeout) {
            Some(Ok(())) => {
                info!("Surface render thread ready");
                Ok(Self {
                    tx,
                    requester,
                    frames,
                    handle: Some(handle),
                })
            }
            Some(Err(e)) => {
                let _ = handle.join();
                Err(e.into())
            }
            None => {
                error!("Surface render thread did not report ready");
                Err(AppError::Worker("render thread setup timed out".into()))
            }
        }
    }

    /// Post an event; returns `false` if the thread is gone
    pub fn post(&self, event: RenderEvent) -> bool {
        if self.handle.is_none() {
            return false;
        }
        self.tx.send(event).is_ok()
    }

    pub fn requester(&self) -> RenderRequester {
        self.requester.clone()
    }

    pub fn request_render(&self) {
        self.requester.request();
    }

    /// Frames drawn so far
    pub fn frames_drawn(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Tear the surface down and wait for the thread to acknowledge.
    ///
    /// Runs the full teardown (renderer resources, a waiting capture stop, the
    /// surface and the context) within [`timeouts::SURFACE_TEARDOWN`].
    /// Idempotent.
    pub fn destroy(&mut self) -> AppResult<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        let (ack_tx, ack_rx) = mpsc::channel();
        if self.tx.send(RenderEvent::Destroy { ack: ack_tx }).is_err() {
            debug!("Render thread already exited");
            let _ = handle.join();
            return Ok(());
        }
        match ack_rx.recv_timeout(timeouts::SURFACE_TEARDOWN) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if handle.join().is_err() {
                    warn!("Surface render thread panicked");
                }
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => {
                error!("Surface render thread did not acknowledge destroy");
                Err(AppError::Worker("render thread teardown timed out".into()))
            }
        }
    }
}

impl Drop for SurfaceThread {
    fn drop(&mut self) {
        if let Err(e) = self.destroy() {
            warn!(error = %e, "Surface thread teardown failed");
        }
    }
}

struct Worker {
    manager: ContextManager,
    renderer: PreviewRenderer,
    host: Weak<dyn PreviewHost>,
    requester: RenderRequester,
    frames: Arc<AtomicU64>,
    preview_size: (u32, u32),
}

impl Worker {
    fn prepare(&mut self, target: SurfaceTarget) -> GpuResult<(RenderContext, DrawableSurface)> {
        let context = self.manager.create_context(None)?;
        let surface = context.attach_surface(target)?;
        context.make_current(&surface)?;
        self.renderer.on_surface_created(&context)?;
        self.renderer
            .on_surface_changed(surface.width(), surface.height());
        Ok((context, surface))
    }

    fn run(mut self, target: SurfaceTarget, rx: Receiver<RenderEvent>, setup: &Setup) {
        let (context, mut surface) = match self.prepare(target) {
            Ok(bound) => bound,
            Err(e) => {
                error!(error = %e, "Render surface setup failed");
                setup.report(Err(e));
                return;
            }
        };
        if setup.is_abandoned() {
            warn!("Render surface ready after the caller gave up, releasing it");
            self.teardown(context, surface, false);
            return;
        }

        if let Some(stream) = self.renderer.stream() {
            let requester = self.requester.clone();
            stream.set_frame_listener(Arc::new(move || requester.request()));
            match self.host.upgrade() {
                Some(host) => {
                    let (w, h) = self.preview_size;
                    host.start_preview(stream, w, h);
                }
                None => debug!("Preview host gone before start"),
            }
        }
        if !setup.report(Ok(())) {
            warn!("Render surface ready after the caller gave up, releasing it");
            self.teardown(context, surface, true);
            return;
        }

        let mut ack = None;
        while let Ok(event) = rx.recv() {
            match event {
                RenderEvent::Resize { width, height } => {
                    if let Err(e) = surface.resize(width, height) {
                        warn!(error = %e, width, height, "Surface resize failed");
                        continue;
                    }
                    self.renderer.on_surface_changed(width, height);
                    self.requester.request();
                }
                RenderEvent::VideoSize { width, height } => {
                    self.renderer.set_video_size(width, height);
                    self.requester.request();
                }
                RenderEvent::ScaleMode(mode) => {
                    self.renderer.set_scale_mode(mode);
                    self.requester.request();
                }
                RenderEvent::SetEncoder(encoder) => {
                    if let Err(e) = self.renderer.attach_encoder(encoder) {
                        warn!(error = %e, "Encoder attach failed");
                    }
                }
                RenderEvent::Render => {
                    self.requester.clear();
                    match self.renderer.on_draw_frame(&mut surface) {
                        Ok(_) => {
                            self.frames.fetch_add(1, Ordering::AcqRel);
                        }
                        Err(e) => warn!(error = %e, "Draw failed"),
                    }
                }
                RenderEvent::Destroy { ack: sender } => {
                    ack = Some(sender);
                    break;
                }
            }
        }

        self.teardown(context, surface, true);
        if let Some(ack) = ack {
            let _ = ack.send(());
        }
    }

    /// Renderer resources first, then capture, then the surface and context
    fn teardown(
        &mut self,
        context: RenderContext,
        mut surface: DrawableSurface,
        stop_capture: bool,
    ) {
        self.renderer.on_surface_destroyed();
        if stop_capture && let Some(host) = self.host.upgrade() {
            host.stop_preview(true);
        }
        surface.release();
        context.release_current();
        if let Err(e) = context.destroy() {
            warn!(error = %e, "Primary context destroy failed");
        }
        info!(
            frames = self.frames.load(Ordering::Acquire),
            "Surface render thread exiting"
        );
    }
}
