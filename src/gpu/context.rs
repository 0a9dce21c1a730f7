// SPDX-License-Identifier: GPL-3.0-only

//! GPU context manager
//!
//! Owns rendering contexts, their "current" bindings and the drawable surfaces
//! attached to them.
//!
//! - A context is current on at most one thread at a time. The binding is
//!   recorded both per context and in a thread-local slot, so draws from a thread
//!   that has not made the context current are rejected.
//! - A peer context created from a [`SharedContextHandle`] shares the object
//!   namespace (textures) of the first one. The namespace lives as long as
//!   any context of the group, so destroying the first context early cannot free
//!   textures a peer still samples.
//! - Context creation and destruction are serialized per device.

use super::{ContextId, GpuApi, GpuDevice, QuadDraw, Readback, SurfaceId, Viewport};
use crate::errors::{GpuError, GpuResult};
use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use tracing::{debug, info, warn};

/// Per-context record of which thread has it current
type Binding = Arc<Mutex<Option<ThreadId>>>;

struct CurrentBinding {
    context: ContextId,
    binding: Binding,
}

thread_local! {
    /// Context current on this thread, if any
    static CURRENT: RefCell<Option<CurrentBinding>> = const { RefCell::new(None) };
}

/// Id of the context current on the calling thread
pub fn current_context() -> Option<ContextId> {
    CURRENT.with(|current| current.borrow().as_ref().map(|c| c.context))
}

fn lock_binding(binding: &Binding) -> std::sync::MutexGuard<'_, Option<ThreadId>> {
    binding.lock().unwrap_or_else(|e| e.into_inner())
}

struct ManagerInner {
    device: Arc<dyn GpuDevice>,
    /// Serializes context creation/destruction against the driver
    driver_lock: Mutex<()>,
    next_id: AtomicU64,
    live: AtomicUsize,
}

/// Creates and destroys rendering contexts on one device
#[derive(Clone)]
pub struct ContextManager {
    inner: Arc<ManagerInner>,
}

impl ContextManager {
    pub fn new(device: Arc<dyn GpuDevice>) -> Self {
        info!(device = %device.name(), "GPU context manager created");
        Self {
            inner: Arc::new(ManagerInner {
                device,
                driver_lock: Mutex::new(()),
                next_id: AtomicU64::new(1),
                live: AtomicUsize::new(0),
            }),
        }
    }

    /// Device backing this manager
    pub fn device(&self) -> &Arc<dyn GpuDevice> {
        &self.inner.device
    }

    /// Number of contexts created and not yet destroyed
    pub fn live_contexts(&self) -> usize {
        self.inner.live.load(Ordering::Acquire)
    }

    /// Create a context, optionally sharing objects with another one
    pub fn create_context(
        &self,
        share_with: Option<&SharedContextHandle>,
    ) -> GpuResult<RenderContext> {
        create_context(&self.inner, share_with)
    }
}

fn create_context(
    inner: &Arc<ManagerInner>,
    share_with: Option<&SharedContextHandle>,
) -> GpuResult<RenderContext> {
    let _driver = inner.driver_lock.lock().unwrap_or_else(|e| e.into_inner());
    let id = inner.next_id.fetch_add(1, Ordering::Relaxed);

    let (api, group) = match share_with {
        Some(handle) => {
            let api = inner.device.create_context(id, Some(&handle.api))?;
            (api, Arc::clone(&handle.group))
        }
        None => (
            inner.device.create_context(id, None)?,
            Arc::new(AtomicUsize::new(0)),
        ),
    };
    group.fetch_add(1, Ordering::AcqRel);
    inner.live.fetch_add(1, Ordering::AcqRel);

    debug!(
        context = id,
        shared_with = ?share_with.map(|h| h.origin),
        "Context created"
    );

    Ok(RenderContext {
        id,
        api,
        manager: Arc::clone(inner),
        binding: Arc::new(Mutex::new(None)),
        group,
        destroyed: AtomicBool::new(false),
    })
}

/// Reference to a context's object namespace, used to create peer contexts
///
/// Cheap to clone and safe to hand to another thread.
#[derive(Clone)]
pub struct SharedContextHandle {
    manager: Arc<ManagerInner>,
    api: Arc<dyn GpuApi>,
    group: Arc<AtomicUsize>,
    origin: ContextId,
}

impl SharedContextHandle {
    /// Id of the context this handle was taken from
    pub fn origin(&self) -> ContextId {
        self.origin
    }

    /// Create a peer context seeing the same textures
    pub fn create_peer(&self) -> GpuResult<RenderContext> {
        create_context(&self.manager, Some(self))
    }
}

impl std::fmt::Debug for SharedContextHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedContextHandle")
            .field("origin", &self.origin)
            .finish()
    }
}

/// A rendering context
pub struct RenderContext {
    id: ContextId,
    api: Arc<dyn GpuApi>,
    manager: Arc<ManagerInner>,
    binding: Binding,
    /// Live contexts in this share group
    group: Arc<AtomicUsize>,
    destroyed: AtomicBool,
}

impl RenderContext {
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Object namespace of this context's share group
    pub fn api(&self) -> &Arc<dyn GpuApi> {
        &self.api
    }

    /// Handle for creating peer contexts on other threads
    pub fn share_handle(&self) -> SharedContextHandle {
        SharedContextHandle {
            manager: Arc::clone(&self.manager),
            api: Arc::clone(&self.api),
            group: Arc::clone(&self.group),
            origin: self.id,
        }
    }

    /// Whether the driver exposes `extension`
    pub fn has_extension(&self, extension: &str) -> bool {
        self.api.extensions().iter().any(|e| e == extension)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Whether this context is current on the calling thread
    pub fn is_current(&self) -> bool {
        current_context() == Some(self.id)
    }

    /// Bind a paintable target to this context.
    ///
    /// The calling thread becomes the surface's owning thread.
    pub fn attach_surface(&self, target: SurfaceTarget) -> GpuResult<DrawableSurface> {
        if self.is_destroyed() {
            return Err(GpuError::ContextDestroyed);
        }
        let id = self.api.create_surface(target.width, target.height)?;
        debug!(
            context = self.id,
            surface = id,
            label = %target.label,
            width = target.width,
            height = target.height,
            recordable = target.recordable,
            "Surface attached"
        );
        Ok(DrawableSurface {
            id,
            api: Arc::clone(&self.api),
            context: self.id,
            owner: thread::current().id(),
            width: target.width,
            height: target.height,
            viewport: Viewport::full(target.width, target.height),
            label: target.label,
            sink: target.sink,
            recordable: target.recordable,
            released: false,
        })
    }

    /// Make this context current on the calling thread, drawing into `surface`.
    ///
    /// Must be called on the surface's owning thread. Fails with
    /// [`GpuError::ContextBusy`] if another thread holds the context.
    pub fn make_current(&self, surface: &DrawableSurface) -> GpuResult<()> {
        if self.is_destroyed() {
            return Err(GpuError::ContextDestroyed);
        }
        if surface.context != self.id {
            return Err(GpuError::InvalidSurface(surface.id));
        }
        let me = thread::current().id();
        if surface.owner != me {
            return Err(GpuError::WrongThread);
        }

        {
            let mut owner = lock_binding(&self.binding);
            match *owner {
                Some(t) if t != me => return Err(GpuError::ContextBusy),
                _ => *owner = Some(me),
            }
        }

        CURRENT.with(|current| {
            let mut current = current.borrow_mut();
            if let Some(previous) = current.take()
                && previous.context != self.id
            {
                *lock_binding(&previous.binding) = None;
            }
            *current = Some(CurrentBinding {
                context: self.id,
                binding: Arc::clone(&self.binding),
            });
        });
        Ok(())
    }

    /// Drop the calling thread's binding to this context (`makeCurrent(null)`)
    pub fn release_current(&self) {
        let me = thread::current().id();
        CURRENT.with(|current| {
            let mut current = current.borrow_mut();
            if current.as_ref().map(|c| c.context) == Some(self.id) {
                *current = None;
            }
        });
        let mut owner = lock_binding(&self.binding);
        if *owner == Some(me) {
            *owner = None;
        }
    }

    /// Destroy the context.
    ///
    /// Idempotent. Fails soft with [`GpuError::ContextBusy`] (and leaves the
    /// context alive) while another thread still has it current.
    pub fn destroy(&self) -> GpuResult<()> {
        if self.is_destroyed() {
            return Ok(());
        }
        let me = thread::current().id();
        {
            let owner = lock_binding(&self.binding);
            if let Some(t) = *owner
                && t != me
            {
                warn!(context = self.id, "Refusing to destroy context current on another thread");
                return Err(GpuError::ContextBusy);
            }
        }
        self.release_current();

        let _driver = self.manager.driver_lock.lock().unwrap_or_else(|e| e.into_inner());
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let remaining = self.group.fetch_sub(1, Ordering::AcqRel) - 1;
        if remaining > 0 {
            debug!(
                context = self.id,
                peers = remaining,
                "Share group kept alive by peer contexts"
            );
        }
        self.manager.device.destroy_context(self.id);
        self.manager.live.fetch_sub(1, Ordering::AcqRel);
        debug!(context = self.id, "Context destroyed");
        Ok(())
    }
}

impl Drop for RenderContext {
    fn drop(&mut self) {
        if !self.is_destroyed()
            && let Err(e) = self.destroy()
        {
            warn!(context = self.id, error = %e, "Context dropped without clean destroy");
        }
    }
}

/// Receiver of presented frames for surfaces that are not on screen
pub trait FrameSink: Send + Sync {
    /// Called on every swap with tightly packed RGBA rows, top row first
    fn present(&self, width: u32, height: u32, rgba: &[u8]);
}

/// Description of a paintable destination
#[derive(Clone)]
pub struct SurfaceTarget {
    pub label: String,
    pub width: u32,
    pub height: u32,
    /// Receives each presented frame
    pub sink: Option<Arc<dyn FrameSink>>,
    /// Target feeds an encoder
    pub recordable: bool,
}

impl SurfaceTarget {
    pub fn offscreen(label: &str, width: u32, height: u32) -> Self {
        Self {
            label: label.to_string(),
            width,
            height,
            sink: None,
            recordable: false,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn FrameSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn recordable(mut self, recordable: bool) -> Self {
        self.recordable = recordable;
        self
    }
}

impl std::fmt::Debug for SurfaceTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurfaceTarget")
            .field("label", &self.label)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("has_sink", &self.sink.is_some())
            .field("recordable", &self.recordable)
            .finish()
    }
}

/// A render target bound to a context, owned by the thread that attached it
///
/// Holds the current viewport; draws go into that rectangle.
pub struct DrawableSurface {
    id: SurfaceId,
    api: Arc<dyn GpuApi>,
    context: ContextId,
    owner: ThreadId,
    width: u32,
    height: u32,
    viewport: Viewport,
    label: String,
    sink: Option<Arc<dyn FrameSink>>,
    recordable: bool,
    released: bool,
}

impl DrawableSurface {
    pub fn id(&self) -> SurfaceId {
        self.id
    }

    pub fn context_id(&self) -> ContextId {
        self.context
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_recordable(&self) -> bool {
        self.recordable
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Current viewport
    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    fn ensure_current(&self) -> GpuResult<()> {
        if self.released {
            return Err(GpuError::InvalidSurface(self.id));
        }
        if thread::current().id() != self.owner {
            return Err(GpuError::WrongThread);
        }
        if current_context() != Some(self.context) {
            return Err(GpuError::NotCurrent);
        }
        Ok(())
    }

    /// Reallocate the target; the viewport resets to the full surface
    pub fn resize(&mut self, width: u32, height: u32) -> GpuResult<()> {
        self.ensure_current()?;
        if width == self.width && height == self.height {
            return Ok(());
        }
        self.api.resize_surface(self.id, width, height)?;
        self.width = width;
        self.height = height;
        self.viewport = Viewport::full(width, height);
        Ok(())
    }

    pub fn clear(&self, color: [f32; 4]) -> GpuResult<()> {
        self.ensure_current()?;
        self.api.clear(self.id, color)
    }

    /// Draw a quad into the current viewport
    pub fn draw_quad(&self, draw: &QuadDraw<'_>) -> GpuResult<()> {
        self.ensure_current()?;
        self.api.draw_quad(self.id, self.viewport, draw)
    }

    pub fn read_pixels(&self, rect: Viewport) -> GpuResult<Readback> {
        self.ensure_current()?;
        self.api.read_pixels(self.id, rect)
    }

    /// Finish the frame and hand it to the sink, if any
    pub fn swap(&self) -> GpuResult<()> {
        self.ensure_current()?;
        self.api.flush(self.id)?;
        if let Some(sink) = &self.sink {
            let frame = self
                .api
                .read_pixels(self.id, Viewport::full(self.width, self.height))?
                .into_rgba_top_left();
            sink.present(frame.width, frame.height, &frame.data);
        }
        Ok(())
    }

    /// Free the target. Idempotent.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.api.destroy_surface(self.id);
        debug!(surface = self.id, label = %self.label, "Surface released");
    }
}

impl Drop for DrawableSurface {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::software::SoftwareDevice;

    fn manager() -> ContextManager {
        ContextManager::new(Arc::new(SoftwareDevice::new()))
    }

    #[test]
    fn test_make_current_and_draw_requires_binding() {
        let manager = manager();
        let ctx = manager.create_context(None).unwrap();
        let surface = ctx.attach_surface(SurfaceTarget::offscreen("t", 4, 4)).unwrap();
        assert_eq!(surface.clear([0.0; 4]), Err(GpuError::NotCurrent));
        ctx.make_current(&surface).unwrap();
        assert!(ctx.is_current());
        surface.clear([0.0; 4]).unwrap();
        ctx.release_current();
        assert!(!ctx.is_current());
    }

    #[test]
    fn test_make_current_from_other_thread_is_rejected() {
        let manager = manager();
        let ctx = Arc::new(manager.create_context(None).unwrap());
        let surface = ctx.attach_surface(SurfaceTarget::offscreen("t", 4, 4)).unwrap();
        let surface = Arc::new(Mutex::new(surface));
        let ctx2 = Arc::clone(&ctx);
        let surface2 = Arc::clone(&surface);
        let result = thread::spawn(move || {
            let guard = surface2.lock().unwrap();
            ctx2.make_current(&guard)
        })
        .join()
        .unwrap();
        assert_eq!(result, Err(GpuError::WrongThread));
    }

    #[test]
    fn test_destroy_fails_soft_while_current_elsewhere() {
        let manager = manager();
        let ctx = Arc::new(manager.create_context(None).unwrap());
        let (bound_tx, bound_rx) = std::sync::mpsc::channel();
        let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();
        let worker_ctx = Arc::clone(&ctx);
        let worker = thread::spawn(move || {
            let surface = worker_ctx
                .attach_surface(SurfaceTarget::offscreen("w", 2, 2))
                .unwrap();
            worker_ctx.make_current(&surface).unwrap();
            bound_tx.send(()).unwrap();
            done_rx.recv().unwrap();
            worker_ctx.release_current();
        });
        bound_rx.recv().unwrap();
        assert_eq!(ctx.destroy(), Err(GpuError::ContextBusy));
        assert!(!ctx.is_destroyed());
        done_tx.send(()).unwrap();
        worker.join().unwrap();
        assert_eq!(ctx.destroy(), Ok(()));
        assert_eq!(ctx.destroy(), Ok(()), "second destroy is a no-op");
        assert_eq!(manager.live_contexts(), 0);
    }

    #[test]
    fn test_peer_context_sees_shared_textures() {
        let manager = manager();
        let ctx = manager.create_context(None).unwrap();
        let texture = ctx
            .api()
            .create_texture(crate::gpu::TextureKind::Normal)
            .unwrap();
        ctx.api().upload_texture(texture, 1, 1, &[1, 2, 3, 4]).unwrap();

        let peer = ctx.share_handle().create_peer().unwrap();
        assert!(Arc::ptr_eq(ctx.api(), peer.api()));
        assert_eq!(manager.live_contexts(), 2);

        // Destroying the first context leaves the namespace usable for the peer
        ctx.destroy().unwrap();
        assert!(peer.api().upload_texture(texture, 1, 1, &[5, 6, 7, 8]).is_ok());
        peer.destroy().unwrap();
        assert_eq!(manager.live_contexts(), 0);
    }

    #[test]
    fn test_switching_current_context_releases_previous_binding() {
        let manager = manager();
        let a = manager.create_context(None).unwrap();
        let b = manager.create_context(None).unwrap();
        let sa = a.attach_surface(SurfaceTarget::offscreen("a", 2, 2)).unwrap();
        let sb = b.attach_surface(SurfaceTarget::offscreen("b", 2, 2)).unwrap();
        a.make_current(&sa).unwrap();
        b.make_current(&sb).unwrap();
        assert!(!a.is_current());
        assert!(b.is_current());
        assert_eq!(sa.clear([0.0; 4]), Err(GpuError::NotCurrent));
    }
}
