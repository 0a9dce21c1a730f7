// SPDX-License-Identifier: GPL-3.0-only

//! External texture source
//!
//! [`FrameStream`] is the producer side handed to the capture device: it keeps
//! only the latest submitted frame and raises a dirty flag. [`ExternalTexture`]
//! is the consumer side living on the render thread: it uploads the latest
//! frame into its texture when the flag is set.
//!
//! Frames submitted faster than the render loop consumes them are dropped; only
//! the newest one survives.

use crate::backends::camera::CapturedFrame;
use crate::errors::{GpuError, GpuResult};
use crate::gpu::matrix::{self, Mat4};
use crate::gpu::{GpuApi, RenderContext, TextureId, TextureKind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, trace, warn};

/// Callback run after every accepted frame (the "frame available" notification)
pub type FrameListener = Arc<dyn Fn() + Send + Sync>;

struct StreamInner {
    latest: Mutex<Option<CapturedFrame>>,
    dirty: AtomicBool,
    closed: AtomicBool,
    listener: Mutex<Option<FrameListener>>,
    submitted: AtomicU64,
}

/// Producer handle of an [`ExternalTexture`]
///
/// Cheap to clone; safe to use from any thread.
#[derive(Clone)]
pub struct FrameStream {
    inner: Arc<StreamInner>,
}

impl Default for FrameStream {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameStream {
    /// A stream with no consuming texture yet
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StreamInner {
                latest: Mutex::new(None),
                dirty: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                listener: Mutex::new(None),
                submitted: AtomicU64::new(0),
            }),
        }
    }

    /// Install the frame-available callback, replacing any previous one
    pub fn set_frame_listener(&self, listener: FrameListener) {
        *self.inner.listener.lock().unwrap_or_else(|e| e.into_inner()) = Some(listener);
    }

    /// Publish a frame, replacing any frame not yet consumed.
    ///
    /// Returns `false` once the consuming texture has been released.
    pub fn submit(&self, frame: CapturedFrame) -> bool {
        if self.is_closed() {
            trace!(sequence = frame.sequence, "Frame dropped, texture released");
            return false;
        }
        if !frame.is_well_formed() {
            warn!(
                width = frame.width,
                height = frame.height,
                len = frame.data.len(),
                "Dropping malformed frame"
            );
            return false;
        }
        *self.inner.latest.lock().unwrap_or_else(|e| e.into_inner()) = Some(frame);
        self.inner.submitted.fetch_add(1, Ordering::Relaxed);
        self.mark_dirty();

        let listener = self
            .inner
            .listener
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(listener) = listener {
            listener();
        }
        true
    }

    /// Flag that a new frame is available. Never blocks.
    pub fn mark_dirty(&self) {
        self.inner.dirty.store(true, Ordering::Release);
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.load(Ordering::Acquire)
    }

    /// Whether the consuming texture has been released
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Number of frames accepted so far
    pub fn submitted(&self) -> u64 {
        self.inner.submitted.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for FrameStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameStream")
            .field("dirty", &self.is_dirty())
            .field("closed", &self.is_closed())
            .field("submitted", &self.submitted())
            .finish()
    }
}

/// GPU texture fed by a live capture stream
pub struct ExternalTexture {
    id: TextureId,
    api: Arc<dyn GpuApi>,
    stream: FrameStream,
    transform: Mat4,
    consumed: u64,
    released: bool,
}

impl ExternalTexture {
    /// Allocate the texture. The context must be current on the calling thread.
    pub fn create(context: &RenderContext) -> GpuResult<Self> {
        if !context.is_current() {
            return Err(GpuError::NotCurrent);
        }
        let api = Arc::clone(context.api());
        let id = api.create_texture(TextureKind::External)?;
        debug!(texture = id, context = context.id(), "External texture created");
        Ok(Self {
            id,
            api,
            stream: FrameStream::new(),
            transform: matrix::flip_vertical(),
            consumed: 0,
            released: false,
        })
    }

    pub fn id(&self) -> TextureId {
        self.id
    }

    /// Producer handle for the capture side
    pub fn stream(&self) -> FrameStream {
        self.stream.clone()
    }

    pub fn mark_dirty(&self) {
        self.stream.mark_dirty();
    }

    /// Texture coordinate transform of the last consumed frame
    pub fn transform_matrix(&self) -> &Mat4 {
        &self.transform
    }

    /// Frames consumed so far
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Latch the latest frame if one arrived since the last call.
    ///
    /// Any number of `mark_dirty` calls before this one collapse into a single
    /// consume. Returns whether a frame was consumed.
    pub fn consume_if_dirty(&mut self) -> GpuResult<bool> {
        if self.released {
            return Ok(false);
        }
        if !self.stream.inner.dirty.swap(false, Ordering::AcqRel) {
            return Ok(false);
        }

        let frame = self
            .stream
            .inner
            .latest
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(frame) = frame {
            self.api
                .upload_texture(self.id, frame.width, frame.height, &frame.data)?;
            trace!(texture = self.id, sequence = frame.sequence, "Frame latched");
        }
        // Capture buffers are delivered top row first
        self.transform = matrix::flip_vertical();
        self.consumed += 1;
        Ok(true)
    }

    /// Free the texture and stop accepting frames. Idempotent.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.stream.inner.closed.store(true, Ordering::Release);
        self.stream
            .inner
            .latest
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        self.api.delete_texture(self.id);
        debug!(texture = self.id, "External texture released");
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl Drop for ExternalTexture {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::software::SoftwareDevice;
    use crate::gpu::{ContextManager, SurfaceTarget};
    use std::sync::atomic::AtomicUsize;

    fn frame(seq: u64) -> CapturedFrame {
        CapturedFrame::new(1, 1, Arc::from(vec![seq as u8, 0, 0, 255]), seq)
    }

    fn setup() -> (ContextManager, RenderContext, crate::gpu::DrawableSurface) {
        let manager = ContextManager::new(Arc::new(SoftwareDevice::new()));
        let ctx = manager.create_context(None).unwrap();
        let surface = ctx.attach_surface(SurfaceTarget::offscreen("t", 2, 2)).unwrap();
        ctx.make_current(&surface).unwrap();
        (manager, ctx, surface)
    }

    #[test]
    fn test_consume_once_per_dirty_signal() {
        let (_m, ctx, _s) = setup();
        let mut texture = ExternalTexture::create(&ctx).unwrap();
        texture.mark_dirty();
        assert!(texture.consume_if_dirty().unwrap());
        assert!(!texture.consume_if_dirty().unwrap());
    }

    #[test]
    fn test_frames_coalesce() {
        let (_m, ctx, _s) = setup();
        let mut texture = ExternalTexture::create(&ctx).unwrap();
        let stream = texture.stream();
        for seq in 0..5 {
            assert!(stream.submit(frame(seq)));
        }
        assert!(texture.consume_if_dirty().unwrap());
        assert!(!texture.consume_if_dirty().unwrap());
        assert_eq!(texture.consumed(), 1);
        assert_eq!(stream.submitted(), 5);
    }

    #[test]
    fn test_listener_runs_per_submit() {
        let (_m, ctx, _s) = setup();
        let texture = ExternalTexture::create(&ctx).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let stream = texture.stream();
        stream.set_frame_listener(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        stream.submit(frame(1));
        stream.submit(frame(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_release_is_idempotent_and_closes_stream() {
        let (_m, ctx, _s) = setup();
        let mut texture = ExternalTexture::create(&ctx).unwrap();
        let stream = texture.stream();
        texture.release();
        texture.release();
        assert!(stream.is_closed());
        assert!(!stream.submit(frame(1)));
        assert!(!texture.consume_if_dirty().unwrap());
    }

    #[test]
    fn test_create_requires_current_context() {
        let manager = ContextManager::new(Arc::new(SoftwareDevice::new()));
        let ctx = manager.create_context(None).unwrap();
        assert!(matches!(
            ExternalTexture::create(&ctx),
            Err(GpuError::NotCurrent)
        ));
    }

    #[test]
    fn test_malformed_frame_is_rejected() {
        let (_m, ctx, _s) = setup();
        let texture = ExternalTexture::create(&ctx).unwrap();
        let bad = CapturedFrame::new(4, 4, Arc::from(vec![0u8; 3]), 0);
        assert!(!texture.stream().submit(bad));
        assert!(!texture.stream().is_dirty());
    }
}
