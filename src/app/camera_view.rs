// SPDX-License-Identifier: GPL-3.0-only

//! Camera view
//!
//! Composition root for one preview surface: owns the surface thread and the
//! capture thread, and routes scale-mode changes, snapshots and the encoder
//! to the render thread.
//!
//! The view never holds its state lock across a blocking handshake with one
//! of its threads; threads are taken out of the lock before they are stopped.

use crate::backends::camera::{CameraProvider, CaptureSession, CaptureState, CaptureThread};
use crate::errors::{AppError, AppResult};
use crate::gpu::{ContextManager, SurfaceTarget};
use crate::render::primary::RendererSettings;
use crate::render::surface_thread::PreviewHost;
use crate::render::{
    EncoderSlot, FrameStream, GlyphRasterizer, PersistenceSink, PreviewRenderer, RenderEvent,
    ScaleMode, SnapshotRequest, SurfaceThread, VideoEncoder,
};
use image::RgbaImage;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, info, warn};

/// Everything a view needs that outlives its surfaces
pub struct CameraViewConfig {
    pub camera_id: u32,
    /// Size requested from the camera
    pub preview_size: (u32, u32),
    pub renderer: RendererSettings,
    pub rasterizer: Arc<GlyphRasterizer>,
    pub watermark: Option<RgbaImage>,
    pub persistence: Option<Arc<dyn PersistenceSink>>,
    /// Directory and extension for snapshots taken without an explicit path
    pub snapshot_dir: PathBuf,
    pub snapshot_extension: String,
}

#[derive(Default)]
struct ViewState {
    surface: Option<SurfaceThread>,
    capture: Option<CaptureThread>,
    /// Output of the current surface, kept for restarting preview on resume
    stream: Option<FrameStream>,
    session: Option<CaptureSession>,
    video_size: Option<(u32, u32)>,
    display_rotation: u32,
    encoder: Option<Arc<dyn VideoEncoder>>,
}

struct ViewShared {
    manager: ContextManager,
    provider: Arc<dyn CameraProvider>,
    config: CameraViewConfig,
    snapshot: Arc<SnapshotRequest>,
    encoder_slot: Arc<EncoderSlot>,
    scale_mode: Mutex<ScaleMode>,
    state: Mutex<ViewState>,
    weak: Weak<ViewShared>,
}

impl ViewShared {
    fn lock(&self) -> MutexGuard<'_, ViewState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn scale_mode(&self) -> ScaleMode {
        *self.scale_mode.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Runs on the capture thread after a successful start
    fn on_preview_started(&self, session: &CaptureSession) {
        let size = session.preview_size();
        let mut state = self.lock();
        state.session = Some(session.clone());
        let video = oriented(size.width, size.height, session.rotation_degrees());
        state.video_size = Some(video);
        if let Some(surface) = &state.surface {
            surface.post(RenderEvent::VideoSize {
                width: video.0,
                height: video.1,
            });
        }
    }

    fn spawn_capture(&self, state: &mut ViewState) -> AppResult<()> {
        let weak = self.weak.clone();
        let capture = CaptureThread::spawn(
            Arc::clone(&self.provider),
            self.config.camera_id,
            state.display_rotation,
            Arc::new(move |session: &CaptureSession| {
                if let Some(view) = weak.upgrade() {
                    view.on_preview_started(session);
                }
            }),
        )?;
        state.capture = Some(capture);
        Ok(())
    }

    fn start_capture(&self, output: FrameStream, width: u32, height: u32) {
        let stale = {
            let mut state = self.lock();
            state.stream = Some(output.clone());
            if state.capture.as_ref().is_some_and(|c| c.is_running()) {
                if let Some(capture) = &state.capture {
                    capture.start_preview(width, height, output);
                }
                return;
            }
            state.capture.take()
        };
        // Joined outside the lock; its start callback may still need it
        drop(stale);

        let mut state = self.lock();
        if let Err(e) = self.spawn_capture(&mut state) {
            warn!(error = %e, "Capture thread could not start");
            return;
        }
        if let Some(capture) = &state.capture {
            capture.start_preview(width, height, output);
        }
    }

    fn stop_capture(&self, wait: bool) {
        let capture = {
            let mut state = self.lock();
            state.session = None;
            if wait {
                state.capture.take()
            } else {
                if let Some(capture) = state.capture.as_mut()
                    && let Err(e) = capture.stop(false)
                {
                    warn!(error = %e, "Capture stop failed");
                }
                None
            }
        };
        if let Some(mut capture) = capture
            && let Err(e) = capture.stop(true)
        {
            warn!(error = %e, "Capture stop failed");
        }
    }
}

impl PreviewHost for ViewShared {
    fn start_preview(&self, output: FrameStream, width: u32, height: u32) {
        self.start_capture(output, width, height);
    }

    fn stop_preview(&self, wait: bool) {
        self.stop_capture(wait);
    }
}

/// Clockwise 90°/270° display rotations swap width and height
fn oriented(width: u32, height: u32, rotation: u32) -> (u32, u32) {
    if rotation % 180 == 0 {
        (width, height)
    } else {
        (height, width)
    }
}

/// A camera preview bound to at most one surface at a time
pub struct CameraView {
    shared: Arc<ViewShared>,
}

impl CameraView {
    pub fn new(
        manager: ContextManager,
        provider: Arc<dyn CameraProvider>,
        config: CameraViewConfig,
    ) -> Self {
        let scale_mode = config.renderer.scale_mode;
        let shared = Arc::new_cyclic(|weak| ViewShared {
            manager,
            provider,
            config,
            snapshot: Arc::new(SnapshotRequest::new()),
            encoder_slot: Arc::new(EncoderSlot::new()),
            scale_mode: Mutex::new(scale_mode),
            state: Mutex::new(ViewState::default()),
            weak: weak.clone(),
        });
        Self { shared }
    }

    /// Bring up rendering on `target` and start the camera.
    ///
    /// Fails if a surface is already attached or the GPU cannot render the
    /// capture stream.
    pub fn surface_created(&self, target: SurfaceTarget) -> AppResult<()> {
        if self.shared.lock().surface.is_some() {
            return Err(AppError::Other("surface already attached".into()));
        }
        let config = &self.shared.config;
        let mut settings = config.renderer.clone();
        settings.scale_mode = self.shared.scale_mode();
        let mut renderer = PreviewRenderer::new(
            settings,
            Arc::clone(&config.rasterizer),
            Arc::clone(&self.shared.snapshot),
            Arc::clone(&self.shared.encoder_slot),
        );
        if let Some(watermark) = &config.watermark {
            renderer = renderer.with_watermark(watermark.clone());
        }
        if let Some(sink) = &config.persistence {
            renderer = renderer.with_persistence(Arc::clone(sink));
        }

        let host: Weak<dyn PreviewHost> = Arc::downgrade(&self.shared) as Weak<ViewShared>;
        let surface = SurfaceThread::spawn(
            self.shared.manager.clone(),
            target,
            renderer,
            host,
            config.preview_size,
        )?;

        let mut state = self.shared.lock();
        if let Some((width, height)) = state.video_size {
            surface.post(RenderEvent::VideoSize { width, height });
        }
        if let Some(encoder) = &state.encoder {
            surface.post(RenderEvent::SetEncoder(Some(Arc::clone(encoder))));
        }
        state.surface = Some(surface);
        info!("Camera view surface created");
        Ok(())
    }

    /// Resize the surface
    pub fn surface_changed(&self, width: u32, height: u32) {
        if let Some(surface) = &self.shared.lock().surface {
            surface.post(RenderEvent::Resize { width, height });
        }
    }

    /// Tear the surface down. The capture device is fully released before the
    /// primary context goes away. Idempotent.
    pub fn surface_destroyed(&self) -> AppResult<()> {
        let surface = self.shared.lock().surface.take();
        let Some(mut surface) = surface else {
            return Ok(());
        };
        surface.destroy()?;
        let mut state = self.shared.lock();
        state.stream = None;
        state.video_size = None;
        info!("Camera view surface destroyed");
        Ok(())
    }

    /// Restart preview if a surface exists and capture is not running
    pub fn on_resume(&self) {
        let stream = {
            let state = self.shared.lock();
            let running = state.capture.as_ref().is_some_and(|c| c.is_running());
            if state.surface.is_none() || running {
                return;
            }
            state.stream.clone()
        };
        if let Some(stream) = stream.filter(|s| !s.is_closed()) {
            debug!("Resuming preview");
            let (width, height) = self.shared.config.preview_size;
            self.shared.start_capture(stream, width, height);
        }
    }

    /// Stop preview without waiting for the device
    pub fn on_pause(&self) {
        debug!("Pausing preview");
        self.shared.stop_capture(false);
    }

    pub fn set_scale_mode(&self, mode: ScaleMode) {
        *self
            .shared
            .scale_mode
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = mode;
        if let Some(surface) = &self.shared.lock().surface {
            surface.post(RenderEvent::ScaleMode(mode));
        }
    }

    pub fn scale_mode(&self) -> ScaleMode {
        self.shared.scale_mode()
    }

    /// Set the video size, swapping width and height when the camera image
    /// is displayed rotated by 90° or 270°
    pub fn set_video_size(&self, width: u32, height: u32) {
        let mut state = self.shared.lock();
        let rotation = state
            .session
            .as_ref()
            .map(|s| s.rotation_degrees())
            .unwrap_or(0);
        let video = oriented(width, height, rotation);
        state.video_size = Some(video);
        if let Some(surface) = &state.surface {
            surface.post(RenderEvent::VideoSize {
                width: video.0,
                height: video.1,
            });
        }
    }

    pub fn video_size(&self) -> Option<(u32, u32)> {
        self.shared.lock().video_size
    }

    /// Rotation of the device from its natural orientation, applied to the
    /// next capture session
    pub fn set_display_rotation(&self, degrees: u32) {
        self.shared.lock().display_rotation = degrees % 360;
    }

    /// Attach or detach the encoder; kept across surfaces
    pub fn set_video_encoder(&self, encoder: Option<Arc<dyn VideoEncoder>>) {
        let mut state = self.shared.lock();
        state.encoder = encoder.clone();
        if let Some(surface) = &state.surface {
            surface.post(RenderEvent::SetEncoder(encoder));
        }
    }

    /// Request a snapshot of the next rendered frame.
    ///
    /// Without `path` a timestamped file in the snapshot directory is used.
    /// Returns the requested path.
    pub fn take_picture(&self, path: Option<PathBuf>) -> AppResult<PathBuf> {
        if !self.has_surface() {
            return Err(AppError::Other("no surface to capture".into()));
        }
        let config = &self.shared.config;
        let path = match path {
            Some(path) => path,
            None => crate::storage::capture_file(&config.snapshot_dir, &config.snapshot_extension)?,
        };
        self.shared.snapshot.request(path.clone());
        if let Some(surface) = &self.shared.lock().surface {
            surface.request_render();
        }
        info!(path = %path.display(), "Snapshot requested");
        Ok(path)
    }

    pub fn snapshot_pending(&self) -> bool {
        self.shared.snapshot.is_pending()
    }

    pub fn capture_state(&self) -> CaptureState {
        self.shared
            .lock()
            .capture
            .as_ref()
            .map(|c| c.state())
            .unwrap_or(CaptureState::Destroyed)
    }

    pub fn session(&self) -> Option<CaptureSession> {
        self.shared.lock().session.clone()
    }

    pub fn has_surface(&self) -> bool {
        self.shared.lock().surface.is_some()
    }

    pub fn frames_drawn(&self) -> u64 {
        self.shared
            .lock()
            .surface
            .as_ref()
            .map(|s| s.frames_drawn())
            .unwrap_or(0)
    }
}

impl Drop for CameraView {
    fn drop(&mut self) {
        if let Err(e) = self.surface_destroyed() {
            warn!(error = %e, "Camera view teardown failed");
        }
        self.shared.stop_capture(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_swaps_video_size() {
        assert_eq!(oriented(1280, 720, 0), (1280, 720));
        assert_eq!(oriented(1280, 720, 90), (720, 1280));
        assert_eq!(oriented(1280, 720, 180), (1280, 720));
        assert_eq!(oriented(1280, 720, 270), (720, 1280));
    }
}
