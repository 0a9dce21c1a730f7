// SPDX-License-Identifier: GPL-3.0-only

//! End-to-end tests: camera view on an off-screen surface fed by the
//! synthetic camera

use camera_compositor::backends::camera::synthetic::{DeviceStats, default_parameters};
use camera_compositor::backends::camera::{
    CameraInfo, CameraProvider, CaptureState, Facing, SensorRotation, Size, SyntheticProvider,
};
use camera_compositor::errors::{AppResult, GpuResult};
use camera_compositor::gpu::software::SoftwareDevice;
use camera_compositor::gpu::{ContextId, ContextManager, GpuApi, GpuDevice, SurfaceTarget};
use camera_compositor::pipelines::photo::{
    EncodingFormat, EncodingQuality, PhotoEncoder, PhotoWriter,
};
use camera_compositor::pipelines::video::VideoRecorder;
use camera_compositor::render::primary::RendererSettings;
use camera_compositor::render::{GlyphRasterizer, PersistenceSink, VideoEncoder};
use camera_compositor::{CameraView, CameraViewConfig};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(5);

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < TIMEOUT {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "camera-compositor-{}-{}",
        name,
        std::process::id()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn view_config(camera_id: u32, preview_size: (u32, u32)) -> CameraViewConfig {
    CameraViewConfig {
        camera_id,
        preview_size,
        renderer: RendererSettings::default(),
        rasterizer: Arc::new(GlyphRasterizer::default()),
        watermark: None,
        persistence: None,
        snapshot_dir: std::env::temp_dir(),
        snapshot_extension: "png".into(),
    }
}

fn start_view(view: &CameraView) {
    view.surface_created(SurfaceTarget::offscreen("preview", 320, 240))
        .expect("surface should come up");
    assert!(
        wait_until(|| view.session().is_some() && view.frames_drawn() > 0),
        "preview never drew a camera frame"
    );
}

/// Records whether the camera was still open whenever a context was destroyed
struct TeardownWatch {
    inner: SoftwareDevice,
    stats: Arc<DeviceStats>,
    destroyed: AtomicUsize,
    violations: Mutex<Vec<String>>,
}

impl GpuDevice for TeardownWatch {
    fn name(&self) -> String {
        self.inner.name()
    }

    fn create_context(
        &self,
        id: ContextId,
        share_with: Option<&Arc<dyn GpuApi>>,
    ) -> GpuResult<Arc<dyn GpuApi>> {
        self.inner.create_context(id, share_with)
    }

    fn destroy_context(&self, id: ContextId) {
        let open = self.stats.open_devices();
        let streaming = self.stats.streaming.load(Ordering::Acquire);
        if open != 0 || streaming {
            self.violations.lock().unwrap().push(format!(
                "context {} destroyed with {} open devices, streaming={}",
                id, open, streaming
            ));
        }
        self.destroyed.fetch_add(1, Ordering::AcqRel);
        self.inner.destroy_context(id);
    }
}

#[test]
fn test_preview_negotiates_requested_size() {
    let provider = Arc::new(SyntheticProvider::new());
    let manager = ContextManager::new(Arc::new(SoftwareDevice::new()));
    let view = CameraView::new(manager, provider, view_config(0, (1280, 720)));

    start_view(&view);
    let session = view.session().unwrap();
    assert_eq!(session.preview_size(), Size::new(1280, 720));
    assert_eq!(session.rotation_degrees(), 0);
    assert!(session.settings.recording_hint);
    assert_eq!(view.video_size(), Some((1280, 720)));
    assert_eq!(view.capture_state(), CaptureState::Previewing);
}

#[test]
fn test_front_camera_rotation_swaps_video_size() {
    let info = CameraInfo {
        id: 0,
        name: "front".into(),
        facing: Facing::Front,
        orientation: SensorRotation::Rotate90,
    };
    let provider = Arc::new(SyntheticProvider::single(info, default_parameters()));
    let manager = ContextManager::new(Arc::new(SoftwareDevice::new()));
    let view = CameraView::new(manager, provider, view_config(0, (1280, 720)));
    view.set_display_rotation(0);

    start_view(&view);
    let session = view.session().unwrap();
    assert!(session.is_front_facing());
    assert_eq!(session.rotation_degrees(), 270);
    assert_eq!(view.video_size(), Some((720, 1280)));

    // Explicit video sizes follow the session rotation
    view.set_video_size(640, 480);
    assert_eq!(view.video_size(), Some((480, 640)));
}

#[test]
fn test_camera_released_before_context_destroyed() {
    let provider = SyntheticProvider::new();
    let stats = provider.stats();
    let device = Arc::new(TeardownWatch {
        inner: SoftwareDevice::new(),
        stats: Arc::clone(&stats),
        destroyed: AtomicUsize::new(0),
        violations: Mutex::new(Vec::new()),
    });
    let manager = ContextManager::new(device.clone());
    let view = CameraView::new(
        manager.clone(),
        Arc::new(provider),
        view_config(0, (640, 480)),
    );

    start_view(&view);
    assert_eq!(stats.open_devices(), 1);
    assert!(stats.streaming.load(Ordering::Acquire));

    view.surface_destroyed().unwrap();
    view.surface_destroyed().unwrap();

    assert_eq!(device.destroyed.load(Ordering::Acquire), 1);
    assert!(
        device.violations.lock().unwrap().is_empty(),
        "{:?}",
        device.violations.lock().unwrap()
    );
    assert_eq!(stats.open_devices(), 0);
    assert_eq!(manager.live_contexts(), 0);
    assert!(!view.has_surface());
    assert_eq!(view.capture_state(), CaptureState::Destroyed);
}

#[test]
fn test_pause_and_resume_restart_capture() {
    let provider = SyntheticProvider::new();
    let stats = provider.stats();
    let manager = ContextManager::new(Arc::new(SoftwareDevice::new()));
    let view = CameraView::new(manager, Arc::new(provider), view_config(0, (640, 480)));
    start_view(&view);

    view.on_pause();
    assert!(wait_until(|| stats.open_devices() == 0), "pause should release the camera");
    assert!(view.session().is_none());

    view.on_resume();
    assert!(
        wait_until(|| view.capture_state() == CaptureState::Previewing),
        "resume should restart the preview"
    );
    assert!(wait_until(|| view.session().is_some()));
    assert_eq!(stats.open_devices(), 1);

    // Already running: a second resume is a no-op
    view.on_resume();
    assert_eq!(stats.opened.load(Ordering::Acquire), 2);

    drop(view);
    assert_eq!(stats.open_devices(), 0);
}

#[test]
fn test_surface_can_be_recreated() {
    let provider = SyntheticProvider::new();
    let stats = provider.stats();
    let manager = ContextManager::new(Arc::new(SoftwareDevice::new()));
    let view = CameraView::new(
        manager.clone(),
        Arc::new(provider),
        view_config(0, (640, 480)),
    );

    start_view(&view);
    assert!(view.surface_created(SurfaceTarget::offscreen("second", 10, 10)).is_err());
    view.surface_destroyed().unwrap();
    assert_eq!(stats.open_devices(), 0);

    start_view(&view);
    assert_eq!(stats.open_devices(), 1);
    view.surface_destroyed().unwrap();
    assert_eq!(manager.live_contexts(), 0);
}

fn snapshot_view(
    dir: &std::path::Path,
) -> (CameraView, Arc<PhotoWriter>, mpsc::Receiver<AppResult<PathBuf>>) {
    let (tx, rx) = mpsc::channel();
    let writer = Arc::new(
        PhotoWriter::spawn(
            PhotoEncoder::new(EncodingFormat::Png, EncodingQuality::High),
            Some(Arc::new(move |result: AppResult<PathBuf>| {
                let _ = tx.send(result);
            })),
        )
        .unwrap(),
    );
    let mut config = view_config(0, (640, 480));
    config.persistence = Some(Arc::clone(&writer) as Arc<dyn PersistenceSink>);
    config.snapshot_dir = dir.to_path_buf();
    let manager = ContextManager::new(Arc::new(SoftwareDevice::new()));
    let view = CameraView::new(manager, Arc::new(SyntheticProvider::new()), config);
    (view, writer, rx)
}

#[test]
fn test_snapshot_is_written_in_requested_format() {
    let dir = temp_dir("snapshot");
    let (view, writer, saved) = snapshot_view(&dir);
    start_view(&view);

    let png = view.take_picture(Some(dir.join("still.png"))).unwrap();
    let saved_png = saved.recv_timeout(TIMEOUT).unwrap().unwrap();
    assert_eq!(saved_png, png);
    assert!(!view.snapshot_pending());

    let jpg = view.take_picture(Some(dir.join("still.jpg"))).unwrap();
    let saved_jpg = saved.recv_timeout(TIMEOUT).unwrap().unwrap();
    assert_eq!(saved_jpg, jpg);

    let bytes = std::fs::read(&saved_png).unwrap();
    assert_eq!(image::guess_format(&bytes).unwrap(), image::ImageFormat::Png);
    let decoded = image::load_from_memory(&bytes).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (320, 240));

    let bytes = std::fs::read(&saved_jpg).unwrap();
    assert_eq!(image::guess_format(&bytes).unwrap(), image::ImageFormat::Jpeg);

    drop(view);
    writer.finish();
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_snapshot_with_unknown_extension_uses_default_format() {
    let dir = temp_dir("snapshot-ext");
    let (view, writer, saved) = snapshot_view(&dir);
    start_view(&view);

    view.take_picture(Some(dir.join("still.tiff"))).unwrap();
    let path = saved.recv_timeout(TIMEOUT).unwrap().unwrap();
    assert_eq!(path, dir.join("still.png"));
    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(image::guess_format(&bytes).unwrap(), image::ImageFormat::Png);

    // Without a path the file is named after the current time
    let named = view.take_picture(None).unwrap();
    let path = saved.recv_timeout(TIMEOUT).unwrap().unwrap();
    assert_eq!(path, named);
    assert_eq!(path.parent(), Some(dir.as_path()));
    assert_eq!(path.extension().unwrap(), "png");

    drop(view);
    writer.finish();
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_take_picture_requires_surface() {
    let manager = ContextManager::new(Arc::new(SoftwareDevice::new()));
    let view = CameraView::new(
        manager,
        Arc::new(SyntheticProvider::new()) as Arc<dyn CameraProvider>,
        view_config(0, (640, 480)),
    );
    assert!(view.take_picture(None).is_err());
    assert!(!view.snapshot_pending());
}

/// Records a clip from a live view and tears the surface down while the
/// recorder may still have draws queued
fn record_clip(name: &str, detach_first: bool) {
    let dir = temp_dir(name);
    let recorder = Arc::new(
        VideoRecorder::new(
            &dir.join("clip.rgba"),
            320,
            240,
            Arc::new(GlyphRasterizer::default()),
            RendererSettings::default().overlay_layout,
            None,
        )
        .unwrap(),
    );
    let manager = ContextManager::new(Arc::new(SoftwareDevice::new()));
    let view = CameraView::new(
        manager.clone(),
        Arc::new(SyntheticProvider::new()),
        view_config(0, (640, 480)),
    );
    view.set_video_encoder(Some(Arc::clone(&recorder) as Arc<dyn VideoEncoder>));
    start_view(&view);
    assert!(
        wait_until(|| recorder.frames_forwarded() >= 10),
        "preview never handed frames to the recorder"
    );

    if detach_first {
        view.set_video_encoder(None);
    }
    view.surface_destroyed().unwrap();
    assert!(!recorder.is_recording());
    let forwarded = recorder.frames_forwarded();
    let path = recorder.stop().unwrap();

    assert!(forwarded >= 10);
    assert_eq!(recorder.frames_written(), forwarded);
    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(bytes.len() as u64, forwarded * 320 * 240 * 4);
    assert_eq!(manager.live_contexts(), 0);

    // Stopping again is a no-op
    assert_eq!(recorder.stop().unwrap(), path);
    drop(view);
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_recorder_writes_every_frame_when_surface_goes_away() {
    record_clip("recorder-teardown", false);
}

#[test]
fn test_recorder_writes_every_frame_when_detached_before_teardown() {
    record_clip("recorder-detach", true);
}
