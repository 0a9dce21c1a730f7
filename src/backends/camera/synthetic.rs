// SPDX-License-Identifier: GPL-3.0-only

//! Synthetic capture device
//!
//! Generates a moving colour-bar test pattern at the negotiated size and frame
//! rate. Used by the CLI when no hardware backend is available and by tests,
//! which can make any stage of the device lifecycle fail on purpose.

use super::frame_loop::{FrameLoop, LoopAction};
use super::types::{
    CameraInfo, CameraParameters, CaptureSettings, CapturedFrame, Facing, FocusMode, FpsRange,
    SensorRotation, Size,
};
use super::{CameraProvider, CaptureDevice};
use crate::errors::{CameraError, CameraResult};
use crate::render::FrameStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// Stage at which a synthetic device fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    Open,
    Configure,
    Stream,
}

/// Counters shared by every device a provider opens
#[derive(Debug, Default)]
pub struct DeviceStats {
    pub opened: AtomicUsize,
    pub released: AtomicUsize,
    pub streaming: AtomicBool,
}

impl DeviceStats {
    /// Devices opened but not yet released
    pub fn open_devices(&self) -> usize {
        self.opened.load(Ordering::Acquire) - self.released.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone)]
struct Entry {
    info: CameraInfo,
    params: CameraParameters,
}

/// Provider of synthetic cameras
pub struct SyntheticProvider {
    cameras: Vec<Entry>,
    failure: Option<InjectedFailure>,
    stats: Arc<DeviceStats>,
}

impl Default for SyntheticProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticProvider {
    /// One upright back camera and one front camera mounted at 270°
    pub fn new() -> Self {
        let params = default_parameters();
        Self {
            cameras: vec![
                Entry {
                    info: CameraInfo {
                        id: 0,
                        name: "Synthetic back camera".into(),
                        facing: Facing::Back,
                        orientation: SensorRotation::None,
                    },
                    params: params.clone(),
                },
                Entry {
                    info: CameraInfo {
                        id: 1,
                        name: "Synthetic front camera".into(),
                        facing: Facing::Front,
                        orientation: SensorRotation::Rotate270,
                    },
                    params,
                },
            ],
            failure: None,
            stats: Arc::new(DeviceStats::default()),
        }
    }

    /// A provider exposing exactly one camera
    pub fn single(info: CameraInfo, params: CameraParameters) -> Self {
        Self {
            cameras: vec![Entry { info, params }],
            failure: None,
            stats: Arc::new(DeviceStats::default()),
        }
    }

    pub fn with_failure(mut self, failure: InjectedFailure) -> Self {
        self.failure = Some(failure);
        self
    }

    pub fn stats(&self) -> Arc<DeviceStats> {
        Arc::clone(&self.stats)
    }
}

/// Sizes listed in the order a typical phone sensor reports them
pub fn default_parameters() -> CameraParameters {
    CameraParameters {
        preview_sizes: vec![
            Size::new(640, 480),
            Size::new(1920, 1080),
            Size::new(1280, 720),
        ],
        picture_sizes: vec![
            Size::new(4032, 3024),
            Size::new(1920, 1080),
            Size::new(1280, 720),
        ],
        fps_ranges: vec![FpsRange::new(15000, 30000), FpsRange::new(30000, 30000)],
        focus_modes: vec![FocusMode::Auto, FocusMode::ContinuousVideo, FocusMode::Fixed],
    }
}

impl CameraProvider for SyntheticProvider {
    fn cameras(&self) -> Vec<CameraInfo> {
        self.cameras.iter().map(|e| e.info.clone()).collect()
    }

    fn open(&self, id: u32) -> CameraResult<Box<dyn CaptureDevice>> {
        let entry = self
            .cameras
            .iter()
            .find(|e| e.info.id == id)
            .ok_or(CameraError::DeviceNotFound(id))?;
        if self.failure == Some(InjectedFailure::Open) {
            return Err(CameraError::OpenFailed(format!(
                "{} is busy",
                entry.info.name
            )));
        }
        self.stats.opened.fetch_add(1, Ordering::AcqRel);
        debug!(id, name = %entry.info.name, "Synthetic camera opened");
        Ok(Box::new(SyntheticCamera {
            info: entry.info.clone(),
            params: entry.params.clone(),
            failure: self.failure,
            stats: Arc::clone(&self.stats),
            settings: None,
            frame_loop: None,
            released: false,
        }))
    }
}

/// An opened synthetic device
pub struct SyntheticCamera {
    info: CameraInfo,
    params: CameraParameters,
    failure: Option<InjectedFailure>,
    stats: Arc<DeviceStats>,
    settings: Option<CaptureSettings>,
    frame_loop: Option<FrameLoop>,
    released: bool,
}

impl SyntheticCamera {
    fn ensure_open(&self) -> CameraResult<()> {
        if self.released {
            Err(CameraError::Released)
        } else {
            Ok(())
        }
    }
}

impl CaptureDevice for SyntheticCamera {
    fn info(&self) -> &CameraInfo {
        &self.info
    }

    fn parameters(&self) -> CameraResult<CameraParameters> {
        self.ensure_open()?;
        Ok(self.params.clone())
    }

    fn configure(&mut self, settings: &CaptureSettings) -> CameraResult<()> {
        self.ensure_open()?;
        if self.failure == Some(InjectedFailure::Configure) {
            return Err(CameraError::ConfigureFailed("rejected parameters".into()));
        }
        if !self.params.preview_sizes.contains(&settings.preview_size) {
            return Err(CameraError::ConfigureFailed(format!(
                "unsupported preview size {}",
                settings.preview_size
            )));
        }
        self.settings = Some(settings.clone());
        Ok(())
    }

    fn start_stream(&mut self, output: FrameStream) -> CameraResult<()> {
        self.ensure_open()?;
        let settings = self
            .settings
            .clone()
            .ok_or_else(|| CameraError::StreamFailed("device not configured".into()))?;
        if self.failure == Some(InjectedFailure::Stream) {
            return Err(CameraError::StreamFailed("sensor timeout".into()));
        }
        self.stop_stream();

        let fps = settings
            .fps_range
            .map(|r| r.max_fps())
            .filter(|fps| *fps > 0.0)
            .unwrap_or(30.0);
        let period = Duration::from_secs_f64(1.0 / fps);
        let size = settings.preview_size;
        let name = format!("synthetic-camera-{}", self.info.id);

        let frame_loop = FrameLoop::start_paced(
            &name,
            period,
            move || Ok(PatternState::new(size)),
            move |state| {
                let frame = state.next_frame();
                if output.submit(frame) {
                    LoopAction::Continue
                } else if output.is_closed() {
                    LoopAction::Stop
                } else {
                    LoopAction::Continue
                }
            },
        )
        .map_err(|e| CameraError::StreamFailed(e.to_string()))?;

        info!(size = %size, fps, "Synthetic stream started");
        self.frame_loop = Some(frame_loop);
        self.stats.streaming.store(true, Ordering::Release);
        Ok(())
    }

    fn stop_stream(&mut self) {
        if let Some(mut frame_loop) = self.frame_loop.take() {
            frame_loop.stop();
            self.stats.streaming.store(false, Ordering::Release);
            debug!(id = self.info.id, "Synthetic stream stopped");
        }
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.stop_stream();
        self.released = true;
        self.stats.released.fetch_add(1, Ordering::AcqRel);
        debug!(id = self.info.id, "Synthetic camera released");
    }
}

impl Drop for SyntheticCamera {
    fn drop(&mut self) {
        self.release();
    }
}

const BARS: [[u8; 4]; 8] = [
    [255, 255, 255, 255],
    [255, 255, 0, 255],
    [0, 255, 255, 255],
    [0, 255, 0, 255],
    [255, 0, 255, 255],
    [255, 0, 0, 255],
    [0, 0, 255, 255],
    [0, 0, 0, 255],
];

/// Colour bars scrolling one column per frame
struct PatternState {
    size: Size,
    sequence: u64,
}

impl PatternState {
    fn new(size: Size) -> Self {
        Self { size, sequence: 0 }
    }

    fn next_frame(&mut self) -> CapturedFrame {
        let Size { width, height } = self.size;
        let bar_width = (width as usize / BARS.len()).max(1);
        let shift = self.sequence as usize;
        let mut row = Vec::with_capacity(width as usize * 4);
        for x in 0..width as usize {
            let bar = ((x + shift) / bar_width) % BARS.len();
            row.extend_from_slice(&BARS[bar]);
        }
        let mut data = Vec::with_capacity(row.len() * height as usize);
        for _ in 0..height {
            data.extend_from_slice(&row);
        }
        let frame = CapturedFrame::new(width, height, Arc::from(data), self.sequence);
        self.sequence += 1;
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_frame_is_well_formed() {
        let mut state = PatternState::new(Size::new(16, 4));
        let first = state.next_frame();
        let second = state.next_frame();
        assert!(first.is_well_formed());
        assert_eq!(second.sequence, 1);
        assert_eq!(&first.data[0..4], &BARS[0]);
    }

    #[test]
    fn test_release_is_idempotent_and_counted() {
        let provider = SyntheticProvider::new();
        let stats = provider.stats();
        let mut device = provider.open(0).unwrap();
        assert_eq!(stats.open_devices(), 1);
        device.release();
        device.release();
        assert_eq!(stats.open_devices(), 0);
        assert!(matches!(device.parameters(), Err(CameraError::Released)));
    }

    #[test]
    fn test_unknown_camera() {
        let provider = SyntheticProvider::new();
        assert!(matches!(
            provider.open(7),
            Err(CameraError::DeviceNotFound(7))
        ));
    }
}
