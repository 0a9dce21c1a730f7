// SPDX-License-Identifier: GPL-3.0-only

//! Capture thread
//!
//! Owns the capture device for its whole life. Start and stop requests are
//! posted to its queue and run one after another; a stop releases the device
//! and ends the thread.
//!
//! States: `Idle → Starting → Previewing → Stopping → Idle`, then `Destroyed`
//! once the loop has exited.

use super::selection;
use super::types::CaptureSession;
use super::{CameraProvider, CaptureDevice};
use crate::constants::timeouts;
use crate::errors::{AppError, AppResult, CameraError, CameraResult};
use crate::render::FrameStream;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Lifecycle state of a [`CaptureThread`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Starting,
    Previewing,
    Stopping,
    Destroyed,
}

/// Called on the capture thread once a session is running, so the owner of
/// the display surface can recompute its layout
pub type PreviewSizeCallback = Arc<dyn Fn(&CaptureSession) + Send + Sync>;

enum Command {
    Start {
        width: u32,
        height: u32,
        output: FrameStream,
    },
    Stop,
}

struct Status {
    state: CaptureState,
    session: Option<CaptureSession>,
}

struct Shared {
    status: Mutex<Status>,
    changed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: CaptureState) {
        let mut status = self.lock();
        debug!(from = ?status.state, to = ?state, "Capture state");
        status.state = state;
        if matches!(state, CaptureState::Idle | CaptureState::Destroyed) {
            status.session = None;
        }
        self.changed.notify_all();
    }
}

/// Handle to the capture thread
pub struct CaptureThread {
    tx: Sender<Command>,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
    stop_sent: bool,
}

impl CaptureThread {
    /// Spawn the thread for camera `camera_id`. The device is opened by the
    /// first start request.
    pub fn spawn(
        provider: Arc<dyn CameraProvider>,
        camera_id: u32,
        device_rotation: u32,
        on_started: PreviewSizeCallback,
    ) -> AppResult<Self> {
        let (tx, rx) = mpsc::channel();
        let shared = Arc::new(Shared {
            status: Mutex::new(Status {
                state: CaptureState::Idle,
                session: None,
            }),
            changed: Condvar::new(),
        });
        let worker = Worker {
            provider,
            camera_id,
            device_rotation,
            on_started,
            shared: Arc::clone(&shared),
            device: None,
        };
        let handle = thread::Builder::new()
            .name("camera-capture".into())
            .spawn(move || worker.run(rx))
            .map_err(|e| AppError::Worker(format!("failed to spawn capture thread: {}", e)))?;
        Ok(Self {
            tx,
            shared,
            handle: Some(handle),
            stop_sent: false,
        })
    }

    /// Post a start request. Failures are logged on the capture thread and
    /// leave the state at `Idle`.
    pub fn start_preview(&self, width: u32, height: u32, output: FrameStream) -> bool {
        if self.stop_sent {
            return false;
        }
        self.tx
            .send(Command::Start {
                width,
                height,
                output,
            })
            .is_ok()
    }

    /// Stop capture and release the device. With `wait`, block until the
    /// thread has exited. Idempotent.
    pub fn stop(&mut self, wait: bool) -> AppResult<()> {
        if !self.stop_sent {
            self.stop_sent = true;
            // A closed queue means the thread already exited
            let _ = self.tx.send(Command::Stop);
        }
        if !wait {
            return Ok(());
        }
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        let status = self.shared.lock();
        let (status, timeout) = self
            .shared
            .changed
            .wait_timeout_while(status, timeouts::CAPTURE_STOP, |s| {
                s.state != CaptureState::Destroyed
            })
            .unwrap_or_else(|e| e.into_inner());
        drop(status);
        if timeout.timed_out() {
            error!("Capture thread did not stop in time");
            return Err(AppError::Worker("capture stop timed out".into()));
        }
        if handle.join().is_err() {
            warn!("Capture thread panicked");
        }
        info!("Capture thread stopped");
        Ok(())
    }

    pub fn state(&self) -> CaptureState {
        self.shared.lock().state
    }

    /// The running session, if previewing
    pub fn session(&self) -> Option<CaptureSession> {
        self.shared.lock().session.clone()
    }

    /// Whether the thread still accepts requests
    pub fn is_running(&self) -> bool {
        !self.stop_sent && self.state() != CaptureState::Destroyed
    }

    /// Block until the state satisfies `predicate` or the timeout passes.
    /// Returns the state observed last.
    pub fn wait_for(
        &self,
        timeout: std::time::Duration,
        predicate: impl Fn(CaptureState) -> bool,
    ) -> CaptureState {
        let status = self.shared.lock();
        let (status, _) = self
            .shared
            .changed
            .wait_timeout_while(status, timeout, |s| !predicate(s.state))
            .unwrap_or_else(|e| e.into_inner());
        status.state
    }
}

impl Drop for CaptureThread {
    fn drop(&mut self) {
        if let Err(e) = self.stop(true) {
            warn!(error = %e, "Capture thread teardown failed");
        }
    }
}

struct Worker {
    provider: Arc<dyn CameraProvider>,
    camera_id: u32,
    device_rotation: u32,
    on_started: PreviewSizeCallback,
    shared: Arc<Shared>,
    device: Option<Box<dyn CaptureDevice>>,
}

impl Worker {
    fn run(mut self, rx: Receiver<Command>) {
        debug!(camera = self.camera_id, "Capture thread started");
        while let Ok(command) = rx.recv() {
            match command {
                Command::Start {
                    width,
                    height,
                    output,
                } => self.handle_start(width, height, output),
                Command::Stop => {
                    self.shared.set_state(CaptureState::Stopping);
                    self.release_device();
                    self.shared.set_state(CaptureState::Idle);
                    break;
                }
            }
        }
        self.release_device();
        self.shared.set_state(CaptureState::Destroyed);
        debug!(camera = self.camera_id, "Capture thread exiting");
    }

    fn handle_start(&mut self, width: u32, height: u32, output: FrameStream) {
        self.shared.set_state(CaptureState::Starting);
        match self.start(width, height, output) {
            Ok(session) => {
                info!(
                    camera = %session.camera.name,
                    size = %session.preview_size(),
                    rotation = session.rotation_degrees(),
                    "Preview started"
                );
                (self.on_started)(&session);
                let mut status = self.shared.lock();
                status.state = CaptureState::Previewing;
                status.session = Some(session);
                self.shared.changed.notify_all();
            }
            Err(e) => {
                warn!(camera = self.camera_id, error = %e, "Preview failed to start");
                self.release_device();
                self.shared.set_state(CaptureState::Idle);
            }
        }
    }

    fn start(
        &mut self,
        width: u32,
        height: u32,
        output: FrameStream,
    ) -> CameraResult<CaptureSession> {
        if self.device.is_none() {
            self.device = Some(self.provider.open(self.camera_id)?);
        }
        let Some(device) = self.device.as_mut() else {
            return Err(CameraError::Released);
        };
        device.stop_stream();

        let params = device.parameters()?;
        let info = device.info().clone();
        let settings =
            selection::negotiate(&info, &params, width, height, self.device_rotation)
                .ok_or_else(|| {
                    CameraError::ConfigureFailed("device reports no preview sizes".into())
                })?;
        device.configure(&settings)?;
        device.start_stream(output)?;
        Ok(CaptureSession {
            camera: info,
            settings,
        })
    }

    fn release_device(&mut self) {
        if let Some(mut device) = self.device.take() {
            device.stop_stream();
            device.release();
            debug!(camera = self.camera_id, "Capture device released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::synthetic::{InjectedFailure, SyntheticProvider};
    use crate::backends::camera::Size;
    use std::time::Duration;

    fn stream() -> FrameStream {
        FrameStream::new()
    }

    #[test]
    fn test_start_then_stop_and_wait() {
        let provider = SyntheticProvider::new();
        let stats = provider.stats();
        let sizes = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&sizes);
        let mut capture = CaptureThread::spawn(
            Arc::new(provider),
            0,
            0,
            Arc::new(move |session: &CaptureSession| {
                s.lock().unwrap().push(session.preview_size());
            }),
        )
        .unwrap();

        assert!(capture.start_preview(1280, 720, stream()));
        let state = capture.wait_for(Duration::from_secs(5), |s| {
            s == CaptureState::Previewing
        });
        assert_eq!(state, CaptureState::Previewing);
        assert_eq!(sizes.lock().unwrap().as_slice(), &[Size::new(1280, 720)]);
        assert_eq!(capture.session().unwrap().rotation_degrees(), 0);

        capture.stop(true).unwrap();
        capture.stop(true).unwrap();
        assert_eq!(capture.state(), CaptureState::Destroyed);
        assert_eq!(stats.open_devices(), 0);
        assert!(!capture.start_preview(640, 480, stream()));
    }

    #[test]
    fn test_open_failure_stays_idle() {
        let provider = SyntheticProvider::new().with_failure(InjectedFailure::Open);
        let mut capture =
            CaptureThread::spawn(Arc::new(provider), 0, 0, Arc::new(|_: &CaptureSession| {}))
                .unwrap();
        capture.start_preview(1280, 720, stream());
        // Stop is queued behind the failed start
        capture.stop(true).unwrap();
        assert_eq!(capture.state(), CaptureState::Destroyed);
    }

    #[test]
    fn test_stream_failure_releases_device() {
        let provider = SyntheticProvider::new().with_failure(InjectedFailure::Stream);
        let stats = provider.stats();
        let capture =
            CaptureThread::spawn(Arc::new(provider), 0, 0, Arc::new(|_: &CaptureSession| {}))
                .unwrap();
        capture.start_preview(1280, 720, stream());
        let state = capture.wait_for(Duration::from_secs(5), |_| {
            stats.opened.load(std::sync::atomic::Ordering::Acquire) == 1
                && stats.open_devices() == 0
        });
        assert_eq!(state, CaptureState::Idle);
        assert!(capture.session().is_none());
    }
}
