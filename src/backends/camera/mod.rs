// SPDX-License-Identifier: GPL-3.0-only

//! Camera capture backend
//!
//! Hardware access sits behind two traits so the capture thread can run
//! against a real driver or the synthetic test-pattern device alike.
//!
//! ```text
//! ┌─────────────────────┐
//! │     CameraView      │
//! └──────────┬──────────┘
//!            │ start / stop (posted)
//!            ▼
//! ┌─────────────────────┐
//! │    CaptureThread    │  ← owns the device, negotiates settings
//! └──────────┬──────────┘
//!            │ open / configure / stream
//!            ▼
//! ┌─────────────────────┐
//! │   CameraProvider    │
//! │   CaptureDevice     │  ← synthetic, or a platform driver
//! └──────────┬──────────┘
//!            │ CapturedFrame
//!            ▼
//!       FrameStream
//! ```

pub mod capture_thread;
pub mod frame_loop;
pub mod selection;
pub mod synthetic;
pub mod types;

pub use capture_thread::{CaptureState, CaptureThread, PreviewSizeCallback};
pub use synthetic::{SyntheticCamera, SyntheticProvider};
pub use types::*;

use crate::errors::CameraResult;
use crate::render::FrameStream;

/// Source of capture devices
pub trait CameraProvider: Send + Sync {
    /// Devices this provider can open
    fn cameras(&self) -> Vec<CameraInfo>;

    /// Open a device for exclusive use
    fn open(&self, id: u32) -> CameraResult<Box<dyn CaptureDevice>>;
}

/// An opened capture device
///
/// Used only from the capture thread.
pub trait CaptureDevice: Send {
    fn info(&self) -> &CameraInfo;

    /// Sizes, frame rates and focus modes the device supports
    fn parameters(&self) -> CameraResult<CameraParameters>;

    /// Apply negotiated settings; must precede [`CaptureDevice::start_stream`]
    fn configure(&mut self, settings: &CaptureSettings) -> CameraResult<()>;

    /// Start pushing frames into `output`
    fn start_stream(&mut self, output: FrameStream) -> CameraResult<()>;

    /// Stop pushing frames. Idempotent.
    fn stop_stream(&mut self);

    /// Give the device back. Idempotent; the device is unusable afterwards.
    fn release(&mut self);
}
