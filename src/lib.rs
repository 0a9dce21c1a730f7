// SPDX-License-Identifier: GPL-3.0-only

//! Camera Compositor - real-time camera preview compositing
//!
//! Frames from a capture device are streamed into an external GPU texture,
//! drawn onto a surface with an aspect-ratio policy, decorated with a live
//! timestamp and a watermark, and optionally handed to a second render
//! context for recording. Snapshots read the composed frame back and encode
//! it off the render thread.
//!
//! # Architecture
//!
//! - [`gpu`]: context manager, backend trait and the software/wgpu backends
//! - [`render`]: texture streaming, quad drawing, overlay, render threads
//! - [`backends`]: capture device abstraction and the capture thread
//! - [`pipelines`]: snapshot encoding and video recording collaborators
//! - [`app`]: the camera view tying surface, renderer and camera together
//! - [`config`]: user configuration handling
//! - [`storage`]: output file naming

pub mod app;
pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod gpu;
pub mod pipelines;
pub mod render;
pub mod storage;

// Re-export commonly used types
pub use app::{CameraView, CameraViewConfig, Services};
pub use config::Config;
pub use errors::{AppError, AppResult};
pub use render::ScaleMode;
