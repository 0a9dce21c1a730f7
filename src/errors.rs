// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the compositor
//!
//! Errors are grouped by the component that raises them. Capture failures are
//! normally logged on the capture thread and never reach the render loop; GPU
//! failures surface to whoever owns the context.

use std::fmt;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for GPU operations
pub type GpuResult<T> = Result<T, GpuError>;

/// Result type alias for capture device operations
pub type CameraResult<T> = Result<T, CameraError>;

/// Main application error type
#[derive(Debug, Clone)]
pub enum AppError {
    /// GPU / rendering errors
    Gpu(GpuError),
    /// Capture device errors
    Camera(CameraError),
    /// Snapshot errors
    Photo(PhotoError),
    /// Configuration errors
    Config(String),
    /// Storage/filesystem errors
    Storage(String),
    /// A worker thread failed to start or to acknowledge a request
    Worker(String),
    /// Generic error with message
    Other(String),
}

/// GPU-specific errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GpuError {
    /// A required driver feature or extension is missing
    UnsupportedFeature(String),
    /// A surface was used from a thread that does not own it
    WrongThread,
    /// A draw was issued while the owning context is not current
    NotCurrent,
    /// The context is current on another thread
    ContextBusy,
    /// The context has already been destroyed
    ContextDestroyed,
    /// Unknown or already deleted texture id
    InvalidTexture(u32),
    /// Unknown or already deleted program id
    InvalidProgram(u32),
    /// Unknown or already destroyed surface id
    InvalidSurface(u32),
    /// Character without a glyph texture
    InvalidGlyph(char),
    /// Reading pixels back from the framebuffer failed
    Readback(String),
    /// Backend/driver failure
    Backend(String),
}

/// Capture device errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    /// No device with the requested id
    DeviceNotFound(u32),
    /// Opening the device failed
    OpenFailed(String),
    /// The device rejected a configuration
    ConfigureFailed(String),
    /// Starting or stopping the stream failed
    StreamFailed(String),
    /// The device handle was already released
    Released,
}

/// Snapshot errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhotoError {
    /// Pixel buffer does not match the declared dimensions
    InvalidBuffer(String),
    /// Encoding failed
    EncodingFailed(String),
    /// Save failed
    SaveFailed(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Gpu(e) => write!(f, "GPU error: {}", e),
            AppError::Camera(e) => write!(f, "Camera error: {}", e),
            AppError::Photo(e) => write!(f, "Photo error: {}", e),
            AppError::Config(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Storage(msg) => write!(f, "Storage error: {}", msg),
            AppError::Worker(msg) => write!(f, "Worker error: {}", msg),
            AppError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl fmt::Display for GpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuError::UnsupportedFeature(name) => write!(f, "Unsupported GPU feature: {}", name),
            GpuError::WrongThread => write!(f, "Surface used from a thread that does not own it"),
            GpuError::NotCurrent => write!(f, "No current context on this thread"),
            GpuError::ContextBusy => write!(f, "Context is current on another thread"),
            GpuError::ContextDestroyed => write!(f, "Context already destroyed"),
            GpuError::InvalidTexture(id) => write!(f, "Invalid texture id {}", id),
            GpuError::InvalidProgram(id) => write!(f, "Invalid program id {}", id),
            GpuError::InvalidSurface(id) => write!(f, "Invalid surface id {}", id),
            GpuError::InvalidGlyph(ch) => write!(f, "No glyph for character {:?}", ch),
            GpuError::Readback(msg) => write!(f, "Pixel readback failed: {}", msg),
            GpuError::Backend(msg) => write!(f, "Backend error: {}", msg),
        }
    }
}

impl fmt::Display for CameraError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraError::DeviceNotFound(id) => write!(f, "Camera {} not found", id),
            CameraError::OpenFailed(msg) => write!(f, "Open failed: {}", msg),
            CameraError::ConfigureFailed(msg) => write!(f, "Configuration rejected: {}", msg),
            CameraError::StreamFailed(msg) => write!(f, "Stream error: {}", msg),
            CameraError::Released => write!(f, "Camera already released"),
        }
    }
}

impl fmt::Display for PhotoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhotoError::InvalidBuffer(msg) => write!(f, "Invalid pixel buffer: {}", msg),
            PhotoError::EncodingFailed(msg) => write!(f, "Encoding failed: {}", msg),
            PhotoError::SaveFailed(msg) => write!(f, "Save failed: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}
impl std::error::Error for GpuError {}
impl std::error::Error for CameraError {}
impl std::error::Error for PhotoError {}

impl From<GpuError> for AppError {
    fn from(err: GpuError) -> Self {
        AppError::Gpu(err)
    }
}

impl From<CameraError> for AppError {
    fn from(err: CameraError) -> Self {
        AppError::Camera(err)
    }
}

impl From<PhotoError> for AppError {
    fn from(err: PhotoError) -> Self {
        AppError::Photo(err)
    }
}

impl From<String> for AppError {
    fn from(msg: String) -> Self {
        AppError::Other(msg)
    }
}

impl From<&str> for AppError {
    fn from(msg: &str) -> Self {
        AppError::Other(msg.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<std::io::Error> for PhotoError {
    fn from(err: std::io::Error) -> Self {
        PhotoError::SaveFailed(err.to_string())
    }
}

impl From<image::ImageError> for PhotoError {
    fn from(err: image::ImageError) -> Self {
        PhotoError::EncodingFailed(err.to_string())
    }
}
