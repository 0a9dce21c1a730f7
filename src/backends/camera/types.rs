// SPDX-License-Identifier: GPL-3.0-only

//! Shared types for capture devices

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Width x height in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Manhattan distance to a requested size
    pub fn distance_to(&self, width: u32, height: u32) -> u64 {
        self.width.abs_diff(width) as u64 + self.height.abs_diff(height) as u64
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Frame-rate range in frames per second scaled by 1000 (30fps = 30000)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FpsRange {
    pub min: u32,
    pub max: u32,
}

impl FpsRange {
    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    /// Upper bound as frames per second
    pub fn max_fps(&self) -> f64 {
        self.max as f64 / 1000.0
    }
}

impl std::fmt::Display for FpsRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:.1}-{:.1}fps",
            self.min as f64 / 1000.0,
            self.max as f64 / 1000.0
        )
    }
}

/// Focus modes a device may support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FocusMode {
    /// Continuously refocuses while streaming video
    ContinuousVideo,
    /// Single-shot autofocus
    Auto,
    Fixed,
}

impl std::fmt::Display for FocusMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FocusMode::ContinuousVideo => write!(f, "continuous-video"),
            FocusMode::Auto => write!(f, "auto"),
            FocusMode::Fixed => write!(f, "fixed"),
        }
    }
}

/// Which way the sensor faces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Facing {
    #[default]
    Back,
    Front,
}

/// Sensor rotation in degrees (clockwise)
///
/// Sensors are often mounted rotated 90° or 270° relative to the display's
/// natural orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SensorRotation {
    /// No rotation (sensor is oriented correctly)
    #[default]
    None,
    /// 90 degrees clockwise
    Rotate90,
    /// 180 degrees (upside down)
    Rotate180,
    /// 270 degrees clockwise (90 degrees counter-clockwise)
    Rotate270,
}

impl SensorRotation {
    /// Create rotation from an integer degree value (normalised to 0-360).
    pub fn from_degrees_int(degrees: i32) -> Self {
        match degrees.rem_euclid(360) {
            90 => SensorRotation::Rotate90,
            180 => SensorRotation::Rotate180,
            270 => SensorRotation::Rotate270,
            _ => SensorRotation::None,
        }
    }

    /// Get the rotation in degrees
    pub fn degrees(&self) -> u32 {
        match self {
            SensorRotation::None => 0,
            SensorRotation::Rotate90 => 90,
            SensorRotation::Rotate180 => 180,
            SensorRotation::Rotate270 => 270,
        }
    }
}

impl std::fmt::Display for SensorRotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}

/// Static description of a capture device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraInfo {
    pub id: u32,
    pub name: String,
    pub facing: Facing,
    /// Mounting angle of the sensor
    pub orientation: SensorRotation,
}

/// Capabilities reported by an opened device
#[derive(Debug, Clone, Default)]
pub struct CameraParameters {
    /// Preview sizes in the device's enumeration order
    pub preview_sizes: Vec<Size>,
    /// Still picture sizes in the device's enumeration order
    pub picture_sizes: Vec<Size>,
    pub fps_ranges: Vec<FpsRange>,
    pub focus_modes: Vec<FocusMode>,
}

/// Configuration negotiated for a capture session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSettings {
    pub preview_size: Size,
    pub picture_size: Option<Size>,
    pub fps_range: Option<FpsRange>,
    pub focus_mode: Option<FocusMode>,
    /// Device is told the stream feeds a recorder
    pub recording_hint: bool,
    /// Clockwise rotation the display must apply to frames
    pub display_rotation: u32,
}

/// The negotiated session as seen from outside the capture thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSession {
    pub camera: CameraInfo,
    pub settings: CaptureSettings,
}

impl CaptureSession {
    pub fn preview_size(&self) -> Size {
        self.settings.preview_size
    }

    pub fn rotation_degrees(&self) -> u32 {
        self.settings.display_rotation
    }

    pub fn is_front_facing(&self) -> bool {
        self.camera.facing == Facing::Front
    }
}

/// A single frame from the capture stream
///
/// RGBA pixels, tightly packed, first row is the top of the image.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub width: u32,
    pub height: u32,
    pub data: Arc<[u8]>,
    /// Monotonic frame counter within the session
    pub sequence: u64,
    pub captured_at: Instant,
}

impl CapturedFrame {
    pub fn new(width: u32, height: u32, data: Arc<[u8]>, sequence: u64) -> Self {
        Self {
            width,
            height,
            data,
            sequence,
            captured_at: Instant::now(),
        }
    }

    /// Whether the pixel buffer matches the declared size
    pub fn is_well_formed(&self) -> bool {
        self.data.len() == self.width as usize * self.height as usize * 4
    }
}
