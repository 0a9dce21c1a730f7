// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants

use std::time::Duration;

/// Camera opened when none is configured
pub const DEFAULT_CAMERA_ID: u32 = 0;

/// Preview size requested from the device by default
pub const DEFAULT_PREVIEW_WIDTH: u32 = 1280;
pub const DEFAULT_PREVIEW_HEIGHT: u32 = 720;

/// Clear colour for every render target (opaque yellow, makes the quad bounds visible)
pub const CLEAR_COLOR: [f32; 4] = [1.0, 1.0, 0.0, 1.0];

/// Forward every Nth rendered frame to the encoder (2 = ~30fps from a 60fps preview)
pub const DEFAULT_ENCODER_DUTY_CYCLE: u32 = 2;

/// Overlay geometry
pub mod overlay {
    /// Number of glyph textures: digits 0-9, '-' and ':'
    pub const GLYPH_COUNT: usize = 12;
    /// Index of the '-' glyph
    pub const DASH_GLYPH: usize = 10;
    /// Index of the ':' glyph
    pub const COLON_GLYPH: usize = 11;
    /// Horizontal distance between timestamp characters, in pixels
    pub const GLYPH_STRIDE: i32 = 15;
    /// Viewport size used when stamping a single glyph
    pub const GLYPH_VIEWPORT_WIDTH: u32 = 220;
    pub const GLYPH_VIEWPORT_HEIGHT: u32 = 60;
    /// Default origin of the timestamp (bottom-left framebuffer coordinates)
    pub const TIMESTAMP_ORIGIN: (i32, i32) = (160, 300);
    /// Default watermark rectangle (x, y, width, height)
    pub const WATERMARK_RECT: (i32, i32, u32, u32) = (20, 20, 100, 50);
    /// Canvas each glyph is rasterized into
    pub const GLYPH_CANVAS_WIDTH: u32 = 320;
    pub const GLYPH_CANVAS_HEIGHT: u32 = 60;
    /// Text baseline inside the glyph canvas
    pub const GLYPH_BASELINE: u32 = 40;
    /// Default text size in pixels
    pub const GLYPH_TEXT_SIZE: f32 = 30.0;
    /// Timestamp layout, fixed width (19 characters)
    pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
}

/// Thread handshake timeouts
pub mod timeouts {
    use super::Duration;

    /// How long a caller waits for a worker to acknowledge setup or release
    pub const WORKER_ACK: Duration = Duration::from_secs(5);
    /// How long a synchronous capture stop may take before it is abandoned
    pub const CAPTURE_STOP: Duration = Duration::from_secs(5);
    /// How long a caller waits for the render thread teardown, which includes
    /// a synchronous capture stop
    pub const SURFACE_TEARDOWN: Duration = CAPTURE_STOP.saturating_add(WORKER_ACK);
}

#[cfg(test)]
mod tests {
    use super::timeouts;

    #[test]
    fn test_surface_teardown_outlasts_capture_stop() {
        assert!(timeouts::SURFACE_TEARDOWN > timeouts::CAPTURE_STOP);
        assert!(timeouts::SURFACE_TEARDOWN >= timeouts::WORKER_ACK);
    }
}

/// File name layout for snapshots and recordings
pub const CAPTURE_FILE_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";
