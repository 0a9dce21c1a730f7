// SPDX-License-Identifier: GPL-3.0-only

//! Capture settings negotiation
//!
//! Pure functions from a device's capabilities and a request to the settings
//! actually applied.

use super::types::{
    CameraInfo, CameraParameters, CaptureSettings, Facing, FocusMode, FpsRange, Size,
};
use tracing::debug;

/// Supported size closest to the request by Manhattan distance.
///
/// Ties go to the size enumerated first.
pub fn closest_size(sizes: &[Size], width: u32, height: u32) -> Option<Size> {
    let mut best: Option<(Size, u64)> = None;
    for size in sizes {
        let distance = size.distance_to(width, height);
        if best.is_none_or(|(_, d)| distance < d) {
            best = Some((*size, distance));
        }
    }
    best.map(|(size, _)| size)
}

/// Range with the highest upper bound; ties go to the range enumerated first
pub fn best_fps_range(ranges: &[FpsRange]) -> Option<FpsRange> {
    let mut best: Option<FpsRange> = None;
    for range in ranges {
        if best.is_none_or(|b| range.max > b.max) {
            best = Some(*range);
        }
    }
    best
}

/// Continuous-video focus if available, else auto, else leave the device alone
pub fn choose_focus_mode(modes: &[FocusMode]) -> Option<FocusMode> {
    [FocusMode::ContinuousVideo, FocusMode::Auto]
        .into_iter()
        .find(|mode| modes.contains(mode))
}

/// Clockwise rotation the display applies to the sensor image.
///
/// `device_rotation` is how far the device is turned from its natural
/// orientation. Front cameras are mirrored, so their rotation is reflected.
pub fn display_rotation(info: &CameraInfo, device_rotation: u32) -> u32 {
    let orientation = info.orientation.degrees();
    let device_rotation = device_rotation % 360;
    match info.facing {
        Facing::Front => (360 - (orientation + device_rotation) % 360) % 360,
        Facing::Back => (orientation + 360 - device_rotation) % 360,
    }
}

/// Negotiate settings for a preview of roughly `width`×`height`.
///
/// Returns `None` when the device reports no preview sizes.
pub fn negotiate(
    info: &CameraInfo,
    params: &CameraParameters,
    width: u32,
    height: u32,
    device_rotation: u32,
) -> Option<CaptureSettings> {
    let preview_size = closest_size(&params.preview_sizes, width, height)?;
    let settings = CaptureSettings {
        preview_size,
        picture_size: closest_size(&params.picture_sizes, width, height),
        fps_range: best_fps_range(&params.fps_ranges),
        focus_mode: choose_focus_mode(&params.focus_modes),
        recording_hint: true,
        display_rotation: display_rotation(info, device_rotation),
    };
    debug!(
        requested = %Size::new(width, height),
        preview = %settings.preview_size,
        fps = ?settings.fps_range,
        focus = ?settings.focus_mode,
        rotation = settings.display_rotation,
        "Negotiated capture settings"
    );
    Some(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::SensorRotation;

    fn camera(facing: Facing, orientation: i32) -> CameraInfo {
        CameraInfo {
            id: 0,
            name: "test".into(),
            facing,
            orientation: SensorRotation::from_degrees_int(orientation),
        }
    }

    #[test]
    fn test_exact_size_wins() {
        let sizes = [
            Size::new(640, 480),
            Size::new(1920, 1080),
            Size::new(1280, 720),
        ];
        assert_eq!(closest_size(&sizes, 1280, 720), Some(Size::new(1280, 720)));
    }

    #[test]
    fn test_size_tie_goes_to_first() {
        // Both are 100 away from 1000x1000
        let sizes = [Size::new(1100, 1000), Size::new(1000, 900)];
        assert_eq!(closest_size(&sizes, 1000, 1000), Some(Size::new(1100, 1000)));
        assert_eq!(closest_size(&[], 1, 1), None);
    }

    #[test]
    fn test_fps_highest_upper_bound() {
        let ranges = [
            FpsRange::new(15000, 30000),
            FpsRange::new(7000, 60000),
            FpsRange::new(30000, 60000),
        ];
        assert_eq!(best_fps_range(&ranges), Some(FpsRange::new(7000, 60000)));
    }

    #[test]
    fn test_focus_preference() {
        assert_eq!(
            choose_focus_mode(&[FocusMode::Auto, FocusMode::ContinuousVideo]),
            Some(FocusMode::ContinuousVideo)
        );
        assert_eq!(
            choose_focus_mode(&[FocusMode::Fixed, FocusMode::Auto]),
            Some(FocusMode::Auto)
        );
        assert_eq!(choose_focus_mode(&[FocusMode::Fixed]), None);
    }

    #[test]
    fn test_rotation_front_and_back() {
        assert_eq!(display_rotation(&camera(Facing::Front, 90), 0), 270);
        assert_eq!(display_rotation(&camera(Facing::Front, 270), 90), 0);
        assert_eq!(display_rotation(&camera(Facing::Back, 90), 0), 90);
        assert_eq!(display_rotation(&camera(Facing::Back, 90), 180), 270);
        assert_eq!(display_rotation(&camera(Facing::Back, 0), 270), 90);
    }
}
