// SPDX-License-Identifier: GPL-3.0-only

//! Scale-mode policy properties over a grid of view and video sizes

use camera_compositor::gpu::Viewport;
use camera_compositor::gpu::matrix::IDENTITY;
use camera_compositor::render::{ScaleMode, compute_layout};
use std::num::NonZeroU32;

const VIEWS: [(u32, u32); 5] = [(800, 600), (1080, 1920), (1920, 1080), (500, 500), (333, 777)];
const VIDEOS: [(u32, u32); 4] = [(1280, 720), (720, 1280), (640, 480), (1000, 1000)];

fn cases() -> impl Iterator<Item = ((u32, u32), (NonZeroU32, NonZeroU32))> {
    VIEWS.into_iter().flat_map(|view| {
        VIDEOS.into_iter().map(move |(w, h)| {
            (
                view,
                (NonZeroU32::new(w).unwrap(), NonZeroU32::new(h).unwrap()),
            )
        })
    })
}

#[test]
fn test_stretch_fills_view() {
    for ((vw, vh), (w, h)) in cases() {
        let layout = compute_layout(vw, vh, w, h, ScaleMode::Stretch);
        assert_eq!(layout.viewport, Viewport::full(vw, vh));
        assert_eq!(layout.mvp, IDENTITY);
    }
}

#[test]
fn test_keep_aspect_viewport_is_centered_and_proportional() {
    for ((vw, vh), (w, h)) in cases() {
        let layout = compute_layout(vw, vh, w, h, ScaleMode::KeepAspectViewport);
        let vp = layout.viewport;
        assert_eq!(layout.mvp, IDENTITY);
        assert!(vp.width <= vw && vp.height <= vh, "{:?} exceeds {}x{}", vp, vw, vh);
        assert!(
            vp.width == vw || vp.height == vh,
            "{:?} should touch two edges of {}x{}",
            vp,
            vw,
            vh
        );
        // Centered to within integer rounding
        let left = vp.x;
        let right = vw as i32 - (vp.x + vp.width as i32);
        let bottom = vp.y;
        let top = vh as i32 - (vp.y + vp.height as i32);
        assert!((left - right).abs() <= 1, "{:?} not centered horizontally", vp);
        assert!((bottom - top).abs() <= 1, "{:?} not centered vertically", vp);

        let video_aspect = w.get() as f64 / h.get() as f64;
        let vp_aspect = vp.width as f64 / vp.height as f64;
        let tolerance = 1.0 / vp.width.min(vp.height) as f64 * video_aspect.max(1.0) * 2.0;
        assert!(
            (vp_aspect - video_aspect).abs() <= tolerance,
            "aspect {} vs {} for view {}x{}",
            vp_aspect,
            video_aspect,
            vw,
            vh
        );
    }
}

#[test]
fn test_keep_aspect_scale_fits_inside() {
    for ((vw, vh), (w, h)) in cases() {
        let layout = compute_layout(vw, vh, w, h, ScaleMode::KeepAspectScale);
        let (sx, sy) = (layout.mvp[0], layout.mvp[5]);
        assert_eq!(layout.viewport, Viewport::full(vw, vh));
        assert!(sx <= 1.0 + 1e-5 && sy <= 1.0 + 1e-5, "quad leaves the view");
        assert!(
            (sx - 1.0).abs() < 1e-5 || (sy - 1.0).abs() < 1e-5,
            "quad should touch two edges"
        );
    }
}

#[test]
fn test_crop_center_covers_view() {
    for ((vw, vh), (w, h)) in cases() {
        let layout = compute_layout(vw, vh, w, h, ScaleMode::CropCenter);
        let (sx, sy) = (layout.mvp[0], layout.mvp[5]);
        assert_eq!(layout.viewport, Viewport::full(vw, vh));
        assert!(sx >= 1.0 - 1e-5 && sy >= 1.0 - 1e-5, "quad leaves a gap");
        assert!(
            (sx - 1.0).abs() < 1e-5 || (sy - 1.0).abs() < 1e-5,
            "quad should be cropped on one axis only"
        );
    }
}

#[test]
fn test_scaled_quad_keeps_video_aspect() {
    for mode in [ScaleMode::KeepAspectScale, ScaleMode::CropCenter] {
        for ((vw, vh), (w, h)) in cases() {
            let layout = compute_layout(vw, vh, w, h, mode);
            let drawn = layout.content_width / layout.content_height;
            let video = w.get() as f64 / h.get() as f64;
            assert!((drawn - video).abs() < 1e-6, "{} distorts the video", mode);
        }
    }
}
