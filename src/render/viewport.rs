// SPDX-License-Identifier: GPL-3.0-only

//! Scale-mode policy
//!
//! Maps a view size and a video size to a viewport rectangle and an MVP scale.

use crate::gpu::Viewport;
use crate::gpu::matrix::{self, Mat4};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;

/// How video is fitted into the view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ScaleMode {
    /// Fill the view, ignoring aspect ratio
    #[default]
    Stretch,
    /// Shrink the viewport to the video's aspect ratio, centered
    KeepAspectViewport,
    /// Full viewport, quad scaled to fit inside (letterbox)
    KeepAspectScale,
    /// Full viewport, quad scaled to cover the view (edges cropped)
    CropCenter,
}

impl ScaleMode {
    pub const ALL: [ScaleMode; 4] = [
        ScaleMode::Stretch,
        ScaleMode::KeepAspectViewport,
        ScaleMode::KeepAspectScale,
        ScaleMode::CropCenter,
    ];
}

impl std::fmt::Display for ScaleMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScaleMode::Stretch => write!(f, "stretch"),
            ScaleMode::KeepAspectViewport => write!(f, "keep-aspect-viewport"),
            ScaleMode::KeepAspectScale => write!(f, "keep-aspect-scale"),
            ScaleMode::CropCenter => write!(f, "crop-center"),
        }
    }
}

impl std::str::FromStr for ScaleMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stretch" => Ok(ScaleMode::Stretch),
            "keep-aspect-viewport" => Ok(ScaleMode::KeepAspectViewport),
            "keep-aspect-scale" | "keep-aspect" => Ok(ScaleMode::KeepAspectScale),
            "crop-center" | "crop" => Ok(ScaleMode::CropCenter),
            other => Err(format!("unknown scale mode '{}'", other)),
        }
    }
}

/// Result of the scale-mode policy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportLayout {
    pub viewport: Viewport,
    pub mvp: Mat4,
    /// Size of the drawn video in view pixels, before clipping
    pub content_width: f64,
    pub content_height: f64,
}

impl ViewportLayout {
    /// Part of the view actually covered by video
    pub fn visible_rect(&self) -> Viewport {
        let vp = self.viewport;
        let w = (self.content_width.round() as u32).min(vp.width);
        let h = (self.content_height.round() as u32).min(vp.height);
        Viewport::new(
            vp.x + (vp.width - w) as i32 / 2,
            vp.y + (vp.height - h) as i32 / 2,
            w,
            h,
        )
    }
}

/// Compute viewport and MVP for `mode`.
///
/// Video dimensions are non-zero by type; a zero-sized view yields an empty
/// viewport and the identity MVP.
pub fn compute_layout(
    view_width: u32,
    view_height: u32,
    video_width: NonZeroU32,
    video_height: NonZeroU32,
    mode: ScaleMode,
) -> ViewportLayout {
    let full = Viewport::full(view_width, view_height);
    let identity = ViewportLayout {
        viewport: full,
        mvp: matrix::IDENTITY,
        content_width: view_width as f64,
        content_height: view_height as f64,
    };
    if view_width == 0 || view_height == 0 {
        return identity;
    }

    let (vw, vh) = (view_width as f64, view_height as f64);
    let (video_w, video_h) = (video_width.get() as f64, video_height.get() as f64);

    match mode {
        ScaleMode::Stretch => identity,
        ScaleMode::KeepAspectViewport => {
            let req = video_w / video_h;
            let view_aspect = vw / vh;
            let (x, y, width, height) = if view_aspect > req {
                // View is wider than the video: full height, narrower width
                let width = ((req * vh) as u32).min(view_width);
                ((view_width - width) / 2, 0, width, view_height)
            } else {
                let height = ((vw / req) as u32).min(view_height);
                (0, (view_height - height) / 2, view_width, height)
            };
            ViewportLayout {
                viewport: Viewport::new(x as i32, y as i32, width, height),
                mvp: matrix::IDENTITY,
                content_width: width as f64,
                content_height: height as f64,
            }
        }
        ScaleMode::KeepAspectScale | ScaleMode::CropCenter => {
            let scale_x = vw / video_w;
            let scale_y = vh / video_h;
            let scale = if mode == ScaleMode::CropCenter {
                scale_x.max(scale_y)
            } else {
                scale_x.min(scale_y)
            };
            let width = scale * video_w;
            let height = scale * video_h;
            ViewportLayout {
                viewport: full,
                mvp: matrix::scale((width / vw) as f32, (height / vh) as f32, 1.0),
                content_width: width,
                content_height: height,
            }
        }
    }
}
