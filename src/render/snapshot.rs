// SPDX-License-Identifier: GPL-3.0-only

//! Snapshot request flag and framebuffer readback

use crate::errors::GpuResult;
use crate::gpu::{DrawableSurface, RgbaFrame, Viewport};
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Receives snapshot pixels and owns encoding and I/O
pub trait PersistenceSink: Send + Sync {
    /// `frame` is RGBA, top row first
    fn persist(&self, frame: RgbaFrame, path: PathBuf);
}

/// One-shot "take a picture" flag, settable from any thread
///
/// A request made while another is pending replaces its path.
#[derive(Debug, Default)]
pub struct SnapshotRequest {
    pending: AtomicBool,
    path: Mutex<Option<PathBuf>>,
}

impl SnapshotRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self, path: PathBuf) {
        *self.path.lock().unwrap_or_else(|e| e.into_inner()) = Some(path);
        self.pending.store(true, Ordering::Release);
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Clear the flag, returning the requested path if one was pending
    pub fn take(&self) -> Option<PathBuf> {
        if !self.pending.swap(false, Ordering::AcqRel) {
            return None;
        }
        self.path.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

/// Read the whole surface back as RGBA with the top row first
pub fn capture(surface: &DrawableSurface) -> GpuResult<RgbaFrame> {
    let readback = surface.read_pixels(Viewport::full(surface.width(), surface.height()))?;
    Ok(readback.into_rgba_top_left())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{PixelOrder, Readback, RowOrigin};

    #[test]
    fn test_request_is_one_shot() {
        let request = SnapshotRequest::new();
        assert!(request.take().is_none());
        request.request(PathBuf::from("/tmp/a.png"));
        assert!(request.is_pending());
        assert_eq!(request.take(), Some(PathBuf::from("/tmp/a.png")));
        assert!(request.take().is_none());
    }

    #[test]
    fn test_readback_flip_and_reorder() {
        // 1x2 BGRA, bottom row first: bottom is blue, top is red
        let readback = Readback {
            width: 1,
            height: 2,
            order: PixelOrder::Bgra,
            origin: RowOrigin::BottomLeft,
            data: vec![255, 0, 0, 255, 0, 0, 255, 255],
        };
        let frame = readback.into_rgba_top_left();
        assert_eq!(frame.data, vec![255, 0, 0, 255, 0, 0, 255, 255]);
    }

    #[test]
    fn test_top_left_rgba_is_untouched() {
        let data = vec![1, 2, 3, 4, 5, 6, 7, 8];
        let readback = Readback {
            width: 2,
            height: 1,
            order: PixelOrder::Rgba,
            origin: RowOrigin::TopLeft,
            data: data.clone(),
        };
        assert_eq!(readback.into_rgba_top_left().data, data);
    }
}
