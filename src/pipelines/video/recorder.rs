// SPDX-License-Identifier: GPL-3.0-only

//! Video recording through the off-screen render worker
//!
//! The recorder is a [`VideoEncoder`]: the preview thread hands it texture
//! ids, the recorder's [`RenderHandler`] redraws them with the overlay into a
//! recordable target, and every presented frame is appended to a raw RGBA
//! file. Compression and container formats are out of scope; the raw file is
//! meant to be fed to an external encoder.

use crate::errors::{AppError, AppResult};
use crate::gpu::{FrameSink, SharedContextHandle, SurfaceTarget, TextureId};
use crate::render::{EncoderHandoff, GlyphRasterizer, OverlayLayout, RenderHandler, VideoEncoder};
use image::RgbaImage;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Appends presented frames to a file, RGBA, top row first, no header
pub struct RawVideoWriter {
    path: PathBuf,
    out: Mutex<Option<BufWriter<File>>>,
    frames: AtomicU64,
    size: Mutex<Option<(u32, u32)>>,
}

impl RawVideoWriter {
    pub fn create(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            out: Mutex::new(Some(BufWriter::new(file))),
            frames: AtomicU64::new(0),
            size: Mutex::new(None),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames_written(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    /// Frame size of the stream, once the first frame arrived
    pub fn frame_size(&self) -> Option<(u32, u32)> {
        *self.size.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Flush and close the file. Later frames are dropped.
    pub fn close(&self) -> AppResult<()> {
        let out = self.out.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(mut out) = out {
            out.flush()?;
        }
        Ok(())
    }
}

impl FrameSink for RawVideoWriter {
    fn present(&self, width: u32, height: u32, rgba: &[u8]) {
        {
            let mut size = self.size.lock().unwrap_or_else(|e| e.into_inner());
            match *size {
                None => *size = Some((width, height)),
                Some(s) if s != (width, height) => {
                    warn!(width, height, "Frame size changed mid-stream, frame dropped");
                    return;
                }
                Some(_) => {}
            }
        }
        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        let Some(writer) = out.as_mut() else {
            return;
        };
        if let Err(e) = writer.write_all(rgba) {
            warn!(error = %e, path = %self.path.display(), "Raw frame write failed");
            return;
        }
        self.frames.fetch_add(1, Ordering::AcqRel);
    }
}

/// Records hand-offs from the preview into a raw video file
pub struct VideoRecorder {
    handler: Mutex<RenderHandler>,
    writer: Arc<RawVideoWriter>,
    width: u32,
    height: u32,
    forwarded: AtomicU64,
}

impl VideoRecorder {
    /// Start an idle recorder; it binds its target when attached to a preview
    pub fn new(
        output_path: &Path,
        width: u32,
        height: u32,
        rasterizer: Arc<GlyphRasterizer>,
        layout: OverlayLayout,
        watermark: Option<RgbaImage>,
    ) -> AppResult<Self> {
        info!(
            output = %output_path.display(),
            width,
            height,
            "Creating video recorder"
        );
        let writer = Arc::new(RawVideoWriter::create(output_path)?);
        let handler = RenderHandler::spawn("video-encoder", rasterizer, layout, watermark)?;
        Ok(Self {
            handler: Mutex::new(handler),
            writer,
            width,
            height,
            forwarded: AtomicU64::new(0),
        })
    }

    pub fn frames_forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Acquire)
    }

    pub fn frames_written(&self) -> u64 {
        self.writer.frames_written()
    }

    pub fn is_recording(&self) -> bool {
        self.handler
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_valid()
    }

    /// Render what is still queued, stop the worker and close the file
    pub fn stop(&self) -> AppResult<PathBuf> {
        info!("Stopping video recording");
        self.finish_rendering()?;
        self.writer.close()?;
        info!(
            path = %self.writer.path().display(),
            frames = self.writer.frames_written(),
            "Recording saved"
        );
        Ok(self.writer.path().to_path_buf())
    }

    /// Drain the backlog, then release the worker and its peer context.
    /// Idempotent.
    fn finish_rendering(&self) -> AppResult<()> {
        let mut handler = self.handler.lock().unwrap_or_else(|e| e.into_inner());
        if handler.is_valid()
            && let Err(e) = handler.wait_idle()
        {
            warn!(error = %e, "Recorder backlog not drained");
        }
        handler.release()
    }
}

impl VideoEncoder for VideoRecorder {
    fn on_attach(&self, shared: SharedContextHandle, texture: TextureId) -> AppResult<()> {
        let target = SurfaceTarget::offscreen("video-encoder", self.width, self.height)
            .with_sink(Arc::clone(&self.writer) as Arc<dyn FrameSink>)
            .recordable(true);
        self.handler
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .set_target(shared, texture, target)
            .map_err(|e| AppError::Worker(format!("recorder target: {}", e)))
    }

    fn frame_available(&self, handoff: &EncoderHandoff) {
        self.forwarded.fetch_add(1, Ordering::AcqRel);
        self.handler
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .request_draw(handoff.texture, &handoff.tex_matrix, &handoff.mvp);
    }

    /// Returns only once every forwarded frame is rendered and the worker no
    /// longer references the preview's texture. A detached recorder does not
    /// attach again.
    fn on_detach(&self) {
        if let Err(e) = self.finish_rendering() {
            warn!(error = %e, "Recorder release on detach failed");
        }
        debug!(
            forwarded = self.frames_forwarded(),
            written = self.frames_written(),
            "Video recorder detached from preview"
        );
    }
}

impl Drop for VideoRecorder {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(error = %e, "Recorder teardown failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_writer_appends_and_rejects_size_change() {
        let path = std::env::temp_dir().join(format!("raw-writer-{}.rgba", std::process::id()));
        let writer = RawVideoWriter::create(&path).unwrap();
        writer.present(2, 1, &[1u8; 8]);
        writer.present(2, 1, &[2u8; 8]);
        writer.present(1, 1, &[3u8; 4]);
        writer.close().unwrap();
        writer.present(2, 1, &[4u8; 8]);

        assert_eq!(writer.frames_written(), 2);
        assert_eq!(writer.frame_size(), Some((2, 1)));
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[8..], &[2u8; 8]);
        let _ = std::fs::remove_file(&path);
    }
}
