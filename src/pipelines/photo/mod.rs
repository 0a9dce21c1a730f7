// SPDX-License-Identifier: GPL-3.0-only

//! Snapshot persistence
//!
//! ```text
//! render thread ──persist(frame, path)──▶ queue ──▶ photo-writer thread
//!                                                    encode → write → report
//! ```
//!
//! The render thread only enqueues; encoding and disk I/O run on the writer
//! thread so a snapshot never stalls the preview.

pub mod encoding;

pub use encoding::{EncodedImage, EncodingFormat, EncodingQuality, PhotoEncoder};

use crate::errors::{AppError, AppResult};
use crate::gpu::RgbaFrame;
use crate::render::PersistenceSink;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{error, warn};

/// Reports the outcome of every snapshot, on the writer thread
pub type SaveCallback = Arc<dyn Fn(AppResult<PathBuf>) + Send + Sync>;

struct Job {
    frame: RgbaFrame,
    path: PathBuf,
}

/// [`PersistenceSink`] that encodes and writes snapshots on its own thread
pub struct PhotoWriter {
    tx: Mutex<Option<Sender<Job>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PhotoWriter {
    pub fn spawn(encoder: PhotoEncoder, on_saved: Option<SaveCallback>) -> AppResult<Self> {
        let (tx, rx) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("photo-writer".into())
            .spawn(move || write_loop(encoder, rx, on_saved))
            .map_err(|e| AppError::Worker(format!("failed to spawn photo writer: {}", e)))?;
        Ok(Self {
            tx: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Write every queued snapshot, then stop the thread. Idempotent.
    pub fn finish(&self) {
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).take();
        let handle = self.handle.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            error!("Photo writer thread panicked");
        }
    }
}

impl PersistenceSink for PhotoWriter {
    fn persist(&self, frame: RgbaFrame, path: PathBuf) {
        let tx = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        match tx.as_ref() {
            Some(tx) => {
                if tx.send(Job { frame, path }).is_err() {
                    warn!("Photo writer gone, snapshot dropped");
                }
            }
            None => warn!(path = %path.display(), "Photo writer finished, snapshot dropped"),
        }
    }
}

impl Drop for PhotoWriter {
    fn drop(&mut self) {
        self.finish();
    }
}

fn write_loop(encoder: PhotoEncoder, rx: Receiver<Job>, on_saved: Option<SaveCallback>) {
    while let Ok(Job { frame, path }) = rx.recv() {
        let (path, format) = encoder.resolve(&path);
        let result = encoder
            .encode(frame, format)
            .and_then(|encoded| encoder.save(&encoded, &path))
            .map(|()| path.clone())
            .map_err(AppError::from);
        if let Err(e) = &result {
            warn!(path = %path.display(), error = %e, "Snapshot not saved");
        }
        if let Some(callback) = &on_saved {
            callback(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persist_after_finish_is_dropped() {
        let saved = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&saved);
        let writer = PhotoWriter::spawn(
            PhotoEncoder::default(),
            Some(Arc::new(move |r: AppResult<PathBuf>| s.lock().unwrap().push(r.is_ok()))),
        )
        .unwrap();
        writer.finish();
        writer.finish();
        writer.persist(
            RgbaFrame {
                width: 1,
                height: 1,
                data: vec![0; 4],
            },
            PathBuf::from("never.png"),
        );
        assert!(saved.lock().unwrap().is_empty());
    }

    #[test]
    fn test_writes_png_to_disk() {
        let dir = std::env::temp_dir().join(format!("photo-writer-{}", std::process::id()));
        let path = dir.join("shot.png");
        let saved = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&saved);
        let writer = PhotoWriter::spawn(
            PhotoEncoder::default(),
            Some(Arc::new(move |r: AppResult<PathBuf>| {
                s.lock().unwrap().push(r.ok())
            })),
        )
        .unwrap();
        writer.persist(
            RgbaFrame {
                width: 2,
                height: 1,
                data: vec![10, 20, 30, 255, 40, 50, 60, 255],
            },
            path.clone(),
        );
        writer.finish();

        assert_eq!(saved.lock().unwrap().as_slice(), &[Some(path.clone())]);
        let decoded = image::open(&path).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (2, 1));
        assert_eq!(decoded.get_pixel(1, 0).0, [40, 50, 60, 255]);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
