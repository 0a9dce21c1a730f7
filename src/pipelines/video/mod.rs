// SPDX-License-Identifier: GPL-3.0-only

//! Video recording pipeline
//!
//! Attaches to the preview as its encoder and re-renders every forwarded
//! frame off-screen, overlay included, into a raw frame file.

pub mod recorder;

pub use recorder::{RawVideoWriter, VideoRecorder};
