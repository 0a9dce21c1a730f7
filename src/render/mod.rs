// SPDX-License-Identifier: GPL-3.0-only

//! Real-time rendering pipeline
//!
//! ```text
//! ┌────────────────┐  submit   ┌─────────────┐  consume_if_dirty  ┌──────────────────┐
//! │ Capture thread │ ────────▶ │ FrameStream │ ─────────────────▶ │ ExternalTexture  │
//! └────────────────┘           └──────┬──────┘                    └────────┬─────────┘
//!                                     │ request render                      │ sample
//!                                     ▼                                     ▼
//!                              ┌──────────────┐  draw / overlay   ┌──────────────────┐
//!                              │SurfaceThread │ ────────────────▶ │ DrawableSurface  │
//!                              │(primary)     │                   └────────┬─────────┘
//!                              └──────┬───────┘                            │ readback
//!                                     │ EncoderHandoff                     ▼
//!                                     ▼                             PersistenceSink
//!                              ┌──────────────┐
//!                              │RenderHandler │  (peer context, off-screen target)
//!                              └──────────────┘
//! ```

pub mod encoder;
pub mod external_texture;
pub mod offscreen;
pub mod overlay;
pub mod primary;
pub mod quad_drawer;
pub mod snapshot;
pub mod surface_thread;
pub mod viewport;

pub use encoder::{DutyCycle, EncoderHandoff, EncoderSlot, VideoEncoder};
pub use external_texture::{ExternalTexture, FrameStream};
pub use offscreen::RenderHandler;
pub use overlay::{GlyphRasterizer, OverlayCompositor, OverlayGlyphSet, OverlayLayout};
pub use primary::PreviewRenderer;
pub use quad_drawer::QuadDrawer;
pub use snapshot::{PersistenceSink, SnapshotRequest};
pub use surface_thread::{RenderEvent, SurfaceThread};
pub use viewport::{ScaleMode, ViewportLayout, compute_layout};
