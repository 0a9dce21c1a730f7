// SPDX-License-Identifier: GPL-3.0-only

//! Collaborators fed by the render pipeline
//!
//! ```text
//!                    RgbaFrame + path   ┌─────────────────┐     ┌───────────────┐
//!                 ┌───────────────────▶ │  Photo writer   │ ──▶ │ PNG/JPEG file │
//! ┌──────────────┐│                     │  (own thread)   │     └───────────────┘
//! │ Preview tick │┤                     └─────────────────┘
//! └──────────────┘│  EncoderHandoff     ┌─────────────────┐     ┌───────────────┐
//!                 └───────────────────▶ │ Video recorder  │ ──▶ │  Raw frames   │
//!                                       │ (RenderHandler) │     └───────────────┘
//!                                       └─────────────────┘
//! ```
//!
//! - [`photo`]: snapshot encoding and disk I/O
//! - [`video`]: off-screen re-rendering of forwarded frames

pub mod photo;
pub mod video;
