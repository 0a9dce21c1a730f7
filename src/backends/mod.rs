// SPDX-License-Identifier: GPL-3.0-only

//! Hardware backends
//!
//! - [`camera`]: capture device traits, settings negotiation, the capture
//!   thread and the synthetic test-pattern camera

pub mod camera;
