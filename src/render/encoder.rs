// SPDX-License-Identifier: GPL-3.0-only

//! Encoder hand-off
//!
//! The primary renderer forwards the texture id and matrices of every Nth frame
//! to an attached [`VideoEncoder`]. No pixels are copied; the encoder samples
//! the shared texture from its own peer context.

use crate::errors::AppResult;
use crate::gpu::{Mat4, SharedContextHandle, TextureId};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Snapshot of what the encoder needs to draw one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncoderHandoff {
    pub texture: TextureId,
    pub tex_matrix: Mat4,
    pub mvp: Mat4,
}

/// External encoder collaborator
///
/// Must not retain the texture id beyond the next call.
pub trait VideoEncoder: Send + Sync {
    /// Called on the render thread when the encoder is attached, with a handle
    /// for creating a peer context and the texture it will sample
    fn on_attach(&self, shared: SharedContextHandle, texture: TextureId) -> AppResult<()>;

    /// A new frame is available
    fn frame_available(&self, handoff: &EncoderHandoff);

    /// Called on the render thread when the encoder is detached or the surface
    /// goes away. The shared texture is deleted right after this returns, so
    /// the encoder must be done sampling it by then.
    fn on_detach(&self) {}
}

/// Lock-protected encoder reference
///
/// [`EncoderSlot::forward`] holds the lock for the whole call, so a concurrent
/// [`EncoderSlot::set`] cannot drop the encoder mid-frame.
#[derive(Default)]
pub struct EncoderSlot {
    encoder: Mutex<Option<Arc<dyn VideoEncoder>>>,
}

impl EncoderSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap the encoder, returning the previous one
    pub fn set(&self, encoder: Option<Arc<dyn VideoEncoder>>) -> Option<Arc<dyn VideoEncoder>> {
        let mut slot = self.encoder.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *slot, encoder)
    }

    pub fn is_attached(&self) -> bool {
        self.encoder
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Hand a frame to the encoder if one is attached. Returns whether it was.
    pub fn forward(&self, handoff: &EncoderHandoff) -> bool {
        let slot = self.encoder.lock().unwrap_or_else(|e| e.into_inner());
        match slot.as_ref() {
            Some(encoder) => {
                encoder.frame_available(handoff);
                true
            }
            None => false,
        }
    }
}

/// Passes every `every`th tick
#[derive(Debug, Clone)]
pub struct DutyCycle {
    every: u32,
    ticks: u64,
}

impl DutyCycle {
    pub fn new(every: u32) -> Self {
        if every == 0 {
            debug!("Duty cycle of 0 treated as 1");
        }
        Self {
            every: every.max(1),
            ticks: 0,
        }
    }

    /// Advance one tick, returning whether this tick is forwarded
    pub fn tick(&mut self) -> bool {
        self.ticks += 1;
        self.ticks % self.every as u64 == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingEncoder {
        frames: AtomicUsize,
    }

    impl VideoEncoder for CountingEncoder {
        fn on_attach(&self, _shared: SharedContextHandle, _texture: TextureId) -> AppResult<()> {
            Ok(())
        }

        fn frame_available(&self, _handoff: &EncoderHandoff) {
            self.frames.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn handoff() -> EncoderHandoff {
        EncoderHandoff {
            texture: 1,
            tex_matrix: crate::gpu::matrix::IDENTITY,
            mvp: crate::gpu::matrix::IDENTITY,
        }
    }

    #[test]
    fn test_duty_cycle_halves() {
        let mut duty = DutyCycle::new(2);
        let passed: Vec<bool> = (0..6).map(|_| duty.tick()).collect();
        assert_eq!(passed, vec![false, true, false, true, false, true]);
    }

    #[test]
    fn test_zero_duty_cycle_passes_everything() {
        let mut duty = DutyCycle::new(0);
        assert!(duty.tick());
        assert!(duty.tick());
    }

    #[test]
    fn test_slot_forwards_only_when_attached() {
        let slot = EncoderSlot::new();
        assert!(!slot.forward(&handoff()));

        let encoder = Arc::new(CountingEncoder::default());
        slot.set(Some(encoder.clone()));
        assert!(slot.forward(&handoff()));
        assert!(slot.forward(&handoff()));
        assert_eq!(encoder.frames.load(Ordering::SeqCst), 2);

        assert!(slot.set(None).is_some());
        assert!(!slot.forward(&handoff()));
    }
}
