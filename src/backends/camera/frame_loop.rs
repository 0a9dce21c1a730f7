// SPDX-License-Identifier: GPL-3.0-only

//! Paced frame-production loops
//!
//! Devices that generate or poll frames themselves run their streaming loop
//! on a [`FrameLoop`] thread. The loop body is called once per frame period
//! until it asks to stop or the owner calls [`FrameLoop::stop`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// What the loop body wants next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    Continue,
    Stop,
}

/// Handle to a running frame loop
///
/// Dropping the handle stops the loop and joins the thread.
pub struct FrameLoop {
    thread_handle: Option<JoinHandle<()>>,
    stop_signal: Arc<AtomicBool>,
    name: String,
}

impl FrameLoop {
    /// Run `init_fn` once on the loop thread, then call `loop_fn` with its state
    /// at most once per `period`.
    ///
    /// If `init_fn` fails the thread exits without running the body.
    /// [`FrameLoop::stop`] interrupts the wait between periods.
    pub fn start_paced<S, I, F>(
        name: &str,
        period: Duration,
        init_fn: I,
        mut loop_fn: F,
    ) -> std::io::Result<Self>
    where
        S: 'static,
        I: FnOnce() -> Result<S, String> + Send + 'static,
        F: FnMut(&mut S) -> LoopAction + Send + 'static,
    {
        let stop_signal = Arc::new(AtomicBool::new(false));
        let stop = Arc::clone(&stop_signal);
        let thread_name = name.to_string();

        info!(name = %name, period_ms = period.as_millis() as u64, "Starting frame loop");

        let thread_handle = thread::Builder::new().name(name.to_string()).spawn(move || {
            let mut state = match init_fn() {
                Ok(s) => s,
                Err(e) => {
                    warn!(name = %thread_name, error = %e, "Frame loop initialization failed");
                    return;
                }
            };

            let mut next = Instant::now();
            while !stop.load(Ordering::Acquire) {
                if loop_fn(&mut state) == LoopAction::Stop {
                    debug!(name = %thread_name, "Frame loop body requested stop");
                    break;
                }
                next += period;
                // Fell behind by more than a period: resync instead of bursting
                let now = Instant::now();
                if next < now {
                    next = now;
                }
                while !stop.load(Ordering::Acquire) {
                    let now = Instant::now();
                    if now >= next {
                        break;
                    }
                    thread::park_timeout(next - now);
                }
            }

            debug!(name = %thread_name, "Frame loop thread exiting");
        })?;

        Ok(Self {
            thread_handle: Some(thread_handle),
            stop_signal,
            name: name.to_string(),
        })
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Signal the loop to stop without waiting
    pub fn request_stop(&self) {
        self.stop_signal.store(true, Ordering::Release);
        if let Some(handle) = &self.thread_handle {
            handle.thread().unpark();
        }
    }

    /// Stop the loop and wait for the thread. Idempotent.
    pub fn stop(&mut self) {
        self.request_stop();
        self.join();
    }

    /// Wait for the thread to finish without signalling it
    pub fn join(&mut self) {
        if let Some(handle) = self.thread_handle.take()
            && handle.join().is_err()
        {
            warn!(name = %self.name, "Frame loop thread panicked");
        }
    }
}

impl Drop for FrameLoop {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_body_stops_itself() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&counter);
        let mut frame_loop = FrameLoop::start_paced(
            "test-loop",
            Duration::ZERO,
            || Ok(()),
            move |_: &mut ()| {
                if c.fetch_add(1, Ordering::SeqCst) >= 10 {
                    LoopAction::Stop
                } else {
                    LoopAction::Continue
                }
            },
        )
        .unwrap();
        frame_loop.join();
        assert_eq!(counter.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn test_stop_interrupts_long_period() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&counter);
        let mut frame_loop = FrameLoop::start_paced(
            "test-paced",
            Duration::from_secs(60),
            || Ok(()),
            move |_: &mut ()| {
                c.fetch_add(1, Ordering::SeqCst);
                LoopAction::Continue
            },
        )
        .unwrap();
        while counter.load(Ordering::SeqCst) == 0 {
            thread::yield_now();
        }
        let started = Instant::now();
        frame_loop.stop();
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(!frame_loop.is_running());
    }

    #[test]
    fn test_init_failure_skips_body() {
        let ran = Arc::new(AtomicBool::new(false));
        let r = Arc::clone(&ran);
        let mut frame_loop = FrameLoop::start_paced(
            "test-fail-init",
            Duration::ZERO,
            || Err::<(), _>("no device".to_string()),
            move |_: &mut ()| {
                r.store(true, Ordering::SeqCst);
                LoopAction::Stop
            },
        )
        .unwrap();
        frame_loop.join();
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_init_state_reaches_body() {
        let seen = Arc::new(AtomicU32::new(0));
        let s = Arc::clone(&seen);
        let mut frame_loop = FrameLoop::start_paced(
            "test-init-state",
            Duration::ZERO,
            || Ok(42u32),
            move |state| {
                s.store(*state, Ordering::SeqCst);
                LoopAction::Stop
            },
        )
        .unwrap();
        frame_loop.join();
        assert_eq!(seen.load(Ordering::SeqCst), 42);
    }
}
