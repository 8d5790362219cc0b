//! Stack capture
//!
//! Produces the raw return addresses of a kernel thread, innermost first.
//! A thread that cannot be sampled (exited, never answered the signal)
//! yields an empty capture rather than an error.

pub mod walker;

use log::{debug, warn};

use crate::domain::{Address, Tid};

pub use walker::{FrameWalker, SignalFrameWalker, MAX_FRAMES};

/// One captured frame; index 0 is closest to the point of capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawFrame {
    pub index: usize,
    pub address: Address,
}

impl RawFrame {
    /// Number a capture, innermost frame first
    pub fn enumerate(addresses: &[Address]) -> impl Iterator<Item = RawFrame> + '_ {
        addresses.iter().enumerate().map(|(index, &address)| RawFrame { index, address })
    }
}

/// Captures raw stacks through a [`FrameWalker`]
pub struct StackCapturer<W = SignalFrameWalker> {
    walker: W,
}

impl<W: FrameWalker> StackCapturer<W> {
    pub fn new(walker: W) -> Self {
        Self { walker }
    }

    /// Capture up to `max_depth` return addresses of `tid`
    ///
    /// All-or-nothing: a failed walk returns an empty sequence. Addresses
    /// past the first null frame are dropped.
    pub fn capture(&self, tid: Tid, max_depth: usize) -> Vec<Address> {
        let mut frames = match self.walker.walk(tid, max_depth) {
            Ok(frames) => frames,
            Err(e) => {
                warn!("Empty capture for {tid}: {e}");
                return Vec::new();
            }
        };

        // Stop at null addresses
        if let Some(end) = frames.iter().position(|a| a.is_null()) {
            debug!("Frame {end} of {tid} has address 0, truncating");
            frames.truncate(end);
        }
        frames.truncate(max_depth);

        debug!("Captured {} frames from {tid}", frames.len());
        frames
    }
}

impl Default for StackCapturer<SignalFrameWalker> {
    fn default() -> Self {
        Self::new(SignalFrameWalker::default())
    }
}
