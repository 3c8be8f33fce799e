//! Stream health counters
//!
//! Updated from the device callback with relaxed atomics only; snapshots are
//! taken off the real-time path and logged by the sinks.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

/// Live counters for one stream
#[derive(Debug, Default)]
pub struct StreamStats {
    /// Frames rendered from buffered audio
    rendered_frames: AtomicU64,
    /// Frames filled by repeating the last frame after an underrun
    padded_frames: AtomicU64,
    /// Callbacks that ran out of queued submissions
    underruns: AtomicU64,
    /// Capture frames attributed to a queued descriptor
    captured_frames: AtomicU64,
    /// Capture frames pushed with no descriptor to account for them
    unaccounted_frames: AtomicU64,
    /// Descriptors fully serviced
    buffers_completed: AtomicU64,
}

/// Point-in-time copy of [`StreamStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub rendered_frames: u64,
    pub padded_frames: u64,
    pub underruns: u64,
    pub captured_frames: u64,
    pub unaccounted_frames: u64,
    pub buffers_completed: u64,
}

impl StreamStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(super) fn add_rendered(&self, frames: u64) {
        self.rendered_frames.fetch_add(frames, Ordering::Relaxed);
    }

    #[inline]
    pub(super) fn add_underrun(&self, padded: u64) {
        self.underruns.fetch_add(1, Ordering::Relaxed);
        self.padded_frames.fetch_add(padded, Ordering::Relaxed);
    }

    #[inline]
    pub(super) fn add_captured(&self, frames: u64) {
        self.captured_frames.fetch_add(frames, Ordering::Relaxed);
    }

    #[inline]
    pub(super) fn add_unaccounted(&self, frames: u64) {
        self.underruns.fetch_add(1, Ordering::Relaxed);
        self.unaccounted_frames.fetch_add(frames, Ordering::Relaxed);
    }

    #[inline]
    pub(super) fn add_completed(&self) {
        self.buffers_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            rendered_frames: self.rendered_frames.load(Ordering::Relaxed),
            padded_frames: self.padded_frames.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            captured_frames: self.captured_frames.load(Ordering::Relaxed),
            unaccounted_frames: self.unaccounted_frames.load(Ordering::Relaxed),
            buffers_completed: self.buffers_completed.load(Ordering::Relaxed),
        }
    }
}

impl StatsSnapshot {
    /// Log at debug level, tagged with the stream name
    pub fn log(&self, stream: &str) {
        debug!(
            "🎵 SINK STATS [{}]: rendered={}, padded={}, underruns={}, \
             captured={}, unaccounted={}, completed={}",
            stream,
            self.rendered_frames,
            self.padded_frames,
            self.underruns,
            self.captured_frames,
            self.unaccounted_frames,
            self.buffers_completed
        );
    }
}
