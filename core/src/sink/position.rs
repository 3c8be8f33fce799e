//! Played-sample window used for audio/video sync queries
//!
//! The device callback records how many real frames it rendered. Readers on
//! any thread interpolate between callbacks from the virtual clock.

use std::sync::{Mutex, MutexGuard};

use nether_sink_shared::{NANOS_PER_SECOND, TARGET_SAMPLE_COUNT, TARGET_SAMPLE_RATE};

/// Extra samples reported on top of the estimate (three callback periods)
///
/// Covers scheduler and query jitter relative to real output latency.
pub const LATENCY_MARGIN_SAMPLES: u64 = TARGET_SAMPLE_COUNT as u64 * 3;

/// Snapshot of the played-sample window
///
/// `min_played <= max_played` always holds; both only grow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PositionWindow {
    /// Frames rendered before the most recent callback
    pub min_played: u64,
    /// Frames rendered including the most recent callback
    pub max_played: u64,
    /// Virtual time of the most recent callback completion
    pub last_update_ns: u64,
}

/// Lock-guarded position window, separate from queue and ring locks
#[derive(Debug, Default)]
pub struct PositionTracker {
    window: Mutex<PositionWindow>,
}

impl PositionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PositionWindow> {
        self.window.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a completed callback that rendered `frames` real frames
    ///
    /// Padding frames (silence or repeats) must not be counted.
    pub fn record_callback(&self, now_ns: u64, frames: u64) {
        let mut window = self.lock();
        window.last_update_ns = now_ns;
        window.min_played = window.max_played;
        window.max_played += frames;
    }

    /// Estimated samples played at `now_ns`, including the latency margin
    ///
    /// Assumes steady playback since the last callback and never reports
    /// more than the callback has actually rendered (plus the margin).
    pub fn expected_played(&self, now_ns: u64) -> u64 {
        let window = self.lock();
        let elapsed_ns = now_ns.saturating_sub(window.last_update_ns);
        let interpolated =
            (TARGET_SAMPLE_RATE as u128 * elapsed_ns as u128) / NANOS_PER_SECOND as u128;
        let estimate = (window.min_played as u128 + interpolated).min(window.max_played as u128);
        estimate as u64 + LATENCY_MARGIN_SAMPLES
    }

    pub fn window(&self) -> PositionWindow {
        *self.lock()
    }
}
