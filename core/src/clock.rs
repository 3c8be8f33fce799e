//! Capabilities the sink consumes from the emulated system
//!
//! Streams never own timing or volume state. The virtual clock (pause and
//! shutdown flags plus the global time) and the user volume are injected as
//! trait objects so the real-time callback only ever reads them.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Virtual system clock as seen by the audio callback
pub trait SystemClock: Send + Sync {
    /// Whether emulation is paused (virtual time is frozen)
    fn is_paused(&self) -> bool;

    /// Whether the system is tearing down
    fn is_shutting_down(&self) -> bool;

    /// Current global virtual time in nanoseconds
    fn global_time_ns(&self) -> u64;
}

/// Source of the user-configured master volume
///
/// Values above 1.0 are boost and get loudness-compensated by the mixer.
pub trait VolumeSource: Send + Sync {
    fn user_volume(&self) -> f32;
}

/// Clock driven entirely by the caller
///
/// Used by tests and by headless drivers that step time explicitly.
#[derive(Debug, Default)]
pub struct ManualClock {
    time_ns: AtomicU64,
    paused: AtomicBool,
    shutting_down: AtomicBool,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_time_ns(&self, time_ns: u64) {
        self.time_ns.store(time_ns, Ordering::Release);
    }

    pub fn advance_ns(&self, delta_ns: u64) {
        self.time_ns.fetch_add(delta_ns, Ordering::AcqRel);
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
    }
}

impl SystemClock for ManualClock {
    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    fn global_time_ns(&self) -> u64 {
        self.time_ns.load(Ordering::Acquire)
    }
}

#[derive(Debug, Default)]
struct PauseState {
    paused_at: Option<Instant>,
    paused_total: Duration,
}

/// Monotonic host clock that stops advancing while paused
#[derive(Debug)]
pub struct HostClock {
    start: Instant,
    pause: Mutex<PauseState>,
    paused: AtomicBool,
    shutting_down: AtomicBool,
}

impl HostClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            pause: Mutex::new(PauseState::default()),
            paused: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn set_paused(&self, paused: bool) {
        let mut state = self.pause.lock().unwrap_or_else(|e| e.into_inner());
        match (paused, state.paused_at) {
            (true, None) => state.paused_at = Some(Instant::now()),
            (false, Some(at)) => {
                state.paused_total += at.elapsed();
                state.paused_at = None;
            }
            _ => {}
        }
        self.paused.store(paused, Ordering::Release);
    }

    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
    }
}

impl Default for HostClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemClock for HostClock {
    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    fn global_time_ns(&self) -> u64 {
        let state = self.pause.lock().unwrap_or_else(|e| e.into_inner());
        let now = state.paused_at.unwrap_or_else(Instant::now);
        let running = now
            .saturating_duration_since(self.start)
            .saturating_sub(state.paused_total);
        u64::try_from(running.as_nanos()).unwrap_or(u64::MAX)
    }
}

/// User volume shared between a settings thread and the sink
///
/// Stored as raw f32 bits so reads from the producer path are lock-free.
#[derive(Debug)]
pub struct SharedVolume(AtomicU32);

impl SharedVolume {
    pub fn new(volume: f32) -> Self {
        Self(AtomicU32::new(volume.to_bits()))
    }

    pub fn set(&self, volume: f32) {
        self.0.store(volume.max(0.0).to_bits(), Ordering::Release);
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Acquire))
    }
}

impl Default for SharedVolume {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl VolumeSource for SharedVolume {
    fn user_volume(&self) -> f32 {
        self.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_flags_and_time() {
        let clock = ManualClock::new();
        assert!(!clock.is_paused());
        assert!(!clock.is_shutting_down());
        clock.set_time_ns(100);
        clock.advance_ns(50);
        assert_eq!(clock.global_time_ns(), 150);
        clock.set_paused(true);
        clock.begin_shutdown();
        assert!(clock.is_paused());
        assert!(clock.is_shutting_down());
    }

    #[test]
    fn test_host_clock_freezes_while_paused() {
        let clock = HostClock::new();
        clock.set_paused(true);
        let frozen = clock.global_time_ns();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(clock.global_time_ns(), frozen);

        clock.set_paused(false);
        std::thread::sleep(Duration::from_millis(2));
        assert!(clock.global_time_ns() > frozen);
    }

    #[test]
    fn test_shared_volume_rejects_negative() {
        let volume = SharedVolume::new(0.5);
        assert_eq!(volume.user_volume(), 0.5);
        volume.set(-1.0);
        assert_eq!(volume.user_volume(), 0.0);
    }
}
