//! Centralized timing constants for the sink layer.
//!
//! Producers and backends agree on these values; the position estimate
//! and the device callback period are both derived from them.

/// Sample rate every stream is rendered at, in Hz.
pub const TARGET_SAMPLE_RATE: u32 = 48_000;

/// Samples (per channel) serviced by one device callback period.
///
/// 240 samples at 48 kHz is a 5 ms period.
pub const TARGET_SAMPLE_COUNT: u32 = 240;

/// Widest channel layout a stream can carry (5.1).
pub const MAX_CHANNELS: usize = 6;

/// Nanoseconds per second, for converting virtual clock deltas.
pub const NANOS_PER_SECOND: u64 = 1_000_000_000;

/// Length of one callback period in nanoseconds.
pub const fn callback_period_ns() -> u64 {
    TARGET_SAMPLE_COUNT as u64 * NANOS_PER_SECOND / TARGET_SAMPLE_RATE as u64
}
