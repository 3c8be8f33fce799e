//! Shared types for the nether-sink audio bridge.
//!
//! Kept free of backend dependencies so guest-side producers can describe
//! their PCM layout without linking an audio host.

pub mod channels;
pub mod constants;

pub use channels::{Channels, Direction};
pub use constants::{MAX_CHANNELS, NANOS_PER_SECOND, TARGET_SAMPLE_COUNT, TARGET_SAMPLE_RATE};
