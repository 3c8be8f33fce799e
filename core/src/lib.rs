//! Nether Sink Core - real-time audio bridge
//!
//! Connects an emulated system's audio producers and consumers (guest render
//! threads, microphone clients) to the host device's periodic callbacks.
//!
//! # Architecture
//!
//! - [`SinkStream`] - per-direction buffering, mixing, and timing engine
//! - [`Sink`] - backend owning streams and driving their callbacks
//!   ([`CpalSink`] for host devices, [`NullSink`] for headless runs)
//! - [`SystemClock`] / [`VolumeSource`] - capabilities injected by the host system
//! - [`config`] - persisted sink selection and volume settings

pub mod clock;
pub mod config;
pub mod error;
pub mod sink;

// Re-export core traits and types
pub use clock::{HostClock, ManualClock, SharedVolume, SystemClock, VolumeSource};
pub use error::SinkError;
pub use sink::{
    BufferDescriptor, CancelToken, CpalSink, NullSink, Sink, SinkContext, SinkId, SinkStream,
    StatsSnapshot, StreamParams, create_sink, list_devices,
};

// Re-export shared layout types for convenience
pub use nether_sink_shared::{Channels, Direction, TARGET_SAMPLE_COUNT, TARGET_SAMPLE_RATE};
