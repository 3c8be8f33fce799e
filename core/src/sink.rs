//! Audio sinks: host-side owners of streams
//!
//! A [`Sink`] binds [`SinkStream`]s to a backend that drives their device
//! callbacks. Producers only ever talk to the streams.
//!
//! # Architecture
//!
//! ```text
//! Guest render/capture             SinkStream                Device callback
//!     │                               │                           │
//! [wait_free_space]◄──(condvar)───────┤                           │
//! [append_buffer]──►[remix]──►[ring + queue]──────────────►[process_audio_out]
//!     │                               │◄─────(position)───────────┤
//! [release_buffer]◄───────────[ring + queue]◄──────────────[process_audio_in]
//! ```

use std::sync::Arc;

use nether_sink_shared::Direction;

use crate::clock::{SystemClock, VolumeSource};
use crate::error::SinkError;

mod backpressure;
mod cpal_sink;
mod mixing;
mod null_sink;
mod position;
mod queue;
mod ring_buffer;
mod sink_details;
mod stats;
mod stream;

#[cfg(test)]
mod tests;

// Re-export public API
pub use backpressure::{
    Backpressure, CANCEL_POLL_INTERVAL, CancelToken, ESCALATION_SLACK, FREE_SPACE_WAIT,
};
pub use cpal_sink::CpalSink;
pub use mixing::{
    ChannelMix, FixedPoint, downmix_6_to_2, perceptual_volume, remix, scale_in_place,
    scale_sample, upmix_2_to_6,
};
pub use null_sink::NullSink;
pub use position::{LATENCY_MARGIN_SAMPLES, PositionTracker, PositionWindow};
pub use queue::{BufferDescriptor, SubmissionQueue};
pub use ring_buffer::SampleRingBuffer;
pub use sink_details::{SinkId, create_sink, list_devices};
pub use stats::{StatsSnapshot, StreamStats};
pub use stream::{CAPTURE_GAIN, SinkStream, StreamParams};

/// Default number of queued submissions before producers are throttled
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 4;

/// Capabilities and limits handed to every stream a sink opens
#[derive(Clone)]
pub struct SinkContext {
    pub clock: Arc<dyn SystemClock>,
    pub volume: Arc<dyn VolumeSource>,
    pub max_queue_size: usize,
}

impl SinkContext {
    pub fn new(clock: Arc<dyn SystemClock>, volume: Arc<dyn VolumeSource>) -> Self {
        Self {
            clock,
            volume,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
        }
    }

    pub fn with_max_queue_size(mut self, max_queue_size: usize) -> Self {
        self.max_queue_size = max_queue_size;
        self
    }

    /// Build a stream bound to this context's clock and volume
    pub(crate) fn open_stream(
        &self,
        name: &str,
        direction: Direction,
        system_channels: u32,
        device_channels: u32,
    ) -> Result<Arc<SinkStream>, SinkError> {
        let params = StreamParams {
            name: name.to_string(),
            direction,
            system_channels,
            device_channels,
            max_queue_size: self.max_queue_size,
        };
        SinkStream::new(params, self.clock.clone(), self.volume.clone()).map(Arc::new)
    }
}

/// Backend owning a set of streams and the device driving them
pub trait Sink {
    /// Open a stream carrying `system_channels` guest channels
    fn acquire_stream(
        &mut self,
        system_channels: u32,
        name: &str,
        direction: Direction,
    ) -> Result<Arc<SinkStream>, SinkError>;

    /// Stop and forget one stream, waking any producer parked on it
    fn close_stream(&mut self, stream: &Arc<SinkStream>);

    /// Close every stream
    fn close_streams(&mut self);

    /// Stop device callbacks for every stream
    fn pause_streams(&mut self);

    /// Resume device callbacks for every stream
    fn unpause_streams(&mut self);

    fn device_volume(&self) -> f32;

    /// Set the device gain stage on every stream
    fn set_device_volume(&mut self, volume: f32);

    /// Set the system gain stage on every stream
    fn set_system_volume(&mut self, volume: f32);

    /// Output channel width the sink negotiated with its device
    fn system_channels(&self) -> u32;
}

/// Position of `stream` in `streams`, compared by identity
pub(crate) fn find_stream<'a, I>(streams: I, stream: &Arc<SinkStream>) -> Option<usize>
where
    I: IntoIterator<Item = &'a Arc<SinkStream>>,
{
    streams.into_iter().position(|s| Arc::ptr_eq(s, stream))
}

/// Wake producers and log final counters for a stream leaving its sink
pub(crate) fn retire_stream(stream: &SinkStream) {
    stream.wake_waiters();
    stream.stats().log(stream.name());
}
