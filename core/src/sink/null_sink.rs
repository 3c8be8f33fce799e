//! Sink with no host device
//!
//! Streams behave exactly like device-backed ones, but their callbacks are
//! driven either manually with [`NullSink::tick`] or by a background thread
//! pacing itself like a real device.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use nether_sink_shared::constants::callback_period_ns;
use nether_sink_shared::{Direction, TARGET_SAMPLE_COUNT};
use tracing::{debug, warn};

use super::stream::SinkStream;
use super::{Sink, SinkContext, find_stream, retire_stream};
use crate::error::SinkError;

type StreamList = Arc<Mutex<Vec<Arc<SinkStream>>>>;

/// Sink that discards output and captures silence
pub struct NullSink {
    ctx: SinkContext,
    streams: StreamList,
    paused: Arc<AtomicBool>,
    device_volume: f32,
    driver: Option<DriverHandle>,
}

impl NullSink {
    /// Create a sink whose callbacks only run on [`Self::tick`]
    pub fn new(ctx: SinkContext) -> Self {
        Self {
            ctx,
            streams: Arc::new(Mutex::new(Vec::new())),
            paused: Arc::new(AtomicBool::new(false)),
            device_volume: 1.0,
            driver: None,
        }
    }

    /// Create a sink with a background thread ticking one period every 5ms
    pub fn with_driver(ctx: SinkContext) -> Self {
        let mut sink = Self::new(ctx);
        sink.driver = Some(DriverHandle::spawn(sink.streams.clone(), sink.paused.clone()));
        sink
    }

    /// Service `num_frames` device frames on every open stream
    pub fn tick(&self, num_frames: usize) {
        if self.paused.load(Ordering::Acquire) {
            return;
        }
        let mut scratch = Vec::new();
        service_streams(&self.streams, num_frames, &mut scratch);
    }

    /// Number of open streams
    pub fn stream_count(&self) -> usize {
        self.streams.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    fn for_each_stream(&self, mut f: impl FnMut(&SinkStream)) {
        let streams = self.streams.lock().unwrap_or_else(|e| e.into_inner());
        for stream in streams.iter() {
            f(stream);
        }
    }
}

/// Run one callback period on every stream in `streams`
fn service_streams(
    streams: &Mutex<Vec<Arc<SinkStream>>>,
    num_frames: usize,
    scratch: &mut Vec<i16>,
) {
    // Snapshot the list so callbacks never run under the registry lock
    let streams: Vec<Arc<SinkStream>> =
        streams.lock().unwrap_or_else(|e| e.into_inner()).clone();

    for stream in streams {
        let len = num_frames * stream.device_channels() as usize;
        scratch.clear();
        scratch.resize(len, 0);
        match stream.direction() {
            Direction::Out => stream.process_audio_out_and_render(scratch, num_frames),
            Direction::In => stream.process_audio_in(scratch, num_frames),
        }
    }
}

impl Sink for NullSink {
    fn acquire_stream(
        &mut self,
        system_channels: u32,
        name: &str,
        direction: Direction,
    ) -> Result<Arc<SinkStream>, SinkError> {
        let stream = self
            .ctx
            .open_stream(name, direction, system_channels, system_channels)?;
        stream.set_device_volume(self.device_volume);
        self.streams
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(stream.clone());
        Ok(stream)
    }

    fn close_stream(&mut self, stream: &Arc<SinkStream>) {
        let mut streams = self.streams.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(index) = find_stream(streams.iter(), stream) {
            let removed = streams.remove(index);
            drop(streams);
            retire_stream(&removed);
        } else {
            warn!("close_stream: '{}' is not owned by this sink", stream.name());
        }
    }

    fn close_streams(&mut self) {
        let removed: Vec<_> = self
            .streams
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for stream in &removed {
            retire_stream(stream);
        }
    }

    fn pause_streams(&mut self) {
        self.paused.store(true, Ordering::Release);
    }

    fn unpause_streams(&mut self) {
        self.paused.store(false, Ordering::Release);
    }

    fn device_volume(&self) -> f32 {
        self.device_volume
    }

    fn set_device_volume(&mut self, volume: f32) {
        self.device_volume = volume;
        self.for_each_stream(|s| s.set_device_volume(volume));
    }

    fn set_system_volume(&mut self, volume: f32) {
        self.for_each_stream(|s| s.set_system_volume(volume));
    }

    fn system_channels(&self) -> u32 {
        2
    }
}

impl Drop for NullSink {
    fn drop(&mut self) {
        self.close_streams();
        // Dropping the handle stops and joins the driver thread
        self.driver.take();
    }
}

/// Background thread pacing the null device
struct DriverHandle {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl DriverHandle {
    fn spawn(streams: StreamList, paused: Arc<AtomicBool>) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = running.clone();
        let period = Duration::from_nanos(callback_period_ns());

        let handle = thread::Builder::new()
            .name("null-sink".into())
            .spawn(move || {
                debug!("Null sink driver started ({:?} period)", period);
                let mut scratch = Vec::new();
                while thread_running.load(Ordering::Acquire) {
                    if !paused.load(Ordering::Acquire) {
                        service_streams(&streams, TARGET_SAMPLE_COUNT as usize, &mut scratch);
                    }
                    thread::sleep(period);
                }
                debug!("Null sink driver finished");
            });

        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Failed to spawn null sink driver: {}. Streams will not advance.", e);
                None
            }
        };

        Self { running, handle }
    }
}

impl Drop for DriverHandle {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
