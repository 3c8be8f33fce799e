//! Per-direction stream tying queue, ring buffer, mixer and timing together
//!
//! Three actors touch a stream concurrently:
//! - the producer (guest render or capture client) submits or releases
//!   buffers and parks in [`SinkStream::wait_free_space`]
//! - the host device callback services exactly one period per call and
//!   must never block for long
//! - any thread may query [`SinkStream::expected_played_sample_count`]
//!
//! Lock order is playback state, then ring buffer, then queue. The position
//! window and the backpressure gate have their own locks and are never held
//! while taking another.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use nether_sink_shared::{Direction, MAX_CHANNELS};
use tracing::debug;

use super::backpressure::{Backpressure, CancelToken, ESCALATION_SLACK};
use super::mixing::{perceptual_volume, remix, scale_in_place};
use super::position::{PositionTracker, PositionWindow};
use super::queue::{BufferDescriptor, SubmissionQueue};
use super::ring_buffer::SampleRingBuffer;
use super::stats::{StatsSnapshot, StreamStats};
use crate::clock::{SystemClock, VolumeSource};
use crate::error::SinkError;

/// Extra gain applied to captured audio, which arrives very quiet
pub const CAPTURE_GAIN: f32 = 8.0;

/// Construction parameters for a [`SinkStream`]
#[derive(Debug, Clone)]
pub struct StreamParams {
    /// Name used in logs
    pub name: String,
    pub direction: Direction,
    /// Channels the guest produces (out) or expects (in)
    pub system_channels: u32,
    /// Channels the host device runs at
    pub device_channels: u32,
    /// Queue depth above which producers are throttled
    pub max_queue_size: usize,
}

/// State only the device callback advances (and `clear_queue` resets)
#[derive(Debug)]
struct PlaybackState {
    playing: BufferDescriptor,
    /// Most recent device frame written, repeated to cover underruns
    last_frame: [i16; MAX_CHANNELS],
}

/// One audio stream between the emulated system and the host device
pub struct SinkStream {
    name: String,
    direction: Direction,
    system_channels: u32,
    device_channels: u32,
    /// Host-side gain stages, stored as f32 bits
    system_volume: AtomicU32,
    device_volume: AtomicU32,
    max_queue_size: usize,
    queued_buffers: AtomicUsize,
    /// Set once the owning sink retires the stream
    closed: AtomicBool,
    queue: SubmissionQueue,
    samples: SampleRingBuffer,
    playback: Mutex<PlaybackState>,
    position: PositionTracker,
    release: Backpressure,
    /// Reused remix output so submissions do not allocate per call
    mix_scratch: Mutex<Vec<i16>>,
    clock: Arc<dyn SystemClock>,
    volume: Arc<dyn VolumeSource>,
    stats: StreamStats,
}

impl SinkStream {
    pub fn new(
        params: StreamParams,
        clock: Arc<dyn SystemClock>,
        volume: Arc<dyn VolumeSource>,
    ) -> Result<Self, SinkError> {
        for channels in [params.system_channels, params.device_channels] {
            if !(1..=MAX_CHANNELS as u32).contains(&channels) {
                return Err(SinkError::UnsupportedChannels(channels));
            }
        }

        debug!(
            "Opening {} stream '{}': system={}ch device={}ch max_queue={}",
            params.direction,
            params.name,
            params.system_channels,
            params.device_channels,
            params.max_queue_size
        );

        Ok(Self {
            samples: SampleRingBuffer::new(params.device_channels as usize),
            name: params.name,
            direction: params.direction,
            system_channels: params.system_channels,
            device_channels: params.device_channels,
            system_volume: AtomicU32::new(1.0f32.to_bits()),
            device_volume: AtomicU32::new(1.0f32.to_bits()),
            max_queue_size: params.max_queue_size,
            queued_buffers: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            queue: SubmissionQueue::new(),
            playback: Mutex::new(PlaybackState {
                playing: BufferDescriptor::consumed_sentinel(),
                last_frame: [0; MAX_CHANNELS],
            }),
            position: PositionTracker::new(),
            release: Backpressure::new(),
            mix_scratch: Mutex::new(Vec::with_capacity(4096)),
            clock,
            volume,
            stats: StreamStats::new(),
        })
    }

    fn lock_playback(&self) -> MutexGuard<'_, PlaybackState> {
        self.playback.lock().unwrap_or_else(|e| {
            tracing::warn!("Stream '{}' playback mutex poisoned; continuing", self.name);
            e.into_inner()
        })
    }

    /// Account for one descriptor leaving the queue
    fn take_queued(&self) {
        let _ = self
            .queued_buffers
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    // === Producer side ===

    /// Submit one buffer
    ///
    /// Output streams remix `samples` to the device layout at the effective
    /// volume and buffer them. Input streams only queue the descriptor; the
    /// captured audio arrives later through [`Self::process_audio_in`].
    pub fn append_buffer(&self, descriptor: BufferDescriptor, samples: &[i16]) {
        if self.direction == Direction::Out {
            let volume = self.system_volume()
                * self.device_volume()
                * perceptual_volume(self.volume.user_volume());

            let mut scratch = self.mix_scratch.lock().unwrap_or_else(|e| e.into_inner());
            let mixed = remix(
                samples,
                self.system_channels,
                self.device_channels,
                volume,
                &mut scratch,
            );
            self.samples.push(mixed);
        }

        self.queue.enqueue(descriptor);
        self.queued_buffers.fetch_add(1, Ordering::AcqRel);
    }

    /// Take exactly `num_samples` captured samples
    ///
    /// Applies the host gain stages plus [`CAPTURE_GAIN`]; anything the ring
    /// buffer cannot supply is zero-filled.
    pub fn release_buffer(&self, num_samples: usize) -> Vec<i16> {
        let volume = self.system_volume() * self.device_volume() * CAPTURE_GAIN;

        let mut samples = self.samples.pop(num_samples);
        scale_in_place(&mut samples, volume);
        samples.resize(num_samples, 0);
        samples
    }

    /// Drop all pending audio and descriptors without closing the stream
    pub fn clear_queue(&self) {
        let mut playback = self.lock_playback();
        let dropped_samples = self.samples.clear();
        let dropped_buffers = self.queue.clear();
        self.queued_buffers.store(0, Ordering::Release);
        playback.playing = BufferDescriptor::consumed_sentinel();
        drop(playback);

        debug!(
            "Cleared stream '{}': {} buffers, {} samples dropped",
            self.name, dropped_buffers, dropped_samples
        );
        self.release.wake_all();
    }

    /// Throttle the producer while the queue is at or above its limit
    ///
    /// Waits at most a few milliseconds unless the queue is badly backed up,
    /// in which case it waits for space, for the stream to be closed, for
    /// system shutdown, or for `token` to be cancelled.
    pub fn wait_free_space(&self, token: &CancelToken) {
        let max = self.max_queue_size;
        self.release.wait_free_space(
            || self.queue_size() < max,
            || self.queue_size() > max + ESCALATION_SLACK,
            || self.is_closed() || self.clock.is_shutting_down(),
            token,
        );
    }

    // === Device callback side ===

    /// Service one capture period of `num_frames` device frames
    pub fn process_audio_in(&self, input: &[i16], num_frames: usize) {
        let frame_size = self.device_channels as usize;
        let num_frames = num_frames.min(input.len() / frame_size);
        if num_frames == 0 {
            return;
        }

        // Virtual time is frozen; consuming now would desync the guest.
        if self.clock.is_paused() || self.clock.is_shutting_down() {
            return;
        }

        let mut playback = self.lock_playback();
        let mut frames_written = 0;

        while frames_written < num_frames {
            if playback.playing.is_exhausted() {
                let Some(next) = self.queue.try_dequeue() else {
                    // Underrun: keep the audio anyway, unaccounted
                    let rest = &input[frames_written * frame_size..num_frames * frame_size];
                    self.samples.push(rest);
                    self.stats
                        .add_unaccounted((num_frames - frames_written) as u64);
                    frames_written = num_frames;
                    break;
                };
                playback.playing = next;
                self.take_queued();
            }

            let available =
                (playback.playing.remaining() as usize).min(num_frames - frames_written);
            let start = frames_written * frame_size;
            self.samples
                .push(&input[start..start + available * frame_size]);

            frames_written += available;
            self.stats.add_captured(available as u64);
            playback.playing.advance(available as u64);
            if available > 0 && playback.playing.consumed {
                self.stats.add_completed();
            }
        }

        let last = (frames_written - 1) * frame_size;
        playback.last_frame[..frame_size].copy_from_slice(&input[last..last + frame_size]);
    }

    /// Fill one playback period of `num_frames` device frames
    ///
    /// Never fails: paused or shutting down yields silence, and running out
    /// of submissions repeats the last frame for the rest of the period.
    pub fn process_audio_out_and_render(&self, output: &mut [i16], num_frames: usize) {
        let frame_size = self.device_channels as usize;
        let num_frames = num_frames.min(output.len() / frame_size);
        if num_frames == 0 {
            return;
        }
        let output = &mut output[..num_frames * frame_size];

        if self.clock.is_paused() || self.clock.is_shutting_down() {
            if self.clock.is_shutting_down() {
                // Processing will not resume to release parked producers.
                self.release.wake_all();
            }
            output.fill(0);
            return;
        }

        let mut playback = self.lock_playback();
        let mut frames_written = 0;
        let mut actual_frames_written = 0;

        while frames_written < num_frames {
            if playback.playing.is_exhausted() {
                let Some(next) = self.queue.try_dequeue() else {
                    let last_frame = playback.last_frame;
                    for frame in output[frames_written * frame_size..].chunks_exact_mut(frame_size)
                    {
                        frame.copy_from_slice(&last_frame[..frame_size]);
                    }
                    self.stats
                        .add_underrun((num_frames - frames_written) as u64);
                    frames_written = num_frames;
                    break;
                };
                playback.playing = next;
                self.take_queued();
                self.release.notify_release();
            }

            let available =
                (playback.playing.remaining() as usize).min(num_frames - frames_written);
            let start = frames_written * frame_size;
            let dst = &mut output[start..start + available * frame_size];
            let popped = self.samples.pop_into(dst);
            dst[popped..].fill(0);

            frames_written += available;
            actual_frames_written += available;
            playback.playing.advance(available as u64);
            if available > 0 && playback.playing.consumed {
                self.stats.add_completed();
            }
        }

        let last = (frames_written - 1) * frame_size;
        playback.last_frame[..frame_size].copy_from_slice(&output[last..last + frame_size]);
        drop(playback);

        self.stats.add_rendered(actual_frames_written as u64);
        self.position
            .record_callback(self.clock.global_time_ns(), actual_frames_written as u64);
    }

    // === Position ===

    /// Estimated samples played so far, for audio/video sync
    pub fn expected_played_sample_count(&self) -> u64 {
        self.position.expected_played(self.clock.global_time_ns())
    }

    pub fn position_window(&self) -> PositionWindow {
        self.position.window()
    }

    // === Accessors ===

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn system_channels(&self) -> u32 {
        self.system_channels
    }

    pub fn device_channels(&self) -> u32 {
        self.device_channels
    }

    pub fn system_volume(&self) -> f32 {
        f32::from_bits(self.system_volume.load(Ordering::Acquire))
    }

    pub fn set_system_volume(&self, volume: f32) {
        self.system_volume
            .store(volume.max(0.0).to_bits(), Ordering::Release);
    }

    pub fn device_volume(&self) -> f32 {
        f32::from_bits(self.device_volume.load(Ordering::Acquire))
    }

    pub fn set_device_volume(&self, volume: f32) {
        self.device_volume
            .store(volume.max(0.0).to_bits(), Ordering::Release);
    }

    /// Descriptors submitted but not yet picked up by the callback
    pub fn queue_size(&self) -> usize {
        self.queued_buffers.load(Ordering::Acquire)
    }

    pub fn max_queue_size(&self) -> usize {
        self.max_queue_size
    }

    /// Copy of the descriptor the callback is currently servicing
    pub fn playing_buffer(&self) -> BufferDescriptor {
        self.lock_playback().playing
    }

    /// Copy of the cached last device frame
    pub fn last_frame(&self) -> Vec<i16> {
        self.lock_playback().last_frame[..self.device_channels as usize].to_vec()
    }

    /// Samples currently held in the ring buffer
    pub fn buffered_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Whether the owning sink has closed this stream
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Mark the stream closed and release every producer parked in
    /// [`Self::wait_free_space`]
    ///
    /// Later waits on a closed stream return immediately.
    pub fn wake_waiters(&self) {
        self.closed.store(true, Ordering::Release);
        self.release.wake_all();
    }
}

impl std::fmt::Debug for SinkStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkStream")
            .field("name", &self.name)
            .field("direction", &self.direction)
            .field("system_channels", &self.system_channels)
            .field("device_channels", &self.device_channels)
            .field("queued_buffers", &self.queue_size())
            .finish_non_exhaustive()
    }
}
