//! Stream and sink tests
//!
//! Callbacks are driven by hand against a [`ManualClock`], so none of these
//! need audio hardware.

use super::*;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use crate::clock::{ManualClock, SharedVolume};
use nether_sink_shared::TARGET_SAMPLE_COUNT;
use nether_sink_shared::constants::callback_period_ns;

struct Fixture {
    clock: Arc<ManualClock>,
    volume: Arc<SharedVolume>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            clock: Arc::new(ManualClock::new()),
            volume: Arc::new(SharedVolume::new(1.0)),
        }
    }

    fn ctx(&self) -> SinkContext {
        SinkContext::new(self.clock.clone(), self.volume.clone())
    }

    fn stream(&self, direction: Direction, system: u32, device: u32) -> SinkStream {
        self.stream_with_queue(direction, system, device, DEFAULT_MAX_QUEUE_SIZE)
    }

    fn stream_with_queue(
        &self,
        direction: Direction,
        system: u32,
        device: u32,
        max_queue_size: usize,
    ) -> SinkStream {
        let params = StreamParams {
            name: "test".to_string(),
            direction,
            system_channels: system,
            device_channels: device,
            max_queue_size,
        };
        SinkStream::new(params, self.clock.clone(), self.volume.clone()).unwrap()
    }
}

/// Submit `frames` stereo frames of a constant `[left, right]`
fn submit_stereo(stream: &SinkStream, frames: usize, left: i16, right: i16) {
    let samples: Vec<i16> = (0..frames).flat_map(|_| [left, right]).collect();
    stream.append_buffer(BufferDescriptor::new(frames as u64, 0), &samples);
}

/// Park a producer in `wait_free_space`; the receiver fires when it returns
fn spawn_producer(
    stream: &Arc<SinkStream>,
    token: &CancelToken,
) -> (std::thread::JoinHandle<()>, mpsc::Receiver<Duration>) {
    let (tx, rx) = mpsc::channel();
    let stream = stream.clone();
    let token = token.clone();
    let handle = std::thread::spawn(move || {
        let start = Instant::now();
        stream.wait_free_space(&token);
        tx.send(start.elapsed()).unwrap();
    });
    (handle, rx)
}

fn render(stream: &SinkStream, frames: usize) -> Vec<i16> {
    let mut out = vec![i16::MIN; frames * stream.device_channels() as usize];
    stream.process_audio_out_and_render(&mut out, frames);
    out
}

// =============================================================
// Construction
// =============================================================

#[test]
fn test_rejects_unsupported_channel_counts() {
    let fx = Fixture::new();
    for (system, device) in [(0, 2), (2, 0), (8, 2), (2, 7)] {
        let params = StreamParams {
            name: "bad".to_string(),
            direction: Direction::Out,
            system_channels: system,
            device_channels: device,
            max_queue_size: 4,
        };
        assert!(matches!(
            SinkStream::new(params, fx.clock.clone(), fx.volume.clone()),
            Err(SinkError::UnsupportedChannels(_))
        ));
    }
}

// =============================================================
// Submission
// =============================================================

#[test]
fn test_append_output_buffers_samples_and_counts() {
    let fx = Fixture::new();
    let stream = fx.stream(Direction::Out, 2, 2);
    submit_stereo(&stream, 4, 10, 20);
    assert_eq!(stream.queue_size(), 1);
    assert_eq!(stream.buffered_samples(), 8);
}

#[test]
fn test_append_input_only_queues_descriptor() {
    let fx = Fixture::new();
    let stream = fx.stream(Direction::In, 2, 2);
    stream.append_buffer(BufferDescriptor::new(4, 7), &[1, 2, 3, 4, 5, 6, 7, 8]);
    assert_eq!(stream.queue_size(), 1);
    assert_eq!(stream.buffered_samples(), 0);
}

#[test]
fn test_downmix_front_channels_unity() {
    let fx = Fixture::new();
    let stream = fx.stream(Direction::Out, 6, 2);
    stream.append_buffer(BufferDescriptor::new(1, 0), &[1000, 1000, 0, 0, 0, 0]);
    assert_eq!(stream.buffered_samples(), 2);
    assert_eq!(render(&stream, 1), vec![1000, 1000]);
}

#[test]
fn test_upmix_pads_surround_with_silence() {
    let fx = Fixture::new();
    let stream = fx.stream(Direction::Out, 2, 6);
    submit_stereo(&stream, 1, 300, -300);
    assert_eq!(render(&stream, 1), vec![300, -300, 0, 0, 0, 0]);
}

#[test]
fn test_effective_volume_multiplies_all_stages() {
    let fx = Fixture::new();
    let stream = fx.stream(Direction::Out, 2, 2);
    stream.set_system_volume(0.5);
    stream.set_device_volume(0.5);
    fx.volume.set(0.5);
    submit_stereo(&stream, 1, 8000, -8000);
    assert_eq!(render(&stream, 1), vec![1000, -1000]);
}

#[test]
fn test_output_magnitude_bounded_by_volume() {
    let fx = Fixture::new();
    let stream = fx.stream(Direction::Out, 2, 2);
    let input: Vec<i16> = (-50..50).map(|i| (i * 655) as i16).collect();

    for volume in [0.0f32, 0.25, 0.7, 1.0] {
        fx.volume.set(volume);
        stream.append_buffer(BufferDescriptor::new(50, 0), &input);
        let out = render(&stream, 50);
        for (&o, &i) in out.iter().zip(input.iter()) {
            assert!((o as f32).abs() <= (i as f32).abs() * volume + f32::EPSILON);
        }
    }
}

#[test]
fn test_boosted_volume_clamps_without_wrapping() {
    let fx = Fixture::new();
    let stream = fx.stream(Direction::Out, 2, 2);
    fx.volume.set(4.0);
    submit_stereo(&stream, 2, 30000, -30000);
    assert_eq!(render(&stream, 2), vec![i16::MAX, i16::MIN, i16::MAX, i16::MIN]);
}

// =============================================================
// Release (capture consumer)
// =============================================================

#[test]
fn test_release_on_empty_returns_zeros() {
    let fx = Fixture::new();
    let stream = fx.stream(Direction::In, 2, 2);
    let samples = stream.release_buffer(128);
    assert_eq!(samples.len(), 128);
    assert!(samples.iter().all(|&s| s == 0));
}

#[test]
fn test_release_applies_capture_gain_and_pads() {
    let fx = Fixture::new();
    let stream = fx.stream(Direction::In, 2, 2);
    stream.append_buffer(BufferDescriptor::new(2, 0), &[]);
    stream.process_audio_in(&[100, -100, 5000, -5000], 2);

    let samples = stream.release_buffer(6);
    assert_eq!(samples, vec![800, -800, i16::MAX, i16::MIN, 0, 0]);
}

// =============================================================
// Queue reset
// =============================================================

#[test]
fn test_clear_queue_resets_everything() {
    let fx = Fixture::new();
    let stream = fx.stream(Direction::Out, 2, 2);
    for _ in 0..3 {
        submit_stereo(&stream, 8, 1, 1);
    }
    // Start playing the first buffer
    render(&stream, 4);
    assert!(!stream.playing_buffer().consumed);

    stream.clear_queue();
    assert_eq!(stream.queue_size(), 0);
    assert_eq!(stream.buffered_samples(), 0);
    let playing = stream.playing_buffer();
    assert!(playing.consumed);
    assert_eq!(playing.frames, 0);
    assert_eq!(playing.frames_played, 0);
}

// =============================================================
// Capture callback
// =============================================================

#[test]
fn test_capture_paused_consumes_nothing() {
    let fx = Fixture::new();
    let stream = fx.stream(Direction::In, 2, 2);
    stream.append_buffer(BufferDescriptor::new(2, 0), &[]);
    fx.clock.set_paused(true);
    stream.process_audio_in(&[1, 2, 3, 4], 2);
    assert_eq!(stream.queue_size(), 1);
    assert_eq!(stream.buffered_samples(), 0);
}

#[test]
fn test_capture_spans_descriptors() {
    let fx = Fixture::new();
    let stream = fx.stream(Direction::In, 2, 2);
    stream.append_buffer(BufferDescriptor::new(1, 1), &[]);
    stream.append_buffer(BufferDescriptor::new(2, 2), &[]);

    stream.process_audio_in(&[1, 2, 3, 4, 5, 6], 3);
    assert_eq!(stream.queue_size(), 0);
    assert_eq!(stream.buffered_samples(), 6);
    let playing = stream.playing_buffer();
    assert_eq!(playing.tag, 2);
    assert!(playing.consumed);
    assert_eq!(stream.last_frame(), vec![5, 6]);
    assert_eq!(stream.stats().buffers_completed, 2);
}

#[test]
fn test_capture_underrun_pushes_unaccounted() {
    let fx = Fixture::new();
    let stream = fx.stream(Direction::In, 2, 2);
    stream.append_buffer(BufferDescriptor::new(1, 0), &[]);

    stream.process_audio_in(&[1, 2, 3, 4, 5, 6], 3);
    // One accounted frame plus two raw frames
    assert_eq!(stream.buffered_samples(), 6);
    let stats = stream.stats();
    assert_eq!(stats.captured_frames, 1);
    assert_eq!(stats.unaccounted_frames, 2);
}

// =============================================================
// Playback callback
// =============================================================

#[test]
fn test_render_paused_is_silent_and_keeps_queue() {
    let fx = Fixture::new();
    let stream = fx.stream(Direction::Out, 2, 2);
    submit_stereo(&stream, 4, 100, 100);
    fx.clock.set_paused(true);

    assert_eq!(render(&stream, 4), vec![0; 8]);
    assert_eq!(stream.queue_size(), 1);
    assert_eq!(stream.buffered_samples(), 8);
}

#[test]
fn test_render_underrun_repeats_last_frame() {
    let fx = Fixture::new();
    let stream = fx.stream(Direction::Out, 2, 2);
    submit_stereo(&stream, 2, 0, 0);
    stream.append_buffer(BufferDescriptor::new(1, 0), &[1234, -4321]);
    render(&stream, 3);
    assert_eq!(stream.last_frame(), vec![1234, -4321]);

    // Queue is empty now: pad with the cached frame, not silence
    let out = render(&stream, 4);
    assert_eq!(out, vec![1234, -4321, 1234, -4321, 1234, -4321, 1234, -4321]);
    assert_eq!(stream.stats().padded_frames, 4);
}

#[test]
fn test_render_partial_underrun_pads_remainder() {
    let fx = Fixture::new();
    let stream = fx.stream(Direction::Out, 2, 2);
    stream.append_buffer(BufferDescriptor::new(2, 0), &[1, 2, 3, 4]);

    // Padding repeats the frame cached by the previous callback
    let out = render(&stream, 4);
    assert_eq!(out, vec![1, 2, 3, 4, 0, 0, 0, 0]);
    assert_eq!(stream.last_frame(), vec![0, 0]);
    // Only real frames count towards position
    assert_eq!(stream.position_window().max_played, 2);
}

#[test]
fn test_render_spans_descriptors_and_frees_queue() {
    let fx = Fixture::new();
    let stream = fx.stream(Direction::Out, 2, 2);
    stream.append_buffer(BufferDescriptor::new(1, 1), &[1, 1]);
    stream.append_buffer(BufferDescriptor::new(1, 2), &[2, 2]);
    stream.append_buffer(BufferDescriptor::new(1, 3), &[3, 3]);

    assert_eq!(render(&stream, 2), vec![1, 1, 2, 2]);
    assert_eq!(stream.queue_size(), 1);
    assert_eq!(render(&stream, 1), vec![3, 3]);
    assert_eq!(stream.queue_size(), 0);
}

#[test]
fn test_render_missing_ring_data_is_silence() {
    let fx = Fixture::new();
    let stream = fx.stream(Direction::Out, 2, 2);
    // Descriptor claims more frames than were supplied
    stream.append_buffer(BufferDescriptor::new(3, 0), &[7, 7]);
    assert_eq!(render(&stream, 3), vec![7, 7, 0, 0, 0, 0]);
}

#[test]
fn test_render_clamps_to_output_length() {
    let fx = Fixture::new();
    let stream = fx.stream(Direction::Out, 2, 2);
    submit_stereo(&stream, 8, 5, 5);
    let mut out = vec![0i16; 5];
    stream.process_audio_out_and_render(&mut out, 8);
    // Two whole frames fit; the trailing sample is untouched
    assert_eq!(out, vec![5, 5, 5, 5, 0]);
    assert_eq!(stream.position_window().max_played, 2);
}

#[test]
fn test_render_zero_frames_is_noop() {
    let fx = Fixture::new();
    let stream = fx.stream(Direction::Out, 2, 2);
    submit_stereo(&stream, 1, 5, 5);
    stream.process_audio_out_and_render(&mut [], 0);
    assert_eq!(stream.queue_size(), 1);
}

// =============================================================
// Position estimation
// =============================================================

#[test]
fn test_expected_played_non_decreasing_and_bounded() {
    let fx = Fixture::new();
    let stream = fx.stream(Direction::Out, 2, 2);
    let period = TARGET_SAMPLE_COUNT as usize;
    let mut last = 0;

    for _ in 0..10 {
        submit_stereo(&stream, period, 1, 1);
        render(&stream, period);
        for _ in 0..5 {
            let estimate = stream.expected_played_sample_count();
            assert!(estimate >= last);
            assert!(
                estimate <= stream.position_window().max_played + 3 * TARGET_SAMPLE_COUNT as u64
            );
            last = estimate;
            fx.clock.advance_ns(callback_period_ns() / 5);
        }
    }
}

#[test]
fn test_expected_played_ignores_padding() {
    let fx = Fixture::new();
    let stream = fx.stream(Direction::Out, 2, 2);
    render(&stream, 240);
    fx.clock.advance_ns(callback_period_ns());
    assert_eq!(stream.expected_played_sample_count(), LATENCY_MARGIN_SAMPLES);
}

// =============================================================
// Backpressure
// =============================================================

#[test]
fn test_wait_free_space_released_by_callback() {
    let fx = Fixture::new();
    let stream = Arc::new(fx.stream_with_queue(Direction::Out, 2, 2, 2));
    for _ in 0..8 {
        submit_stereo(&stream, 1, 1, 1);
    }

    let (tx, rx) = mpsc::channel();
    let producer = {
        let stream = stream.clone();
        std::thread::spawn(move || {
            stream.wait_free_space(&CancelToken::new());
            tx.send(stream.queue_size()).unwrap();
        })
    };

    // Backlog of 8 > 2 + 3: the producer stays parked
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

    // Drain until the queue drops below the limit
    for _ in 0..7 {
        render(&stream, 1);
    }
    let remaining = rx
        .recv_timeout(Duration::from_secs(2))
        .expect("producer should wake once the callback frees space");
    assert!(remaining < 2);
    producer.join().unwrap();
}

#[test]
fn test_wait_free_space_cancellation_is_prompt() {
    let fx = Fixture::new();
    let stream = Arc::new(fx.stream_with_queue(Direction::Out, 2, 2, 1));
    for _ in 0..32 {
        submit_stereo(&stream, 1, 1, 1);
    }

    let token = CancelToken::new();
    let (tx, rx) = mpsc::channel();
    let producer = {
        let stream = stream.clone();
        let token = token.clone();
        std::thread::spawn(move || {
            stream.wait_free_space(&token);
            tx.send(Instant::now()).unwrap();
        })
    };

    assert!(rx.recv_timeout(Duration::from_millis(30)).is_err());
    let cancelled_at = Instant::now();
    token.cancel();
    let released_at = rx
        .recv_timeout(Duration::from_secs(2))
        .expect("cancellation should release the producer");
    assert!(released_at.duration_since(cancelled_at) < Duration::from_millis(500));
    assert_eq!(stream.queue_size(), 32);
    producer.join().unwrap();
}

#[test]
fn test_backlog_at_slack_returns_after_bounded_wait() {
    let fx = Fixture::new();
    let stream = Arc::new(fx.stream_with_queue(Direction::Out, 2, 2, 2));
    for _ in 0..2 + ESCALATION_SLACK {
        submit_stereo(&stream, 1, 1, 1);
    }

    let (producer, rx) = spawn_producer(&stream, &CancelToken::new());
    let waited = rx
        .recv_timeout(Duration::from_secs(2))
        .expect("a backlog of exactly max + slack must not escalate");
    assert!(waited >= FREE_SPACE_WAIT);
    assert_eq!(stream.queue_size(), 2 + ESCALATION_SLACK);
    producer.join().unwrap();
}

#[test]
fn test_backlog_past_slack_escalates() {
    let fx = Fixture::new();
    let stream = Arc::new(fx.stream_with_queue(Direction::Out, 2, 2, 2));
    for _ in 0..2 + ESCALATION_SLACK + 1 {
        submit_stereo(&stream, 1, 1, 1);
    }

    let token = CancelToken::new();
    let (producer, rx) = spawn_producer(&stream, &token);
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

    token.cancel();
    rx.recv_timeout(Duration::from_secs(2)).unwrap();
    producer.join().unwrap();
}

#[test]
fn test_shutdown_render_releases_parked_producer() {
    let fx = Fixture::new();
    let stream = Arc::new(fx.stream_with_queue(Direction::Out, 2, 2, 1));
    for _ in 0..16 {
        submit_stereo(&stream, 1, 1, 1);
    }

    // Never cancelled: only shutdown may release it
    let (producer, rx) = spawn_producer(&stream, &CancelToken::new());
    assert!(rx.recv_timeout(Duration::from_millis(30)).is_err());

    fx.clock.begin_shutdown();
    assert_eq!(render(&stream, 4), vec![0; 8]);
    rx.recv_timeout(Duration::from_secs(2))
        .expect("shutdown should release the producer");
    assert_eq!(stream.queue_size(), 16);
    producer.join().unwrap();
}

#[test]
fn test_shutdown_render_is_silent_and_keeps_queue() {
    let fx = Fixture::new();
    let stream = fx.stream(Direction::Out, 2, 2);
    submit_stereo(&stream, 4, 9, 9);
    fx.clock.begin_shutdown();
    assert_eq!(render(&stream, 4), vec![0; 8]);
    assert_eq!(stream.queue_size(), 1);
}

// =============================================================
// Concurrency
// =============================================================

#[test]
fn test_concurrent_producer_and_callback_preserve_order() {
    let fx = Fixture::new();
    let stream = Arc::new(fx.stream_with_queue(Direction::Out, 2, 2, 4));
    let token = CancelToken::new();
    const BUFFERS: i16 = 200;
    const FRAMES: usize = 16;

    let producer = {
        let stream = stream.clone();
        let token = token.clone();
        std::thread::spawn(move || {
            for n in 0..BUFFERS {
                stream.wait_free_space(&token);
                submit_stereo(&stream, FRAMES, n, -n);
            }
        })
    };

    let mut rendered = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(10);
    while rendered.len() < BUFFERS as usize * FRAMES && Instant::now() < deadline {
        if stream.queue_size() == 0 {
            std::thread::yield_now();
            continue;
        }
        let out = render(&stream, FRAMES);
        rendered.extend(out.chunks_exact(2).map(|f| (f[0], f[1])));
    }
    token.cancel();
    producer.join().unwrap();

    assert_eq!(rendered.len(), BUFFERS as usize * FRAMES);
    for (i, &(left, right)) in rendered.iter().enumerate() {
        let n = (i / FRAMES) as i16;
        assert_eq!((left, right), (n, -n));
    }
}

// =============================================================
// Sinks
// =============================================================

#[test]
fn test_null_sink_tick_drives_streams() {
    let fx = Fixture::new();
    let mut sink = NullSink::new(fx.ctx());
    let out = sink.acquire_stream(2, "render", Direction::Out).unwrap();
    let capture = sink.acquire_stream(2, "mic", Direction::In).unwrap();
    assert_eq!(out.device_channels(), 2);
    assert_eq!(sink.stream_count(), 2);

    submit_stereo(&out, 4, 1, 1);
    capture.append_buffer(BufferDescriptor::new(4, 0), &[]);
    sink.tick(4);

    assert_eq!(out.queue_size(), 0);
    assert_eq!(out.stats().rendered_frames, 4);
    // Null capture feeds silence into the ring
    assert_eq!(capture.release_buffer(8), vec![0; 8]);
    assert_eq!(capture.stats().captured_frames, 4);
}

#[test]
fn test_null_sink_pause_stops_ticks() {
    let fx = Fixture::new();
    let mut sink = NullSink::new(fx.ctx());
    let out = sink.acquire_stream(2, "render", Direction::Out).unwrap();
    submit_stereo(&out, 4, 1, 1);

    sink.pause_streams();
    sink.tick(4);
    assert_eq!(out.queue_size(), 1);

    sink.unpause_streams();
    sink.tick(4);
    assert_eq!(out.queue_size(), 0);
}

#[test]
fn test_null_sink_volumes_apply_to_streams() {
    let fx = Fixture::new();
    let mut sink = NullSink::new(fx.ctx());
    sink.set_device_volume(0.25);
    let first = sink.acquire_stream(2, "a", Direction::Out).unwrap();
    let second = sink.acquire_stream(6, "b", Direction::Out).unwrap();
    assert_eq!(first.device_volume(), 0.25);

    sink.set_system_volume(0.5);
    assert_eq!(first.system_volume(), 0.5);
    assert_eq!(second.system_volume(), 0.5);
    assert_eq!(second.device_channels(), 6);
}

#[test]
fn test_close_stream_releases_parked_producer() {
    let fx = Fixture::new();
    let mut sink = NullSink::new(fx.ctx().with_max_queue_size(1));
    let stream = sink.acquire_stream(2, "render", Direction::Out).unwrap();
    for _ in 0..16 {
        submit_stereo(&stream, 1, 1, 1);
    }

    // Never cancelled: closing the stream alone must bring it back
    let (producer, rx) = spawn_producer(&stream, &CancelToken::new());
    assert!(rx.recv_timeout(Duration::from_millis(30)).is_err());

    sink.close_stream(&stream);
    rx.recv_timeout(Duration::from_secs(2))
        .expect("close should release the producer");
    assert!(stream.is_closed());
    assert_eq!(sink.stream_count(), 0);
    producer.join().unwrap();

    // Later waits on the closed stream do not park at all
    let (producer, rx) = spawn_producer(&stream, &CancelToken::new());
    let waited = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert!(waited < FREE_SPACE_WAIT);
    producer.join().unwrap();
}

#[test]
fn test_null_sink_driver_advances_streams() {
    let fx = Fixture::new();
    let mut sink = NullSink::with_driver(fx.ctx());
    let stream = sink.acquire_stream(2, "render", Direction::Out).unwrap();
    submit_stereo(&stream, TARGET_SAMPLE_COUNT as usize, 1, 1);

    let deadline = Instant::now() + Duration::from_secs(2);
    while stream.queue_size() > 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(stream.queue_size(), 0);
    drop(sink);
}
