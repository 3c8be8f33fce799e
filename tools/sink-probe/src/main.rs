//! Sink probe - exercise a nether-sink stream against real hardware
//!
//! # Usage
//!
//! ```bash
//! # List output devices
//! sink-probe --list
//!
//! # Play a 440 Hz tone for 5 seconds through the default device
//! sink-probe --frequency 440 --seconds 5
//!
//! # Run a 6-channel stream through the down-mixer
//! sink-probe --channels 6
//!
//! # Meter the default microphone
//! sink-probe --capture --seconds 10
//!
//! # Make the null sink the default from now on
//! sink-probe --sink null --save --list
//! ```
//!
//! Unset flags fall back to the `[audio]` section of the user's config.toml.

mod tone;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::Parser;
use nether_sink_core::config::{self, AudioConfig};
use nether_sink_core::{
    BufferDescriptor, CancelToken, Direction, HostClock, SharedVolume, Sink, SinkContext, SinkId,
    SinkStream, TARGET_SAMPLE_COUNT, create_sink, list_devices,
};
use tracing::info;

use tone::{ToneGenerator, peak};

/// Sink probe - play a test tone or meter capture through a sink stream
#[derive(Parser, Debug)]
#[command(name = "sink-probe")]
#[command(about = "Play a test tone or meter capture through a nether-sink stream")]
#[command(version)]
struct Args {
    /// List devices and exit
    #[arg(long)]
    list: bool,

    /// Use the input direction (meter the microphone instead of playing)
    #[arg(long)]
    capture: bool,

    /// Sink backend: auto, cpal or null
    #[arg(long)]
    sink: Option<SinkId>,

    /// Device name (see --list)
    #[arg(long)]
    device: Option<String>,

    /// Guest channel count: 2 (stereo) or 6 (5.1)
    #[arg(long, default_value_t = 2, value_parser = parse_channels)]
    channels: u32,

    /// Tone frequency in Hz
    #[arg(long, default_value_t = 440.0)]
    frequency: f32,

    /// How long to run
    #[arg(long, default_value_t = 3)]
    seconds: u64,

    /// User volume (above 1.0 boosts)
    #[arg(long)]
    volume: Option<f32>,

    /// Submissions queued before the producer is throttled
    #[arg(long)]
    queue: Option<usize>,

    /// Persist the effective sink settings to config.toml
    #[arg(long)]
    save: bool,
}

/// Guest layouts the mixer knows how to place on a device
fn parse_channels(s: &str) -> Result<u32, String> {
    match s {
        "2" => Ok(2),
        "6" => Ok(6),
        _ => Err(format!("'{}' is not a supported layout (expected 2 or 6)", s)),
    }
}

impl Args {
    fn direction(&self) -> Direction {
        if self.capture {
            Direction::In
        } else {
            Direction::Out
        }
    }

    /// Persisted settings with command-line overrides applied
    fn audio_config(&self) -> AudioConfig {
        let mut audio = config::load().audio;
        if let Some(sink) = self.sink {
            audio.sink = sink;
        }
        if let Some(device) = &self.device {
            match self.direction() {
                Direction::Out => audio.output_device = Some(device.clone()),
                Direction::In => audio.input_device = Some(device.clone()),
            }
        }
        if let Some(volume) = self.volume {
            audio.volume = volume;
        }
        if let Some(queue) = self.queue {
            audio.max_queue_size = queue;
        }
        audio
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let audio = args.audio_config();

    if args.save {
        let config = config::Config { audio: audio.clone() };
        config::save(&config).context("Failed to save config.toml")?;
        info!("Saved sink settings (sink={}, volume={})", audio.sink, audio.volume);
    }

    if args.list {
        print_devices(audio.sink, args.direction());
        return Ok(());
    }

    let clock = Arc::new(HostClock::new());
    let volume = Arc::new(SharedVolume::new(audio.volume));
    let ctx = SinkContext::new(clock.clone(), volume).with_max_queue_size(audio.max_queue_size);

    let mut sink = create_sink(&audio, ctx).context("Failed to create sink")?;
    let stream = sink
        .acquire_stream(args.channels, "sink-probe", args.direction())
        .context("Failed to open stream")?;
    info!(
        "Opened {} stream: {}ch guest, {}ch device, sink={}",
        stream.direction(),
        stream.system_channels(),
        stream.device_channels(),
        audio.sink
    );

    let token = CancelToken::new();
    let duration = Duration::from_secs(args.seconds);
    let result = match args.direction() {
        Direction::Out => play_tone(&stream, &token, args.frequency, duration),
        Direction::In => meter_capture(&stream, &token, duration),
    };

    token.cancel();
    clock.begin_shutdown();
    sink.close_streams();
    info!("Final stats: {:?}", stream.stats());
    result
}

fn print_devices(sink: SinkId, direction: Direction) {
    let devices = list_devices(sink, direction);
    if devices.is_empty() {
        println!("No {} devices for sink '{}'", direction, sink);
        return;
    }
    println!("{} devices ({}):", direction, sink);
    for name in devices {
        println!("  {}", name);
    }
}

/// Producer loop: throttle, synthesize one period, submit
fn play_tone(
    stream: &SinkStream,
    token: &CancelToken,
    frequency: f32,
    duration: Duration,
) -> Result<()> {
    if !(1.0..=20_000.0).contains(&frequency) {
        bail!("Frequency {} Hz is outside 1..=20000", frequency);
    }

    let channels = stream.system_channels() as usize;
    let frames = TARGET_SAMPLE_COUNT as usize;
    let mut tone = ToneGenerator::new(frequency, 0.25);
    let mut samples = Vec::with_capacity(frames * channels);

    let start = Instant::now();
    let mut last_report = start;
    let mut submitted: u64 = 0;

    while start.elapsed() < duration && !token.is_cancelled() {
        stream.wait_free_space(token);
        tone.fill(frames, channels, &mut samples);
        stream.append_buffer(BufferDescriptor::new(frames as u64, submitted), &samples);
        submitted += 1;

        if last_report.elapsed() >= Duration::from_secs(1) {
            last_report = Instant::now();
            info!(
                "submitted={} queued={} expected_played={} stats={:?}",
                submitted,
                stream.queue_size(),
                stream.expected_played_sample_count(),
                stream.stats()
            );
        }
    }
    Ok(())
}

/// Consumer loop: queue one period, wait for the device, read it back
fn meter_capture(stream: &SinkStream, token: &CancelToken, duration: Duration) -> Result<()> {
    let frames = TARGET_SAMPLE_COUNT as usize;
    let wanted = frames * stream.device_channels() as usize;
    let period = Duration::from_millis(5);

    let start = Instant::now();
    let mut last_report = start;
    let mut level: u16 = 0;
    let mut tag: u64 = 0;

    while start.elapsed() < duration && !token.is_cancelled() {
        stream.wait_free_space(token);
        stream.append_buffer(BufferDescriptor::new(frames as u64, tag), &[]);
        tag += 1;

        std::thread::sleep(period);
        let samples = stream.release_buffer(wanted);
        level = level.max(peak(&samples));

        if last_report.elapsed() >= Duration::from_secs(1) {
            last_report = Instant::now();
            info!(
                "peak={:5.1}% queued={} stats={:?}",
                level as f32 * 100.0 / 32768.0,
                stream.queue_size(),
                stream.stats()
            );
            level = 0;
        }
    }
    Ok(())
}
