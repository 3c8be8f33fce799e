//! Host audio sink backed by cpal
//!
//! Each [`SinkStream`] gets its own cpal stream whose data callback calls
//! straight into the stream's render or capture path. Host sample formats
//! are converted at the edge so streams always see interleaved i16.

use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use nether_sink_shared::{Direction, TARGET_SAMPLE_COUNT, TARGET_SAMPLE_RATE};
use tracing::{debug, error, warn};

use super::stream::SinkStream;
use super::{Sink, SinkContext, find_stream, retire_stream};
use crate::error::SinkError;

/// Initial conversion buffer length (grown on first oversized callback)
const CONVERT_BUFFER_LEN: usize = 4096;

struct CpalStream {
    stream: Arc<SinkStream>,
    /// The cpal stream (kept alive while the sink stream is open)
    handle: cpal::Stream,
}

/// Sink driving streams from the host's default (or named) devices
pub struct CpalSink {
    ctx: SinkContext,
    output_device: cpal::Device,
    input_device: Option<cpal::Device>,
    /// Widest output layout the device supports (2 or 6)
    output_channels: u32,
    streams: Vec<CpalStream>,
    device_volume: f32,
    paused: bool,
}

impl CpalSink {
    /// Open the output device and, if available, the input device
    ///
    /// `None` or `"auto"` selects the host default. A missing input device
    /// only disables capture streams.
    pub fn new(
        output_device: Option<&str>,
        input_device: Option<&str>,
        ctx: SinkContext,
    ) -> Result<Self, SinkError> {
        let host = cpal::default_host();
        let output = find_device(&host, Direction::Out, output_device)?;

        let input = match find_device(&host, Direction::In, input_device) {
            Ok(device) => Some(device),
            Err(e) => {
                warn!("{}. Audio capture disabled.", e);
                None
            }
        };

        let output_channels = if max_channels(&output, Direction::Out) >= 6 {
            6
        } else {
            2
        };

        debug!(
            "cpal sink opened: output='{}' ({}ch), input={:?}",
            output.name().unwrap_or_default(),
            output_channels,
            input.as_ref().and_then(|d| d.name().ok())
        );

        Ok(Self {
            ctx,
            output_device: output,
            input_device: input,
            output_channels,
            streams: Vec::new(),
            device_volume: 1.0,
            paused: false,
        })
    }

    fn start(&self, handle: &cpal::Stream) -> Result<(), SinkError> {
        if self.paused {
            handle
                .pause()
                .map_err(|e| SinkError::PlayStream(e.to_string()))
        } else {
            handle
                .play()
                .map_err(|e| SinkError::PlayStream(e.to_string()))
        }
    }
}

/// Names of every device the host exposes for `direction`
pub(super) fn device_names(direction: Direction) -> Result<Vec<String>, SinkError> {
    let host = cpal::default_host();
    Ok(devices(&host, direction)?
        .iter()
        .filter_map(|d| d.name().ok())
        .collect())
}

fn devices(host: &cpal::Host, direction: Direction) -> Result<Vec<cpal::Device>, SinkError> {
    let map_err = |e: cpal::DevicesError| SinkError::DeviceConfig(e.to_string());
    Ok(match direction {
        Direction::Out => host.output_devices().map_err(map_err)?.collect(),
        Direction::In => host.input_devices().map_err(map_err)?.collect(),
    })
}

fn find_device(
    host: &cpal::Host,
    direction: Direction,
    name: Option<&str>,
) -> Result<cpal::Device, SinkError> {
    match name {
        None | Some("auto") | Some("") => match direction {
            Direction::Out => host.default_output_device(),
            Direction::In => host.default_input_device(),
        }
        .ok_or(SinkError::NoDevice(direction)),
        Some(name) => devices(host, direction)?
            .into_iter()
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| SinkError::DeviceNotFound(name.to_string())),
    }
}

fn max_channels(device: &cpal::Device, direction: Direction) -> u16 {
    let channels = match direction {
        Direction::Out => device
            .supported_output_configs()
            .map(|configs| configs.map(|c| c.channels()).max()),
        Direction::In => device
            .supported_input_configs()
            .map(|configs| configs.map(|c| c.channels()).max()),
    };
    match channels {
        Ok(Some(channels)) => channels,
        Ok(None) => 2,
        Err(e) => {
            warn!("Failed to query supported configs: {}", e);
            2
        }
    }
}

fn default_sample_format(
    device: &cpal::Device,
    direction: Direction,
) -> Result<cpal::SampleFormat, SinkError> {
    let config = match direction {
        Direction::Out => device.default_output_config(),
        Direction::In => device.default_input_config(),
    }
    .map_err(|e| SinkError::DeviceConfig(e.to_string()))?;
    Ok(config.sample_format())
}

/// Build a cpal stream for `stream`, preferring one callback per period
fn build_stream(
    device: &cpal::Device,
    stream: &Arc<SinkStream>,
) -> Result<cpal::Stream, SinkError> {
    let direction = stream.direction();
    let format = default_sample_format(device, direction)?;
    let mut config = cpal::StreamConfig {
        channels: stream.device_channels() as u16,
        sample_rate: cpal::SampleRate(TARGET_SAMPLE_RATE),
        buffer_size: cpal::BufferSize::Fixed(TARGET_SAMPLE_COUNT),
    };

    match build_with_format(device, &config, format, stream) {
        Ok(handle) => Ok(handle),
        Err(SinkError::BuildStream(e)) => {
            debug!(
                "Fixed {}-frame buffer rejected ({}); using device default",
                TARGET_SAMPLE_COUNT, e
            );
            config.buffer_size = cpal::BufferSize::Default;
            build_with_format(device, &config, format, stream)
        }
        Err(e) => Err(e),
    }
}

fn build_with_format(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    format: cpal::SampleFormat,
    stream: &Arc<SinkStream>,
) -> Result<cpal::Stream, SinkError> {
    let stream = stream.clone();
    let result = match (stream.direction(), format) {
        (Direction::Out, cpal::SampleFormat::I16) => build_output::<i16>(device, config, stream),
        (Direction::Out, cpal::SampleFormat::F32) => build_output::<f32>(device, config, stream),
        (Direction::Out, cpal::SampleFormat::U16) => build_output::<u16>(device, config, stream),
        (Direction::In, cpal::SampleFormat::I16) => build_input::<i16>(device, config, stream),
        (Direction::In, cpal::SampleFormat::F32) => build_input::<f32>(device, config, stream),
        (Direction::In, cpal::SampleFormat::U16) => build_input::<u16>(device, config, stream),
        (_, format) => return Err(SinkError::UnsupportedSampleFormat(format!("{:?}", format))),
    };
    result.map_err(|e| SinkError::BuildStream(e.to_string()))
}

fn build_output<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    stream: Arc<SinkStream>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<i16>,
{
    let channels = config.channels as usize;
    // Pre-allocated so the callback only resizes on an unexpectedly large period
    let mut convert: Vec<i16> = vec![0; CONVERT_BUFFER_LEN];

    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            if convert.len() < data.len() {
                convert.resize(data.len(), 0);
            }
            let samples = &mut convert[..data.len()];
            stream.process_audio_out_and_render(samples, data.len() / channels);
            for (dst, &src) in data.iter_mut().zip(samples.iter()) {
                *dst = T::from_sample(src);
            }
        },
        |err| error!("Audio output stream error: {}", err),
        None,
    )
}

fn build_input<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    stream: Arc<SinkStream>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    i16: FromSample<T>,
{
    let channels = config.channels as usize;
    let mut convert: Vec<i16> = vec![0; CONVERT_BUFFER_LEN];

    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            if convert.len() < data.len() {
                convert.resize(data.len(), 0);
            }
            let samples = &mut convert[..data.len()];
            for (dst, &src) in samples.iter_mut().zip(data.iter()) {
                *dst = i16::from_sample(src);
            }
            stream.process_audio_in(samples, data.len() / channels);
        },
        |err| error!("Audio input stream error: {}", err),
        None,
    )
}

impl Sink for CpalSink {
    fn acquire_stream(
        &mut self,
        system_channels: u32,
        name: &str,
        direction: Direction,
    ) -> Result<Arc<SinkStream>, SinkError> {
        let (device, device_channels) = match direction {
            Direction::Out => {
                let channels = if system_channels == 6 { self.output_channels } else { 2 };
                (&self.output_device, channels)
            }
            Direction::In => {
                let device = self
                    .input_device
                    .as_ref()
                    .ok_or(SinkError::NoDevice(Direction::In))?;
                let channels = max_channels(device, Direction::In).clamp(1, 2) as u32;
                (device, channels)
            }
        };

        let stream = self
            .ctx
            .open_stream(name, direction, system_channels, device_channels)?;
        stream.set_device_volume(self.device_volume);

        let handle = build_stream(device, &stream)?;
        self.start(&handle)?;

        self.streams.push(CpalStream {
            stream: stream.clone(),
            handle,
        });
        Ok(stream)
    }

    fn close_stream(&mut self, stream: &Arc<SinkStream>) {
        let Some(index) = find_stream(self.streams.iter().map(|s| &s.stream), stream) else {
            warn!("close_stream: '{}' is not owned by this sink", stream.name());
            return;
        };
        let entry = self.streams.remove(index);
        if let Err(e) = entry.handle.pause() {
            debug!("Failed to pause '{}' before close: {}", stream.name(), e);
        }
        drop(entry.handle);
        retire_stream(&entry.stream);
    }

    fn close_streams(&mut self) {
        for entry in self.streams.drain(..) {
            let _ = entry.handle.pause();
            drop(entry.handle);
            retire_stream(&entry.stream);
        }
    }

    fn pause_streams(&mut self) {
        self.paused = true;
        for entry in &self.streams {
            if let Err(e) = entry.handle.pause() {
                warn!("Failed to pause '{}': {}", entry.stream.name(), e);
            }
        }
    }

    fn unpause_streams(&mut self) {
        self.paused = false;
        for entry in &self.streams {
            if let Err(e) = entry.handle.play() {
                warn!("Failed to resume '{}': {}", entry.stream.name(), e);
            }
        }
    }

    fn device_volume(&self) -> f32 {
        self.device_volume
    }

    fn set_device_volume(&mut self, volume: f32) {
        self.device_volume = volume;
        for entry in &self.streams {
            entry.stream.set_device_volume(volume);
        }
    }

    fn set_system_volume(&mut self, volume: f32) {
        for entry in &self.streams {
            entry.stream.set_system_volume(volume);
        }
    }

    fn system_channels(&self) -> u32 {
        self.output_channels
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.close_streams();
    }
}
