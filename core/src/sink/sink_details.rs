//! Sink selection by id

use std::str::FromStr;

use nether_sink_shared::Direction;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::cpal_sink::{self, CpalSink};
use super::null_sink::NullSink;
use super::{Sink, SinkContext};
use crate::config::AudioConfig;
use crate::error::SinkError;

/// Which sink backend to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SinkId {
    /// cpal if a device opens, otherwise a self-driven null sink
    #[default]
    Auto,
    /// Host audio through cpal
    Cpal,
    /// No device; audio is discarded
    Null,
}

impl FromStr for SinkId {
    type Err = SinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpal" => Ok(Self::Cpal),
            "null" | "none" => Ok(Self::Null),
            _ => Err(SinkError::UnknownSink(s.to_string())),
        }
    }
}

impl std::fmt::Display for SinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpal => write!(f, "cpal"),
            Self::Null => write!(f, "null"),
        }
    }
}

/// Create the sink named by `config.sink`
///
/// `Auto` never fails: if the host device cannot be opened it falls back to
/// a [`NullSink`] with its own driver thread so producers keep advancing.
pub fn create_sink(config: &AudioConfig, ctx: SinkContext) -> Result<Box<dyn Sink>, SinkError> {
    let output = config.output_device.as_deref();
    let input = config.input_device.as_deref();

    match config.sink {
        SinkId::Cpal => Ok(Box::new(CpalSink::new(output, input, ctx)?)),
        SinkId::Null => Ok(Box::new(NullSink::with_driver(ctx))),
        SinkId::Auto => match CpalSink::new(output, input, ctx.clone()) {
            Ok(sink) => Ok(Box::new(sink)),
            Err(e) => {
                warn!("Failed to open audio device: {}. Audio disabled.", e);
                Ok(Box::new(NullSink::with_driver(ctx)))
            }
        },
    }
}

/// Device names available to `id` for `direction`
///
/// The null sink has no devices; host enumeration errors yield an empty list.
pub fn list_devices(id: SinkId, direction: Direction) -> Vec<String> {
    match id {
        SinkId::Null => Vec::new(),
        SinkId::Auto | SinkId::Cpal => cpal_sink::device_names(direction).unwrap_or_else(|e| {
            warn!("Failed to enumerate {} devices: {}", direction, e);
            Vec::new()
        }),
    }
}
