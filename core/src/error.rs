//! Error types for sink construction and device negotiation
//!
//! Only setup paths return errors. Once a stream is running, every degraded
//! condition is absorbed by substitution (silence, repeated frames, padding).

use nether_sink_shared::Direction;

/// Errors raised while opening sinks, devices and streams
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("No audio {0} device available")]
    NoDevice(Direction),

    #[error("Audio device '{0}' not found")]
    DeviceNotFound(String),

    #[error("Failed to query device configuration: {0}")]
    DeviceConfig(String),

    #[error("Failed to build audio stream: {0}")]
    BuildStream(String),

    #[error("Failed to start audio stream: {0}")]
    PlayStream(String),

    #[error("Unsupported sample format: {0}")]
    UnsupportedSampleFormat(String),

    #[error("Unsupported channel count: {0} (expected 1-6)")]
    UnsupportedChannels(u32),

    #[error("Unknown sink '{0}' (expected auto, cpal or null)")]
    UnknownSink(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            SinkError::NoDevice(Direction::In).to_string(),
            "No audio in device available"
        );
        assert_eq!(
            SinkError::UnsupportedChannels(8).to_string(),
            "Unsupported channel count: 8 (expected 1-6)"
        );
    }
}
