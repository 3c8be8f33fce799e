//! Interleaved PCM16 channel layout

use serde::{Deserialize, Serialize};

/// Channel slot within one interleaved 6-channel frame.
///
/// Stereo streams use only `FrontLeft` and `FrontRight`.
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channels {
    FrontLeft = 0,
    FrontRight = 1,
    Center = 2,
    Lfe = 3,
    BackLeft = 4,
    BackRight = 5,
}

impl Channels {
    /// Offset of this channel within an interleaved frame
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Direction of a stream relative to the host device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Playback: guest renders, device plays
    #[default]
    Out,
    /// Capture: device records, guest consumes
    In,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Out => write!(f, "out"),
            Self::In => write!(f, "in"),
        }
    }
}
