//! Test tone generation and level metering

use std::f32::consts::TAU;

use nether_sink_core::{Channels, TARGET_SAMPLE_RATE};

/// Sine oscillator writing interleaved i16 frames
pub struct ToneGenerator {
    phase: f32,
    step: f32,
    amplitude: f32,
}

impl ToneGenerator {
    /// `frequency` in Hz at [`TARGET_SAMPLE_RATE`], `amplitude` in 0.0..=1.0
    pub fn new(frequency: f32, amplitude: f32) -> Self {
        Self {
            phase: 0.0,
            step: TAU * frequency / TARGET_SAMPLE_RATE as f32,
            amplitude: amplitude.clamp(0.0, 1.0) * i16::MAX as f32,
        }
    }

    /// Fill `frames` frames of `channels` channels
    ///
    /// The tone goes to the front pair only; surround channels stay silent so
    /// a 6-channel run exercises the down-mix weights.
    pub fn fill(&mut self, frames: usize, channels: usize, out: &mut Vec<i16>) {
        out.clear();
        out.resize(frames * channels, 0);
        for frame in out.chunks_exact_mut(channels) {
            let sample = (self.phase.sin() * self.amplitude) as i16;
            frame[Channels::FrontLeft.index()] = sample;
            if channels > 1 {
                frame[Channels::FrontRight.index()] = sample;
            }
            self.phase = (self.phase + self.step) % TAU;
        }
    }
}

/// Peak absolute sample in `samples`, 0 for an empty slice
pub fn peak(samples: &[i16]) -> u16 {
    samples.iter().map(|s| s.unsigned_abs()).max().unwrap_or(0)
}
