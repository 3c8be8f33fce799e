//! Channel remixing and volume scaling for submitted PCM16
//!
//! Everything here is a pure function over interleaved samples. Every
//! arithmetic stage clamps back into the i16 range, so a hot submission can
//! distort but never wrap around.

use std::ops::{Add, Mul};

use nether_sink_shared::Channels;

/// Per-channel weights folding 5.1 into stereo: front, center, LFE, back
const DOWNMIX_COEFFICIENTS: [f32; 4] = [1.0, 0.707, 0.251, 0.707];

/// Map a user volume to the gain actually applied
///
/// Unity and below are linear. Boost above 1.0 is loudness-compensated so
/// the slider does not blow straight past clipping.
#[inline]
pub fn perceptual_volume(volume: f32) -> f32 {
    if volume > 1.0 {
        0.6 + 20.0 * volume.log10()
    } else {
        volume
    }
}

/// Signed fixed-point number with 15 fractional bits in an i64
///
/// Leaves 49 integer bits, so the four-term downmix sum of i16 inputs can
/// be accumulated before scaling without losing precision. Rounding is
/// integer-only and independent of the platform's float behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct FixedPoint(i64);

impl FixedPoint {
    pub const FRACTIONAL_BITS: u32 = 15;
    const ONE: i64 = 1 << Self::FRACTIONAL_BITS;
    const HALF: i64 = 1 << (Self::FRACTIONAL_BITS - 1);

    #[inline]
    pub const fn from_int(value: i64) -> Self {
        Self(value << Self::FRACTIONAL_BITS)
    }

    #[inline]
    pub fn from_f32(value: f32) -> Self {
        Self((value as f64 * Self::ONE as f64).round() as i64)
    }

    #[inline]
    pub const fn raw(self) -> i64 {
        self.0
    }

    /// Round to the nearest integer, halves away from zero
    #[inline]
    pub const fn round_to_int(self) -> i64 {
        if self.0 >= 0 {
            (self.0 + Self::HALF) >> Self::FRACTIONAL_BITS
        } else {
            -((-self.0 + Self::HALF) >> Self::FRACTIONAL_BITS)
        }
    }
}

impl Add for FixedPoint {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl Mul for FixedPoint {
    type Output = Self;

    #[inline]
    fn mul(self, rhs: Self) -> Self {
        let wide = (self.0 as i128 * rhs.0 as i128) >> Self::FRACTIONAL_BITS;
        Self(wide.clamp(i64::MIN as i128, i64::MAX as i128) as i64)
    }
}

impl Mul<f32> for FixedPoint {
    type Output = Self;

    #[inline]
    fn mul(self, rhs: f32) -> Self {
        self * Self::from_f32(rhs)
    }
}

#[inline]
fn clamp_i16(value: i64) -> i16 {
    value.clamp(i16::MIN as i64, i16::MAX as i64) as i16
}

/// Scale one sample by `volume`, truncating toward zero and clamping
#[inline]
pub fn scale_sample(sample: i16, volume: f32) -> i16 {
    clamp_i16((sample as f32 * volume) as i64)
}

/// Scale every sample in place
pub fn scale_in_place(samples: &mut [i16], volume: f32) {
    for sample in samples.iter_mut() {
        *sample = scale_sample(*sample, volume);
    }
}

/// Fold interleaved 5.1 frames into stereo
///
/// Appends `2 * frames` samples to `out`. A trailing partial frame is ignored.
pub fn downmix_6_to_2(input: &[i16], volume: f32, out: &mut Vec<i16>) {
    let [front, center, lfe, back] = DOWNMIX_COEFFICIENTS.map(FixedPoint::from_f32);
    let volume = FixedPoint::from_f32(volume);

    out.reserve(input.len() / 6 * 2);
    for frame in input.chunks_exact(6) {
        let sample = |ch: Channels| FixedPoint::from_int(frame[ch.index()] as i64);
        let shared = sample(Channels::Center) * center + sample(Channels::Lfe) * lfe;

        let left = sample(Channels::FrontLeft) * front + shared + sample(Channels::BackLeft) * back;
        let right =
            sample(Channels::FrontRight) * front + shared + sample(Channels::BackRight) * back;

        out.push(clamp_i16((left * volume).round_to_int()));
        out.push(clamp_i16((right * volume).round_to_int()));
    }
}

/// Spread stereo frames into 5.1 slots
///
/// Front left/right carry the scaled input; center, LFE and both backs stay
/// silent. This is a placeholder, not spatial upmixing.
pub fn upmix_2_to_6(input: &[i16], volume: f32, out: &mut Vec<i16>) {
    let start = out.len();
    out.resize(start + input.len() / 2 * 6, 0);

    for (frame, slots) in input.chunks_exact(2).zip(out[start..].chunks_exact_mut(6)) {
        slots[Channels::FrontLeft.index()] = scale_sample(frame[0], volume);
        slots[Channels::FrontRight.index()] = scale_sample(frame[1], volume);
    }
}

/// Channel conversion needed between a guest layout and a device layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMix {
    /// 5.1 guest, stereo device
    Downmix6To2,
    /// Stereo guest, 5.1 device
    Upmix2To6,
    /// Same width (or an unsupported pair): volume only
    Direct,
}

impl ChannelMix {
    pub fn select(system_channels: u32, device_channels: u32) -> Self {
        match (system_channels, device_channels) {
            (6, 2) => Self::Downmix6To2,
            (2, 6) => Self::Upmix2To6,
            _ => Self::Direct,
        }
    }
}

/// Convert a submission to the device layout at `volume`
///
/// Returns `samples` untouched when no work is needed, otherwise the
/// converted samples written into `scratch`.
pub fn remix<'a>(
    samples: &'a [i16],
    system_channels: u32,
    device_channels: u32,
    volume: f32,
    scratch: &'a mut Vec<i16>,
) -> &'a [i16] {
    scratch.clear();
    match ChannelMix::select(system_channels, device_channels) {
        ChannelMix::Downmix6To2 => downmix_6_to_2(samples, volume, scratch),
        ChannelMix::Upmix2To6 => upmix_2_to_6(samples, volume, scratch),
        ChannelMix::Direct if volume == 1.0 => return samples,
        ChannelMix::Direct => {
            scratch.extend_from_slice(samples);
            scale_in_place(scratch, volume);
        }
    }
    scratch
}
