//! Audio frame and mixer request types

/// One stereo sample pair produced by the emulation core
///
/// Frames are the unit of every buffer in the bridge: the core emits them,
/// the resampler interpolates between them and the ring stores them.
#[derive(Clone, Copy, Default, Debug, PartialEq)]
#[repr(C)]
pub struct AudioFrame {
    pub left: f32,
    pub right: f32,
}

// SAFETY: AudioFrame is #[repr(C)] with two f32 fields and no padding.
// All bit patterns are valid f32 values.
unsafe impl bytemuck::Zeroable for AudioFrame {}
unsafe impl bytemuck::Pod for AudioFrame {}

impl AudioFrame {
    pub const SILENCE: Self = Self::new(0.0, 0.0);

    pub const fn new(left: f32, right: f32) -> Self {
        Self { left, right }
    }

    /// Same value on both channels
    pub const fn mono(value: f32) -> Self {
        Self::new(value, value)
    }

    /// Linear interpolation towards `other` (`t` in 0.0..=1.0)
    #[inline]
    pub fn lerp(self, other: Self, t: f32) -> Self {
        Self {
            left: self.left + (other.left - self.left) * t,
            right: self.right + (other.right - self.right) * t,
        }
    }

    #[inline]
    pub fn scale(self, gain: f32) -> Self {
        Self::new(self.left * gain, self.right * gain)
    }

    /// Average of both channels
    #[inline]
    pub fn downmix(self) -> f32 {
        (self.left + self.right) * 0.5
    }

    /// View a frame slice as interleaved L/R samples
    pub fn as_interleaved(frames: &[Self]) -> &[f32] {
        bytemuck::cast_slice(frames)
    }
}

/// Channel layout requested by the host mixer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelLayout {
    Mono,
    #[default]
    Stereo,
}

impl ChannelLayout {
    pub const fn channels(self) -> usize {
        match self {
            Self::Mono => 1,
            Self::Stereo => 2,
        }
    }

    /// Layout for a device channel count, if supported
    pub const fn from_channels(channels: u16) -> Option<Self> {
        match channels {
            1 => Some(Self::Mono),
            2 => Some(Self::Stereo),
            _ => None,
        }
    }
}

/// A single pull from the host mixer's render callback
///
/// Ephemeral: built per callback and never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MixerRequest {
    /// Frames to produce (one frame = one sample per channel)
    pub frame_count: usize,
    /// Rate the mixer is currently running at
    pub sample_rate: u32,
    /// Interleaving of the output slice
    pub layout: ChannelLayout,
}

impl MixerRequest {
    pub fn new(frame_count: usize, sample_rate: u32, layout: ChannelLayout) -> Self {
        Self {
            frame_count,
            sample_rate,
            layout,
        }
    }

    /// Number of interleaved samples the output slice must hold
    pub fn sample_count(&self) -> usize {
        self.frame_count * self.layout.channels()
    }
}

/// Sample formats the render callback can write
pub trait OutputSample: Copy + Send + 'static {
    const SILENCE: Self;

    fn from_f32(value: f32) -> Self;
}

impl OutputSample for f32 {
    const SILENCE: Self = 0.0;

    #[inline]
    fn from_f32(value: f32) -> Self {
        value
    }
}

impl OutputSample for i16 {
    const SILENCE: Self = 0;

    #[inline]
    fn from_f32(value: f32) -> Self {
        (value * 32767.0).clamp(-32768.0, 32767.0) as i16
    }
}

impl OutputSample for u16 {
    // 0x8000 is silence for unsigned audio
    const SILENCE: Self = 32768;

    #[inline]
    fn from_f32(value: f32) -> Self {
        (value * 32767.0 + 32768.0).clamp(0.0, 65535.0) as u16
    }
}
