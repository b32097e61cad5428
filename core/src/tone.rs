//! Reference emulation core
//!
//! A deterministic square-wave voice clocked like an NTSC console CPU.
//! It stands in for a real core in the diagnostic player and in tests: it
//! produces audio at its own native rate, and its whole state is a single
//! POD struct so snapshots are trivially exact.

use crate::emulator::{CoreFault, EmulationCore};
use crate::frame::AudioFrame;

/// NTSC 2A03 CPU clock (Hz)
pub const NTSC_CPU_CLOCK: u64 = 1_789_773;

/// Native output rate of the tone core
pub const TONE_SAMPLE_RATE: u32 = 44_100;

const TONE_STATE_TAG: u32 = 0x544f_4e31; // "TON1"

/// Serialized state of [`ToneCore`]
#[derive(Clone, Copy, Default, Debug, PartialEq)]
#[repr(C)]
struct ToneState {
    /// Total cycles executed
    cycles: u64,
    /// Cycle-to-sample accumulator (units of 1/clock_rate samples)
    sample_acc: u64,
    /// Position within the current square period, in samples
    phase: u32,
    frequency_hz: u32,
    volume: f32,
    /// Format tag, checked on load
    tag: u32,
}

// SAFETY: ToneState is #[repr(C)] with only primitive types (u64, u32, f32)
// laid out without padding.
unsafe impl bytemuck::Zeroable for ToneState {}
unsafe impl bytemuck::Pod for ToneState {}

const TONE_STATE_SIZE: usize = std::mem::size_of::<ToneState>();

#[inline]
fn nyquist(sample_rate: u32) -> u32 {
    (sample_rate / 2).max(1)
}

/// Square-wave reference core
#[derive(Debug, Clone)]
pub struct ToneCore {
    state: ToneState,
    clock_rate: u64,
    sample_rate: u32,
}

impl ToneCore {
    pub fn new(frequency_hz: u32) -> Self {
        Self::with_rates(frequency_hz, NTSC_CPU_CLOCK, TONE_SAMPLE_RATE)
    }

    /// Frequencies are clamped to `1..=sample_rate / 2`
    pub fn with_rates(frequency_hz: u32, clock_rate: u64, sample_rate: u32) -> Self {
        let sample_rate = sample_rate.max(1);
        Self {
            state: ToneState {
                frequency_hz: frequency_hz.clamp(1, nyquist(sample_rate)),
                volume: 0.25,
                tag: TONE_STATE_TAG,
                ..ToneState::default()
            },
            clock_rate: clock_rate.max(1),
            sample_rate,
        }
    }

    /// Output amplitude (default: 0.25)
    pub fn set_volume(&mut self, volume: f32) {
        self.state.volume = volume.clamp(0.0, 1.0);
    }

    pub fn frequency(&self) -> u32 {
        self.state.frequency_hz
    }

    /// Cycles executed since power-on
    pub fn cycles(&self) -> u64 {
        self.state.cycles
    }

    fn half_period(&self) -> u32 {
        (self.sample_rate / 2 / self.state.frequency_hz).max(1)
    }

    fn next_sample(&mut self) -> f32 {
        let half = self.half_period();
        let value = if (self.state.phase / half) % 2 == 0 {
            self.state.volume
        } else {
            -self.state.volume
        };
        self.state.phase = (self.state.phase + 1) % (2 * half);
        value
    }
}

impl EmulationCore for ToneCore {
    fn clock_rate(&self) -> u64 {
        self.clock_rate
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn step(&mut self, cycles: u64, audio: &mut Vec<AudioFrame>) -> Result<u64, CoreFault> {
        let total = self.state.sample_acc + cycles * self.sample_rate as u64;
        let samples = total / self.clock_rate;
        self.state.sample_acc = total % self.clock_rate;
        self.state.cycles += cycles;

        audio.reserve(samples as usize);
        for _ in 0..samples {
            let value = self.next_sample();
            audio.push(AudioFrame::mono(value));
        }
        Ok(cycles)
    }

    fn serialize_state(&self, out: &mut Vec<u8>) -> Result<(), CoreFault> {
        out.extend_from_slice(bytemuck::bytes_of(&self.state));
        Ok(())
    }

    fn deserialize_state(&mut self, state: &[u8]) -> Result<(), CoreFault> {
        if state.len() != TONE_STATE_SIZE {
            return Err(CoreFault::new(format!(
                "tone state is {} bytes, expected {}",
                state.len(),
                TONE_STATE_SIZE
            )));
        }
        let loaded: ToneState = bytemuck::pod_read_unaligned(state);
        if loaded.tag != TONE_STATE_TAG {
            return Err(CoreFault::new("not a tone core state"));
        }
        if loaded.frequency_hz == 0 || loaded.frequency_hz > nyquist(self.sample_rate) {
            return Err(CoreFault::new(format!(
                "tone frequency {} Hz out of range for {} Hz output",
                loaded.frequency_hz, self.sample_rate
            )));
        }
        self.state = loaded;
        Ok(())
    }
}
