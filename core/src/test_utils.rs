//! Shared test utilities for unit tests

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::emulator::{CoreFault, EmulationCore};
use crate::frame::AudioFrame;

// ============================================================================
// Test Core Implementation
// ============================================================================

/// 1 MHz: one microsecond per cycle keeps the arithmetic readable
pub const TEST_CLOCK_RATE: u64 = 1_000_000;
pub const TEST_SAMPLE_RATE: u32 = 48_000;

/// Encoded size of [`TestCore`]'s state
pub const TEST_STATE_SIZE: usize = 8 + 8 + 8 + 4;
const TEST_STATE_TAG: u32 = 0x5445_5354;

/// Knobs and observations shared with a [`TestCore`] that was moved away
#[derive(Debug, Default)]
pub struct TestHooks {
    /// Fail the next `step`
    pub fail_next_step: AtomicBool,
    /// Reject any state passed to `deserialize_state`
    pub reject_states: AtomicBool,
    /// Largest cycle count ever requested from `step`
    pub max_requested: AtomicU64,
    /// Number of `step` calls
    pub steps: AtomicU64,
    /// Sleep this long inside every `step` (simulates a slow core)
    pub step_delay_ms: AtomicU64,
}

/// Deterministic core emitting an ascending ramp
///
/// Sample `n` has value `n % 1000 / 1000` on both channels, so the stream
/// position is recoverable from any frame.
pub struct TestCore {
    cycles: u64,
    sample_acc: u64,
    next_sample: u64,
    sample_rate: u32,
    pub hooks: Arc<TestHooks>,
}

impl TestCore {
    pub fn new() -> Self {
        Self::with_sample_rate(TEST_SAMPLE_RATE)
    }

    pub fn with_sample_rate(sample_rate: u32) -> Self {
        Self {
            cycles: 0,
            sample_acc: 0,
            next_sample: 0,
            sample_rate,
            hooks: Arc::new(TestHooks::default()),
        }
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn samples_emitted(&self) -> u64 {
        self.next_sample
    }

    pub fn ramp_value(index: u64) -> f32 {
        (index % 1000) as f32 / 1000.0
    }
}

impl EmulationCore for TestCore {
    fn clock_rate(&self) -> u64 {
        TEST_CLOCK_RATE
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn step(&mut self, cycles: u64, audio: &mut Vec<AudioFrame>) -> Result<u64, CoreFault> {
        self.hooks.steps.fetch_add(1, Ordering::Relaxed);
        self.hooks.max_requested.fetch_max(cycles, Ordering::Relaxed);
        let delay = self.hooks.step_delay_ms.load(Ordering::Relaxed);
        if delay > 0 {
            std::thread::sleep(std::time::Duration::from_millis(delay));
        }
        if self.hooks.fail_next_step.swap(false, Ordering::Relaxed) {
            return Err(CoreFault::new("injected step failure"));
        }

        let total = self.sample_acc + cycles * self.sample_rate as u64;
        let samples = total / TEST_CLOCK_RATE;
        self.sample_acc = total % TEST_CLOCK_RATE;
        self.cycles += cycles;

        for _ in 0..samples {
            audio.push(AudioFrame::mono(Self::ramp_value(self.next_sample)));
            self.next_sample += 1;
        }
        Ok(cycles)
    }

    fn serialize_state(&self, out: &mut Vec<u8>) -> Result<(), CoreFault> {
        let io = |e: std::io::Error| CoreFault::new(e.to_string());
        out.write_u64::<LittleEndian>(self.cycles).map_err(io)?;
        out.write_u64::<LittleEndian>(self.sample_acc).map_err(io)?;
        out.write_u64::<LittleEndian>(self.next_sample).map_err(io)?;
        out.write_u32::<LittleEndian>(TEST_STATE_TAG).map_err(io)?;
        Ok(())
    }

    fn deserialize_state(&mut self, state: &[u8]) -> Result<(), CoreFault> {
        if self.hooks.reject_states.load(Ordering::Relaxed) {
            return Err(CoreFault::new("state rejected by test hooks"));
        }
        if state.len() != TEST_STATE_SIZE {
            return Err(CoreFault::new("wrong state size"));
        }
        let io = |e: std::io::Error| CoreFault::new(e.to_string());
        let mut cursor = Cursor::new(state);
        let cycles = cursor.read_u64::<LittleEndian>().map_err(io)?;
        let sample_acc = cursor.read_u64::<LittleEndian>().map_err(io)?;
        let next_sample = cursor.read_u64::<LittleEndian>().map_err(io)?;
        if cursor.read_u32::<LittleEndian>().map_err(io)? != TEST_STATE_TAG {
            return Err(CoreFault::new("bad state tag"));
        }
        self.cycles = cycles;
        self.sample_acc = sample_acc;
        self.next_sample = next_sample;
        Ok(())
    }
}

/// Serialize a core into a fresh buffer
pub fn state_of(core: &impl EmulationCore) -> Vec<u8> {
    let mut out = Vec::new();
    core.serialize_state(&mut out).unwrap();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_emits_ramp_at_rate() {
        let mut core = TestCore::new();
        let mut audio = Vec::new();
        core.step(TEST_CLOCK_RATE / 100, &mut audio).unwrap();
        assert_eq!(audio.len(), 480);
        assert_eq!(audio[2], AudioFrame::mono(0.002));
    }

    #[test]
    fn test_core_state_roundtrip() {
        let mut core = TestCore::new();
        let mut audio = Vec::new();
        core.step(12_345, &mut audio).unwrap();
        let saved = state_of(&core);
        assert_eq!(saved.len(), TEST_STATE_SIZE);

        core.step(99_999, &mut audio).unwrap();
        core.deserialize_state(&saved).unwrap();
        assert_eq!(core.cycles(), 12_345);
    }
}
