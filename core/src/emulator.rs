//! Capability interface of the emulation core
//!
//! The core is an opaque, deterministic component. The bridge never assumes
//! anything about its internals: it can only step it, collect the audio it
//! produced, and serialize/deserialize its state.

use crate::frame::AudioFrame;

/// Unrecoverable error reported by the emulation core
///
/// Fatal to the session when raised from `step`. When raised from
/// `deserialize_state` the bridge rolls the core back to its prior state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("emulation core fault: {0}")]
pub struct CoreFault(pub String);

impl CoreFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// A steppable emulation core producing audio
///
/// `Send` so the session can move it onto the clock worker thread.
pub trait EmulationCore: Send {
    /// Virtual cycles per emulated second
    fn clock_rate(&self) -> u64;

    /// Native rate of the audio the core emits
    fn sample_rate(&self) -> u32;

    /// Advance by (approximately) `cycles` virtual cycles
    ///
    /// Audio produced during the step is appended to `audio`. Returns the
    /// number of cycles actually executed, which may overshoot the request
    /// when the core can only stop on instruction boundaries.
    fn step(&mut self, cycles: u64, audio: &mut Vec<AudioFrame>) -> Result<u64, CoreFault>;

    /// Append the complete core state to `out`
    fn serialize_state(&self, out: &mut Vec<u8>) -> Result<(), CoreFault>;

    /// Replace the core state with a previously serialized one
    fn deserialize_state(&mut self, state: &[u8]) -> Result<(), CoreFault>;
}

impl<C: EmulationCore + ?Sized> EmulationCore for Box<C> {
    fn clock_rate(&self) -> u64 {
        (**self).clock_rate()
    }

    fn sample_rate(&self) -> u32 {
        (**self).sample_rate()
    }

    fn step(&mut self, cycles: u64, audio: &mut Vec<AudioFrame>) -> Result<u64, CoreFault> {
        (**self).step(cycles, audio)
    }

    fn serialize_state(&self, out: &mut Vec<u8>) -> Result<(), CoreFault> {
        (**self).serialize_state(out)
    }

    fn deserialize_state(&mut self, state: &[u8]) -> Result<(), CoreFault> {
        (**self).deserialize_state(state)
    }
}
