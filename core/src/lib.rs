//! emubridge core - emulation-to-mixer audio bridge
//!
//! Runs a deterministic emulation core against wall-clock time and streams
//! its audio into a host mixer's pull-based render callback.
//!
//! # Architecture
//!
//! - [`EmulationCore`] - Capability trait implemented by the opaque core
//! - [`ClockDriver`] - Bounded stepping, drift tracking and resynchronization
//! - [`FrameRing`] - Lock-free SPSC ring between the worker and the mixer
//! - [`Resampler`] - Native-rate to mixer-rate conversion with phase continuity
//! - [`AudioSource`] - The render callback handed to the host mixer
//! - [`SnapshotCodec`] - Versioned, compressed, checksummed save states
//! - [`BridgeSession`] - Owns one core, its worker thread and its audio source

pub mod clock;
pub mod codec;
pub mod config;
pub mod emulator;
pub mod error;
pub mod frame;
mod metrics;
pub mod resampler;
pub mod ring;
pub mod session;
pub mod shared;
pub mod snapshot;
pub mod source;
pub mod stats;
#[cfg(test)]
pub mod test_utils;
pub mod time;
pub mod tone;
mod worker;

pub use clock::{ClockDriver, TickReport};
pub use codec::{CodecError, CodecId, Lz4Codec, StoredCodec, StreamCodec};
pub use config::{AudioConfig, BridgeConfig, ClockConfig, ConfigError, IdleAudio, SnapshotConfig};
pub use emulator::{CoreFault, EmulationCore};
pub use error::BridgeError;
pub use frame::{AudioFrame, ChannelLayout, MixerRequest, OutputSample};
pub use resampler::Resampler;
pub use ring::{FrameConsumer, FrameProducer, FrameRing};
pub use session::BridgeSession;
pub use shared::{SessionEvent, SessionStatus};
pub use snapshot::{MAX_STATE_SIZE, SNAPSHOT_FORMAT_VERSION, SnapshotBlob, SnapshotCodec, SnapshotError};
pub use source::{AudioSource, WhiteNoise};
pub use stats::BridgeStats;
pub use time::{ManualClock, MonotonicClock, TimeSource};
pub use tone::ToneCore;
