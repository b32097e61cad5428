//! Lock-free counters shared by the clock worker and the render callback
//!
//! Underruns, overruns and drift resyncs are recovered locally and only
//! reported here; none of them is ever an error.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters (relaxed atomics, written from both cadences)
#[derive(Debug, Default)]
pub struct BridgeCounters {
    underruns: AtomicU64,
    underrun_frames: AtomicU64,
    overruns: AtomicU64,
    dropped_frames: AtomicU64,
    drift_resyncs: AtomicU64,
    frames_produced: AtomicU64,
    frames_rendered: AtomicU64,
    virtual_cycles: AtomicU64,
}

impl BridgeCounters {
    /// A render call came up `frames` short
    pub fn record_underrun(&self, frames: usize) {
        self.underruns.fetch_add(1, Ordering::Relaxed);
        self.underrun_frames
            .fetch_add(frames as u64, Ordering::Relaxed);
    }

    /// The producer had to drop `frames` that did not fit
    pub fn record_overrun(&self, frames: usize) {
        self.overruns.fetch_add(1, Ordering::Relaxed);
        self.dropped_frames
            .fetch_add(frames as u64, Ordering::Relaxed);
    }

    pub fn record_resync(&self) {
        self.drift_resyncs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_produced(&self, frames: usize) {
        self.frames_produced
            .fetch_add(frames as u64, Ordering::Relaxed);
    }

    pub fn add_rendered(&self, frames: usize) {
        self.frames_rendered
            .fetch_add(frames as u64, Ordering::Relaxed);
    }

    pub fn set_virtual_cycles(&self, cycles: u64) {
        self.virtual_cycles.store(cycles, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BridgeStats {
        BridgeStats {
            underruns: self.underruns.load(Ordering::Relaxed),
            underrun_frames: self.underrun_frames.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            dropped_frames: self.dropped_frames.load(Ordering::Relaxed),
            drift_resyncs: self.drift_resyncs.load(Ordering::Relaxed),
            frames_produced: self.frames_produced.load(Ordering::Relaxed),
            frames_rendered: self.frames_rendered.load(Ordering::Relaxed),
            virtual_cycles: self.virtual_cycles.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`BridgeCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    /// Render calls that had to pad with silence
    pub underruns: u64,
    /// Total frames of padding emitted
    pub underrun_frames: u64,
    /// Ticks that evicted old audio to make room
    pub overruns: u64,
    /// Total frames evicted on overrun
    pub dropped_frames: u64,
    /// Times virtual time was snapped back to wall time
    pub drift_resyncs: u64,
    /// Frames the driver generated at the output rate
    pub frames_produced: u64,
    /// Real (non-padding) frames handed to the mixer
    pub frames_rendered: u64,
    /// Emulated cycles executed so far
    pub virtual_cycles: u64,
}

impl BridgeStats {
    /// Counter deltas since `earlier` (gauges are taken from `self`)
    pub fn since(&self, earlier: &BridgeStats) -> BridgeStats {
        BridgeStats {
            underruns: self.underruns.saturating_sub(earlier.underruns),
            underrun_frames: self.underrun_frames.saturating_sub(earlier.underrun_frames),
            overruns: self.overruns.saturating_sub(earlier.overruns),
            dropped_frames: self.dropped_frames.saturating_sub(earlier.dropped_frames),
            drift_resyncs: self.drift_resyncs.saturating_sub(earlier.drift_resyncs),
            frames_produced: self.frames_produced.saturating_sub(earlier.frames_produced),
            frames_rendered: self.frames_rendered.saturating_sub(earlier.frames_rendered),
            virtual_cycles: self.virtual_cycles,
        }
    }
}
