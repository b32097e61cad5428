//! Emulation clock driver
//!
//! Converts wall-clock progress into bounded emulation steps. Virtual time is
//! tied to wall time through an anchor pair: at wall time `anchor_wall` the
//! core should have executed `anchor_cycles`, and from there it advances at
//! `clock_rate` cycles per second. Each tick steps the core towards that
//! target (never more than `max_step` at once), resamples whatever audio it
//! produced and pushes it into the ring.
//!
//! When the core falls too far behind (a stall) or runs too far ahead, the
//! anchor is moved instead of catching up: the virtual counter itself is
//! never rewound.

use std::time::Duration;

use tracing::{trace, warn};

use crate::config::BridgeConfig;
use crate::emulator::{CoreFault, EmulationCore};
use crate::error::BridgeError;
use crate::frame::AudioFrame;
use crate::resampler::Resampler;
use crate::ring::FrameProducer;
use crate::snapshot::SnapshotError;
use crate::time::TimeSource;

fn cycles_in(duration: Duration, clock_rate: u64) -> u64 {
    (duration.as_nanos() * clock_rate as u128 / 1_000_000_000) as u64
}

/// Outcome of a single [`ClockDriver::tick`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Cycles the core actually executed
    pub cycles: u64,
    /// Frames generated this tick
    pub produced: usize,
    /// Oldest frames evicted to make room
    pub dropped: usize,
    /// Drift (target minus virtual, in cycles) that forced a resync
    pub resync: Option<i64>,
    /// Ring occupancy after the write
    pub buffered: usize,
}

/// Drives an emulation core from a wall clock into the frame ring
pub struct ClockDriver<C, T> {
    core: C,
    time: T,
    producer: FrameProducer,
    resampler: Resampler,
    clock_rate: u64,
    virtual_cycles: u64,
    anchor_wall: Duration,
    anchor_cycles: u64,
    suspended_at: Option<Duration>,
    max_step_cycles: u64,
    drift_threshold_cycles: u64,
    lead_cycles: u64,
    /// Native-rate audio from the current step
    core_audio: Vec<AudioFrame>,
    /// Output-rate audio waiting to be written
    resampled: Vec<AudioFrame>,
}

impl<C: EmulationCore, T: TimeSource> ClockDriver<C, T> {
    pub fn new(
        core: C,
        time: T,
        producer: FrameProducer,
        config: &BridgeConfig,
        output_rate: u32,
    ) -> Self {
        let clock_rate = core.clock_rate().max(1);
        let core_rate = core.sample_rate();
        let resampler = Resampler::new(core_rate, output_rate);

        let step_frames = cycles_in(config.max_step(), core_rate as u64) as usize;
        let core_capacity = step_frames + config.frames_per_tick(core_rate);
        let out_capacity = resampler.max_output_len(core_capacity);

        let mut driver = Self {
            core,
            time,
            producer,
            resampler,
            clock_rate,
            virtual_cycles: 0,
            anchor_wall: Duration::ZERO,
            anchor_cycles: 0,
            suspended_at: None,
            max_step_cycles: cycles_in(config.max_step(), clock_rate).max(1),
            drift_threshold_cycles: cycles_in(config.drift_threshold(), clock_rate),
            lead_cycles: cycles_in(config.latency(), clock_rate),
            core_audio: Vec::with_capacity(core_capacity),
            resampled: Vec::with_capacity(out_capacity),
        };
        driver.reanchor();
        driver
    }

    /// Virtual cycles the core should have reached at wall time `now`
    fn target_at(&self, now: Duration) -> u64 {
        let elapsed = now.saturating_sub(self.anchor_wall);
        self.anchor_cycles + cycles_in(elapsed, self.clock_rate)
    }

    /// Signed distance from virtual time to the wall-clock target
    pub fn drift_cycles(&self) -> i64 {
        let target = self.target_at(self.time.now()) as i128;
        (target - self.virtual_cycles as i128).clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }

    /// Run one bounded step towards wall time
    ///
    /// Never blocks: a full ring costs its oldest frames, not a wait.
    pub fn tick(&mut self) -> Result<TickReport, CoreFault> {
        let mut report = TickReport::default();
        let now = self.time.now();

        let drift = self.target_at(now) as i128 - self.virtual_cycles as i128;
        if drift.unsigned_abs() > self.drift_threshold_cycles as u128 {
            let drift = drift.clamp(i64::MIN as i128, i64::MAX as i128) as i64;
            warn!(
                "Clock drift {} cycles ({:.1}ms) exceeds threshold, resyncing at cycle {}",
                drift,
                drift as f64 * 1000.0 / self.clock_rate as f64,
                self.virtual_cycles
            );
            self.anchor_wall = now;
            self.anchor_cycles = self.virtual_cycles + self.lead_cycles;
            report.resync = Some(drift);
        }

        let step = self
            .target_at(now)
            .saturating_sub(self.virtual_cycles)
            .min(self.max_step_cycles);

        self.resampled.clear();
        if step > 0 {
            self.core_audio.clear();
            let executed = self.core.step(step, &mut self.core_audio)?;
            self.virtual_cycles += executed;
            report.cycles = executed;

            self.resampler.process(&self.core_audio, &mut self.resampled);
            report.produced = self.resampled.len();
        }

        // Runs on idle ticks too, so a held-back backlog drains
        report.dropped = self.producer.write_evicting(&self.resampled);
        if report.dropped > 0 {
            trace!(
                "Ring full, dropped {} oldest frames ({} held back)",
                report.dropped,
                self.producer.backlog()
            );
        }

        report.buffered = self.producer.available();
        Ok(report)
    }

    /// Re-anchor so the next tick runs `latency` ahead of now
    ///
    /// Used at power-on and after a restore, where any accumulated drift
    /// is meaningless.
    pub fn reanchor(&mut self) {
        let now = self.time.now();
        self.anchor_wall = now;
        self.anchor_cycles = self.virtual_cycles + self.lead_cycles;
        // Still suspended: the pause now counts from the new anchor
        if self.suspended_at.is_some() {
            self.suspended_at = Some(now);
        }
    }

    /// Freeze the wall-clock target (worker pause)
    pub fn suspend(&mut self) {
        if self.suspended_at.is_none() {
            self.suspended_at = Some(self.time.now());
        }
    }

    /// Unfreeze, discounting the time spent suspended
    pub fn resume(&mut self) {
        if let Some(at) = self.suspended_at.take() {
            let paused = self.time.now().saturating_sub(at);
            self.anchor_wall += paused;
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended_at.is_some()
    }

    /// Serialize the core (caller guarantees the worker is parked)
    pub fn capture_state(&self, out: &mut Vec<u8>) -> Result<(), CoreFault> {
        self.core.serialize_state(out)
    }

    /// Swap in a decoded state, rolling back if the core refuses it
    ///
    /// On success the resampler history and the buffered audio are dropped
    /// and the clock is re-anchored: the audio stream restarts from the
    /// restored point.
    pub fn restore_state(&mut self, state: &[u8]) -> Result<(), BridgeError> {
        let mut backup = Vec::new();
        self.core.serialize_state(&mut backup)?;

        if let Err(rejected) = self.core.deserialize_state(state) {
            warn!("Core rejected restored state: {}", rejected);
            self.core.deserialize_state(&backup)?;
            return Err(SnapshotError::Rejected(rejected).into());
        }

        self.resampler.reset();
        self.reanchor();
        self.discard_audio();
        Ok(())
    }

    /// Drop everything buffered so far; audio written afterwards plays next
    ///
    /// Only frames already written are affected, so this is safe to call
    /// while the consumer keeps reading.
    pub fn discard_audio(&mut self) -> usize {
        let discarded = self.producer.discard_buffered();
        if discarded > 0 {
            trace!("Discarded {} buffered frames", discarded);
        }
        discarded
    }

    /// Retune the resampler for a new mixer rate
    pub fn set_output_rate(&mut self, rate: u32) {
        let core_rate = self.core.sample_rate();
        self.resampler.set_rates(core_rate, rate);
    }

    pub fn output_rate(&self) -> u32 {
        self.resampler.output_rate()
    }

    pub fn virtual_cycles(&self) -> u64 {
        self.virtual_cycles
    }

    pub fn clock_rate(&self) -> u64 {
        self.clock_rate
    }

    pub fn drift_threshold_cycles(&self) -> u64 {
        self.drift_threshold_cycles
    }

    pub fn max_step_cycles(&self) -> u64 {
        self.max_step_cycles
    }

    pub fn buffered_frames(&self) -> usize {
        self.producer.available()
    }

    pub fn ring_capacity(&self) -> usize {
        self.producer.capacity()
    }

    pub fn core(&self) -> &C {
        &self.core
    }
}

#[cfg(test)]
mod tests;
