//! Clock worker health monitoring and diagnostics

use std::time::{Duration, Instant};

use tracing::debug;

use crate::stats::{BridgeCounters, BridgeStats};

/// Per-interval view of the worker, logged once per second
#[derive(Debug, Clone)]
pub(crate) struct BridgeMetrics {
    /// Ring capacity in frames, for fill percentages
    ring_capacity: usize,
    /// Current buffer fill level (frames)
    buffer_fill: usize,
    /// Minimum buffer fill level seen this interval
    buffer_fill_min: usize,
    /// Maximum buffer fill level seen this interval
    buffer_fill_max: usize,
    /// Ticks run this interval
    ticks: u64,
    /// Average time to run one tick (microseconds)
    avg_tick_time_us: f64,
    /// Counters at the start of the interval
    last_stats: BridgeStats,
    /// Timestamp of last metrics log
    last_log_time: Instant,
}

impl BridgeMetrics {
    pub fn new(ring_capacity: usize) -> Self {
        Self {
            ring_capacity: ring_capacity.max(1),
            buffer_fill: 0,
            buffer_fill_min: ring_capacity,
            buffer_fill_max: 0,
            ticks: 0,
            avg_tick_time_us: 0.0,
            last_stats: BridgeStats::default(),
            last_log_time: Instant::now(),
        }
    }

    /// Update buffer fill metrics
    pub fn update_buffer_fill(&mut self, fill: usize) {
        self.buffer_fill = fill;
        self.buffer_fill_min = self.buffer_fill_min.min(fill);
        self.buffer_fill_max = self.buffer_fill_max.max(fill);
    }

    pub fn record_tick(&mut self, elapsed: Duration) {
        self.ticks += 1;
        let elapsed_us = elapsed.as_micros() as f64;
        self.avg_tick_time_us = 0.1 * elapsed_us + 0.9 * self.avg_tick_time_us;
    }

    /// Log metrics if enough time has passed (every 1 second)
    pub fn maybe_log(&mut self, counters: &BridgeCounters) {
        if self.last_log_time.elapsed().as_secs() < 1 {
            return;
        }

        let stats = counters.snapshot();
        let delta = stats.since(&self.last_stats);
        let pct = |frames: usize| frames as f64 / self.ring_capacity as f64 * 100.0;

        debug!(
            "BRIDGE METRICS: buf={:.1}% (min={:.1}%, max={:.1}%), ticks={}, \
             produced={}, rendered={}, underruns={} ({} frames), overruns={} ({} frames), \
             resyncs={}, cycles={}, avg_tick={:.2}us",
            pct(self.buffer_fill),
            pct(self.buffer_fill_min),
            pct(self.buffer_fill_max),
            self.ticks,
            delta.frames_produced,
            delta.frames_rendered,
            delta.underruns,
            delta.underrun_frames,
            delta.overruns,
            delta.dropped_frames,
            delta.drift_resyncs,
            stats.virtual_cycles,
            self.avg_tick_time_us
        );

        // Reset for next interval (show per-second rates)
        self.ticks = 0;
        self.buffer_fill_min = self.buffer_fill;
        self.buffer_fill_max = self.buffer_fill;
        self.last_stats = stats;
        self.last_log_time = Instant::now();
    }
}
