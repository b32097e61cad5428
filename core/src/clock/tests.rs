//! Clock driver tests
//!
//! All tests run on a [`ManualClock`] with a 1 MHz [`TestCore`], so one
//! millisecond of wall time is exactly 1000 cycles and 48 frames.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use super::*;
use crate::frame::AudioFrame;
use crate::ring::{FrameConsumer, FrameRing};
use crate::test_utils::{TestCore, TestHooks, state_of};
use crate::time::ManualClock;

const RATE: u32 = 48_000;
const LEAD: u64 = 50_000;
const MAX_STEP: u64 = 50_000;

struct Rig {
    driver: ClockDriver<TestCore, ManualClock>,
    consumer: FrameConsumer,
    time: ManualClock,
    hooks: Arc<TestHooks>,
}

fn rig_with(config: &BridgeConfig, output_rate: u32) -> Rig {
    let core = TestCore::new();
    let hooks = Arc::clone(&core.hooks);
    let time = ManualClock::new();
    let (producer, consumer) = FrameRing::new(config.ring_capacity_frames(output_rate));
    let driver = ClockDriver::new(core, time.clone(), producer, config, output_rate);
    Rig {
        driver,
        consumer,
        time,
        hooks,
    }
}

fn rig() -> Rig {
    rig_with(&BridgeConfig::default(), RATE)
}

fn drain(consumer: &mut FrameConsumer) -> usize {
    let mut buf = [AudioFrame::SILENCE; 1024];
    let mut total = 0;
    loop {
        let n = consumer.read(&mut buf);
        if n == 0 {
            return total;
        }
        total += n;
    }
}

#[test]
fn test_first_tick_prefills_lead() {
    let mut rig = rig();
    let report = rig.driver.tick().unwrap();
    assert_eq!(report.cycles, LEAD);
    // 50ms at 48 kHz, minus the resampler's one-frame lag
    assert_eq!(report.produced, 2_399);
    assert_eq!(report.dropped, 0);
    assert_eq!(report.resync, None);
    assert_eq!(report.buffered, 2_399);
}

#[test]
fn test_virtual_time_tracks_wall_time() {
    let mut rig = rig();
    rig.driver.tick().unwrap();

    for i in 1..=120u64 {
        rig.time.advance(Duration::from_millis(16));
        let report = rig.driver.tick().unwrap();
        assert_eq!(report.resync, None);
        assert_eq!(rig.driver.virtual_cycles(), LEAD + 16_000 * i);
        assert_eq!(rig.driver.drift_cycles(), 0);
        drain(&mut rig.consumer);
    }
}

#[test]
fn test_step_is_clamped_to_max_step() {
    let mut rig = rig();
    rig.driver.tick().unwrap();

    // Behind by 120ms: under the resync threshold, over the step limit
    rig.time.advance(Duration::from_millis(120));
    let first = rig.driver.tick().unwrap();
    assert_eq!(first.cycles, MAX_STEP);
    assert_eq!(first.resync, None);

    let second = rig.driver.tick().unwrap();
    let third = rig.driver.tick().unwrap();
    assert_eq!(second.cycles, MAX_STEP);
    assert_eq!(third.cycles, 20_000);
    assert!(rig.hooks.max_requested.load(Ordering::Relaxed) <= MAX_STEP);
}

#[test]
fn test_stall_resyncs_within_one_buffer() {
    let mut rig = rig();
    rig.driver.tick().unwrap();
    drain(&mut rig.consumer);

    rig.time.advance(Duration::from_secs(2));
    let report = rig.driver.tick().unwrap();
    assert_eq!(report.resync, Some(2_000_000));
    // No catch-up burst: one bounded step
    assert_eq!(report.cycles, MAX_STEP);
    assert!(rig.driver.drift_cycles().unsigned_abs() <= rig.driver.drift_threshold_cycles());

    // Back to steady pacing on the next ticks
    for _ in 0..10 {
        rig.time.advance(Duration::from_millis(16));
        let report = rig.driver.tick().unwrap();
        assert_eq!(report.resync, None);
        assert_eq!(report.cycles, 16_000);
    }
}

#[test]
fn test_virtual_cycles_never_rewind_on_resync() {
    let mut rig = rig();
    rig.driver.tick().unwrap();
    let before = rig.driver.virtual_cycles();
    rig.time.advance(Duration::from_secs(10));
    rig.driver.tick().unwrap();
    assert!(rig.driver.virtual_cycles() > before);
}

#[test]
fn test_full_ring_drops_oldest_and_counts() {
    let mut rig = rig();
    let capacity = rig.driver.ring_capacity();
    let mut produced = 0;
    let mut dropped = 0;
    let mut overrun_ticks = 0;

    for i in 0..60 {
        if i > 0 {
            rig.time.advance(Duration::from_millis(16));
        }
        let report = rig.driver.tick().unwrap();
        produced += report.produced;
        dropped += report.dropped;
        if report.dropped > 0 {
            overrun_ticks += 1;
        }
    }

    assert_eq!(produced, 2_399 + 59 * 768);
    assert_eq!(dropped, produced - capacity);
    assert!(overrun_ticks > 0);

    // Nobody drained: the whole ring is stale and is skipped on read
    assert_eq!(drain(&mut rig.consumer), 0);

    // The held-back newest audio lands on the next tick
    let report = rig.driver.tick().unwrap();
    assert_eq!(report.cycles, 0);
    assert_eq!(report.buffered, capacity);

    let mut frames = vec![AudioFrame::SILENCE; capacity];
    assert_eq!(rig.consumer.read(&mut frames), capacity);
    let oldest_kept = (produced - capacity) as u64;
    assert_eq!(frames[0], AudioFrame::mono(TestCore::ramp_value(oldest_kept)));
    assert_eq!(
        frames[capacity - 1],
        AudioFrame::mono(TestCore::ramp_value(produced as u64 - 1))
    );
}

#[test]
fn test_slow_consumer_hears_newest_audio() {
    let mut rig = rig();
    let mut produced = rig.driver.tick().unwrap().produced;

    // Reads half of what each tick produces
    let mut buf = vec![AudioFrame::SILENCE; 384];
    let mut dropped = 0;
    for _ in 0..40 {
        rig.time.advance(Duration::from_millis(16));
        let report = rig.driver.tick().unwrap();
        produced += report.produced;
        dropped += report.dropped;
        rig.consumer.read(&mut buf);
    }
    assert!(dropped > 0);

    rig.driver.tick().unwrap();
    let mut last = AudioFrame::SILENCE;
    loop {
        let n = rig.consumer.read(&mut buf);
        if n == 0 {
            break;
        }
        last = buf[n - 1];
    }
    assert_eq!(last, AudioFrame::mono(TestCore::ramp_value(produced as u64 - 1)));
}

#[test]
fn test_suspended_time_is_not_drift() {
    let mut rig = rig();
    rig.driver.tick().unwrap();

    rig.driver.suspend();
    assert!(rig.driver.is_suspended());
    rig.time.advance(Duration::from_secs(5));
    rig.driver.resume();

    let report = rig.driver.tick().unwrap();
    assert_eq!(report.resync, None);
    assert_eq!(report.cycles, 0);

    rig.time.advance(Duration::from_millis(10));
    assert_eq!(rig.driver.tick().unwrap().cycles, 10_000);
}

#[test]
fn test_restore_swaps_core_state_and_reanchors() {
    let mut rig = rig();
    rig.driver.tick().unwrap();
    let mut saved = Vec::new();
    rig.driver.capture_state(&mut saved).unwrap();

    rig.time.advance(Duration::from_millis(30));
    rig.driver.tick().unwrap();
    let virtual_before = rig.driver.virtual_cycles();

    rig.driver.restore_state(&saved).unwrap();
    assert_eq!(rig.driver.core().cycles(), LEAD);
    // The bridge's own counter is monotonic regardless of core state
    assert_eq!(rig.driver.virtual_cycles(), virtual_before);

    // Pre-restore audio is stale; only what the restored core makes plays
    assert_eq!(rig.driver.buffered_frames(), 0);
    let report = rig.driver.tick().unwrap();
    assert_eq!(report.cycles, LEAD);
    assert_eq!(report.produced, 2_399);
    assert_eq!(report.buffered, 2_399);

    let mut first = [AudioFrame::SILENCE; 2];
    assert_eq!(rig.consumer.read(&mut first), 2);
    assert_eq!(first[0], AudioFrame::mono(TestCore::ramp_value(2_400)));
    assert_eq!(first[1], AudioFrame::mono(TestCore::ramp_value(2_401)));
    assert_eq!(drain(&mut rig.consumer), 2_397);
}

#[test]
fn test_rejected_restore_rolls_back() {
    let mut rig = rig();
    rig.driver.tick().unwrap();
    let before = state_of(rig.driver.core());

    let err = rig.driver.restore_state(&[1, 2, 3]).unwrap_err();
    assert!(matches!(
        err,
        BridgeError::Snapshot(SnapshotError::Rejected(_))
    ));
    assert_eq!(state_of(rig.driver.core()), before);
}

#[test]
fn test_failed_rollback_is_a_core_fault() {
    let mut rig = rig();
    rig.driver.tick().unwrap();
    rig.hooks.reject_states.store(true, Ordering::Relaxed);

    let saved = state_of(rig.driver.core());
    let err = rig.driver.restore_state(&saved).unwrap_err();
    assert!(matches!(err, BridgeError::CoreFault(_)));
}

#[test]
fn test_step_failure_surfaces_as_fault() {
    let mut rig = rig();
    rig.hooks.fail_next_step.store(true, Ordering::Relaxed);
    assert!(rig.driver.tick().is_err());
    assert_eq!(rig.driver.virtual_cycles(), 0);
}

#[test]
fn test_output_rate_change_retunes_resampler() {
    let mut rig = rig_with(&BridgeConfig::default(), RATE);
    rig.driver.set_output_rate(96_000);
    assert_eq!(rig.driver.output_rate(), 96_000);

    let report = rig.driver.tick().unwrap();
    // 2400 native frames doubled, minus the lag
    assert_eq!(report.produced, 4_798);
}
