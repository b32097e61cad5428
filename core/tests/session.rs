//! End-to-end tests through the public API: a reference core, a manual
//! clock standing in for wall time and the audio source standing in for the
//! host mixer.

use std::thread;
use std::time::{Duration, Instant};

use emubridge_core::{
    AudioFrame, BridgeConfig, BridgeError, BridgeSession, ChannelLayout, CoreFault, EmulationCore,
    IdleAudio, ManualClock, MixerRequest, SessionEvent, SessionStatus, SnapshotBlob, SnapshotCodec,
    ToneCore,
};

fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    cond()
}

fn stereo(frames: usize) -> MixerRequest {
    MixerRequest::new(frames, 48_000, ChannelLayout::Stereo)
}

/// Core that fails once it has run a fixed number of cycles
struct FaultyCore {
    cycles: u64,
    fail_after: u64,
}

impl EmulationCore for FaultyCore {
    fn clock_rate(&self) -> u64 {
        1_000_000
    }

    fn sample_rate(&self) -> u32 {
        32_000
    }

    fn step(&mut self, cycles: u64, audio: &mut Vec<AudioFrame>) -> Result<u64, CoreFault> {
        if self.cycles + cycles > self.fail_after {
            return Err(CoreFault::new("illegal opcode"));
        }
        self.cycles += cycles;
        audio.extend(std::iter::repeat_n(AudioFrame::SILENCE, (cycles / 32) as usize));
        Ok(cycles)
    }

    fn serialize_state(&self, out: &mut Vec<u8>) -> Result<(), CoreFault> {
        out.extend_from_slice(&self.cycles.to_le_bytes());
        Ok(())
    }

    fn deserialize_state(&mut self, state: &[u8]) -> Result<(), CoreFault> {
        let bytes: [u8; 8] = state
            .try_into()
            .map_err(|_| CoreFault::new("bad state"))?;
        self.cycles = u64::from_le_bytes(bytes);
        Ok(())
    }
}

#[test]
fn tone_reaches_mixer_resampled() {
    let time = ManualClock::new();
    let mut session =
        BridgeSession::start_with_time(ToneCore::new(440), BridgeConfig::default(), time.clone())
            .unwrap();
    let mut source = session.take_audio_source().unwrap();
    assert!(wait_for(|| source.buffered_frames() > 2_000));

    let mut out = vec![0.0f32; 512 * 2];
    assert_eq!(source.render(&stereo(512), &mut out), 512);
    assert!(out.iter().all(|s| s.abs() <= 0.25 + 1e-6));
    assert!(out.iter().any(|&s| s > 0.2));
    assert!(out.iter().any(|&s| s < -0.2));
    assert_eq!(session.stats().underruns, 0);

    // Keep feeding the mixer in step with time
    for _ in 0..20 {
        let before = session.stats().virtual_cycles;
        time.advance(Duration::from_millis(10));
        assert!(wait_for(|| session.stats().virtual_cycles > before));
        source.render(&stereo(480), &mut out[..960]);
    }
    let stats = session.stop();
    assert_eq!(stats.underruns, 0);
    assert_eq!(stats.overruns, 0);
}

#[test]
fn restore_reproduces_captured_state() {
    let time = ManualClock::new();
    let session =
        BridgeSession::start_with_time(ToneCore::new(262), BridgeConfig::default(), time.clone())
            .unwrap();
    assert!(wait_for(|| session.stats().virtual_cycles > 0));

    let first = session.capture_snapshot().unwrap();
    time.advance(Duration::from_millis(100));
    assert!(wait_for(|| session.stats().virtual_cycles > 200_000));

    session.pause().unwrap();
    session.restore_snapshot(&first).unwrap();
    let second = session.capture_snapshot().unwrap();
    session.resume().unwrap();

    let codec = SnapshotCodec::default();
    assert_eq!(codec.decode(&first).unwrap(), codec.decode(&second).unwrap());
}

#[test]
fn restore_while_playing_keeps_a_full_cushion() {
    let time = ManualClock::new();
    let mut session =
        BridgeSession::start_with_time(ToneCore::new(262), BridgeConfig::default(), time.clone())
            .unwrap();
    let mut source = session.take_audio_source().unwrap();
    assert!(wait_for(|| source.buffered_frames() > 2_000));
    let blob = session.capture_snapshot().unwrap();

    time.advance(Duration::from_millis(60));
    assert!(wait_for(|| source.buffered_frames() > 4_500));

    let produced = session.stats().frames_produced;
    session.restore_snapshot(&blob).unwrap();
    assert!(wait_for(|| session.stats().frames_produced > produced + 2_000));

    // Only the restored prefill is queued, and it covers the next callback
    let buffered = source.buffered_frames();
    assert!(buffered > 2_000 && buffered < 2_500, "buffered {}", buffered);
    let mut out = vec![0.0f32; 512 * 2];
    source.render(&stereo(512), &mut out);
    assert!(out.iter().any(|&s| s > 0.2));
    assert_eq!(session.stats().underruns, 0);
}

#[test]
fn snapshot_file_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("slot0.ebss");

    let session = BridgeSession::start_with_time(
        ToneCore::new(330),
        BridgeConfig::default(),
        ManualClock::new(),
    )
    .unwrap();
    let blob = session.capture_snapshot().unwrap();
    blob.save_to_file(&path).unwrap();

    let loaded = SnapshotBlob::load_from_file(&path).unwrap();
    assert_eq!(loaded, blob);
    session.restore_snapshot(&loaded).unwrap();
}

#[test]
fn truncated_snapshot_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("slot1.ebss");

    let session = BridgeSession::start_with_time(
        ToneCore::new(330),
        BridgeConfig::default(),
        ManualClock::new(),
    )
    .unwrap();
    let bytes = session.capture_snapshot().unwrap().to_bytes().unwrap();
    std::fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();

    let err = SnapshotBlob::load_from_file(&path).unwrap_err();
    assert!(err.is_corruption());
}

#[test]
fn core_fault_is_reported_and_fatal() {
    let time = ManualClock::new();
    let core = FaultyCore {
        cycles: 0,
        fail_after: 60_000,
    };
    let mut session = BridgeSession::start_with_time(core, BridgeConfig::default(), time.clone())
        .unwrap();
    let mut source = session.take_audio_source().unwrap();

    assert!(wait_for(|| session.stats().virtual_cycles == 50_000));
    time.advance(Duration::from_millis(30));
    assert!(wait_for(|| session.status() == SessionStatus::Faulted));

    let mut events = Vec::new();
    while let Some(event) = session.wait_event(Duration::from_millis(200)) {
        events.push(event);
    }
    assert!(events.contains(&SessionEvent::CoreFault("illegal opcode".into())));
    assert_eq!(events.last(), Some(&SessionEvent::Stopped));

    assert!(matches!(
        session.pause(),
        Err(BridgeError::SessionNotRunning(SessionStatus::Faulted))
    ));

    // The mixer keeps getting silence, never an error
    let mut out = vec![1.0f32; 64];
    assert_eq!(source.render(&stereo(32), &mut out), 32);
    assert!(out.iter().all(|&s| s == 0.0));
}

#[test]
fn powered_off_plays_white_noise() {
    let mut config = BridgeConfig::default();
    config.audio.idle = IdleAudio::WhiteNoise;
    let mut session =
        BridgeSession::start_with_time(ToneCore::new(440), config, ManualClock::new()).unwrap();
    let mut source = session.take_audio_source().unwrap();

    session.power_off().unwrap();
    let mut out = vec![0.0f32; 256];
    source.render(&stereo(128), &mut out);
    assert!(out.iter().any(|&s| s != 0.0));
    assert!(out.iter().all(|s| s.abs() <= 0.15));

    session.power_on().unwrap();
    assert_eq!(session.status(), SessionStatus::Running);
}

#[test]
fn config_file_drives_session() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[audio]
output_sample_rate = 44100
ring_capacity_ms = 100
latency_ms = 20

[clock]
tick_hz = 120
"#,
    )
    .unwrap();

    let config = BridgeConfig::load_from(&path).unwrap();
    let mut session =
        BridgeSession::start_with_time(ToneCore::new(440), config, ManualClock::new()).unwrap();
    let source = session.take_audio_source().unwrap();
    assert_eq!(source.sample_rate(), 44_100);
    assert_eq!(session.config().audio.ring_capacity_ms, 100);
    // 20ms of lead at 44.1 kHz
    assert!(wait_for(|| source.buffered_frames() >= 880));
}
