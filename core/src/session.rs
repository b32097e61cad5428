//! Bridge session: one emulation core wired to one host audio source
//!
//! [`BridgeSession::start`] allocates everything the bridge needs (ring,
//! scratch buffers, clock state), spawns the clock worker and hands out the
//! [`AudioSource`] for the host mixer. Sessions share nothing with each
//! other, so any number can run side by side.
//!
//! Snapshot capture and restore park the worker at a tick boundary with a
//! bounded wait, touch the core while it is parked, and release it again.
//! Compression and validation happen outside the parked window.

use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::clock::ClockDriver;
use crate::config::BridgeConfig;
use crate::emulator::EmulationCore;
use crate::error::BridgeError;
use crate::ring::FrameRing;
use crate::shared::{ControlState, SessionEvent, SessionShared, SessionStatus};
use crate::snapshot::{SnapshotBlob, SnapshotCodec};
use crate::source::AudioSource;
use crate::stats::BridgeStats;
use crate::time::{MonotonicClock, TimeSource};
use crate::worker::{ClockWorker, lock_driver};

/// Bounded so a session owner that never polls cannot grow memory
const EVENT_QUEUE_LEN: usize = 64;

/// A running bridge
pub struct BridgeSession<C, T = MonotonicClock>
where
    C: EmulationCore + 'static,
    T: TimeSource,
{
    config: BridgeConfig,
    shared: Arc<SessionShared>,
    driver: Arc<Mutex<ClockDriver<C, T>>>,
    worker: Option<JoinHandle<()>>,
    source: Option<AudioSource>,
    events: Receiver<SessionEvent>,
    codec: SnapshotCodec,
}

/// Keeps the worker parked; releases it on drop unless the owner paused it
struct ParkGuard<'a, C, T>
where
    C: EmulationCore + 'static,
    T: TimeSource,
{
    session: &'a BridgeSession<C, T>,
    release: bool,
}

impl<C, T> Drop for ParkGuard<'_, C, T>
where
    C: EmulationCore + 'static,
    T: TimeSource,
{
    fn drop(&mut self) {
        if self.release {
            self.session.unpark();
        }
    }
}

impl<C: EmulationCore + 'static> BridgeSession<C> {
    /// Start a session paced by the real monotonic clock
    pub fn start(core: C, config: BridgeConfig) -> Result<Self, BridgeError> {
        Self::start_with_time(core, config, MonotonicClock::new())
    }
}

impl<C, T> BridgeSession<C, T>
where
    C: EmulationCore + 'static,
    T: TimeSource,
{
    /// Start a session paced by an arbitrary time source
    pub fn start_with_time(core: C, config: BridgeConfig, time: T) -> Result<Self, BridgeError> {
        config.validate()?;

        let output_rate = config.audio.output_sample_rate;
        let core_rate = core.sample_rate();
        let capacity = config.ring_capacity_frames(output_rate);
        let (producer, consumer) = FrameRing::new(capacity);

        let (tx, events) = mpsc::sync_channel(EVENT_QUEUE_LEN);
        let shared = Arc::new(SessionShared::new(output_rate, tx));
        let driver = Arc::new(Mutex::new(ClockDriver::new(
            core,
            time,
            producer,
            &config,
            output_rate,
        )));
        let source = AudioSource::new(consumer, Arc::clone(&shared), &config.audio);

        let worker = ClockWorker::spawn(Arc::clone(&driver), Arc::clone(&shared), config.tick_interval())
            .map_err(BridgeError::Spawn)?;

        info!(
            "Bridge session started: core {} Hz -> mixer {} Hz, ring {} frames ({}ms)",
            core_rate, output_rate, capacity, config.audio.ring_capacity_ms
        );

        Ok(Self {
            codec: SnapshotCodec::new(config.snapshot.max_state_size),
            config,
            shared,
            driver,
            worker: Some(worker),
            source: Some(source),
            events,
        })
    }

    /// Hand the render side to the host mixer (once)
    pub fn take_audio_source(&mut self) -> Option<AudioSource> {
        self.source.take()
    }

    pub fn status(&self) -> SessionStatus {
        self.shared.status()
    }

    pub fn stats(&self) -> BridgeStats {
        self.shared.counters.snapshot()
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Next pending worker event, if any
    pub fn poll_event(&self) -> Option<SessionEvent> {
        self.events.try_recv().ok()
    }

    /// Wait up to `timeout` for the next worker event
    pub fn wait_event(&self, timeout: Duration) -> Option<SessionEvent> {
        self.events.recv_timeout(timeout).ok()
    }

    /// Stop stepping the core; audio drains and then fades out
    pub fn pause(&self) -> Result<(), BridgeError> {
        match self.status() {
            SessionStatus::Paused => return Ok(()),
            SessionStatus::Running => {}
            other => return Err(BridgeError::SessionNotRunning(other)),
        }
        let mut guard = self.park()?;
        guard.release = false;
        self.shared.set_status(SessionStatus::Paused);
        debug!("Session paused");
        Ok(())
    }

    /// Continue after [`pause`](Self::pause); paused time is not drift
    pub fn resume(&self) -> Result<(), BridgeError> {
        match self.status() {
            SessionStatus::Running => return Ok(()),
            SessionStatus::Paused => {}
            other => return Err(BridgeError::SessionNotRunning(other)),
        }
        self.shared.set_status(SessionStatus::Running);
        self.unpark();
        debug!("Session resumed");
        Ok(())
    }

    /// Stop stepping and switch the audio source to idle output
    pub fn power_off(&self) -> Result<(), BridgeError> {
        match self.status() {
            SessionStatus::PoweredOff => return Ok(()),
            SessionStatus::Running => {}
            other => return Err(BridgeError::SessionNotRunning(other)),
        }
        self.shared.set_powered(false);
        self.shared.set_status(SessionStatus::PoweredOff);
        info!("Emulation powered off");
        Ok(())
    }

    /// Resume stepping from the current core state with a fresh buffer
    pub fn power_on(&self) -> Result<(), BridgeError> {
        match self.status() {
            SessionStatus::Running => return Ok(()),
            SessionStatus::PoweredOff => {}
            other => return Err(BridgeError::SessionNotRunning(other)),
        }
        {
            // The worker is idle while powered off and cannot write in between
            let mut driver = lock_driver(&self.driver);
            driver.reanchor();
            driver.discard_audio();
        }
        self.shared.set_powered(true);
        self.shared.set_status(SessionStatus::Running);
        self.shared.wake.notify_all();
        info!("Emulation powered on");
        Ok(())
    }

    /// Drop everything queued for playback
    ///
    /// Audio produced after this call is unaffected.
    pub fn reset_audio(&self) {
        lock_driver(&self.driver).discard_audio();
    }

    /// Serialize the core at a tick boundary and compress it
    pub fn capture_snapshot(&self) -> Result<SnapshotBlob, BridgeError> {
        self.ensure_alive()?;

        let mut state = Vec::new();
        {
            let _parked = self.park()?;
            let driver = lock_driver(&self.driver);
            driver.capture_state(&mut state)?;
        }

        let blob = self.codec.encode(&state)?;
        debug!(
            "Captured snapshot: {} bytes state, {} bytes compressed",
            state.len(),
            blob.compressed_len()
        );
        Ok(blob)
    }

    /// Replace the core state with a captured one
    ///
    /// The blob is fully validated before the worker is touched; on any
    /// error the core keeps its current state.
    pub fn restore_snapshot(&self, blob: &SnapshotBlob) -> Result<(), BridgeError> {
        self.ensure_alive()?;

        let state = self.codec.decode(blob).inspect_err(|e| {
            warn!("Rejected snapshot before restore: {}", e);
        })?;

        {
            let _parked = self.park()?;
            let mut driver = lock_driver(&self.driver);
            driver.restore_state(&state)?;
        }

        debug!("Restored snapshot ({} bytes state)", state.len());
        Ok(())
    }

    /// Shut down the worker and return the final counters
    pub fn stop(mut self) -> BridgeStats {
        self.shutdown();
        self.stats()
    }

    fn ensure_alive(&self) -> Result<(), BridgeError> {
        match self.status() {
            status @ (SessionStatus::Stopped | SessionStatus::Faulted) => {
                Err(BridgeError::SessionNotRunning(status))
            }
            _ => Ok(()),
        }
    }

    /// Park the worker at a tick boundary
    fn park(&self) -> Result<ParkGuard<'_, C, T>, BridgeError> {
        let mut control = self.shared.lock_control();
        match *control {
            // Already parked by the owner; leave it that way
            ControlState::Paused => {
                return Ok(ParkGuard {
                    session: self,
                    release: false,
                });
            }
            ControlState::Stopping => {
                return Err(BridgeError::SessionNotRunning(self.status()));
            }
            ControlState::Running | ControlState::PauseRequested => {
                *control = ControlState::PauseRequested;
            }
        }
        self.shared.wake.notify_all();

        let timeout = self.config.pause_timeout();
        let (mut control, _) = self.shared.wait_until(control, timeout, |state| {
            state == ControlState::Paused || self.shared.status() == SessionStatus::Faulted
        });

        if *control != ControlState::Paused {
            if *control == ControlState::PauseRequested {
                *control = ControlState::Running;
            }
            drop(control);
            let status = self.status();
            if status == SessionStatus::Faulted {
                return Err(BridgeError::SessionNotRunning(status));
            }
            warn!("Clock worker did not pause within {:?}", timeout);
            return Err(BridgeError::PauseTimeout);
        }
        drop(control);

        lock_driver(&self.driver).suspend();
        Ok(ParkGuard {
            session: self,
            release: true,
        })
    }

    fn unpark(&self) {
        lock_driver(&self.driver).resume();
        let mut control = self.shared.lock_control();
        if *control == ControlState::Paused {
            *control = ControlState::Running;
        }
        drop(control);
        self.shared.wake.notify_all();
    }

    fn shutdown(&mut self) {
        let Some(handle) = self.worker.take() else {
            return;
        };

        *self.shared.lock_control() = ControlState::Stopping;
        self.shared.wake.notify_all();

        if handle.join().is_err() {
            error!("Clock worker panicked");
        }
        if self.shared.status() != SessionStatus::Faulted {
            self.shared.set_status(SessionStatus::Stopped);
        }
        debug!("Bridge session stopped");
    }
}

impl<C, T> Drop for BridgeSession<C, T>
where
    C: EmulationCore + 'static,
    T: TimeSource,
{
    fn drop(&mut self) {
        self.shutdown();
    }
}
