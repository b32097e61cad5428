//! State shared between the session, the clock worker and the audio source

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};
use std::sync::mpsc::SyncSender;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::warn;

use crate::stats::BridgeCounters;

/// Externally visible lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionStatus {
    /// Worker is stepping the core
    Running = 0,
    /// Worker is parked for a snapshot or by the owner
    Paused = 1,
    /// Worker is alive but not stepping; audio is idle
    PoweredOff = 2,
    /// Session was shut down
    Stopped = 3,
    /// The core failed; no more stepping
    Faulted = 4,
}

impl SessionStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Running,
            1 => Self::Paused,
            2 => Self::PoweredOff,
            3 => Self::Stopped,
            _ => Self::Faulted,
        }
    }
}

/// Owner -> worker commands, guarded by `SessionShared::control`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ControlState {
    Running,
    PauseRequested,
    Paused,
    Stopping,
}

/// Notifications emitted by the clock worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Virtual time was snapped back to wall time
    DriftResync { drift_cycles: i64, virtual_cycles: u64 },
    /// The core failed while stepping; the session is faulted
    CoreFault(String),
    /// The worker exited
    Stopped,
}

/// Everything the three parties share
pub(crate) struct SessionShared {
    pub control: Mutex<ControlState>,
    /// Wakes the worker (render callback, stop, pause) and the pausing owner
    pub wake: Condvar,
    status: AtomicU8,
    powered: AtomicBool,
    /// Rate the mixer last asked for, applied by the worker
    pub requested_rate: AtomicU32,
    pub counters: BridgeCounters,
    events: SyncSender<SessionEvent>,
}

impl SessionShared {
    pub fn new(output_rate: u32, events: SyncSender<SessionEvent>) -> Self {
        Self {
            control: Mutex::new(ControlState::Running),
            wake: Condvar::new(),
            status: AtomicU8::new(SessionStatus::Running as u8),
            powered: AtomicBool::new(true),
            requested_rate: AtomicU32::new(output_rate),
            counters: BridgeCounters::default(),
            events,
        }
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn set_status(&self, status: SessionStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    pub fn powered(&self) -> bool {
        self.powered.load(Ordering::Acquire)
    }

    pub fn set_powered(&self, on: bool) {
        self.powered.store(on, Ordering::Release);
    }

    /// Lock the control state, recovering from a poisoned mutex
    pub fn lock_control(&self) -> MutexGuard<'_, ControlState> {
        self.control.lock().unwrap_or_else(|e| {
            warn!("Control mutex poisoned, recovering");
            e.into_inner()
        })
    }

    /// Wait on `wake` until `done` holds or `timeout` elapses
    ///
    /// Returns the guard and whether `done` was satisfied.
    pub fn wait_until<'a>(
        &self,
        mut guard: MutexGuard<'a, ControlState>,
        timeout: Duration,
        mut done: impl FnMut(ControlState) -> bool,
    ) -> (MutexGuard<'a, ControlState>, bool) {
        let deadline = Instant::now() + timeout;
        while !done(*guard) {
            let now = Instant::now();
            if now >= deadline {
                return (guard, false);
            }
            guard = match self.wake.wait_timeout(guard, deadline - now) {
                Ok((guard, _)) => guard,
                Err(e) => e.into_inner().0,
            };
        }
        (guard, true)
    }

    /// Post an event without blocking; drops it if the owner is not draining
    pub fn emit(&self, event: SessionEvent) {
        if self.events.try_send(event).is_err() {
            tracing::trace!("Session event dropped (queue full or closed)");
        }
    }
}
