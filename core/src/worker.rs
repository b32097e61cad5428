//! Clock worker thread
//!
//! Owns the producer side of the bridge: ticks the [`ClockDriver`] at the
//! configured cadence, folds tick reports into the shared counters and
//! honours pause/stop requests from the session.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, trace, warn};

use crate::clock::ClockDriver;
use crate::emulator::{CoreFault, EmulationCore};
use crate::metrics::BridgeMetrics;
use crate::shared::{ControlState, SessionEvent, SessionShared, SessionStatus};
use crate::time::TimeSource;

/// Lock the driver, recovering from a poisoned mutex
pub(crate) fn lock_driver<C, T>(driver: &Mutex<ClockDriver<C, T>>) -> MutexGuard<'_, ClockDriver<C, T>> {
    driver.lock().unwrap_or_else(|e| {
        warn!("Clock driver mutex poisoned, recovering");
        e.into_inner()
    })
}

pub(crate) struct ClockWorker<C, T> {
    driver: Arc<Mutex<ClockDriver<C, T>>>,
    shared: Arc<SessionShared>,
    tick_interval: Duration,
    metrics: BridgeMetrics,
}

impl<C, T> ClockWorker<C, T>
where
    C: EmulationCore + 'static,
    T: TimeSource,
{
    /// Spawn the worker thread
    pub fn spawn(
        driver: Arc<Mutex<ClockDriver<C, T>>>,
        shared: Arc<SessionShared>,
        tick_interval: Duration,
    ) -> std::io::Result<JoinHandle<()>> {
        let ring_capacity = lock_driver(&driver).ring_capacity();
        thread::Builder::new()
            .name("emubridge-clock".into())
            .spawn(move || {
                let mut worker = Self {
                    driver,
                    shared,
                    tick_interval,
                    metrics: BridgeMetrics::new(ring_capacity),
                };
                worker.run();
            })
    }

    fn run(&mut self) {
        debug!("Clock worker started (tick every {:?})", self.tick_interval);

        loop {
            // 1. Control requests from the session
            {
                let mut control = self.shared.lock_control();
                if *control == ControlState::PauseRequested {
                    *control = ControlState::Paused;
                    self.shared.wake.notify_all();
                    trace!("Clock worker parked");
                }
                let state = *control;
                match state {
                    ControlState::Stopping => break,
                    ControlState::Paused => {
                        self.wait(control);
                        continue;
                    }
                    ControlState::Running | ControlState::PauseRequested => {}
                }
            }

            // 2. Advance emulation (powered-off sessions idle here)
            if self.shared.powered() {
                if let Err(fault) = self.step() {
                    error!("Emulation core fault, stopping clock worker: {}", fault);
                    self.shared.set_status(SessionStatus::Faulted);
                    self.shared.emit(SessionEvent::CoreFault(fault.0));
                    break;
                }
            }

            // 3. Log metrics periodically
            self.metrics.maybe_log(&self.shared.counters);

            // 4. Sleep until the next tick, a render callback or a request
            let control = self.shared.lock_control();
            if *control == ControlState::Running {
                self.wait(control);
            }
        }

        if self.shared.status() != SessionStatus::Faulted {
            self.shared.set_status(SessionStatus::Stopped);
        }
        self.shared.emit(SessionEvent::Stopped);
        self.shared.wake.notify_all();
        debug!("Clock worker finished");
    }

    fn wait(&self, control: MutexGuard<'_, ControlState>) {
        let _ = self
            .shared
            .wake
            .wait_timeout(control, self.tick_interval)
            .unwrap_or_else(|e| {
                warn!("Clock worker wait mutex poisoned; continuing");
                e.into_inner()
            });
    }

    fn step(&mut self) -> Result<(), CoreFault> {
        let started = Instant::now();
        let mut driver = lock_driver(&self.driver);

        let rate = self.shared.requested_rate.load(Ordering::Acquire);
        if rate != 0 && rate != driver.output_rate() {
            debug!("Mixer rate changed: {} Hz -> {} Hz", driver.output_rate(), rate);
            driver.set_output_rate(rate);
        }

        let report = driver.tick()?;
        let counters = &self.shared.counters;
        counters.add_produced(report.produced);
        if report.dropped > 0 {
            counters.record_overrun(report.dropped);
        }
        if let Some(drift_cycles) = report.resync {
            counters.record_resync();
            self.shared.emit(SessionEvent::DriftResync {
                drift_cycles,
                virtual_cycles: driver.virtual_cycles(),
            });
        }
        counters.set_virtual_cycles(driver.virtual_cycles());
        drop(driver);

        self.metrics.update_buffer_fill(report.buffered);
        self.metrics.record_tick(started.elapsed());
        Ok(())
    }
}
