//! SoftPwmEngine - Bit-banged Servo Waveforms
//!
//! ## Responsibilities
//!
//! - Own one pin driver per registered pin, created lazily
//! - Hold the shared pin -> target width map (µs)
//! - Run a single cycle thread that realizes the widths every period
//! - Stop with a bounded join, then force every line low and release it
//!
//! Callers only express intent: `set_units` stores a width that the cycle
//! thread picks up at the next cycle boundary, never mid-cycle.

pub mod schedule;

use crate::error::{Error, Result};
use crate::gpio_pin::{PinDriver, PinFactory};
use crate::models::{units_to_us, PinId, PulseUnits};
use crate::pwm_backend::ServoBackend;
use parking_lot::Mutex;
use schedule::CyclePlan;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Bound on waiting for the cycle thread to exit
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

type DriverHandle = Arc<Mutex<Box<dyn PinDriver>>>;

#[derive(Default)]
struct Targets {
    drivers: HashMap<PinId, DriverHandle>,
    widths_us: HashMap<PinId, u32>,
}

impl Targets {
    /// Copy of the widths plus driver handles for one cycle
    fn snapshot(&self, period_us: u32) -> (CyclePlan, HashMap<PinId, DriverHandle>) {
        let plan = CyclePlan::build(
            self.widths_us.iter().map(|(pin, width)| (*pin, *width)),
            period_us,
        );
        (plan, self.drivers.clone())
    }
}

struct Worker {
    handle: JoinHandle<()>,
    stop: Arc<AtomicBool>,
}

/// Software PWM engine
pub struct SoftPwmEngine {
    period_us: u32,
    factory: Arc<dyn PinFactory>,
    targets: Arc<Mutex<Targets>>,
    worker: Mutex<Option<Worker>>,
}

impl SoftPwmEngine {
    pub fn new(period_us: u32, factory: Arc<dyn PinFactory>) -> Result<Self> {
        if period_us == 0 {
            return Err(Error::Config("soft PWM period must be positive".to_string()));
        }
        Ok(Self {
            period_us,
            factory,
            targets: Arc::new(Mutex::new(Targets::default())),
            worker: Mutex::new(None),
        })
    }

    pub fn period_us(&self) -> u32 {
        self.period_us
    }

    /// Create the driver for `pin` if needed and set its initial width
    pub fn register_pin(&self, pin: PinId, initial_units: PulseUnits) -> Result<()> {
        self.set_units(pin, initial_units)?;
        tracing::debug!(pin = pin, units = initial_units, "Soft PWM pin registered");
        Ok(())
    }

    /// Store the target width for `pin`; effective from the next cycle
    pub fn set_units(&self, pin: PinId, units: PulseUnits) -> Result<()> {
        self.ensure_driver(pin)?;
        let width_us = units_to_us(units);
        self.targets.lock().widths_us.insert(pin, width_us);
        Ok(())
    }

    pub fn target_width_us(&self, pin: PinId) -> Option<u32> {
        self.targets.lock().widths_us.get(&pin).copied()
    }

    pub fn pin_count(&self) -> usize {
        self.targets.lock().drivers.len()
    }

    fn ensure_driver(&self, pin: PinId) -> Result<()> {
        if self.targets.lock().drivers.contains_key(&pin) {
            return Ok(());
        }

        // Opening may run external commands; keep the cycle thread unblocked
        let driver = self.factory.open(pin)?;

        let mut targets = self.targets.lock();
        if targets.drivers.contains_key(&pin) {
            drop(targets);
            let mut driver = driver;
            let _ = driver.release();
            return Ok(());
        }
        targets.drivers.insert(pin, Arc::new(Mutex::new(driver)));
        Ok(())
    }

    /// Spawn the cycle thread unless it is already running
    pub fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let targets = self.targets.clone();
        let period_us = self.period_us;

        let handle = thread::Builder::new()
            .name("soft-pwm".to_string())
            .spawn(move || run_cycles(targets, period_us, thread_stop))?;

        *worker = Some(Worker { handle, stop });
        tracing::info!(period_us = period_us, "Soft PWM engine started");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// Signal the cycle thread, join within a bound, release every line
    pub fn stop(&self) {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            worker.stop.store(true, Ordering::Release);
            let deadline = Instant::now() + STOP_JOIN_TIMEOUT;
            while !worker.handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(2));
            }
            if worker.handle.is_finished() {
                if worker.handle.join().is_err() {
                    tracing::error!("Soft PWM cycle thread panicked");
                }
            } else {
                tracing::warn!(
                    timeout_ms = STOP_JOIN_TIMEOUT.as_millis() as u64,
                    "Soft PWM cycle thread did not exit in time, detaching"
                );
            }
            tracing::info!("Soft PWM engine stopped");
        }

        let drivers: Vec<(PinId, DriverHandle)> = {
            let mut targets = self.targets.lock();
            targets.widths_us.clear();
            targets.drivers.drain().collect()
        };
        for (pin, driver) in drivers {
            if let Err(e) = driver.lock().release() {
                tracing::warn!(pin = pin, error = %e, "Failed to release soft PWM pin");
            }
        }
    }
}

impl Drop for SoftPwmEngine {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop();
        }
    }
}

/// Cycle thread body
fn run_cycles(targets: Arc<Mutex<Targets>>, period_us: u32, stop: Arc<AtomicBool>) {
    let period = Duration::from_micros(u64::from(period_us));
    let mut failing: HashSet<PinId> = HashSet::new();

    while !stop.load(Ordering::Acquire) {
        let cycle_start = Instant::now();
        let (plan, drivers) = targets.lock().snapshot(period_us);

        for pin in &plan.idle {
            drive(&drivers, *pin, false, &mut failing);
        }
        for pin in &plan.activate {
            drive(&drivers, *pin, true, &mut failing);
        }
        for edge in &plan.edges {
            schedule::wait_until(cycle_start + Duration::from_micros(u64::from(edge.offset_us)));
            for pin in &edge.pins {
                drive(&drivers, *pin, false, &mut failing);
            }
        }

        // Pace against the recorded start so timing does not drift
        let next_cycle = cycle_start + period;
        let now = Instant::now();
        if next_cycle > now {
            thread::sleep(next_cycle - now);
        }
    }
}

/// Toggle one pin; failures are contained to that pin
fn drive(
    drivers: &HashMap<PinId, DriverHandle>,
    pin: PinId,
    high: bool,
    failing: &mut HashSet<PinId>,
) {
    let Some(driver) = drivers.get(&pin) else {
        return;
    };
    let result = {
        let mut driver = driver.lock();
        if high {
            driver.activate()
        } else {
            driver.deactivate()
        }
    };
    match result {
        Ok(()) => {
            if failing.remove(&pin) {
                tracing::info!(pin = pin, "Soft PWM pin recovered");
            }
        }
        Err(e) => {
            if failing.insert(pin) {
                tracing::warn!(pin = pin, error = %e, "Soft PWM pin write failing");
            }
        }
    }
}

/// Servo backend over the software engine
pub struct SoftPwmBackend {
    engine: SoftPwmEngine,
}

impl SoftPwmBackend {
    pub fn new(engine: SoftPwmEngine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &SoftPwmEngine {
        &self.engine
    }
}

impl ServoBackend for SoftPwmBackend {
    fn name(&self) -> &'static str {
        "soft"
    }

    fn setup(&mut self, pins: &[PinId], centre_units: PulseUnits) -> Result<()> {
        self.engine.start()?;
        for &pin in pins {
            if let Err(e) = self.engine.register_pin(pin, centre_units) {
                tracing::error!(pin = pin, error = %e, "Soft PWM setup failed");
                self.engine.stop();
                return Err(e);
            }
        }
        tracing::info!(
            pins = ?pins,
            centre_units = centre_units,
            period_us = self.engine.period_us(),
            "Software PWM backend ready"
        );
        Ok(())
    }

    fn set_units(&mut self, pin: PinId, units: PulseUnits) -> Result<()> {
        self.engine.set_units(pin, units)
    }

    fn cleanup(&mut self) -> Result<()> {
        self.engine.stop();
        Ok(())
    }
}
