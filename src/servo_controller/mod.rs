//! ServoController - Backend-Agnostic Servo Motion
//!
//! ## Responsibilities
//!
//! - Angle <-> pulse conversion (single source of truth)
//! - Current pulse tracking per pin
//! - Direct and linearly-interpolated moves
//! - Centring, continuous-rotation speed, raw pulses
//! - Demo sequences and batch scripts
//! - Status reporting
//!
//! ## Concurrency
//!
//! Every move sequence holds a per-pin lease for its whole duration.
//! Different pins move concurrently; the backend lock is only held for a
//! single write.

mod move_guard;
mod script;

pub use move_guard::{MoveGuard, MoveLease};
pub use script::{parse_sequence, Script, ScriptCommand, SequenceStep};

use crate::error::{Error, Result};
use crate::models::{PinId, PulseUnits, ServoDefinition, ServoStatus, StatusReport};
use crate::pwm_backend::{PwmBackend, ServoBackend};
use crate::state::MotionConfig;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::thread;
use std::time::Duration;

/// Settle time after the initial centring writes
const INIT_SETTLE: Duration = Duration::from_millis(20);

/// Stop pulse assumed for continuous-rotation servos without one
const DEFAULT_STOP_UNITS: PulseUnits = 150;

/// Units per velocity step assumed when a servo has no gain
const DEFAULT_GAIN_UNITS: f64 = 2.0;

pub struct ServoController<B = PwmBackend> {
    motion: MotionConfig,
    servos: Vec<ServoDefinition>,
    backend: Mutex<B>,
    /// Tracked pulse per pin; lost on restart
    pulses: Mutex<HashMap<PinId, PulseUnits>>,
    initialized: Mutex<bool>,
    guard: MoveGuard,
}

impl<B: ServoBackend> ServoController<B> {
    pub fn new(motion: MotionConfig, servos: Vec<ServoDefinition>, backend: B) -> Self {
        Self {
            motion,
            servos,
            backend: Mutex::new(backend),
            pulses: Mutex::new(HashMap::new()),
            initialized: Mutex::new(false),
            guard: MoveGuard::new(),
        }
    }

    /// Replace the per-pin move guard (custom wait timeout)
    pub fn with_move_guard(mut self, guard: MoveGuard) -> Self {
        self.guard = guard;
        self
    }

    pub fn servos(&self) -> &[ServoDefinition] {
        &self.servos
    }

    pub fn motion(&self) -> &MotionConfig {
        &self.motion
    }

    pub fn driver_name(&self) -> &'static str {
        self.backend.lock().name()
    }

    fn pulse_range(&self) -> i32 {
        self.motion.max_pulse - self.motion.min_pulse
    }

    /// Centre pulse: midpoint of the pulse range
    pub fn centre_units(&self) -> PulseUnits {
        self.motion.min_pulse + self.pulse_range() / 2
    }

    pub fn angle_to_pulse(&self, angle: i32) -> PulseUnits {
        let m = &self.motion;
        let raw = i64::from(m.min_pulse)
            + i64::from(self.pulse_range()) * (i64::from(angle) + i64::from(m.angle_offset)) / 180;
        raw.clamp(i64::from(m.min_pulse), i64::from(m.max_pulse)) as PulseUnits
    }

    pub fn pulse_to_angle(&self, pulse: PulseUnits) -> i32 {
        let m = &self.motion;
        let range = self.pulse_range();
        if range == 0 {
            return -m.angle_offset;
        }
        let scaled = (f64::from(pulse) - f64::from(m.min_pulse)) * 180.0 / f64::from(range);
        (scaled.round() as i32).saturating_sub(m.angle_offset)
    }

    pub fn is_initialized(&self) -> bool {
        *self.initialized.lock()
    }

    pub fn current_pulse(&self, pin: PinId) -> Option<PulseUnits> {
        self.pulses.lock().get(&pin).copied()
    }

    /// Set up the backend once and seed tracked pulses
    pub fn ensure_initialized(&self) -> Result<()> {
        let mut initialized = self.initialized.lock();
        if *initialized {
            return Ok(());
        }

        let centre = self.centre_units();
        let pins: Vec<PinId> = self.servos.iter().map(|s| s.pin).collect();
        self.backend.lock().setup(&pins, centre)?;

        let mut seeded = HashMap::new();
        for servo in &self.servos {
            let units = match (servo.is_positional(), servo.stop_units) {
                (false, Some(stop)) => {
                    self.backend.lock().set_units(servo.pin, stop)?;
                    stop
                }
                _ => centre,
            };
            seeded.insert(servo.pin, units);
        }
        *self.pulses.lock() = seeded;

        thread::sleep(INIT_SETTLE);
        *initialized = true;
        tracing::info!(
            driver = self.backend.lock().name(),
            servos = self.servos.len(),
            centre_units = centre,
            "Servo controller initialized"
        );
        Ok(())
    }

    fn servo(&self, pin: PinId) -> Result<&ServoDefinition> {
        self.servos
            .iter()
            .find(|s| s.pin == pin)
            .ok_or_else(|| Error::InvalidOperation(format!("no servo defined on pin {}", pin)))
    }

    fn positional(&self, pin: PinId, operation: &str) -> Result<&ServoDefinition> {
        let servo = self.servo(pin)?;
        if !servo.is_positional() {
            return Err(Error::InvalidOperation(format!(
                "{} not supported on continuous-rotation servo at pin {}",
                operation, pin
            )));
        }
        Ok(servo)
    }

    /// One backend write plus state update
    fn write(&self, pin: PinId, units: PulseUnits) -> Result<()> {
        self.backend.lock().set_units(pin, units)?;
        self.pulses.lock().insert(pin, units);
        tracing::trace!(pin = pin, units = units, "Pulse written");
        Ok(())
    }

    /// 1-based servo index in declaration order
    pub fn pin_for_index(&self, index: usize) -> Result<PinId> {
        index
            .checked_sub(1)
            .and_then(|i| self.servos.get(i))
            .map(|s| s.pin)
            .ok_or_else(|| {
                Error::InvalidOperation(format!(
                    "servo index {} outside 1-{}",
                    index,
                    self.servos.len()
                ))
            })
    }

    pub fn move_direct(&self, pin: PinId, angle: i32) -> Result<PulseUnits> {
        let servo = self.positional(pin, "direct move")?;
        self.ensure_initialized()?;
        let _lease = self.guard.acquire(pin)?;

        let target = self.angle_to_pulse(servo.range.clamp(angle));
        self.write(pin, target)?;
        tracing::debug!(pin = pin, angle = angle, pulse = target, "Direct move");
        Ok(target)
    }

    /// Interpolated move: `smooth_steps` writes then the exact target
    pub fn move_smooth(&self, pin: PinId, angle: i32) -> Result<PulseUnits> {
        let servo = self.positional(pin, "smooth move")?;
        self.ensure_initialized()?;
        let _lease = self.guard.acquire(pin)?;

        let target = self.angle_to_pulse(servo.range.clamp(angle));
        let current = self
            .current_pulse(pin)
            .unwrap_or_else(|| self.angle_to_pulse(0));
        let steps = self.motion.smooth_steps.max(1);
        let step = f64::from(target - current) / f64::from(steps);

        let mut value = f64::from(current);
        for _ in 0..steps {
            value += step;
            self.write(pin, value.round() as PulseUnits)?;
            if !self.motion.step_delay.is_zero() {
                thread::sleep(self.motion.step_delay);
            }
        }
        self.write(pin, target)?;

        tracing::debug!(
            pin = pin,
            angle = angle,
            from = current,
            to = target,
            steps = steps,
            "Smooth move"
        );
        Ok(target)
    }

    /// Smooth-centre positional servos; stop continuous-rotation ones
    pub fn center_all(&self) -> Result<()> {
        self.ensure_initialized()?;
        for servo in &self.servos {
            if servo.is_positional() {
                self.move_smooth(servo.pin, 0)?;
            } else if let Some(stop) = servo.stop_units {
                let _lease = self.guard.acquire(servo.pin)?;
                self.write(servo.pin, stop)?;
            }
        }
        tracing::info!("All servos centred");
        Ok(())
    }

    /// Continuous-rotation velocity around the stop pulse
    pub fn set_speed(&self, pin: PinId, velocity: i32) -> Result<PulseUnits> {
        let servo = self.servo(pin)?;
        if servo.is_positional() {
            return Err(Error::InvalidOperation(format!(
                "speed not supported on positional servo at pin {}",
                pin
            )));
        }
        self.ensure_initialized()?;
        let _lease = self.guard.acquire(pin)?;

        let stop = servo.stop_units.unwrap_or(DEFAULT_STOP_UNITS);
        let gain = servo.gain_units.unwrap_or(DEFAULT_GAIN_UNITS);
        let offset = (f64::from(velocity) * gain).round() as PulseUnits;
        let units = stop
            .saturating_add(offset)
            .clamp(self.motion.min_pulse, self.motion.max_pulse);
        self.write(pin, units)?;
        tracing::debug!(pin = pin, velocity = velocity, pulse = units, "Speed set");
        Ok(units)
    }

    /// Arbitrary pulse to a defined pin, regardless of kind
    pub fn send_raw(&self, pin: PinId, units: PulseUnits) -> Result<PulseUnits> {
        self.servo(pin)?;
        self.ensure_initialized()?;
        let _lease = self.guard.acquire(pin)?;

        let units = units.max(0);
        self.write(pin, units)?;
        tracing::debug!(pin = pin, pulse = units, "Raw pulse");
        Ok(units)
    }

    /// Run an `index:angle` sequence; returns the number of moves made
    pub fn run_sequence(&self, sequence: &str, smooth: bool) -> Result<usize> {
        let steps = parse_sequence(sequence)?;
        let pins = steps
            .iter()
            .map(|step| self.pin_for_index(step.index))
            .collect::<Result<Vec<PinId>>>()?;

        for (step, pin) in steps.iter().zip(pins) {
            if smooth {
                self.move_smooth(pin, step.angle)?;
            } else {
                self.move_direct(pin, step.angle)?;
            }
        }
        tracing::info!(moves = steps.len(), smooth = smooth, "Sequence complete");
        Ok(steps.len())
    }

    /// Execute a parsed script in order, stopping at the first failure
    pub fn run_script(&self, script: &Script) -> Result<usize> {
        for (line, command) in script.commands() {
            let outcome = match *command {
                ScriptCommand::Sleep(duration) => {
                    thread::sleep(duration);
                    Ok(())
                }
                ScriptCommand::Center => self.center_all(),
                ScriptCommand::Raw { pin, units } => self.send_raw(pin, units).map(drop),
                ScriptCommand::Speed { pin, velocity } => self.set_speed(pin, velocity).map(drop),
                ScriptCommand::Direct { pin, angle } => self.move_direct(pin, angle).map(drop),
                ScriptCommand::Move { pin, value } => {
                    if self.servo(pin)?.is_positional() {
                        self.move_smooth(pin, value).map(drop)
                    } else {
                        self.set_speed(pin, value).map(drop)
                    }
                }
            };
            if let Err(e) = outcome {
                tracing::warn!(line = line, error = %e, "Script aborted");
                return Err(e);
            }
        }
        Ok(script.len())
    }

    pub fn status(&self) -> Vec<ServoStatus> {
        let pulses = self.pulses.lock();
        self.servos
            .iter()
            .enumerate()
            .map(|(i, servo)| {
                let pulse = pulses.get(&servo.pin).copied();
                ServoStatus {
                    idx: i + 1,
                    pin: servo.pin,
                    kind: servo.kind,
                    part: servo.part.clone(),
                    range: servo.range.to_string(),
                    value: pulse.map(|p| self.pulse_to_angle(p)),
                    pulse,
                    channel: servo.channel,
                    stop_units: servo.stop_units,
                }
            })
            .collect()
    }

    pub fn status_report(&self) -> StatusReport {
        StatusReport {
            driver: self.driver_name().to_string(),
            initialized: self.is_initialized(),
            servos: self.status(),
            generated_at: Utc::now(),
        }
    }

    /// Release backend hardware; safe to call repeatedly
    pub fn shutdown(&self) -> Result<()> {
        self.backend.lock().cleanup()?;
        *self.initialized.lock() = false;
        self.pulses.lock().clear();
        tracing::info!("Servo controller shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ServoKind;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Setup(Vec<PinId>, PulseUnits),
        Set(PinId, PulseUnits),
        Cleanup,
    }

    #[derive(Clone, Default)]
    struct RecordingBackend {
        calls: Arc<Mutex<Vec<Call>>>,
        fail_writes: bool,
    }

    impl RecordingBackend {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().clone()
        }

        fn writes(&self, pin: PinId) -> Vec<PulseUnits> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    Call::Set(p, u) if p == pin => Some(u),
                    _ => None,
                })
                .collect()
        }

        fn clear(&self) {
            self.calls.lock().clear();
        }
    }

    impl ServoBackend for RecordingBackend {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn setup(&mut self, pins: &[PinId], centre_units: PulseUnits) -> Result<()> {
            self.calls.lock().push(Call::Setup(pins.to_vec(), centre_units));
            Ok(())
        }

        fn set_units(&mut self, pin: PinId, units: PulseUnits) -> Result<()> {
            if self.fail_writes {
                return Err(Error::HardwareIo(format!("pin {} write failed", pin)));
            }
            self.calls.lock().push(Call::Set(pin, units));
            Ok(())
        }

        fn cleanup(&mut self) -> Result<()> {
            self.calls.lock().push(Call::Cleanup);
            Ok(())
        }
    }

    fn motion() -> MotionConfig {
        MotionConfig {
            min_pulse: 50,
            max_pulse: 250,
            angle_offset: 90,
            smooth_steps: 20,
            step_delay: Duration::ZERO,
        }
    }

    fn servos() -> Vec<ServoDefinition> {
        let mut wheel = ServoDefinition::positional(37, 0, 100, "wheel").unwrap();
        wheel.kind = ServoKind::ContinuousRotation;
        wheel.stop_units = Some(152);
        vec![
            ServoDefinition::positional(31, -80, 45, "claw").unwrap(),
            ServoDefinition::positional(33, -10, 110, "reach").unwrap(),
            ServoDefinition::positional(35, -100, 120, "base").unwrap(),
            wheel,
        ]
    }

    fn controller() -> (ServoController<RecordingBackend>, RecordingBackend) {
        let backend = RecordingBackend::default();
        (ServoController::new(motion(), servos(), backend.clone()), backend)
    }

    #[test]
    fn test_angle_to_pulse_values() {
        let (ctl, _) = controller();
        assert_eq!(ctl.angle_to_pulse(-90), 50);
        assert_eq!(ctl.angle_to_pulse(0), 150);
        assert_eq!(ctl.angle_to_pulse(45), 200);
        assert_eq!(ctl.angle_to_pulse(90), 250);
        assert_eq!(ctl.angle_to_pulse(-80), 61);
        assert_eq!(ctl.centre_units(), 150);
    }

    #[test]
    fn test_angle_to_pulse_monotonic_and_bounded() {
        let (ctl, _) = controller();
        let mut previous = i32::MIN;
        for angle in -270..=270 {
            let pulse = ctl.angle_to_pulse(angle);
            assert!((50..=250).contains(&pulse), "angle {} -> {}", angle, pulse);
            assert!(pulse >= previous);
            previous = pulse;
        }
    }

    #[test]
    fn test_pulse_angle_round_trip() {
        let (ctl, _) = controller();
        for pulse in 50..=250 {
            let back = ctl.angle_to_pulse(ctl.pulse_to_angle(pulse));
            assert!((back - pulse).abs() <= 1, "pulse {} came back as {}", pulse, back);
        }
    }

    #[test]
    fn test_initialization_seeds_pulses_once() {
        let (ctl, backend) = controller();
        assert!(!ctl.is_initialized());
        assert!(ctl.status().iter().all(|s| s.value.is_none()));

        ctl.ensure_initialized().unwrap();
        ctl.ensure_initialized().unwrap();

        assert_eq!(
            backend.calls(),
            vec![Call::Setup(vec![31, 33, 35, 37], 150), Call::Set(37, 152)]
        );
        assert_eq!(ctl.current_pulse(31), Some(150));
        assert_eq!(ctl.current_pulse(37), Some(152));
        assert_eq!(ctl.status()[0].value, Some(0));
    }

    #[test]
    fn test_move_direct_clamps_into_range() {
        let (ctl, backend) = controller();
        ctl.ensure_initialized().unwrap();
        backend.clear();

        // Claw range is -80:45
        assert_eq!(ctl.move_direct(31, 90).unwrap(), 200);
        assert_eq!(backend.writes(31), vec![200]);
        assert_eq!(ctl.current_pulse(31), Some(200));
    }

    #[test]
    fn test_move_smooth_steps_then_exact_target() {
        let (ctl, backend) = controller();
        ctl.ensure_initialized().unwrap();
        backend.clear();

        ctl.move_smooth(31, -80).unwrap();
        let writes = backend.writes(31);
        assert_eq!(writes.len(), 21);
        assert_eq!(*writes.last().unwrap(), 61);
        // Monotonic descent from centre
        assert!(writes.windows(2).all(|w| w[1] <= w[0]));
        assert_eq!(writes[0], 146);
        assert_eq!(ctl.current_pulse(31), Some(61));
    }

    #[test]
    fn test_move_smooth_single_step_floor() {
        let backend = RecordingBackend::default();
        let mut m = motion();
        m.smooth_steps = 0;
        let ctl = ServoController::new(m, servos(), backend.clone());
        ctl.ensure_initialized().unwrap();
        backend.clear();

        ctl.move_smooth(33, 45).unwrap();
        assert_eq!(backend.writes(33), vec![200, 200]);
    }

    #[test]
    fn test_moves_reject_wrong_kind_and_unknown_pin() {
        let (ctl, _) = controller();
        assert!(matches!(ctl.move_direct(37, 10), Err(Error::InvalidOperation(_))));
        assert!(matches!(ctl.move_smooth(37, 10), Err(Error::InvalidOperation(_))));
        assert!(matches!(ctl.move_direct(99, 10), Err(Error::InvalidOperation(_))));
        assert!(matches!(ctl.set_speed(31, 10), Err(Error::InvalidOperation(_))));
        assert!(matches!(ctl.send_raw(99, 10), Err(Error::InvalidOperation(_))));
        // Rejections happen before touching the backend
        assert!(!ctl.is_initialized());
    }

    #[test]
    fn test_set_speed() {
        let (ctl, backend) = controller();
        assert_eq!(ctl.set_speed(37, 10).unwrap(), 172);
        assert_eq!(ctl.set_speed(37, -3).unwrap(), 146);
        assert_eq!(ctl.set_speed(37, 100).unwrap(), 250);
        assert_eq!(ctl.set_speed(37, -100).unwrap(), 50);
        assert_eq!(backend.writes(37), vec![152, 172, 146, 250, 50]);
    }

    #[test]
    fn test_set_speed_extreme_velocity_clamps() {
        let (ctl, _backend) = controller();
        assert_eq!(ctl.set_speed(37, i32::MAX).unwrap(), 250);
        assert_eq!(ctl.set_speed(37, i32::MIN).unwrap(), 50);
        assert_eq!(ctl.send_raw(37, PulseUnits::MAX).unwrap(), PulseUnits::MAX);
        assert_eq!(ctl.angle_to_pulse(i32::MAX), 250);
        assert_eq!(ctl.angle_to_pulse(i32::MIN), 50);
        assert!(ctl.pulse_to_angle(PulseUnits::MIN) < -90);
    }

    #[test]
    fn test_send_raw_clamps_negative() {
        let (ctl, backend) = controller();
        ctl.ensure_initialized().unwrap();
        backend.clear();
        assert_eq!(ctl.send_raw(35, -5).unwrap(), 0);
        assert_eq!(ctl.send_raw(37, 300).unwrap(), 300);
        assert_eq!(backend.calls(), vec![Call::Set(35, 0), Call::Set(37, 300)]);
    }

    #[test]
    fn test_center_all() {
        let (ctl, backend) = controller();
        ctl.move_direct(31, 45).unwrap();
        ctl.send_raw(37, 200).unwrap();
        backend.clear();

        ctl.center_all().unwrap();
        assert_eq!(*backend.writes(31).last().unwrap(), 150);
        assert_eq!(backend.writes(37), vec![152]);
        // Already-centred servos still receive the full step sequence
        assert_eq!(backend.writes(33).len(), 21);
    }

    #[test]
    fn test_pin_for_index() {
        let (ctl, _) = controller();
        assert_eq!(ctl.pin_for_index(1).unwrap(), 31);
        assert_eq!(ctl.pin_for_index(4).unwrap(), 37);
        assert!(matches!(ctl.pin_for_index(0), Err(Error::InvalidOperation(_))));
        assert!(matches!(ctl.pin_for_index(5), Err(Error::InvalidOperation(_))));
    }

    #[test]
    fn test_run_sequence_direct() {
        let (ctl, backend) = controller();
        assert_eq!(ctl.run_sequence("1:45,2:0,1:0", false).unwrap(), 3);
        assert_eq!(backend.writes(31), vec![200, 150]);
        assert_eq!(backend.writes(33), vec![150]);
    }

    #[test]
    fn test_run_sequence_validates_before_moving() {
        let (ctl, backend) = controller();
        assert!(matches!(ctl.run_sequence("1:45,9:0", false), Err(Error::InvalidOperation(_))));
        assert!(matches!(ctl.run_sequence("1-45", true), Err(Error::Config(_))));
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn test_run_script() {
        let (ctl, backend) = controller();
        let script = Script::parse("direct 31 45\n33 -10\n37 5\nraw 35 120\nsleep 0\n").unwrap();
        assert_eq!(ctl.run_script(&script).unwrap(), 5);

        assert_eq!(backend.writes(31), vec![200]);
        assert_eq!(backend.writes(33).len(), 21);
        assert_eq!(backend.writes(37), vec![152, 162]);
        assert_eq!(backend.writes(35), vec![120]);
    }

    #[test]
    fn test_write_failure_propagates() {
        let backend = RecordingBackend {
            fail_writes: true,
            ..Default::default()
        };
        let ctl = ServoController::new(motion(), vec![servos().remove(0)], backend);
        ctl.ensure_initialized().unwrap();
        assert!(matches!(ctl.move_direct(31, 10), Err(Error::HardwareIo(_))));
        assert_eq!(ctl.current_pulse(31), Some(150));
    }

    #[test]
    fn test_status_report() {
        let (ctl, _) = controller();
        ctl.move_direct(33, 45).unwrap();

        let report = ctl.status_report();
        assert_eq!(report.driver, "recording");
        assert!(report.initialized);
        let reach = &report.servos[1];
        assert_eq!(reach.idx, 2);
        assert_eq!(reach.part, "reach");
        assert_eq!(reach.range, "-10:110");
        assert_eq!(reach.value, Some(45));
        assert_eq!(report.servos[3].stop_units, Some(152));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["servos"][3]["type"], "cr");
    }

    #[test]
    fn test_same_pin_moves_do_not_interleave() {
        let backend = RecordingBackend::default();
        let mut m = motion();
        m.smooth_steps = 5;
        m.step_delay = Duration::from_millis(5);
        let ctl = Arc::new(ServoController::new(m, servos(), backend.clone()));
        ctl.ensure_initialized().unwrap();
        backend.clear();

        let handles: Vec<_> = [45, -80]
            .into_iter()
            .map(|angle| {
                let ctl = ctl.clone();
                thread::spawn(move || ctl.move_smooth(31, angle).unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let writes = backend.writes(31);
        assert_eq!(writes.len(), 12);
        let (first, second) = writes.split_at(6);
        let ends = [first[5], second[5]];
        assert!(ends == [200, 61] || ends == [61, 200], "{:?}", writes);
        // The second sequence starts from where the first ended
        let step = (second[5] - first[5]) as f64 / 5.0;
        assert_eq!(second[0], (first[5] as f64 + step).round() as i32);
    }

    #[test]
    fn test_busy_pin_times_out() {
        let (ctl, _) = controller();
        let ctl = ctl.with_move_guard(MoveGuard::with_timeout(50));
        ctl.ensure_initialized().unwrap();

        let _lease = ctl.guard.acquire(31).unwrap();
        assert!(matches!(ctl.move_direct(31, 0), Err(Error::Busy(_))));
        // Other pins are unaffected
        ctl.move_direct(33, 0).unwrap();
    }

    #[test]
    fn test_shutdown_cleans_up() {
        let (ctl, backend) = controller();
        ctl.ensure_initialized().unwrap();
        ctl.shutdown().unwrap();
        ctl.shutdown().unwrap();
        assert!(!ctl.is_initialized());
        assert_eq!(backend.calls().iter().filter(|c| **c == Call::Cleanup).count(), 2);
    }
}
