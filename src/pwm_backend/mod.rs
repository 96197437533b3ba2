//! PwmBackend - Servo Output Backends
//!
//! ## Responsibilities
//!
//! - Backend contract consumed by the servo controller
//! - Closed set of three implementations, chosen once at startup
//!
//! ## Backends
//!
//! - `soft`: software PWM engine over GPIO lines
//! - `hw`: platform PWM peripheral via the `gpio` utility
//! - `pca9685`: 16-channel I2C PWM chip

use crate::error::{Error, Result};
use crate::gpio_pin::{GpioPinFactory, GpioTool, PinBackendKind, PinFactory};
use crate::hw_pwm::HardwarePwmBackend;
use crate::models::{PinId, PulseUnits};
use crate::pca9685::Pca9685Backend;
use crate::soft_pwm::{SoftPwmBackend, SoftPwmEngine};
use crate::state::AppConfig;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Contract every servo output backend implements
pub trait ServoBackend: Send {
    /// Short driver name for logs and status
    fn name(&self) -> &'static str;

    /// Prepare every pin and drive it to `centre_units`
    ///
    /// Fails with `Error::Config` when a required mapping is missing.
    fn setup(&mut self, pins: &[PinId], centre_units: PulseUnits) -> Result<()>;

    /// Set one pin's pulse width
    fn set_units(&mut self, pin: PinId, units: PulseUnits) -> Result<()>;

    /// Release owned hardware resources; safe to call repeatedly
    fn cleanup(&mut self) -> Result<()>;
}

/// Configured servo driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServoDriver {
    #[default]
    Soft,
    Hardware,
    Pca9685,
}

impl ServoDriver {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServoDriver::Soft => "soft",
            ServoDriver::Hardware => "hw",
            ServoDriver::Pca9685 => "pca9685",
        }
    }
}

impl fmt::Display for ServoDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServoDriver {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "soft" | "software" => Ok(ServoDriver::Soft),
            "hw" | "hardware" => Ok(ServoDriver::Hardware),
            "pca9685" | "pca" => Ok(ServoDriver::Pca9685),
            other => Err(Error::Config(format!(
                "unknown servo driver '{}' (expected soft, hw or pca9685)",
                other
            ))),
        }
    }
}

/// The selected backend
pub enum PwmBackend {
    Software(SoftPwmBackend),
    Hardware(HardwarePwmBackend),
    Pca9685(Pca9685Backend),
}

impl PwmBackend {
    /// Construct the backend named by `config.driver`
    ///
    /// No hardware is touched until `setup`.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let backend = match config.driver {
            ServoDriver::Soft => {
                let factory: Arc<dyn PinFactory> = match config.soft.backend {
                    PinBackendKind::Gpiod => Arc::new(GpioPinFactory::char_device(
                        config
                            .servos
                            .iter()
                            .filter_map(|s| s.line.clone().map(|line| (s.pin, line)))
                            .collect(),
                    )),
                    PinBackendKind::Gpio => Arc::new(GpioPinFactory::command(
                        GpioTool::from_command_line(&config.gpio_command)?,
                        config.soft.addressing,
                    )),
                };
                let engine = SoftPwmEngine::new(config.soft.period_us, factory)?;
                PwmBackend::Software(SoftPwmBackend::new(engine))
            }
            ServoDriver::Hardware => PwmBackend::Hardware(HardwarePwmBackend::new(
                GpioTool::from_command_line(&config.gpio_command)?,
                config.hw.pwm_freq,
                config.hw.pwm_range,
            )),
            ServoDriver::Pca9685 => {
                PwmBackend::Pca9685(Pca9685Backend::from_config(&config.pca9685, &config.servos))
            }
        };

        tracing::info!(driver = backend.name(), "Servo backend selected");
        Ok(backend)
    }
}

impl ServoBackend for PwmBackend {
    fn name(&self) -> &'static str {
        match self {
            PwmBackend::Software(b) => b.name(),
            PwmBackend::Hardware(b) => b.name(),
            PwmBackend::Pca9685(b) => b.name(),
        }
    }

    fn setup(&mut self, pins: &[PinId], centre_units: PulseUnits) -> Result<()> {
        match self {
            PwmBackend::Software(b) => b.setup(pins, centre_units),
            PwmBackend::Hardware(b) => b.setup(pins, centre_units),
            PwmBackend::Pca9685(b) => b.setup(pins, centre_units),
        }
    }

    fn set_units(&mut self, pin: PinId, units: PulseUnits) -> Result<()> {
        match self {
            PwmBackend::Software(b) => b.set_units(pin, units),
            PwmBackend::Hardware(b) => b.set_units(pin, units),
            PwmBackend::Pca9685(b) => b.set_units(pin, units),
        }
    }

    fn cleanup(&mut self) -> Result<()> {
        match self {
            PwmBackend::Software(b) => b.cleanup(),
            PwmBackend::Hardware(b) => b.cleanup(),
            PwmBackend::Pca9685(b) => b.cleanup(),
        }
    }
}
