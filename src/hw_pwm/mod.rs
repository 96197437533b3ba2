//! HardwarePwmBackend - Platform PWM Peripheral
//!
//! ## Responsibilities
//!
//! - Configure each pin for PWM mode, mark-space (ms) mode, clock and range
//! - Write pulse widths straight to the peripheral
//!
//! The peripheral free-runs the waveform; there is no timing loop here.

use crate::error::Result;
use crate::gpio_pin::GpioTool;
use crate::models::{PinId, PulseUnits};
use crate::pwm_backend::ServoBackend;

pub struct HardwarePwmBackend {
    tool: GpioTool,
    pwm_freq: u32,
    pwm_range: u32,
}

impl HardwarePwmBackend {
    pub fn new(tool: GpioTool, pwm_freq: u32, pwm_range: u32) -> Self {
        Self {
            tool,
            pwm_freq,
            pwm_range,
        }
    }

    fn configure_pin(&self, pin: PinId, centre_units: PulseUnits) -> Result<()> {
        let pin = pin.to_string();
        self.tool.run(&["pwm-ms", pin.as_str()])?;
        self.tool.run(&["pwmc", pin.as_str(), &self.pwm_freq.to_string()])?;
        self.tool.run(&["pwmr", pin.as_str(), &self.pwm_range.to_string()])?;
        self.tool.run(&["pwm", pin.as_str(), &centre_units.to_string()])?;
        Ok(())
    }
}

impl ServoBackend for HardwarePwmBackend {
    fn name(&self) -> &'static str {
        "hw"
    }

    fn setup(&mut self, pins: &[PinId], centre_units: PulseUnits) -> Result<()> {
        // All pins switch to PWM mode before any clock/range programming
        for &pin in pins {
            self.tool.run(&["mode", &pin.to_string(), "pwm"])?;
        }
        for &pin in pins {
            self.configure_pin(pin, centre_units)?;
        }
        tracing::info!(
            pins = ?pins,
            pwm_freq = self.pwm_freq,
            pwm_range = self.pwm_range,
            centre_units = centre_units,
            "Hardware PWM backend ready"
        );
        Ok(())
    }

    fn set_units(&mut self, pin: PinId, units: PulseUnits) -> Result<()> {
        let units = units.max(0);
        self.tool
            .run(&["pwm", &pin.to_string(), &units.to_string()])
            .map(|_| ())
    }

    /// The peripheral keeps its last value
    fn cleanup(&mut self) -> Result<()> {
        Ok(())
    }
}
