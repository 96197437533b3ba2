//! GpioPin - Discrete Output Line Drivers
//!
//! ## Responsibilities
//!
//! - Minimal activate / deactivate / release capability per output line
//! - Character-device variant with construction-time API probe
//! - Command-line variant over the `gpio` utility with bounded invocations
//! - Factory that maps configured pins to the selected variant

pub mod cdev;
pub mod cli;
pub mod command;

pub use cdev::CharDevicePin;
pub use cli::{Addressing, CommandPin};
pub use command::GpioTool;

use crate::error::{Error, Result};
use crate::models::{LineAddress, PinId};
use std::collections::HashMap;
use std::str::FromStr;

/// One discrete output line
///
/// `deactivate` is cheap when the line is already known low, and
/// `release` always drives the line low before giving it up.
pub trait PinDriver: Send {
    fn activate(&mut self) -> Result<()>;
    fn deactivate(&mut self) -> Result<()>;
    fn release(&mut self) -> Result<()>;
}

/// Constructs drivers on demand for the software PWM engine
pub trait PinFactory: Send + Sync {
    fn open(&self, pin: PinId) -> Result<Box<dyn PinDriver>>;
}

/// Selected pin driver mechanism
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PinBackendKind {
    /// GPIO character device
    #[default]
    Gpiod,
    /// External `gpio` utility
    Gpio,
}

impl PinBackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PinBackendKind::Gpiod => "gpiod",
            PinBackendKind::Gpio => "gpio",
        }
    }
}

impl FromStr for PinBackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gpiod" | "cdev" => Ok(PinBackendKind::Gpiod),
            "gpio" | "cli" | "wiringpi" => Ok(PinBackendKind::Gpio),
            other => Err(Error::Config(format!(
                "unknown soft PWM pin backend '{}' (expected gpiod or gpio)",
                other
            ))),
        }
    }
}

/// Production pin factory
pub enum GpioPinFactory {
    CharDevice { lines: HashMap<PinId, LineAddress> },
    Command { tool: GpioTool, addressing: Addressing },
}

impl GpioPinFactory {
    pub fn char_device(lines: HashMap<PinId, LineAddress>) -> Self {
        GpioPinFactory::CharDevice { lines }
    }

    pub fn command(tool: GpioTool, addressing: Addressing) -> Self {
        GpioPinFactory::Command { tool, addressing }
    }
}

impl PinFactory for GpioPinFactory {
    fn open(&self, pin: PinId) -> Result<Box<dyn PinDriver>> {
        match self {
            GpioPinFactory::CharDevice { lines } => {
                let address = lines.get(&pin).ok_or_else(|| {
                    Error::Config(format!("pin {} has no chip/line mapping", pin))
                })?;
                Ok(Box::new(CharDevicePin::open(pin, address)?))
            }
            GpioPinFactory::Command { tool, addressing } => {
                Ok(Box::new(CommandPin::open(pin, tool.clone(), *addressing)?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!("gpiod".parse::<PinBackendKind>().unwrap(), PinBackendKind::Gpiod);
        assert_eq!("GPIO".parse::<PinBackendKind>().unwrap(), PinBackendKind::Gpio);
        assert!("sysfs".parse::<PinBackendKind>().is_err());
    }

    #[test]
    fn test_char_device_factory_requires_mapping() {
        let factory = GpioPinFactory::char_device(HashMap::new());
        assert!(matches!(factory.open(31), Err(Error::Config(_))));
    }

    #[test]
    fn test_command_factory_opens_pin() {
        let factory = GpioPinFactory::command(GpioTool::new("true"), Addressing::Physical);
        let mut pin = factory.open(33).unwrap();
        pin.activate().unwrap();
        pin.release().unwrap();
    }
}
