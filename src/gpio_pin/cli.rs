//! Command-line pin variant (`gpio mode` / `gpio write`)

use super::command::GpioTool;
use super::PinDriver;
use crate::error::{Error, Result};
use crate::models::PinId;
use std::str::FromStr;

/// Pin numbering convention passed to the `gpio` utility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Addressing {
    /// Physical header numbering (`gpio -1 ...`)
    #[default]
    Physical,
    /// Utility's native logical numbering
    Logical,
}

impl Addressing {
    fn prefix(&self) -> Option<&'static str> {
        match self {
            Addressing::Physical => Some("-1"),
            Addressing::Logical => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Addressing::Physical => "physical",
            Addressing::Logical => "logical",
        }
    }
}

impl FromStr for Addressing {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "physical" | "phys" => Ok(Addressing::Physical),
            "logical" | "wpi" => Ok(Addressing::Logical),
            other => Err(Error::Config(format!(
                "unknown addressing mode '{}' (expected physical or logical)",
                other
            ))),
        }
    }
}

/// Output line driven through external `gpio` invocations
pub struct CommandPin {
    pin: PinId,
    tool: GpioTool,
    addressing: Addressing,
    /// Last value written; `None` until the first write
    last: Option<bool>,
    released: bool,
}

impl CommandPin {
    /// Put the pin in output mode and return the driver
    pub fn open(pin: PinId, tool: GpioTool, addressing: Addressing) -> Result<Self> {
        let driver = Self {
            pin,
            tool,
            addressing,
            last: None,
            released: false,
        };
        driver.invoke(&["mode", &pin.to_string(), "out"])?;
        tracing::debug!(pin = pin, addressing = addressing.as_str(), "gpio pin configured as output");
        Ok(driver)
    }

    fn invoke(&self, args: &[&str]) -> Result<String> {
        let mut full: Vec<&str> = Vec::with_capacity(args.len() + 1);
        if let Some(prefix) = self.addressing.prefix() {
            full.push(prefix);
        }
        full.extend_from_slice(args);
        self.tool.run(&full)
    }

    fn write(&mut self, high: bool, force: bool) -> Result<()> {
        if self.released {
            return Err(Error::HardwareIo(format!("pin {} already released", self.pin)));
        }
        if !force && self.last == Some(high) {
            return Ok(());
        }
        let value = if high { "1" } else { "0" };
        self.invoke(&["write", &self.pin.to_string(), value])?;
        self.last = Some(high);
        Ok(())
    }
}

impl PinDriver for CommandPin {
    fn activate(&mut self) -> Result<()> {
        self.write(true, false)
    }

    fn deactivate(&mut self) -> Result<()> {
        self.write(false, false)
    }

    fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        let result = self.write(false, true);
        self.released = true;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    /// `sh -c` stand-in for the utility that appends each invocation to a log
    fn logging_tool(name: &str) -> (GpioTool, PathBuf) {
        let log = std::env::temp_dir().join(format!(
            "robot-api-gpio-{}-{}.log",
            name,
            uuid::Uuid::new_v4()
        ));
        let script = format!("echo \"$@\" >> '{}'", log.display());
        let tool = GpioTool::new("sh").with_base_args(["-c".to_string(), script, "gpio".to_string()]);
        (tool, log)
    }

    fn calls(log: &PathBuf) -> Vec<String> {
        std::fs::read_to_string(log)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_addressing_parse() {
        assert_eq!("physical".parse::<Addressing>().unwrap(), Addressing::Physical);
        assert_eq!("Logical".parse::<Addressing>().unwrap(), Addressing::Logical);
        assert!(matches!("bcm".parse::<Addressing>(), Err(Error::Config(_))));
    }

    #[test]
    fn test_physical_prefix_and_dedup() {
        let (tool, log) = logging_tool("phys");
        let mut pin = CommandPin::open(31, tool, Addressing::Physical).unwrap();

        pin.activate().unwrap();
        pin.activate().unwrap();
        pin.deactivate().unwrap();
        pin.deactivate().unwrap();

        assert_eq!(
            calls(&log),
            vec!["-1 mode 31 out", "-1 write 31 1", "-1 write 31 0"]
        );
        let _ = std::fs::remove_file(&log);
    }

    #[test]
    fn test_release_forces_low() {
        let (tool, log) = logging_tool("release");
        let mut pin = CommandPin::open(7, tool, Addressing::Logical).unwrap();

        pin.deactivate().unwrap();
        pin.release().unwrap();
        pin.release().unwrap();

        // Release writes low even though the line is already known low
        assert_eq!(calls(&log), vec!["mode 7 out", "write 7 0", "write 7 0"]);
        assert!(pin.activate().is_err());
        let _ = std::fs::remove_file(&log);
    }

    #[test]
    fn test_open_failure_propagates() {
        let tool = GpioTool::new("false");
        assert!(matches!(
            CommandPin::open(31, tool, Addressing::Physical),
            Err(Error::HardwareIo(_))
        ));
    }
}
