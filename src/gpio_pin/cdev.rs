//! Character-device pin variant
//!
//! Two generations of the line API exist in the wild: the request-based
//! handle interface and the newer line-settings interface. Which one a
//! board supports is decided once, at construction, by probing.

use super::PinDriver;
use crate::error::{Error, Result};
use crate::models::{LineAddress, PinId};
use gpio_cdev::{Chip, LineHandle, LineRequestFlags};
use gpiocdev::line::Value;
use std::path::Path;

/// Consumer label shown by line inspection tools
const CONSUMER: &str = "soft-servo";

/// Strategy chosen by the construction-time probe
enum LineStrategy {
    /// Request-based handle interface
    Handle(LineHandle),
    /// Line-settings request interface
    Settings { request: gpiocdev::Request, offset: u32 },
}

impl LineStrategy {
    fn probe(address: &LineAddress) -> Result<Self> {
        let path = address.device_path();
        if !Path::new(&path).exists() {
            return Err(Error::Config(format!("GPIO chip {} does not exist", path)));
        }

        let handle_err = match Self::request_handle(&path, address.offset) {
            Ok(handle) => return Ok(LineStrategy::Handle(handle)),
            Err(e) => e,
        };

        match Self::request_settings(&path, address.offset) {
            Ok(request) => {
                tracing::debug!(
                    chip = %path,
                    offset = address.offset,
                    handle_error = %handle_err,
                    "request-based line API unavailable, using line-settings API"
                );
                Ok(LineStrategy::Settings {
                    request,
                    offset: address.offset,
                })
            }
            Err(settings_err) => Err(Error::Config(format!(
                "cannot request {} line {}: handle API: {}; line-settings API: {}",
                path, address.offset, handle_err, settings_err
            ))),
        }
    }

    fn request_handle(path: &str, offset: u32) -> std::result::Result<LineHandle, String> {
        let mut chip = Chip::new(path).map_err(|e| e.to_string())?;
        let line = chip.get_line(offset).map_err(|e| e.to_string())?;
        line.request(LineRequestFlags::OUTPUT, 0, CONSUMER)
            .map_err(|e| e.to_string())
    }

    fn request_settings(path: &str, offset: u32) -> std::result::Result<gpiocdev::Request, String> {
        gpiocdev::Request::builder()
            .on_chip(path)
            .with_consumer(CONSUMER)
            .with_line(offset)
            .as_output(Value::Inactive)
            .request()
            .map_err(|e| e.to_string())
    }

    fn set(&self, high: bool) -> std::result::Result<(), String> {
        match self {
            LineStrategy::Handle(handle) => handle
                .set_value(u8::from(high))
                .map_err(|e| e.to_string()),
            LineStrategy::Settings { request, offset } => {
                let value = if high { Value::Active } else { Value::Inactive };
                request
                    .set_value(*offset, value)
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            }
        }
    }

    fn name(&self) -> &'static str {
        match self {
            LineStrategy::Handle(_) => "handle",
            LineStrategy::Settings { .. } => "line-settings",
        }
    }
}

/// Output line held through the GPIO character device
pub struct CharDevicePin {
    pin: PinId,
    address: LineAddress,
    /// `None` once released
    line: Option<LineStrategy>,
    /// Lines are requested low, so the initial value is known
    last: bool,
}

impl CharDevicePin {
    pub fn open(pin: PinId, address: &LineAddress) -> Result<Self> {
        let line = LineStrategy::probe(address)?;
        tracing::debug!(
            pin = pin,
            chip = %address.chip,
            offset = address.offset,
            strategy = line.name(),
            "GPIO line requested"
        );
        Ok(Self {
            pin,
            address: address.clone(),
            line: Some(line),
            last: false,
        })
    }

    fn write(&mut self, high: bool, force: bool) -> Result<()> {
        let line = self.line.as_ref().ok_or_else(|| {
            Error::HardwareIo(format!("pin {} already released", self.pin))
        })?;
        if !force && self.last == high {
            return Ok(());
        }
        line.set(high).map_err(|e| {
            Error::HardwareIo(format!(
                "pin {} ({} line {}): {}",
                self.pin, self.address.chip, self.address.offset, e
            ))
        })?;
        self.last = high;
        Ok(())
    }
}

impl PinDriver for CharDevicePin {
    fn activate(&mut self) -> Result<()> {
        self.write(true, false)
    }

    fn deactivate(&mut self) -> Result<()> {
        self.write(false, false)
    }

    fn release(&mut self) -> Result<()> {
        if self.line.is_none() {
            return Ok(());
        }
        let result = self.write(false, true);
        // Dropping the strategy closes the line request
        self.line = None;
        result
    }
}
