//! Pca9685Backend - I2C PWM Chip Servo Backend
//!
//! ## Responsibilities
//!
//! - Register-level device protocol (reset, prescaler, channel duty)
//! - Bounded bus transactions over the Linux I2C device
//! - Pin -> channel resolution from servo definitions
//! - Channel probe for wiring discovery

pub mod bus;
pub mod device;
#[cfg(test)]
pub(crate) mod mock;
pub mod probe;

pub use bus::{BusError, TimedI2c};
pub use device::{prescale_for, ticks_for, Pca9685};
pub use probe::{parse_channels, probe_channels, ProbeSettings};

use crate::error::{Error, Result};
use crate::models::{units_to_us, PinId, PulseUnits, ServoDefinition};
use crate::pwm_backend::ServoBackend;
use crate::state::Pca9685Config;
use embedded_hal::i2c::I2c;
use linux_embedded_hal::I2cdev;
use std::collections::HashMap;

/// Opens a fresh bus handle each time the backend is set up
pub type BusOpener<I> = Box<dyn FnMut() -> Result<I> + Send>;

/// Open the configured Linux I2C bus behind a transaction deadline
pub fn open_bus(config: &Pca9685Config) -> Result<TimedI2c> {
    let path = config.device_path();
    let dev = I2cdev::new(&path)
        .map_err(|e| Error::HardwareIo(format!("cannot open {}: {}", path, e)))?;
    TimedI2c::spawn(dev, config.transaction_timeout)
}

/// Open, reset and program the configured device
pub fn open_device(config: &Pca9685Config) -> Result<Pca9685<TimedI2c>> {
    let mut device = Pca9685::new(open_bus(config)?, config.address);
    device.reset()?;
    device.set_pwm_freq(config.freq_hz)?;
    Ok(device)
}

pub struct Pca9685Backend<I = TimedI2c> {
    opener: BusOpener<I>,
    address: u8,
    freq_hz: u32,
    servos: HashMap<PinId, Option<u8>>,
    channels: HashMap<PinId, u8>,
    device: Option<Pca9685<I>>,
}

impl Pca9685Backend<TimedI2c> {
    pub fn from_config(config: &Pca9685Config, servos: &[ServoDefinition]) -> Self {
        let bus_config = config.clone();
        Self::new(
            Box::new(move || open_bus(&bus_config)),
            config.address,
            config.freq_hz,
            servos,
        )
    }
}

impl<I: I2c> Pca9685Backend<I> {
    pub fn new(opener: BusOpener<I>, address: u8, freq_hz: u32, servos: &[ServoDefinition]) -> Self {
        Self {
            opener,
            address,
            freq_hz,
            servos: servos.iter().map(|s| (s.pin, s.channel)).collect(),
            channels: HashMap::new(),
            device: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.device.is_some()
    }

    fn resolve_channel(&self, pin: PinId) -> Result<u8> {
        match self.servos.get(&pin) {
            None => Err(Error::Config(format!("no servo definition for pin {}", pin))),
            Some(None) => Err(Error::Config(format!(
                "servo pin {} does not define a PCA9685 channel",
                pin
            ))),
            Some(Some(channel)) => Ok(*channel),
        }
    }
}

impl<I: I2c + Send> ServoBackend for Pca9685Backend<I> {
    fn name(&self) -> &'static str {
        "pca9685"
    }

    fn setup(&mut self, pins: &[PinId], centre_units: PulseUnits) -> Result<()> {
        // Resolve every mapping before touching the bus
        let channels = pins
            .iter()
            .map(|&pin| self.resolve_channel(pin).map(|channel| (pin, channel)))
            .collect::<Result<HashMap<PinId, u8>>>()?;

        self.cleanup()?;
        let mut device = Pca9685::new((self.opener)()?, self.address);
        device.reset()?;
        device.set_pwm_freq(self.freq_hz)?;

        let centre_us = units_to_us(centre_units);
        for &pin in pins {
            device.set_pwm_us(channels[&pin], centre_us)?;
        }

        tracing::info!(
            address = self.address,
            freq_hz = self.freq_hz,
            channels = ?channels,
            centre_us = centre_us,
            "PCA9685 backend ready"
        );
        self.channels = channels;
        self.device = Some(device);
        Ok(())
    }

    fn set_units(&mut self, pin: PinId, units: PulseUnits) -> Result<()> {
        let device = self.device.as_mut().ok_or_else(|| {
            Error::InvalidOperation("PCA9685 backend has not been set up".to_string())
        })?;
        let channel = *self
            .channels
            .get(&pin)
            .ok_or_else(|| Error::Config(format!("pin {} has no PCA9685 channel mapping", pin)))?;
        device.set_pwm_us(channel, units_to_us(units))
    }

    fn cleanup(&mut self) -> Result<()> {
        if let Some(device) = self.device.take() {
            // Dropping the bus handle closes it
            drop(device.release());
            tracing::info!(address = self.address, "PCA9685 bus closed");
        }
        Ok(())
    }
}
