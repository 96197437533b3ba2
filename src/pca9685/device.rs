//! PCA9685 register-level driver
//!
//! 16 channels, 12-bit resolution, 25 MHz internal oscillator.

use crate::error::{Error, Result};
use embedded_hal::i2c::I2c;
use std::fmt::Debug;
use std::thread;
use std::time::Duration;

pub const MODE1: u8 = 0x00;
pub const MODE2: u8 = 0x01;
pub const PRESCALE: u8 = 0xFE;
pub const LED0_ON_L: u8 = 0x06;

/// MODE1 bits
pub const MODE1_ALLCALL: u8 = 0x01;
pub const MODE1_SLEEP: u8 = 0x10;
pub const MODE1_AUTO_INCREMENT: u8 = 0x20;
pub const MODE1_RESTART: u8 = 0x80;

/// MODE2 totem-pole output drive
pub const MODE2_OUTDRV: u8 = 0x04;

pub const CHANNEL_COUNT: u8 = 16;
pub const MIN_FREQ_HZ: u32 = 24;
pub const MAX_FREQ_HZ: u32 = 1526;

const OSCILLATOR_HZ: f64 = 25_000_000.0;
const TICKS_PER_CYCLE: f64 = 4096.0;
const MAX_TICK: u16 = 4095;

/// Prescaler register value for `freq_hz`
pub fn prescale_for(freq_hz: u32) -> Result<u8> {
    if !(MIN_FREQ_HZ..=MAX_FREQ_HZ).contains(&freq_hz) {
        return Err(Error::Config(format!(
            "PCA9685 frequency {} Hz outside {}-{} Hz",
            freq_hz, MIN_FREQ_HZ, MAX_FREQ_HZ
        )));
    }
    let prescale = OSCILLATOR_HZ / (TICKS_PER_CYCLE * f64::from(freq_hz)) - 1.0;
    Ok(prescale.round() as u8)
}

/// Off-tick count for a pulse of `pulse_us` at `freq_hz`, clamped to 0-4095
pub fn ticks_for(pulse_us: u32, freq_hz: u32) -> u16 {
    let ticks = (f64::from(pulse_us) * TICKS_PER_CYCLE * f64::from(freq_hz) / 1_000_000.0).round();
    ticks.clamp(0.0, f64::from(MAX_TICK)) as u16
}

/// PCA9685 on an I2C bus
pub struct Pca9685<I2C> {
    bus: I2C,
    address: u8,
    freq_hz: Option<u32>,
}

impl<I2C> Pca9685<I2C>
where
    I2C: I2c,
    I2C::Error: Debug,
{
    pub fn new(bus: I2C, address: u8) -> Self {
        Self {
            bus,
            address,
            freq_hz: None,
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn freq_hz(&self) -> Option<u32> {
        self.freq_hz
    }

    /// Give the bus back; closing it is the owner's business
    pub fn release(self) -> I2C {
        self.bus
    }

    fn write_reg(&mut self, register: u8, value: u8) -> Result<()> {
        self.bus.write(self.address, &[register, value]).map_err(|e| {
            Error::HardwareIo(format!(
                "PCA9685@0x{:02x} write reg 0x{:02x}: {:?}",
                self.address, register, e
            ))
        })
    }

    fn read_reg(&mut self, register: u8) -> Result<u8> {
        let mut buf = [0u8];
        self.bus
            .write_read(self.address, &[register], &mut buf)
            .map_err(|e| {
                Error::HardwareIo(format!(
                    "PCA9685@0x{:02x} read reg 0x{:02x}: {:?}",
                    self.address, register, e
                ))
            })?;
        Ok(buf[0])
    }

    /// Reset MODE1, select totem-pole drive, enable register auto-increment
    pub fn reset(&mut self) -> Result<()> {
        self.write_reg(MODE1, 0x00)?;
        thread::sleep(Duration::from_millis(10));
        self.write_reg(MODE2, MODE2_OUTDRV)?;
        let mode1 = self.read_reg(MODE1)?;
        self.write_reg(MODE1, mode1 | MODE1_AUTO_INCREMENT)?;
        Ok(())
    }

    /// Program the prescaler; the oscillator must sleep while it changes
    pub fn set_pwm_freq(&mut self, freq_hz: u32) -> Result<()> {
        let prescale = prescale_for(freq_hz)?;
        let old_mode = self.read_reg(MODE1)?;
        self.write_reg(MODE1, (old_mode & !MODE1_RESTART) | MODE1_SLEEP)?;
        self.write_reg(PRESCALE, prescale)?;
        self.write_reg(MODE1, old_mode)?;
        thread::sleep(Duration::from_millis(5));
        self.write_reg(
            MODE1,
            old_mode | MODE1_RESTART | MODE1_AUTO_INCREMENT | MODE1_ALLCALL,
        )?;
        self.freq_hz = Some(freq_hz);
        tracing::debug!(address = self.address, freq_hz = freq_hz, prescale = prescale, "PCA9685 frequency set");
        Ok(())
    }

    /// Raw on/off tick counts for one channel
    pub fn set_pwm(&mut self, channel: u8, on: u16, off: u16) -> Result<()> {
        if channel >= CHANNEL_COUNT {
            return Err(Error::Config(format!(
                "PCA9685 channel {} outside 0-{}",
                channel,
                CHANNEL_COUNT - 1
            )));
        }
        let on = on & 0x0FFF;
        let off = off & 0x0FFF;
        let base = LED0_ON_L + 4 * channel;
        let frame = [
            base,
            (on & 0xFF) as u8,
            (on >> 8) as u8,
            (off & 0xFF) as u8,
            (off >> 8) as u8,
        ];
        self.bus.write(self.address, &frame).map_err(|e| {
            Error::HardwareIo(format!(
                "PCA9685@0x{:02x} channel {}: {:?}",
                self.address, channel, e
            ))
        })
    }

    /// Pulse width in microseconds at the configured frequency
    pub fn set_pwm_us(&mut self, channel: u8, pulse_us: u32) -> Result<()> {
        let freq_hz = self
            .freq_hz
            .ok_or_else(|| Error::Config("PCA9685 frequency not configured".to_string()))?;
        self.set_pwm(channel, 0, ticks_for(pulse_us, freq_hz))
    }
}
