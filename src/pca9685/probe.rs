//! Channel probe: nudge each channel in turn so an operator can see
//! which joint is wired where.

use super::device::{Pca9685, CHANNEL_COUNT};
use crate::error::{Error, Result};
use embedded_hal::i2c::I2c;
use std::thread;
use std::time::Duration;

const MIN_PROBE_US: u32 = 500;
const MAX_PROBE_US: u32 = 2500;

#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub centre_us: u32,
    pub delta_us: u32,
    /// Time held at each extreme
    pub hold: Duration,
    /// Pause after each channel
    pub pause: Duration,
    /// Time back at centre between extremes
    pub settle: Duration,
    /// Wait after the initial centring pass
    pub warmup: Duration,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            centre_us: 1500,
            delta_us: 200,
            hold: Duration::from_millis(400),
            pause: Duration::from_millis(600),
            settle: Duration::from_millis(250),
            warmup: Duration::from_secs(1),
        }
    }
}

/// Parse a channel list such as `0-7`, `0,2,5` or `0-3,8`; empty means all
pub fn parse_channels(list: &str) -> Result<Vec<u8>> {
    let list = list.trim();
    if list.is_empty() {
        return Ok((0..CHANNEL_COUNT).collect());
    }

    let parse = |v: &str| {
        v.trim()
            .parse::<u8>()
            .ok()
            .filter(|c| *c < CHANNEL_COUNT)
            .ok_or_else(|| Error::Config(format!("invalid PCA9685 channel '{}'", v.trim())))
    };

    let mut channels = Vec::new();
    for part in list.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((from, to)) => {
                let (from, to) = (parse(from)?, parse(to)?);
                if from > to {
                    return Err(Error::Config(format!("channel range '{}' is reversed", part)));
                }
                channels.extend(from..=to);
            }
            None => channels.push(parse(part)?),
        }
    }
    Ok(channels)
}

/// Centre all listed channels, then play centre-delta, centre, centre+delta,
/// centre on each one. Channels are left centred even on failure.
pub fn probe_channels<I, F>(
    device: &mut Pca9685<I>,
    channels: &[u8],
    settings: &ProbeSettings,
    mut on_channel: F,
) -> Result<()>
where
    I: I2c,
    F: FnMut(u8),
{
    let centre = settings.centre_us;
    let low = centre.saturating_sub(settings.delta_us).max(MIN_PROBE_US);
    let high = (centre + settings.delta_us).min(MAX_PROBE_US);

    let result = run_pattern(device, channels, settings, (low, high), &mut on_channel);

    for &channel in channels {
        if let Err(e) = device.set_pwm_us(channel, centre) {
            tracing::warn!(channel = channel, error = %e, "Failed to re-centre channel");
        }
    }
    result
}

fn run_pattern<I, F>(
    device: &mut Pca9685<I>,
    channels: &[u8],
    settings: &ProbeSettings,
    (low, high): (u32, u32),
    on_channel: &mut F,
) -> Result<()>
where
    I: I2c,
    F: FnMut(u8),
{
    let centre = settings.centre_us;
    for &channel in channels {
        device.set_pwm_us(channel, centre)?;
    }
    thread::sleep(settings.warmup);

    for &channel in channels {
        on_channel(channel);
        tracing::info!(channel = channel, low_us = low, high_us = high, "Probing channel");
        device.set_pwm_us(channel, low)?;
        thread::sleep(settings.hold);
        device.set_pwm_us(channel, centre)?;
        thread::sleep(settings.settle);
        device.set_pwm_us(channel, high)?;
        thread::sleep(settings.hold);
        device.set_pwm_us(channel, centre)?;
        thread::sleep(settings.settle);
        thread::sleep(settings.pause);
    }
    Ok(())
}
