//! Data models for robot-api
//!
//! Servo definitions are static and loaded once; status types are
//! produced on demand by the servo controller.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Pin identifier (physical or logical header number, per configuration)
pub type PinId = u32;

/// Pulse width in 10 µs ticks
pub type PulseUnits = i32;

/// Microseconds per pulse unit
pub const US_PER_UNIT: u32 = 10;

/// Pulse width in microseconds; negative units are zero, huge ones saturate
pub fn units_to_us(units: PulseUnits) -> u32 {
    (units.max(0) as u32).saturating_mul(US_PER_UNIT)
}

/// Servo kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServoKind {
    /// Pulse width maps to a mechanical angle
    #[serde(rename = "pos")]
    Positional,
    /// Pulse width maps to speed/direction around a stop pulse
    #[serde(rename = "cr")]
    ContinuousRotation,
}

impl ServoKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServoKind::Positional => "pos",
            ServoKind::ContinuousRotation => "cr",
        }
    }
}

impl fmt::Display for ServoKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive angle range in signed degrees
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AngleRange {
    pub min: i32,
    pub max: i32,
}

impl AngleRange {
    pub fn new(min: i32, max: i32) -> Result<Self> {
        if min > max {
            return Err(Error::Config(format!(
                "angle range {}:{} has min greater than max",
                min, max
            )));
        }
        Ok(Self { min, max })
    }

    pub fn clamp(&self, angle: i32) -> i32 {
        angle.clamp(self.min, self.max)
    }
}

impl fmt::Display for AngleRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.min, self.max)
    }
}

impl FromStr for AngleRange {
    type Err = Error;

    /// Parses `min:max`, e.g. `-80:45`
    fn from_str(s: &str) -> Result<Self> {
        let (min, max) = s
            .split_once(':')
            .ok_or_else(|| Error::Config(format!("angle range '{}' is not min:max", s)))?;
        let parse = |v: &str| {
            v.trim()
                .parse::<i32>()
                .map_err(|e| Error::Config(format!("angle range '{}': {}", s, e)))
        };
        Self::new(parse(min)?, parse(max)?)
    }
}

/// Character-device line address: line group (chip) plus offset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineAddress {
    pub chip: String,
    pub offset: u32,
}

impl LineAddress {
    /// Device path, accepting either `gpiochip3` or `/dev/gpiochip3`
    pub fn device_path(&self) -> String {
        if self.chip.starts_with('/') {
            self.chip.clone()
        } else {
            format!("/dev/{}", self.chip)
        }
    }
}

/// Static servo definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServoDefinition {
    pub pin: PinId,
    pub kind: ServoKind,
    pub range: AngleRange,
    #[serde(default)]
    pub part: String,
    /// Software PWM (character-device) line address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<LineAddress>,
    /// PWM-chip channel 0-15
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<u8>,
    /// Stop pulse for continuous-rotation servos
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_units: Option<PulseUnits>,
    /// Units per velocity step for continuous-rotation servos
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gain_units: Option<f64>,
}

impl ServoDefinition {
    /// Positional servo with no backend addressing
    pub fn positional(pin: PinId, min: i32, max: i32, part: &str) -> Result<Self> {
        Ok(Self {
            pin,
            kind: ServoKind::Positional,
            range: AngleRange::new(min, max)?,
            part: part.to_string(),
            line: None,
            channel: None,
            stop_units: None,
            gain_units: None,
        })
    }

    pub fn with_channel(mut self, channel: u8) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn with_line(mut self, chip: &str, offset: u32) -> Self {
        self.line = Some(LineAddress {
            chip: chip.to_string(),
            offset,
        });
        self
    }

    pub fn is_positional(&self) -> bool {
        self.kind == ServoKind::Positional
    }

    /// Checks invariants serde cannot express
    pub fn validate(&self) -> Result<()> {
        AngleRange::new(self.range.min, self.range.max)?;
        if let Some(channel) = self.channel {
            if channel > 15 {
                return Err(Error::Config(format!(
                    "pin {}: channel {} out of range 0-15",
                    self.pin, channel
                )));
            }
        }
        Ok(())
    }
}

/// Per-servo status entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServoStatus {
    /// 1-based servo index in declaration order
    pub idx: usize,
    pub pin: PinId,
    #[serde(rename = "type")]
    pub kind: ServoKind,
    pub part: String,
    pub range: String,
    /// Current angle, absent before initialization
    pub value: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pulse: Option<PulseUnits>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_units: Option<PulseUnits>,
}

/// Status snapshot of the whole servo system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub driver: String,
    pub initialized: bool,
    pub servos: Vec<ServoStatus>,
    pub generated_at: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_units_to_us() {
        assert_eq!(units_to_us(150), 1500);
        assert_eq!(units_to_us(-5), 0);
        assert_eq!(units_to_us(PulseUnits::MAX), u32::MAX);
    }

    #[test]
    fn test_angle_range_parse() {
        let range: AngleRange = "-80:45".parse().unwrap();
        assert_eq!(range, AngleRange { min: -80, max: 45 });
        assert_eq!(range.to_string(), "-80:45");
        assert_eq!(range.clamp(90), 45);
        assert_eq!(range.clamp(-100), -80);
    }

    #[test]
    fn test_angle_range_rejects_inverted() {
        assert!(matches!("45:-80".parse::<AngleRange>(), Err(Error::Config(_))));
        assert!(matches!("45".parse::<AngleRange>(), Err(Error::Config(_))));
    }

    #[test]
    fn test_servo_definition_json() {
        let json = r#"{
            "pin": 31, "kind": "pos", "range": {"min": -80, "max": 45},
            "part": "claw", "line": {"chip": "gpiochip3", "offset": 28}, "channel": 0
        }"#;
        let servo: ServoDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(servo.kind, ServoKind::Positional);
        assert_eq!(servo.line.as_ref().unwrap().device_path(), "/dev/gpiochip3");
        assert_eq!(servo.channel, Some(0));
        assert!(servo.stop_units.is_none());
        servo.validate().unwrap();
    }

    #[test]
    fn test_validate_channel_range() {
        let servo = ServoDefinition::positional(31, 0, 90, "claw")
            .unwrap()
            .with_channel(16);
        assert!(matches!(servo.validate(), Err(Error::Config(_))));
    }
}
