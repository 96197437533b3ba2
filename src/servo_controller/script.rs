//! Batch command scripts and demo sequences
//!
//! Script lines:
//!
//! ```text
//! # comment
//! sleep 0.5          pause in seconds
//! center             centre every servo
//! raw 31 150         raw pulse units
//! speed 37 -10       continuous-rotation velocity
//! direct 33 45       single-step move
//! 35 -20             smooth move (positional) or speed (continuous)
//! ```

use crate::error::{Error, Result};
use crate::models::{PinId, PulseUnits};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum ScriptCommand {
    Sleep(Duration),
    Center,
    Raw { pin: PinId, units: PulseUnits },
    Speed { pin: PinId, velocity: i32 },
    Direct { pin: PinId, angle: i32 },
    Move { pin: PinId, value: i32 },
}

/// Parsed script; every line is validated before anything runs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Script {
    commands: Vec<(usize, ScriptCommand)>,
}

impl Script {
    pub fn parse(text: &str) -> Result<Self> {
        let mut commands = Vec::new();
        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            commands.push((line_no, parse_line(line_no, line)?));
        }
        Ok(Self { commands })
    }

    /// Commands with their 1-based source line numbers
    pub fn commands(&self) -> &[(usize, ScriptCommand)] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl FromStr for Script {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Script::parse(s)
    }
}

fn parse_line(line_no: usize, line: &str) -> Result<ScriptCommand> {
    let invalid = |msg: String| Error::InvalidOperation(format!("line {}: {}", line_no, msg));
    let number = |v: &str| {
        v.parse::<i32>()
            .map_err(|_| invalid(format!("'{}' is not an integer", v)))
    };

    let parts: Vec<&str> = line.split_whitespace().collect();
    let command = match parts.as_slice() {
        ["sleep", secs] => {
            let secs: f64 = secs
                .parse()
                .ok()
                .filter(|s: &f64| s.is_finite() && *s >= 0.0)
                .ok_or_else(|| invalid(format!("invalid sleep duration '{}'", secs)))?;
            ScriptCommand::Sleep(Duration::from_secs_f64(secs))
        }
        ["center"] | ["centre"] => ScriptCommand::Center,
        ["raw", pin, units] => ScriptCommand::Raw {
            pin: parse_pin(pin).ok_or_else(|| invalid(format!("invalid pin '{}'", pin)))?,
            units: number(units)?,
        },
        ["speed", pin, velocity] => ScriptCommand::Speed {
            pin: parse_pin(pin).ok_or_else(|| invalid(format!("invalid pin '{}'", pin)))?,
            velocity: number(velocity)?,
        },
        ["direct", pin, angle] => ScriptCommand::Direct {
            pin: parse_pin(pin).ok_or_else(|| invalid(format!("invalid pin '{}'", pin)))?,
            angle: number(angle)?,
        },
        [pin, value] if parse_pin(pin).is_some() => ScriptCommand::Move {
            pin: parse_pin(pin).unwrap_or_default(),
            value: number(value)?,
        },
        _ => return Err(invalid(format!("unknown command '{}'", line))),
    };
    Ok(command)
}

fn parse_pin(v: &str) -> Option<PinId> {
    v.parse::<PinId>().ok()
}

/// Demo sequence entry: 1-based servo index and target angle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceStep {
    pub index: usize,
    pub angle: i32,
}

/// Parse `index:angle` pairs separated by commas, e.g. `1:45,1:0,2:-10`
pub fn parse_sequence(sequence: &str) -> Result<Vec<SequenceStep>> {
    sequence
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            let (index, angle) = item
                .split_once(':')
                .ok_or_else(|| Error::Config(format!("sequence step '{}' is not index:angle", item)))?;
            let index = index
                .trim()
                .parse::<usize>()
                .map_err(|_| Error::Config(format!("sequence step '{}': bad index", item)))?;
            let angle = angle
                .trim()
                .parse::<i32>()
                .map_err(|_| Error::Config(format!("sequence step '{}': bad angle", item)))?;
            Ok(SequenceStep { index, angle })
        })
        .collect()
}
