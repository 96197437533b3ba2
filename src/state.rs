//! Application state
//!
//! Holds the configuration and the shared components built from it

use crate::camera_relay::CameraRelay;
use crate::error::{Error, Result};
use crate::gpio_pin::{Addressing, PinBackendKind};
use crate::models::ServoDefinition;
use crate::pwm_backend::{PwmBackend, ServoDriver};
use crate::servo_controller::ServoController;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Demo sequence played by `demo`: 1-based servo index and angle
pub const DEFAULT_DEMO_SEQUENCE: &str =
    "1:45,1:0,1:-80,1:0,2:45,1:45,2:0,3:45,4:0,2:45,3:-45,3:45,4:90,4:0";

/// Angle/pulse conversion and smooth-move pacing
#[derive(Debug, Clone)]
pub struct MotionConfig {
    /// Pulse at the low end of travel (units)
    pub min_pulse: i32,
    /// Pulse at the high end of travel (units)
    pub max_pulse: i32,
    /// Degrees added before conversion so that 0 is mid-travel
    pub angle_offset: i32,
    pub smooth_steps: u32,
    pub step_delay: Duration,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            min_pulse: 50,
            max_pulse: 250,
            angle_offset: 90,
            smooth_steps: 20,
            step_delay: Duration::from_millis(20),
        }
    }
}

/// Platform PWM peripheral settings
#[derive(Debug, Clone)]
pub struct HwPwmConfig {
    /// Clock divisor handed to `gpio pwmc`
    pub pwm_freq: u32,
    /// Range handed to `gpio pwmr`
    pub pwm_range: u32,
}

impl Default for HwPwmConfig {
    fn default() -> Self {
        Self {
            pwm_freq: 192,
            pwm_range: 2000,
        }
    }
}

/// Software PWM engine settings
#[derive(Debug, Clone)]
pub struct SoftPwmConfig {
    pub backend: PinBackendKind,
    pub addressing: Addressing,
    pub period_us: u32,
}

impl Default for SoftPwmConfig {
    fn default() -> Self {
        Self {
            backend: PinBackendKind::Gpiod,
            addressing: Addressing::Physical,
            period_us: 20_000,
        }
    }
}

/// PCA9685 bus settings
#[derive(Debug, Clone)]
pub struct Pca9685Config {
    pub bus: u8,
    pub address: u8,
    pub freq_hz: u32,
    /// Upper bound on any single bus transaction
    pub transaction_timeout: Duration,
}

impl Pca9685Config {
    pub fn device_path(&self) -> String {
        format!("/dev/i2c-{}", self.bus)
    }
}

impl Default for Pca9685Config {
    fn default() -> Self {
        Self {
            bus: 5,
            address: 0x40,
            freq_hz: 50,
            transaction_timeout: Duration::from_millis(500),
        }
    }
}

/// Upstream camera endpoints
#[derive(Debug, Clone)]
pub struct CameraConfig {
    pub ip: String,
    pub capture_port: u16,
    pub stream_port: u16,
    pub connect_timeout: Duration,
    /// Read silence on the live stream that forces a reconnect
    pub stream_read_timeout: Duration,
}

impl CameraConfig {
    pub fn stream_url(&self) -> String {
        format!("http://{}:{}/stream", self.ip, self.stream_port)
    }

    pub fn capture_url(&self) -> String {
        format!("http://{}:{}/capture", self.ip, self.capture_port)
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            ip: "192.168.15.9".to_string(),
            capture_port: 80,
            stream_port: 81,
            connect_timeout: Duration::from_secs(5),
            stream_read_timeout: Duration::from_secs(60),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Servo output backend
    pub driver: ServoDriver,
    /// Command line of the `gpio` utility (program plus fixed arguments)
    pub gpio_command: String,
    pub motion: MotionConfig,
    pub hw: HwPwmConfig,
    pub soft: SoftPwmConfig,
    pub pca9685: Pca9685Config,
    pub camera: CameraConfig,
    /// Servos in declaration order
    pub servos: Vec<ServoDefinition>,
    pub demo_sequence: String,
    pub demo_smooth: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            driver: ServoDriver::Soft,
            gpio_command: "gpio".to_string(),
            motion: MotionConfig::default(),
            hw: HwPwmConfig::default(),
            soft: SoftPwmConfig::default(),
            pca9685: Pca9685Config::default(),
            camera: CameraConfig::default(),
            servos: default_servos(),
            demo_sequence: DEFAULT_DEMO_SEQUENCE.to_string(),
            demo_smooth: true,
        }
    }
}

/// Claw, reach, base and height joints of the arm
fn default_servos() -> Vec<ServoDefinition> {
    [
        (31, -80, 45, "claw", 0, 28),
        (33, -10, 110, "reach", 1, 31),
        (35, -100, 120, "base", 2, 24),
        (37, 0, 100, "height", 3, 27),
    ]
    .into_iter()
    .filter_map(|(pin, min, max, part, channel, offset)| {
        ServoDefinition::positional(pin, min, max, part)
            .ok()
            .map(|s| s.with_channel(channel).with_line("gpiochip3", offset))
    })
    .collect()
}

impl AppConfig {
    /// Defaults overlaid with environment variables, then validated
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` with an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get("ROBOT_SERVO_DRIVER") {
            config.driver = v.parse()?;
        }
        if let Some(v) = get("GPIO_COMMAND") {
            config.gpio_command = v;
        }

        let m = &mut config.motion;
        overlay(&get, "SERVO_MIN_PULSE", &mut m.min_pulse)?;
        overlay(&get, "SERVO_MAX_PULSE", &mut m.max_pulse)?;
        overlay(&get, "SERVO_ANGLE_OFFSET", &mut m.angle_offset)?;
        overlay(&get, "SERVO_SMOOTH_STEPS", &mut m.smooth_steps)?;
        if let Some(ms) = parsed::<u64>(&get, "SERVO_STEP_DELAY_MS")? {
            m.step_delay = Duration::from_millis(ms);
        }

        overlay(&get, "HW_PWM_FREQ", &mut config.hw.pwm_freq)?;
        overlay(&get, "HW_PWM_RANGE", &mut config.hw.pwm_range)?;

        if let Some(v) = get("SOFT_PWM_BACKEND") {
            config.soft.backend = v.parse()?;
        }
        if let Some(v) = get("SOFT_PWM_ADDRESSING") {
            config.soft.addressing = v.parse()?;
        }
        overlay(&get, "SOFT_PWM_PERIOD_US", &mut config.soft.period_us)?;

        overlay(&get, "PCA9685_BUS", &mut config.pca9685.bus)?;
        if let Some(v) = get("PCA9685_ADDRESS") {
            config.pca9685.address = parse_address(&v)?;
        }
        overlay(&get, "PCA9685_FREQ", &mut config.pca9685.freq_hz)?;
        if let Some(ms) = parsed::<u64>(&get, "PCA9685_TIMEOUT_MS")? {
            config.pca9685.transaction_timeout = Duration::from_millis(ms);
        }

        if let Some(v) = get("CAMERA_IP") {
            config.camera.ip = v;
        }
        overlay(&get, "CAMERA_CAPTURE_PORT", &mut config.camera.capture_port)?;
        overlay(&get, "CAMERA_STREAM_PORT", &mut config.camera.stream_port)?;
        if let Some(s) = parsed::<u64>(&get, "CAMERA_CONNECT_TIMEOUT")? {
            config.camera.connect_timeout = Duration::from_secs(s);
        }
        if let Some(s) = parsed::<u64>(&get, "CAMERA_STREAM_READ_TIMEOUT")? {
            config.camera.stream_read_timeout = Duration::from_secs(s);
        }

        if let Some(v) = get("ROBOT_SERVOS") {
            config.servos = serde_json::from_str(&v)
                .map_err(|e| Error::Config(format!("ROBOT_SERVOS: {}", e)))?;
        }
        if let Some(v) = get("ROBOT_DEMO_SEQUENCE") {
            config.demo_sequence = v;
        }
        if let Some(v) = get("ROBOT_DEMO_SMOOTH") {
            config.demo_smooth = parse_bool(&v)
                .ok_or_else(|| Error::Config(format!("ROBOT_DEMO_SMOOTH: '{}' is not a boolean", v)))?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let m = &self.motion;
        if m.min_pulse >= m.max_pulse {
            return Err(Error::Config(format!(
                "min pulse {} must be below max pulse {}",
                m.min_pulse, m.max_pulse
            )));
        }
        if m.smooth_steps == 0 {
            return Err(Error::Config("smooth step count must be at least 1".to_string()));
        }
        if self.soft.period_us == 0 {
            return Err(Error::Config("software PWM period must be positive".to_string()));
        }
        if self.servos.is_empty() {
            return Err(Error::Config("no servos defined".to_string()));
        }

        let mut seen = std::collections::HashSet::new();
        for servo in &self.servos {
            servo.validate()?;
            if !seen.insert(servo.pin) {
                return Err(Error::Config(format!("pin {} defined twice", servo.pin)));
            }
        }
        Ok(())
    }
}

fn parsed<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>> {
    get(key)
        .map(|v| {
            v.parse::<T>()
                .map_err(|_| Error::Config(format!("{}: cannot parse '{}'", key, v)))
        })
        .transpose()
}

fn overlay<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) -> Result<()> {
    if let Some(value) = parsed(get, key)? {
        *slot = value;
    }
    Ok(())
}

/// Accepts `0x40`, `40h` style hex or plain decimal
fn parse_address(v: &str) -> Result<u8> {
    let lower = v.to_ascii_lowercase();
    let parsed = if let Some(hex) = lower.strip_prefix("0x") {
        u8::from_str_radix(hex, 16)
    } else if let Some(hex) = lower.strip_suffix('h') {
        u8::from_str_radix(hex, 16)
    } else {
        lower.parse::<u8>()
    };
    parsed.map_err(|_| Error::Config(format!("PCA9685_ADDRESS: invalid address '{}'", v)))
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: Arc<AppConfig>,
    /// ServoController (owns the selected backend)
    pub controller: Arc<ServoController>,
    /// CameraRelay (upstream stream fan-out)
    pub relay: Arc<CameraRelay>,
}

impl AppState {
    /// Build every component once; the backend is selected here and never again
    pub fn build(config: AppConfig) -> Result<Self> {
        config.validate()?;
        let backend = PwmBackend::from_config(&config)?;
        let controller = ServoController::new(config.motion.clone(), config.servos.clone(), backend);
        let relay = CameraRelay::new(config.camera.clone())?;

        tracing::info!(
            driver = %config.driver,
            servos = config.servos.len(),
            camera = %config.camera.ip,
            "Application state built"
        );
        Ok(Self {
            config: Arc::new(config),
            controller: Arc::new(controller),
            relay: Arc::new(relay),
        })
    }
}
