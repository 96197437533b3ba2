//! Robot API Library
//!
//! Servo motion and camera relay for a small robot arm
//!
//! ## Architecture (6 Components)
//!
//! 1. GpioPin - Output line drivers (character device / `gpio` utility)
//! 2. SoftPwm - Software PWM waveform engine
//! 3. HwPwm - Platform PWM peripheral backend
//! 4. Pca9685 - I2C PWM chip backend
//! 5. ServoController - Angle conversion, moves, status
//! 6. CameraRelay - Shared upstream video fan-out
//!
//! ## Design Principles
//!
//! - One backend per process, chosen once at startup
//! - Components live in `AppState`; no globals
//! - Hardware failures surface to the caller that triggered them

pub mod camera_relay;
pub mod error;
pub mod gpio_pin;
pub mod hw_pwm;
pub mod models;
pub mod pca9685;
pub mod pwm_backend;
pub mod servo_controller;
pub mod soft_pwm;
pub mod state;

pub use error::{Error, Result};
pub use state::AppState;
