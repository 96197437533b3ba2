//! Robot API - operator command line
//!
//! ## Usage
//! ```bash
//! robot-api status
//! robot-api move --pin 31 --angle -45
//! robot-api --hold demo
//! robot-api script moves.txt
//! robot-api probe-channels --channels 0-3
//! robot-api watch --seconds 10
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use robot_api::{
    camera_relay::FrameEvent,
    models::{PinId, PulseUnits},
    pca9685::{open_device, parse_channels, probe_channels, ProbeSettings},
    servo_controller::{Script, ServoController},
    state::{AppConfig, AppState},
};
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "robot-api", version)]
#[command(about = "Servo control and camera relay for the robot arm")]
struct Cli {
    /// Keep running until Ctrl-C so the software PWM engine keeps driving
    #[arg(long, global = true)]
    hold: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print servo status as JSON
    Status,
    /// Move a positional servo
    Move {
        #[arg(long)]
        pin: PinId,
        #[arg(long, allow_negative_numbers = true)]
        angle: i32,
        /// Single write instead of an interpolated move
        #[arg(long)]
        direct: bool,
    },
    /// Centre every servo
    Center,
    /// Drive a continuous-rotation servo
    Speed {
        #[arg(long)]
        pin: PinId,
        #[arg(long, allow_negative_numbers = true)]
        velocity: i32,
    },
    /// Write raw pulse units
    Raw {
        #[arg(long)]
        pin: PinId,
        #[arg(long, allow_negative_numbers = true)]
        units: PulseUnits,
    },
    /// Play the configured demo sequence
    Demo {
        #[arg(long)]
        direct: bool,
        /// Override ROBOT_DEMO_SEQUENCE
        #[arg(long)]
        sequence: Option<String>,
    },
    /// Run a batch command file
    Script { file: PathBuf },
    /// Nudge PCA9685 channels one by one to find the wiring
    ProbeChannels {
        /// e.g. 0-7 or 0,2,5; all channels when omitted
        #[arg(long, default_value = "")]
        channels: String,
        #[arg(long, default_value_t = 1500)]
        center_us: u32,
        #[arg(long, default_value_t = 200)]
        delta_us: u32,
        #[arg(long, default_value_t = 400)]
        hold_ms: u64,
        #[arg(long, default_value_t = 600)]
        pause_ms: u64,
    },
    /// Subscribe to the camera relay and report frames
    Watch {
        #[arg(long, default_value_t = 10)]
        seconds: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "robot_api=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env().context("invalid configuration")?;
    tracing::info!(
        driver = %config.driver,
        servos = config.servos.len(),
        camera = %config.camera.ip,
        "Configuration loaded"
    );

    let state = AppState::build(config)?;
    let result = run(&state, cli.command).await;

    if cli.hold && result.is_ok() {
        tracing::info!("Holding outputs - press Ctrl-C to exit");
        tokio::signal::ctrl_c().await?;
    }

    state.relay.shutdown().await;
    let controller = state.controller.clone();
    if let Err(e) = tokio::task::spawn_blocking(move || controller.shutdown()).await? {
        tracing::error!(error = %e, "Servo shutdown failed");
    }

    result
}

async fn run(state: &AppState, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Status => {
            // Pulses are not persisted; a fresh process reports no angles
            let report = servo(state, |c| Ok(c.status_report())).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Move { pin, angle, direct } => {
            let pulse = servo(state, move |c| {
                if direct {
                    c.move_direct(pin, angle)
                } else {
                    c.move_smooth(pin, angle)
                }
            })
            .await?;
            println!("pin {} -> angle {} (pulse {})", pin, angle, pulse);
        }
        Command::Center => servo(state, |c| c.center_all()).await?,
        Command::Speed { pin, velocity } => {
            let pulse = servo(state, move |c| c.set_speed(pin, velocity)).await?;
            println!("pin {} -> velocity {} (pulse {})", pin, velocity, pulse);
        }
        Command::Raw { pin, units } => {
            let pulse = servo(state, move |c| c.send_raw(pin, units)).await?;
            println!("pin {} -> pulse {}", pin, pulse);
        }
        Command::Demo { direct, sequence } => {
            let sequence = sequence.unwrap_or_else(|| state.config.demo_sequence.clone());
            let smooth = !direct && state.config.demo_smooth;
            let moves = servo(state, move |c| c.run_sequence(&sequence, smooth)).await?;
            println!("demo complete: {} moves", moves);
        }
        Command::Script { file } => {
            let text = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("cannot read {}", file.display()))?;
            let script = Script::parse(&text)?;
            let count = servo(state, move |c| c.run_script(&script)).await?;
            println!("script complete: {} commands", count);
        }
        Command::ProbeChannels {
            channels,
            center_us,
            delta_us,
            hold_ms,
            pause_ms,
        } => {
            let channels = parse_channels(&channels)?;
            let settings = ProbeSettings {
                centre_us: center_us,
                delta_us,
                hold: Duration::from_millis(hold_ms),
                pause: Duration::from_millis(pause_ms),
                ..ProbeSettings::default()
            };
            let pca = state.config.pca9685.clone();
            tokio::task::spawn_blocking(move || {
                let mut device = open_device(&pca)?;
                probe_channels(&mut device, &channels, &settings, |channel| {
                    println!("channel {}", channel);
                })
            })
            .await??;
        }
        Command::Watch { seconds } => watch(state, Duration::from_secs(seconds)).await,
    }
    Ok(())
}

/// Run blocking servo work off the async runtime
async fn servo<T, F>(state: &AppState, work: F) -> anyhow::Result<T>
where
    F: FnOnce(&ServoController) -> robot_api::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let controller = state.controller.clone();
    Ok(tokio::task::spawn_blocking(move || work(&controller)).await??)
}

async fn watch(state: &AppState, duration: Duration) {
    let (id, source) = state.relay.add_subscriber();
    let deadline = Instant::now() + duration;
    let mut frames = 0u64;

    while Instant::now() < deadline {
        match source.next_frame(Duration::from_secs(1)).await {
            FrameEvent::Frame(frame) => {
                frames += 1;
                println!("frame {} ({} bytes)", frames, frame.len());
            }
            FrameEvent::Idle => tracing::debug!("No frame within 1s"),
            FrameEvent::Closed => break,
        }
    }

    state.relay.remove_subscriber(id).await;
    let stats = state.relay.stats();
    println!(
        "received {} frames (live {}, fallback {}, reconnects {})",
        frames, stats.frames, stats.fallback_frames, stats.reconnects
    );
}
