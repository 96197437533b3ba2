//! Bounded external command runner for the `gpio` utility
//!
//! Every invocation is killed if it outlives its timeout so a wedged
//! helper process can never stall the caller indefinitely.

use crate::error::{Error, Result};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Default allotment per invocation
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between exit checks while waiting
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Line/PWM control utility invoked as an external process
#[derive(Debug, Clone)]
pub struct GpioTool {
    program: String,
    base_args: Vec<String>,
    timeout: Duration,
}

impl GpioTool {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            base_args: Vec::new(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Build from a command line such as `gpio` or `sudo gpio`
    pub fn from_command_line(command: &str) -> Result<Self> {
        let mut parts = command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| Error::Config("gpio command is empty".to_string()))?;
        Ok(Self {
            program: program.to_string(),
            base_args: parts.map(str::to_string).collect(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
        })
    }

    pub fn with_base_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.base_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Run with arguments, returning trimmed stdout
    ///
    /// - non-zero exit => `HardwareIo` carrying stderr
    /// - exceeding the timeout => child is killed, `Timeout`
    pub fn run<S: AsRef<str>>(&self, args: &[S]) -> Result<String> {
        let rendered = self.render(args);

        let mut child = Command::new(&self.program)
            .args(&self.base_args)
            .args(args.iter().map(|a| a.as_ref()))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::HardwareIo(format!("{} spawn failed: {}", rendered, e)))?;

        let deadline = Instant::now() + self.timeout;
        loop {
            if child.try_wait()?.is_some() {
                break;
            }
            if Instant::now() >= deadline {
                // Reap the child so it does not linger as a zombie
                let _ = child.kill();
                let _ = child.wait();
                tracing::warn!(
                    command = %rendered,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "gpio command timed out, process killed"
                );
                return Err(Error::Timeout(format!(
                    "{} exceeded {}ms",
                    rendered,
                    self.timeout.as_millis()
                )));
            }
            thread::sleep(POLL_INTERVAL);
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::HardwareIo(format!(
                "{} failed ({}): {}",
                rendered,
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn render<S: AsRef<str>>(&self, args: &[S]) -> String {
        let mut parts = vec![self.program.as_str()];
        parts.extend(self.base_args.iter().map(String::as_str));
        parts.extend(args.iter().map(|a| a.as_ref()));
        parts.join(" ")
    }
}

impl Default for GpioTool {
    fn default() -> Self {
        Self::new("gpio")
    }
}
