//! Error handling for robot-api

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing pin/channel mapping, invalid frequency, bad addressing mode
    #[error("Config error: {0}")]
    Config(String),

    /// Register write, line command or bus transaction failed
    #[error("Hardware I/O error: {0}")]
    HardwareIo(String),

    /// Bounded external operation exceeded its allotment
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Upstream camera unreachable or returned non-success status
    #[error("Stream unavailable: {0}")]
    StreamUnavailable(String),

    /// Operation not valid for the target (wrong servo kind, unknown pin)
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Another move sequence holds the pin
    #[error("Busy: {0}")]
    Busy(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable code for logs and status output
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "CONFIG_ERROR",
            Error::HardwareIo(_) => "HARDWARE_IO_ERROR",
            Error::Timeout(_) => "TIMEOUT",
            Error::StreamUnavailable(_) => "STREAM_UNAVAILABLE",
            Error::InvalidOperation(_) => "INVALID_OPERATION",
            Error::Busy(_) => "BUSY",
            Error::Serialization(_) => "SERIALIZATION_ERROR",
            Error::Http(_) => "HTTP_ERROR",
            Error::Io(_) => "IO_ERROR",
        }
    }

    /// Transient failures may succeed on retry; configuration and
    /// invalid-operation errors never will.
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            Error::Config(_) | Error::InvalidOperation(_) | Error::Serialization(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::HardwareIo("bus".into()).is_transient());
        assert!(Error::Timeout("gpio".into()).is_transient());
        assert!(Error::Busy("pin 31".into()).is_transient());
        assert!(!Error::Config("no channel".into()).is_transient());
        assert!(!Error::InvalidOperation("cr servo".into()).is_transient());
    }

    #[test]
    fn test_display_and_code() {
        let err = Error::Config("frequency 23 Hz out of range".into());
        assert_eq!(err.to_string(), "Config error: frequency 23 Hz out of range");
        assert_eq!(err.code(), "CONFIG_ERROR");
    }
}
