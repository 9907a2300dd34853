//! Error types for parallel-port operations

use thiserror::Error;

/// Parallel-port specific errors
#[derive(Debug, Error)]
pub enum ParportError {
    /// Failed to open the port device node
    #[error("Failed to open {path}: {source}")]
    OpenFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to claim the port from the ppdev driver
    #[error("Failed to claim {path}: {source}")]
    ClaimFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A signal was assigned a pin it cannot use
    #[error("Signal '{signal}' cannot use pin {pin}: {reason}")]
    BadPin {
        signal: &'static str,
        pin: u8,
        reason: &'static str,
    },

    /// A required signal has no pin assigned
    #[error("No pin assigned to required signal '{0}'")]
    MissingPin(&'static str),

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Port not specified
    #[error("No port specified. Use dev=/dev/parportN or io=0xNNN")]
    NoPort,

    /// Parallel-port access is only implemented for Linux
    #[error("Parallel-port access is not supported on this platform")]
    Unsupported,
}

/// Result type for parallel-port operations
pub type Result<T> = std::result::Result<T, ParportError>;
