//! Error types for ICSP programming operations

use thiserror::Error;

/// Errors raised by the protocol engine
///
/// Configuration problems are detected before any hardware access and name
/// the offending parameter. Protocol failures carry the memory address they
/// occurred at, where one applies; the session layer powers the target off
/// before any of these propagate to the caller.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or malformed configuration value
    #[error("Configuration parameter `{param}`: {reason}")]
    Config {
        /// Offending parameter name
        param: String,
        /// What is wrong with it
        reason: String,
    },

    /// Address outside the device memory map
    #[error("Address {address:#08X} is outside the device memory map")]
    AddressOutOfRange {
        /// The unmapped word address
        address: u32,
    },

    /// Device ID read from the chip does not match the descriptor
    #[error("Device ID mismatch: expected {expected:#06X}, read {found:#06X} (masked {mask:#06X})")]
    DeviceIdMismatch {
        /// ID the descriptor promises
        expected: u16,
        /// ID read from the part, already masked
        found: u16,
        /// Mask applied to both before comparing
        mask: u16,
    },

    /// AVR signature bytes do not match the descriptor
    #[error("Signature mismatch: expected {expected:02X?}, read {found:02X?}")]
    SignatureMismatch {
        /// Signature the descriptor promises
        expected: [u8; 3],
        /// Signature read from the part
        found: [u8; 3],
    },

    /// Program-mode synchronization never succeeded
    #[error("Program mode synchronization failed after {attempts} attempts")]
    SyncFailed {
        /// How many enable attempts were made
        attempts: u32,
    },

    /// A location kept failing after all programming retries
    #[error("Couldn't program address {address:#08X}: wrote {wrote:#06X}, read back {found:#06X}")]
    ProgramFailed {
        /// Failing word address
        address: u32,
        /// Value that was written
        wrote: u32,
        /// Last read-back value
        found: u32,
    },

    /// Read-back disagreed with the expected image
    #[error("Verify failed at address {address:#08X}: expected {expected:#06X}, found {found:#06X}")]
    VerifyMismatch {
        /// First mismatching word address
        address: u32,
        /// Value the image holds
        expected: u32,
        /// Value the part returned
        found: u32,
    },

    /// A polled write never signalled completion
    #[error("Timed out waiting for {what} write at address {address:#08X}")]
    WriteTimeout {
        /// Which memory was being written
        what: &'static str,
        /// Word address of the hung write
        address: u32,
    },

    /// Factory oscillator calibration could not be put back after erase
    #[error("Failed to restore oscillator calibration word: wanted {wanted:#06X}, read back {found:#06X}")]
    OscalRestoreFailed {
        /// Cached pre-erase value
        wanted: u16,
        /// Value read back after reprogramming
        found: u16,
    },

    /// Operation requires a capability the device does not have
    #[error("Operation not supported by this device: {0}")]
    NotSupported(&'static str),

    /// Underlying port/IO failure reported by the backend
    #[error("Programmer I/O failed: {0}")]
    Io(String),
}

impl Error {
    /// Shorthand for a configuration error
    pub fn config(param: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Config {
            param: param.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, Error>;
