//! Error types for the accessory-host crate.

/// Errors raised when writing a characteristic.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CharacteristicError {
    /// Value is outside the characteristic's declared bounds
    #[error("Value {value} out of range {min}..={max}")]
    OutOfRange {
        /// The rejected value
        value: i64,
        /// Minimum allowed value
        min: i64,
        /// Maximum allowed value
        max: i64,
    },

    /// Value has the wrong JSON type for the characteristic's format
    #[error("Invalid value for {format} characteristic: {value}")]
    InvalidValue {
        /// Characteristic format name
        format: &'static str,
        /// The rejected value, rendered as JSON
        value: String,
    },

    /// Characteristic is read-only for remote controllers
    #[error("Characteristic {iid} is not writable")]
    ReadOnly {
        /// Instance id of the characteristic
        iid: u64,
    },

    /// No characteristic exists at the given address
    #[error("No characteristic at {aid}.{iid}")]
    NotFound {
        /// Accessory id
        aid: u64,
        /// Instance id
        iid: u64,
    },
}

impl CharacteristicError {
    /// Status code reported to controllers for a failed write
    pub fn status_code(&self) -> i32 {
        match self {
            CharacteristicError::OutOfRange { .. } | CharacteristicError::InvalidValue { .. } => {
                STATUS_INVALID_VALUE
            }
            CharacteristicError::ReadOnly { .. } => STATUS_READ_ONLY,
            CharacteristicError::NotFound { .. } => STATUS_NOT_FOUND,
        }
    }
}

/// Request completed
pub const STATUS_SUCCESS: i32 = 0;
/// Controller is not paired
pub const STATUS_INSUFFICIENT_PRIVILEGES: i32 = -70401;
/// Write to a read-only characteristic
pub const STATUS_READ_ONLY: i32 = -70404;
/// The accessory has no room for another pairing
pub const STATUS_OUT_OF_RESOURCES: i32 = -70407;
/// Addressed resource does not exist
pub const STATUS_NOT_FOUND: i32 = -70409;
/// Value rejected
pub const STATUS_INVALID_VALUE: i32 = -70410;

/// Errors raised when parsing a setup code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PinError {
    /// Not 8 digits in `XXX-XX-XXX` or `XXXXXXXX` form
    #[error("Invalid setup code format: {0:?} (expected XXX-XX-XXX)")]
    Format(String),

    /// All-same digits or a plain sequence
    #[error("Setup code is too easy to guess")]
    Trivial,
}

/// Errors raised when a controller tries to pair.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PairingError {
    /// The presented setup code does not match
    #[error("Setup code rejected")]
    WrongCode,

    /// Too many wrong setup codes; pairing stays closed until restart
    #[error("Pairing locked after {0} failed attempts")]
    LockedOut(u32),

    /// The pairing table is full
    #[error("Maximum of {0} pairings reached")]
    MaxPairings(usize),
}

impl PairingError {
    /// Status code reported to the controller
    pub fn status_code(&self) -> i32 {
        match self {
            PairingError::WrongCode | PairingError::LockedOut(_) => {
                STATUS_INSUFFICIENT_PRIVILEGES
            }
            PairingError::MaxPairings(_) => STATUS_OUT_OF_RESOURCES,
        }
    }
}

/// Errors from the accessory HTTP host.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// No port could be bound in the configured range
    #[error("No available port found in range {start}-{end}")]
    NoAvailablePort {
        /// First port tried
        start: u16,
        /// Last port tried
        end: u16,
    },

    /// Invalid server configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The server task panicked or was cancelled during shutdown
    #[error("Shutdown error: {0}")]
    Shutdown(String),
}

/// Convenience type alias for Results using ServerError.
pub type Result<T> = std::result::Result<T, ServerError>;
