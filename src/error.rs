use thiserror::Error;

/// Failure of a single round trip to the miner API.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    /// Nothing is listening on the miner's API port
    #[error("Connection refused: {addr}")]
    ConnectionRefused { addr: String },

    /// Connect, write or read did not finish within the per-call timeout
    #[error("Timed out talking to {addr}")]
    Timeout { addr: String },

    /// The firmware answered with something that is not a cgminer response
    #[error("Malformed response: {reason}")]
    MalformedResponse { reason: String },

    /// Any other socket failure
    #[error("I/O error: {0}")]
    Io(String),

    /// The device answered but refused or failed the command
    #[error(transparent)]
    Command(#[from] CommandError),
}

impl ApiError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        ApiError::MalformedResponse {
            reason: reason.into(),
        }
    }

    /// Whether the error means the device could not be reached at all.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            ApiError::ConnectionRefused { .. } | ApiError::Timeout { .. } | ApiError::Io(_)
        )
    }
}

/// Error status (`STATUS=E` or `STATUS=F`) returned by the firmware.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Command `{command}` rejected (code {code}): {message}")]
pub struct CommandError {
    pub command: String,
    pub code: i64,
    pub message: String,
}

/// A configuration profile that must not be pushed to a device.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Frequency zone {zone}: {mhz} MHz is not a supported clock step")]
    UnsupportedFrequency { zone: usize, mhz: u32 },

    #[error("Frequencies must be strictly ascending, got {zones:?}")]
    NotAscending { zones: [u32; 4] },

    #[error("Voltage level {level} out of range [{min}, {max}]")]
    VoltageOutOfRange { level: u8, min: u8, max: u8 },
}

/// Errors surfaced by the [`Monitor`](crate::monitor::Monitor) facade.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MonitorError {
    #[error("Unknown device: {device_id}")]
    UnknownDevice { device_id: String },

    #[error("Device already registered: {device_id}")]
    DuplicateDevice { device_id: String },

    #[error("Invalid configuration: {0}")]
    Validation(#[from] ValidationError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Device {device_id}: {source}")]
    Validation {
        device_id: String,
        #[source]
        source: ValidationError,
    },

    #[error("Duplicate device id: {0}")]
    DuplicateDevice(String),
}
