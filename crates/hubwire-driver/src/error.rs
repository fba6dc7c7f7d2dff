use std::time::Duration;

/// Cause reported by the Hub in a generic error frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("Error: ACK")]
    Ack,
    #[error("Error: MACK")]
    Mack,
    #[error("Buffer overflow")]
    BufferOverflow,
    #[error("Timeout")]
    Timeout,
    #[error("Command not recognised")]
    CommandNotRecognised,
    #[error("Invalid use")]
    InvalidUse,
    #[error("Overcurrent")]
    Overcurrent,
    #[error("Internal error")]
    InternalError,
    /// Cause byte outside the known table.
    #[error("Unknown error number")]
    Unknown(u8),
    /// The error frame does not refer to the command that was sent.
    #[error("Unexpected error: wrong type in error")]
    WrongType,
}

impl DeviceError {
    /// Map a cause byte to its error. The table is indexed from zero.
    pub fn from_cause(cause: u8) -> Self {
        match cause {
            0 => Self::Ack,
            1 => Self::Mack,
            2 => Self::BufferOverflow,
            3 => Self::Timeout,
            4 => Self::CommandNotRecognised,
            5 => Self::InvalidUse,
            6 => Self::Overcurrent,
            7 => Self::InternalError,
            other => Self::Unknown(other),
        }
    }

    /// The wire cause byte, where one exists.
    pub fn cause(&self) -> Option<u8> {
        match self {
            Self::Ack => Some(0),
            Self::Mack => Some(1),
            Self::BufferOverflow => Some(2),
            Self::Timeout => Some(3),
            Self::CommandNotRecognised => Some(4),
            Self::InvalidUse => Some(5),
            Self::Overcurrent => Some(6),
            Self::InternalError => Some(7),
            Self::Unknown(cause) => Some(*cause),
            Self::WrongType => None,
        }
    }
}

/// Errors that can occur in driver operations.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] hubwire_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] hubwire_frame::FrameError),

    /// A frame failed validation.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The Hub answered with a generic error frame.
    #[error("{0}")]
    Device(DeviceError),

    /// No reply within the allowed time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("motor stalled on port {port}")]
    MotorStalled { port: u8 },

    /// The command was discarded because another took its place.
    #[error("port {port} busy")]
    PortBusy { port: u8 },

    /// Nothing has been received from the Hub yet.
    #[error("Hub not responding")]
    NotResponding,

    /// The driver is shutting down.
    #[error("driver shut down")]
    Shutdown,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// A lock or thread failed underneath the driver.
    #[error("synchronization failure: {0}")]
    Sync(String),

    #[error("firmware: {0}")]
    Firmware(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DriverError {
    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, DriverError>;
