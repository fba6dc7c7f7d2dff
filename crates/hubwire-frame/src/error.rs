/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The length prefix describes a frame shorter than its own header.
    #[error("invalid frame length {len} (minimum {min})")]
    InvalidLength { len: usize, min: usize },

    /// The frame exceeds what a 15-bit length prefix can describe.
    #[error("frame too large ({len} bytes, max {max})")]
    FrameTooLarge { len: usize, max: usize },

    /// A frame or payload ended before the bytes its fields require.
    #[error("truncated frame (expected {expected} bytes, got {actual})")]
    Truncated { expected: usize, actual: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
