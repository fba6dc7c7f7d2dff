use std::io::{ErrorKind, Read};

use tracing::trace;

use crate::codec::{decode_length, Decoded, Frame, LengthPrefix, MAX_FRAME_LEN};
use crate::error::{FrameError, Result};

/// Limits applied while pulling frames off a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameConfig {
    /// Frames longer than this are rejected before their body is read.
    pub max_frame_len: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_frame_len: MAX_FRAME_LEN,
        }
    }
}

/// Reads complete frames from any `Read` stream.
///
/// Never reads past the end of the current frame: the length byte is read
/// alone, then the second length byte if the first has its top bit set, then
/// the rest of the frame. On I2C each of those reads is one bus transaction
/// and over-reading would clock bytes out of the Hub that belong to the next
/// frame.
pub struct FrameReader<T> {
    inner: T,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self { inner, config }
    }

    /// Read the next frame or keepalive (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` on EOF, including EOF
    /// part way through a frame.
    pub fn read_frame(&mut self) -> Result<Decoded> {
        let mut head = [0u8; 2];
        self.fill(&mut head[..1])?;
        if head[0] == 0 {
            return Ok(Decoded::Keepalive);
        }

        let prefix_bytes = if head[0] & 0x80 != 0 {
            self.fill(&mut head[1..2])?;
            2
        } else {
            1
        };

        let (total, prefix) = match decode_length(&head[..prefix_bytes])? {
            Some(LengthPrefix::Frame { total, prefix }) => (total, prefix),
            // A non-zero first byte with all prefix bytes present always
            // decodes to a frame.
            _ => {
                return Err(FrameError::InvalidLength {
                    len: head[0] as usize,
                    min: prefix_bytes + 2,
                })
            }
        };

        if total > self.config.max_frame_len {
            return Err(FrameError::FrameTooLarge {
                len: total,
                max: self.config.max_frame_len,
            });
        }

        let mut wire = vec![0u8; total];
        wire[..prefix].copy_from_slice(&head[..prefix]);
        self.fill(&mut wire[prefix..])?;
        trace!(len = total, "frame read");

        Frame::from_wire(wire).map(Decoded::Frame)
    }

    fn fill(&mut self, mut buf: &mut [u8]) -> Result<()> {
        while !buf.is_empty() {
            match self.inner.read(buf) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => buf = &mut buf[n..],
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
        Ok(())
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}
