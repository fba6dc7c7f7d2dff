use std::io::{ErrorKind, Write};
use std::thread;
use std::time::Duration;

use tracing::trace;

use crate::codec::Frame;
use crate::error::{FrameError, Result};

/// Pause before retrying a write the stream refused with `WouldBlock`.
pub const WOULD_BLOCK_BACKOFF: Duration = Duration::from_millis(1);

/// Writes complete frames to any `Write` stream.
///
/// A frame goes out in as few `write` calls as the stream allows; on I2C a
/// single call is a single bus transaction.
pub struct FrameWriter<T> {
    inner: T,
}

impl<T: Write> FrameWriter<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    /// Write one frame and flush (blocking).
    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.write_bytes(frame.as_bytes())?;
        trace!(len = frame.len(), message_type = frame.message_type(), "frame written");
        self.flush()
    }

    /// Write raw bytes that are not a binary frame (console commands).
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let mut offset = 0usize;
        while offset < bytes.len() {
            match self.inner.write(&bytes[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => thread::sleep(WOULD_BLOCK_BACKOFF),
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => thread::sleep(WOULD_BLOCK_BACKOFF),
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
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
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    use super::*;
    use crate::codec::Decoded;
    use crate::reader::FrameReader;
    use crate::request;

    #[test]
    fn written_frame_reads_back() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));
        writer.write_frame(&request::port_value(1)).unwrap();
        writer.write_frame(&request::hub_reset()).unwrap();

        let wire = writer.into_inner().into_inner();
        let mut reader = FrameReader::new(Cursor::new(wire));
        let Decoded::Frame(first) = reader.read_frame().unwrap() else {
            panic!("expected frame");
        };
        let Decoded::Frame(second) = reader.read_frame().unwrap() else {
            panic!("expected frame");
        };
        assert_eq!(first.as_bytes(), &[0x05, 0x00, 0x21, 0x01, 0x00]);
        assert_eq!(second.message_type(), 0x02);
    }

    #[test]
    fn console_bytes_pass_through() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));
        writer.write_bytes(b"port 0 ; select 1\r").unwrap();
        assert_eq!(writer.get_ref().get_ref().as_slice(), b"port 0 ; select 1\r");
    }

    #[test]
    fn flush_propagates() {
        let sink = FlushTrackingWriter::default();
        let flag = Arc::clone(&sink.flushed);
        let mut writer = FrameWriter::new(sink);

        writer.write_frame(&request::hub_reset()).unwrap();
        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn handles_interrupted_and_would_block() {
        let mut writer = FrameWriter::new(FlakyWriter {
            failures: vec![ErrorKind::Interrupted, ErrorKind::WouldBlock],
            data: Vec::new(),
        });
        writer.write_frame(&request::port_value(3)).unwrap();
        assert_eq!(writer.get_ref().data, vec![0x05, 0x00, 0x21, 0x03, 0x00]);
    }

    #[test]
    fn would_block_backs_off_before_retrying() {
        let mut writer = FrameWriter::new(FlakyWriter {
            failures: vec![ErrorKind::WouldBlock; 3],
            data: Vec::new(),
        });
        let started = Instant::now();
        writer.write_bytes(&[0x00]).unwrap();
        assert!(started.elapsed() >= WOULD_BLOCK_BACKOFF * 3);
        assert_eq!(writer.get_ref().data, vec![0x00]);
    }

    #[test]
    fn connection_closed_when_write_returns_zero() {
        let mut writer = FrameWriter::new(ZeroWriter);
        let err = writer.write_frame(&request::hub_reset()).unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[derive(Default)]
    struct FlushTrackingWriter {
        flushed: Arc<AtomicBool>,
    }

    impl Write for FlushTrackingWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.flushed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FlakyWriter {
        failures: Vec<ErrorKind>,
        data: Vec<u8>,
    }

    impl Write for FlakyWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if let Some(kind) = self.failures.pop() {
                return Err(std::io::Error::from(kind));
            }
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
