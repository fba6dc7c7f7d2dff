use std::fs::File;
use std::io::{Read, Write};

use crate::error::Result;

/// Which kind of device node backs a [`HubStream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// I2C character device; every read or write is one bus transaction.
    I2c,
    /// Serial console in raw mode.
    Serial,
}

/// A connection to the Hub. Implements Read + Write.
///
/// This is the fundamental I/O type returned by transport operations.
/// Device nodes wrap a `File`; the loopback wraps one end of a socket pair.
pub struct HubStream {
    inner: HubStreamInner,
}

enum HubStreamInner {
    Device { file: File, kind: DeviceKind },
    #[cfg(unix)]
    Socket(std::os::unix::net::UnixStream),
}

impl Read for HubStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            HubStreamInner::Device { file, .. } => file.read(buf),
            #[cfg(unix)]
            HubStreamInner::Socket(stream) => stream.read(buf),
        }
    }
}

impl Write for HubStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            HubStreamInner::Device { file, .. } => file.write(buf),
            #[cfg(unix)]
            HubStreamInner::Socket(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            HubStreamInner::Device { file, .. } => file.flush(),
            #[cfg(unix)]
            HubStreamInner::Socket(stream) => stream.flush(),
        }
    }
}

impl HubStream {
    /// Wrap an opened and configured device node.
    pub(crate) fn from_device(file: File, kind: DeviceKind) -> Self {
        Self {
            inner: HubStreamInner::Device { file, kind },
        }
    }

    /// Create a connected loopback pair: one end for the driver, one for a
    /// simulated Hub.
    #[cfg(unix)]
    pub fn pair() -> Result<(Self, Self)> {
        let (left, right) = std::os::unix::net::UnixStream::pair()?;
        Ok((Self::from_socket(left), Self::from_socket(right)))
    }

    /// Wrap one end of a socket pair.
    #[cfg(unix)]
    pub fn from_socket(stream: std::os::unix::net::UnixStream) -> Self {
        Self {
            inner: HubStreamInner::Socket(stream),
        }
    }

    /// The device kind, or `None` for a loopback socket.
    pub fn device_kind(&self) -> Option<DeviceKind> {
        match &self.inner {
            HubStreamInner::Device { kind, .. } => Some(*kind),
            #[cfg(unix)]
            HubStreamInner::Socket(_) => None,
        }
    }

    /// Try to clone this stream (creates a new file descriptor).
    pub fn try_clone(&self) -> Result<Self> {
        match &self.inner {
            HubStreamInner::Device { file, kind } => Ok(Self::from_device(file.try_clone()?, *kind)),
            #[cfg(unix)]
            HubStreamInner::Socket(stream) => Ok(Self::from_socket(stream.try_clone()?)),
        }
    }

    /// Close both directions of a loopback socket. No-op for device nodes.
    pub fn shutdown(&self) -> Result<()> {
        match &self.inner {
            HubStreamInner::Device { .. } => Ok(()),
            #[cfg(unix)]
            HubStreamInner::Socket(stream) => match stream.shutdown(std::net::Shutdown::Both) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotConnected => Ok(()),
                Err(err) => Err(err.into()),
            },
        }
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match &self.inner {
            HubStreamInner::Device {
                kind: DeviceKind::I2c,
                ..
            } => "i2c",
            HubStreamInner::Device {
                kind: DeviceKind::Serial,
                ..
            } => "serial",
            #[cfg(unix)]
            HubStreamInner::Socket(_) => "loopback",
        }
    }
}

#[cfg(unix)]
impl std::os::fd::AsRawFd for HubStream {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        match &self.inner {
            HubStreamInner::Device { file, .. } => file.as_raw_fd(),
            HubStreamInner::Socket(stream) => stream.as_raw_fd(),
        }
    }
}

impl std::fmt::Debug for HubStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubStream")
            .field("type", &self.transport_name())
            .finish()
    }
}
