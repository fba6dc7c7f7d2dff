use std::fs::OpenOptions;
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{Result, TransportError};
use crate::stream::{DeviceKind, HubStream};

/// Serial console transport.
///
/// Opens the device in raw mode: no echo, no line editing, reads block until
/// at least one byte arrives.
pub struct SerialPort;

impl SerialPort {
    /// Default device node for the Hub's console.
    pub const DEFAULT_DEVICE: &'static str = "/dev/serial0";
    /// Default console speed.
    pub const DEFAULT_BAUD: u32 = 115_200;

    /// Open and configure the serial device.
    pub fn open(path: impl AsRef<Path>, baud: u32) -> Result<HubStream> {
        let path = path.as_ref().to_path_buf();
        let speed = baud_constant(baud)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY)
            .open(&path)
            .map_err(|source| open_error(&path, source))?;

        configure_raw(file.as_raw_fd(), speed).map_err(|source| TransportError::Configure {
            path: path.clone(),
            source,
        })?;

        info!(?path, baud, "opened serial console");
        Ok(HubStream::from_device(file, DeviceKind::Serial))
    }
}

fn open_error(path: &Path, source: std::io::Error) -> TransportError {
    TransportError::Open {
        path: PathBuf::from(path),
        source,
    }
}

fn baud_constant(baud: u32) -> Result<libc::speed_t> {
    let speed = match baud {
        9_600 => libc::B9600,
        19_200 => libc::B19200,
        38_400 => libc::B38400,
        57_600 => libc::B57600,
        115_200 => libc::B115200,
        230_400 => libc::B230400,
        _ => return Err(TransportError::UnsupportedBaud(baud)),
    };
    Ok(speed)
}

fn configure_raw(fd: libc::c_int, speed: libc::speed_t) -> std::io::Result<()> {
    // SAFETY: termios is plain old data; tcgetattr overwrites every field we read.
    let mut tio: libc::termios = unsafe { std::mem::zeroed() };

    // SAFETY: `fd` is an open descriptor and `tio` is a valid termios.
    if unsafe { libc::tcgetattr(fd, &mut tio) } != 0 {
        return Err(std::io::Error::last_os_error());
    }

    // SAFETY: `tio` was initialized by tcgetattr above.
    unsafe {
        libc::cfmakeraw(&mut tio);
        if libc::cfsetispeed(&mut tio, speed) != 0 || libc::cfsetospeed(&mut tio, speed) != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    tio.c_cflag |= libc::CLOCAL | libc::CREAD;
    tio.c_cc[libc::VMIN] = 1;
    tio.c_cc[libc::VTIME] = 0;

    // SAFETY: `fd` is open and `tio` is fully initialized.
    if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &tio) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    // SAFETY: `fd` is open; flushing stale input/output is harmless.
    if unsafe { libc::tcflush(fd, libc::TCIOFLUSH) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}
