use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::poll::{poll, Wake, WaitReady, Waker};

/// Sysfs root for legacy GPIO control.
pub const DEFAULT_SYSFS_ROOT: &str = "/sys/class/gpio";

/// GPIO the Hub raises while it has data queued for the host.
pub const DEFAULT_WAKE_GPIO: u32 = 5;

/// Time sysfs needs to create the per-pin files after export.
const EXPORT_SETTLE: Duration = Duration::from_millis(100);

/// The Hub's "data pending" line, exported through sysfs.
///
/// The line is configured as an input interrupting on both edges. While it is
/// high the receiver keeps reading; while low it sleeps in `poll` until an
/// edge arrives or a [`Waker`] fires.
pub struct WakeLine {
    value: File,
    root: PathBuf,
    gpio: u32,
    high: bool,
    waker: Arc<Waker>,
}

impl WakeLine {
    /// Export and configure `gpio` under `root`.
    pub fn open(root: impl AsRef<Path>, gpio: u32, waker: Arc<Waker>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let pin = gpio.to_string();

        export(&root, &pin)?;
        std::thread::sleep(EXPORT_SETTLE);

        let pin_dir = root.join(format!("gpio{pin}"));
        write_attr(&pin_dir.join("direction"), "in").inspect_err(|_| unexport(&root, &pin))?;
        write_attr(&pin_dir.join("edge"), "both").inspect_err(|_| unexport(&root, &pin))?;

        let value_path = pin_dir.join("value");
        let value = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&value_path)
            .map_err(|source| {
                unexport(&root, &pin);
                TransportError::Gpio {
                    path: value_path.clone(),
                    source,
                }
            })?;

        let mut line = Self {
            value,
            root,
            gpio,
            high: false,
            waker,
        };
        line.refresh()?;
        info!(gpio, high = line.high, "wake line ready");
        Ok(line)
    }

    /// Last level read from the line.
    pub fn is_high(&self) -> bool {
        self.high
    }

    fn refresh(&mut self) -> Result<()> {
        let mut byte = [0u8; 1];
        self.value.seek(SeekFrom::Start(0))?;
        self.value.read_exact(&mut byte)?;
        self.high = byte[0] == b'1';
        Ok(())
    }

    fn edge_pending(&self, timeout_ms: libc::c_int) -> Result<bool> {
        let mut fds = [libc::pollfd {
            fd: self.value.as_raw_fd(),
            events: libc::POLLPRI,
            revents: 0,
        }];
        Ok(poll(&mut fds, timeout_ms)? > 0 && fds[0].revents & libc::POLLPRI != 0)
    }
}

impl WaitReady for WakeLine {
    fn wait_ready(&mut self) -> Result<Wake> {
        loop {
            // Pick up any edge that arrived since the last look.
            if self.edge_pending(0)? {
                self.refresh()?;
                continue;
            }
            if self.high {
                return Ok(Wake::Ready);
            }

            let mut fds = [
                libc::pollfd {
                    fd: self.value.as_raw_fd(),
                    events: libc::POLLPRI,
                    revents: 0,
                },
                libc::pollfd {
                    fd: self.waker.fd(),
                    events: libc::POLLIN,
                    revents: 0,
                },
            ];
            poll(&mut fds, -1)?;

            if fds[1].revents & libc::POLLIN != 0 {
                self.waker.drain();
                debug!(gpio = self.gpio, "wake line wait interrupted");
                return Ok(Wake::Interrupted);
            }
            if fds[0].revents & libc::POLLPRI != 0 {
                self.refresh()?;
            }
        }
    }
}

impl Drop for WakeLine {
    fn drop(&mut self) {
        unexport(&self.root, &self.gpio.to_string());
    }
}

impl std::fmt::Debug for WakeLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WakeLine")
            .field("gpio", &self.gpio)
            .field("high", &self.high)
            .finish()
    }
}

fn export(root: &Path, pin: &str) -> Result<()> {
    let path = root.join("export");
    match write_raw(&path, pin) {
        Ok(()) => Ok(()),
        // EBUSY: already exported.
        Err(err) if err.raw_os_error() == Some(libc::EBUSY) => Ok(()),
        Err(source) => Err(TransportError::Gpio { path, source }),
    }
}

fn unexport(root: &Path, pin: &str) {
    let path = root.join("unexport");
    if let Err(err) = write_raw(&path, pin) {
        warn!(?path, %err, "failed to unexport gpio");
    }
}

fn write_attr(path: &Path, value: &str) -> Result<()> {
    write_raw(path, value).map_err(|source| TransportError::Gpio {
        path: path.to_path_buf(),
        source,
    })
}

fn write_raw(path: &Path, value: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().write(true).open(path)?;
    loop {
        match file.write_all(value.as_bytes()) {
            Ok(()) => return Ok(()),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
}
