use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, RawFd};

use tracing::debug;

use crate::error::Result;

/// Outcome of waiting for the Hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// Bytes can be read now.
    Ready,
    /// The wait was cut short by a [`Waker`].
    Interrupted,
}

/// Blocks the receiver until the Hub has something to read.
pub trait WaitReady: Send {
    fn wait_ready(&mut self) -> Result<Wake>;
}

/// Readiness for streams whose `read` already blocks.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysReady;

impl WaitReady for AlwaysReady {
    fn wait_ready(&mut self) -> Result<Wake> {
        Ok(Wake::Ready)
    }
}

/// Self-pipe used to kick a blocked receiver out of `poll`.
///
/// Safe to share between threads: `wake` only writes one byte.
#[derive(Debug)]
pub struct Waker {
    read_end: File,
    write_end: File,
}

impl Waker {
    pub fn new() -> Result<Self> {
        let mut fds = [0 as libc::c_int; 2];
        // SAFETY: `fds` is a valid two-element array for pipe(2) to fill.
        let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        // SAFETY: pipe(2) succeeded, so both descriptors are open and owned by us.
        let (read_end, write_end) =
            unsafe { (File::from_raw_fd(fds[0]), File::from_raw_fd(fds[1])) };
        set_nonblocking(read_end.as_raw_fd())?;
        set_nonblocking(write_end.as_raw_fd())?;
        Ok(Self {
            read_end,
            write_end,
        })
    }

    /// Interrupt the current (or next) wait.
    pub fn wake(&self) -> Result<()> {
        match (&self.write_end).write(&[1]) {
            Ok(_) => Ok(()),
            // A full pipe already guarantees a pending wake.
            Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Swallow pending wake bytes.
    pub fn drain(&self) {
        let mut buf = [0u8; 64];
        loop {
            match (&self.read_end).read(&mut buf) {
                Ok(0) => return,
                Ok(_) => continue,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(_) => return,
            }
        }
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.read_end.as_raw_fd()
    }
}

/// Readiness for a descriptor that signals readable bytes (serial, loopback).
pub struct PollReadable {
    fd: RawFd,
    waker: std::sync::Arc<Waker>,
}

impl PollReadable {
    /// Watch `source` for input. The caller keeps `source` open for as long as
    /// this value is used.
    pub fn new(source: &impl AsRawFd, waker: std::sync::Arc<Waker>) -> Self {
        Self {
            fd: source.as_raw_fd(),
            waker,
        }
    }
}

impl WaitReady for PollReadable {
    fn wait_ready(&mut self) -> Result<Wake> {
        let mut fds = [
            libc::pollfd {
                fd: self.fd,
                events: libc::POLLIN,
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
            debug!("readiness wait interrupted");
            return Ok(Wake::Interrupted);
        }
        Ok(Wake::Ready)
    }
}

/// poll(2) with EINTR retry. Returns the number of ready descriptors.
pub(crate) fn poll(fds: &mut [libc::pollfd], timeout_ms: libc::c_int) -> Result<usize> {
    loop {
        // SAFETY: `fds` points to `fds.len()` initialized pollfd entries.
        let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
        if rc >= 0 {
            return Ok(rc as usize);
        }
        let err = std::io::Error::last_os_error();
        if err.kind() != ErrorKind::Interrupted {
            return Err(err.into());
        }
    }
}

fn set_nonblocking(fd: RawFd) -> Result<()> {
    // SAFETY: `fd` is an open descriptor owned by the caller.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    // SAFETY: as above; only the O_NONBLOCK flag is added.
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}
