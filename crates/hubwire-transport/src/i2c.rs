use std::fs::OpenOptions;
use std::os::fd::AsRawFd;
use std::path::Path;

use tracing::info;

use crate::error::{Result, TransportError};
use crate::stream::{DeviceKind, HubStream};

/// `I2C_SLAVE` request from `<linux/i2c-dev.h>`.
const I2C_SLAVE: libc::c_ulong = 0x0703;

/// I2C bus transport.
///
/// Each `read` or `write` on the returned stream is one bus transaction
/// addressed to the Hub.
pub struct I2cBus;

impl I2cBus {
    /// Default bus device on a Raspberry Pi header.
    pub const DEFAULT_DEVICE: &'static str = "/dev/i2c-1";
    /// The Hub's 7-bit slave address.
    pub const DEFAULT_ADDRESS: u16 = 0x12;

    /// Open the bus and select the Hub as the transaction target.
    pub fn open(path: impl AsRef<Path>, address: u16) -> Result<HubStream> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| {
                if source.kind() == std::io::ErrorKind::NotFound {
                    info!(?path, "i2c device missing; is the bus enabled?");
                }
                TransportError::Open {
                    path: path.clone(),
                    source,
                }
            })?;

        // SAFETY: `file` is an open i2c-dev descriptor; I2C_SLAVE takes the
        // address by value.
        let rc = unsafe {
            libc::ioctl(
                file.as_raw_fd(),
                I2C_SLAVE as _,
                libc::c_ulong::from(address),
            )
        };
        if rc < 0 {
            return Err(TransportError::Configure {
                path,
                source: std::io::Error::last_os_error(),
            });
        }

        info!(?path, address = format_args!("{address:#04x}"), "opened i2c bus");
        Ok(HubStream::from_device(file, DeviceKind::I2c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_bus_is_open_error() {
        let err = I2cBus::open("/nonexistent/i2c-9", I2cBus::DEFAULT_ADDRESS).unwrap_err();
        assert!(matches!(err, TransportError::Open { .. }));
    }

    #[test]
    fn non_i2c_node_fails_address_select() {
        let err = I2cBus::open("/dev/null", I2cBus::DEFAULT_ADDRESS).unwrap_err();
        assert!(matches!(err, TransportError::Configure { .. }));
    }
}
