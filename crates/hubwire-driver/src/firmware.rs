//! Firmware maintenance: erase, store, read back and validate an image.
//!
//! Initialisation erases flash and takes long enough that it completes
//! asynchronously; the receiver clears the erase flag when the hub reports
//! completion and raises a firmware callback. Every other firmware request
//! is refused while an erase is outstanding.

use std::sync::atomic::{AtomicBool, Ordering};

use hubwire_frame::message::{self, firmware};
use hubwire_frame::request;
use serde::Serialize;
use tracing::{info, warn};

use crate::command::{Commands, Expect, Length};
use crate::error::{DriverError, Result};

/// Erase-in-progress flag shared by the command layer and the receiver.
#[derive(Debug, Default)]
pub struct FirmwareState {
    erasing: AtomicBool,
}

impl FirmwareState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark an erase as started. Fails if one is already running.
    pub fn begin_erase(&self) -> Result<()> {
        self.erasing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| erase_in_progress())
    }

    pub fn finish_erase(&self) {
        self.erasing.store(false, Ordering::Release);
    }

    pub fn is_erasing(&self) -> bool {
        self.erasing.load(Ordering::Acquire)
    }

    pub fn guard(&self) -> Result<()> {
        if self.is_erasing() {
            Err(erase_in_progress())
        } else {
            Ok(())
        }
    }
}

fn erase_in_progress() -> DriverError {
    DriverError::Firmware("Erase in progress".into())
}

fn u32_at(p: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([p[at], p[at + 1], p[at + 2], p[at + 3]])
}

/// Result of asking the hub to validate its stored image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImageValidation {
    /// Positive when the image checks out; zero or negative codes are failures.
    pub valid: i8,
    pub stored_checksum: u32,
    pub calculated_checksum: u32,
}

impl ImageValidation {
    pub fn is_valid(&self) -> bool {
        self.valid > 0
    }
}

/// Everything the hub reports about its firmware store in one place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FirmwareInfo {
    pub image_length: u32,
    pub validation: ImageValidation,
    pub flash_device_id: u32,
    pub flash_size: &'static str,
}

/// Human name for a flash part id.
pub fn flash_size(device_id: u32) -> &'static str {
    match device_id {
        0x1640EF => "4 MBytes",
        0x1740EF => "8 MBytes",
        0x1840EF => "16 MBytes",
        0x1940EF => "32 MBytes",
        _ => "unknown",
    }
}

const FIRMWARE: &str = "Firmware Request";

impl Commands {
    fn firmware_request(
        &self,
        op: u8,
        args: &[u8],
        length: usize,
        echo: &[(usize, u8)],
        slow: bool,
    ) -> Result<hubwire_frame::Frame> {
        self.firmware.guard()?;
        let timeout = if slow {
            self.config.long_operation_timeout
        } else {
            self.config.reply_timeout
        };
        let _guard = self.exclusive();
        self.exchange(
            request::firmware(op, args)?,
            &Expect {
                reply_type: message::FIRMWARE_RESPONSE,
                length: Length::Exact(length),
                echo,
                context: FIRMWARE,
                accept_feedback: false,
            },
            timeout,
        )
    }

    /// Start erasing flash for an image of `image_len` bytes.
    ///
    /// Returns once the request is queued; completion arrives as a firmware
    /// callback.
    pub fn firmware_initialize(&self, image_len: u32) -> Result<()> {
        self.firmware.begin_erase()?;
        if let Err(err) = self.send(request::firmware_initialize(image_len)) {
            self.firmware.finish_erase();
            return Err(err);
        }
        info!(image_len, "flash erase started");
        Ok(())
    }

    /// Store image bytes, split into chunks the hub accepts.
    pub fn firmware_store(&self, data: &[u8]) -> Result<()> {
        for (index, chunk) in data.chunks(firmware::STORE_CHUNK).enumerate() {
            let reply =
                self.firmware_request(firmware::STORE, chunk, 5, &[(0, firmware::STORE)], true)?;
            if reply.payload()[1] == 0 {
                warn!(chunk = index, "hub rejected firmware chunk");
                return Err(DriverError::Firmware(format!(
                    "store rejected at byte {}",
                    index * firmware::STORE_CHUNK
                )));
            }
        }
        Ok(())
    }

    /// Bytes stored so far.
    pub fn firmware_length(&self) -> Result<u32> {
        let reply = self.firmware_request(
            firmware::READ_LENGTH,
            &[],
            8,
            &[(0, firmware::READ_LENGTH)],
            false,
        )?;
        Ok(u32_at(reply.payload(), 1))
    }

    /// Stored or calculated checksum, selected by `kind`.
    pub fn firmware_checksum(&self, kind: u8) -> Result<u32> {
        let reply = self.firmware_request(
            firmware::CHECKSUM,
            &[kind],
            9,
            &[(0, firmware::CHECKSUM), (1, kind)],
            true,
        )?;
        Ok(u32_at(reply.payload(), 2))
    }

    /// Read 16 bytes of flash at `address`.
    pub fn read_flash(&self, address: u32) -> Result<[u8; firmware::FLASH_READ_LEN]> {
        let reply = self.firmware_request(
            firmware::READ_FLASH,
            &address.to_le_bytes(),
            24,
            &[(0, firmware::READ_FLASH)],
            false,
        )?;
        let p = reply.payload();
        if u32_at(p, 1) != address {
            return Err(DriverError::protocol(format!(
                "Unexpected reply to {FIRMWARE}"
            )));
        }
        let mut out = [0u8; firmware::FLASH_READ_LEN];
        out.copy_from_slice(&p[5..5 + firmware::FLASH_READ_LEN]);
        Ok(out)
    }

    pub fn validate_image(&self) -> Result<ImageValidation> {
        let reply = self.firmware_request(
            firmware::VALIDATE_IMAGE,
            &[],
            13,
            &[(0, firmware::VALIDATE_IMAGE)],
            true,
        )?;
        let p = reply.payload();
        Ok(ImageValidation {
            valid: p[1] as i8,
            stored_checksum: u32_at(p, 2),
            calculated_checksum: u32_at(p, 6),
        })
    }

    pub fn flash_device_id(&self) -> Result<u32> {
        let reply = self.firmware_request(
            firmware::FLASH_DEVICE_ID,
            &[],
            8,
            &[(0, firmware::FLASH_DEVICE_ID)],
            false,
        )?;
        Ok(u32_at(reply.payload(), 1))
    }

    pub fn firmware_info(&self) -> Result<FirmwareInfo> {
        let flash_device_id = self.flash_device_id()?;
        Ok(FirmwareInfo {
            image_length: self.firmware_length()?,
            validation: self.validate_image()?,
            flash_device_id,
            flash_size: flash_size(flash_device_id),
        })
    }
}
