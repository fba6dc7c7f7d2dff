//! Byte transports to the Hub.
//!
//! Provides a unified stream over the devices the Hub can be reached through:
//! - I2C character device with the Hub's slave address selected (Linux)
//! - Serial console in raw mode
//! - A connected socket pair, used as a loopback by tests and simulators
//!
//! Readiness is separate from the stream: the I2C bus never blocks, so the
//! receiver waits on the Hub's wake line, while the serial console and the
//! loopback wait for readable bytes. Both waits can be interrupted by a
//! [`Waker`] for shutdown.
//!
//! This is the lowest layer of hubwire. Everything else builds on top of
//! the [`HubStream`] type provided here.

pub mod error;
pub mod stream;

#[cfg(unix)]
pub mod poll;
#[cfg(unix)]
pub mod serial;

#[cfg(target_os = "linux")]
pub mod gpio;
#[cfg(target_os = "linux")]
pub mod i2c;

pub use error::{Result, TransportError};
pub use stream::{DeviceKind, HubStream};

#[cfg(unix)]
pub use poll::{AlwaysReady, PollReadable, Wake, WaitReady, Waker};
#[cfg(unix)]
pub use serial::SerialPort;

#[cfg(target_os = "linux")]
pub use gpio::WakeLine;
#[cfg(target_os = "linux")]
pub use i2c::I2cBus;
