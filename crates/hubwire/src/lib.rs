//! Host-side driver for the LEGO Wireless Protocol Hub.
//!
//! The Hub sits on an I2C bus (binary frames, with a wake line) or a serial
//! console (text lines). hubwire keeps the link alive on background threads
//! and gives foreground code blocking, one-at-a-time commands.
//!
//! # Crate Structure
//!
//! - [`transport`]: byte devices (I2C, serial, wake line, loopback pair)
//! - [`frame`]: wire framing, message table, request builders, value decoding
//! - [`driver`]: queues, receiver, transmitter, commands, callbacks, [`Hub`]

/// Re-export transport types.
pub mod transport {
    pub use hubwire_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use hubwire_frame::*;
}

/// Re-export driver types.
pub mod driver {
    pub use hubwire_driver::*;
}

pub use hubwire_driver::{Commands, DriverConfig, DriverError, Event, PortRegistry};

#[cfg(unix)]
pub use hubwire_driver::Hub;
