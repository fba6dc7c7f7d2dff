//! Threaded driver for the Hub.
//!
//! A [`Hub`] owns three background threads:
//! - the receiver, which reads frames (or console lines) and routes them
//! - the transmitter, which drains the outbound queue onto the transport
//! - the callback dispatcher, which runs user handlers one at a time
//!
//! Foreground threads talk to the Hub through [`Commands`]: each call queues a
//! request and blocks on the response queue until the matching reply, a
//! device error, a timeout, or shutdown.
//!
//! ```no_run
//! use std::sync::Arc;
//! use hubwire_driver::{DriverConfig, Hub, PortRegistry};
//!
//! let registry = Arc::new(PortRegistry::new());
//! let hub = Hub::open_serial(DriverConfig::default(), registry.clone())?;
//! println!("firmware {}", hub.commands().firmware_version()?);
//! # Ok::<(), hubwire_driver::DriverError>(())
//! ```

pub mod awaited;
pub mod callback;
pub mod command;
pub mod config;
pub mod error;
pub mod firmware;
pub mod health;
pub mod motion;
pub mod observer;
pub mod queue;
pub mod replies;
pub mod router;

#[cfg(unix)]
pub mod framed;
#[cfg(unix)]
pub mod hub;
#[cfg(unix)]
pub mod line;
#[cfg(unix)]
mod receiver;
#[cfg(unix)]
mod transmitter;
#[cfg(unix)]
pub mod transport;

pub use awaited::AwaitedResponses;
pub use callback::{event, CallbackKind, Event, EventHandler, HandlerError};
pub use command::Commands;
pub use config::{
    DriverConfig, I2cConfig, SerialConfig, FOREVER, LONG_OPERATION_TIMEOUT, REPLY_TIMEOUT,
};
pub use error::{DeviceError, DriverError, Result};
pub use firmware::{flash_size, FirmwareInfo, ImageValidation};
pub use health::{CommsState, HealthSnapshot};
pub use motion::{Completion, EndState, MotionProfile};
pub use observer::{DeviceObserver, PairState, PortRegistry, PortState};
pub use queue::{FrameQueue, PushError, Queue, Wait};
pub use replies::{version_string, Feedback, Mapping, PortModes, Range};

#[cfg(unix)]
pub use framed::FramedTransport;
#[cfg(unix)]
pub use hub::Hub;
#[cfg(unix)]
pub use line::LineTransport;
#[cfg(unix)]
pub use transport::{Inbound, Receive, Transmit, Transport, TransportParts};
