//! The contract both transport variants present to the receiver and
//! transmitter threads.
//!
//! The framed transport speaks the binary wire protocol. The line transport
//! talks to the serial console, turning status lines into [`Inbound`] units
//! and frames into console commands. Neither pretends to be the other.

use std::sync::Arc;

use hubwire_frame::{Frame, ValueKind};
use hubwire_transport::{HubStream, Waker};

use crate::config::DriverConfig;
use crate::error::Result;
use crate::router::LineEntry;

/// One unit of inbound traffic.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Zero length byte; proves the Hub is alive and carries nothing else.
    Keepalive,
    /// The readiness wait was cut short, usually for shutdown.
    Interrupted,
    Frame(Frame),
    /// Values already decoded from a console line.
    Values { port: u8, entries: Vec<LineEntry> },
    /// Value type of a mode, learned from the console.
    ModeFormat { port: u8, mode: u8, kind: ValueKind },
}

/// Receiving half, owned by the receiver thread.
pub trait Receive: Send {
    /// Block until the next inbound unit.
    fn receive(&mut self) -> Result<Inbound>;
}

/// Sending half, owned by the transmitter thread.
pub trait Transmit: Send {
    /// Write one frame. A transport that answers some requests itself returns
    /// the acknowledgement frame to route as if the Hub had sent it.
    fn transmit(&mut self, frame: &Frame) -> Result<Option<Frame>>;
}

/// A transport split for the two I/O threads.
pub struct TransportParts {
    pub name: &'static str,
    pub receiver: Box<dyn Receive>,
    pub transmitter: Box<dyn Transmit>,
    /// Interrupts the receiver's readiness wait.
    pub waker: Arc<Waker>,
    /// Shut down on stop so a read blocked mid-frame returns.
    pub closer: Option<HubStream>,
}

impl std::fmt::Debug for TransportParts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportParts")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Something the [`crate::Hub`] can run over.
pub trait Transport {
    fn into_parts(self, config: &DriverConfig) -> Result<TransportParts>;
}
