//! Receiver thread: reads inbound units and routes them.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use hubwire_frame::FrameError;
use hubwire_transport::TransportError;
use tracing::{debug, info, warn};

use crate::error::DriverError;
use crate::hub::Shared;
use crate::transport::{Inbound, Receive};

/// Pause after a transport error so a failing device does not spin the loop.
const ERROR_BACKOFF: Duration = Duration::from_millis(10);

fn is_closed(err: &DriverError) -> bool {
    matches!(
        err,
        DriverError::Frame(FrameError::ConnectionClosed)
            | DriverError::Transport(TransportError::Shutdown)
            | DriverError::Shutdown
    )
}

pub(crate) fn run(mut receiver: Box<dyn Receive>, shared: Arc<Shared>) {
    debug!("receiver started");
    while !shared.is_stopping() {
        match receiver.receive() {
            Ok(Inbound::Interrupted) => continue,
            Ok(Inbound::Keepalive) => shared.health.record_keepalive(),
            Ok(Inbound::Frame(frame)) => {
                shared.health.record_frame();
                shared.dispose(shared.router.route(frame));
            }
            Ok(Inbound::Values { port, entries }) => {
                shared.health.record_frame();
                shared.dispose(shared.router.route_line_values(port, &entries));
            }
            Ok(Inbound::ModeFormat { port, mode, kind }) => {
                shared.dispose(Ok(shared.router.route_mode_format(port, mode, kind)));
            }
            Err(_) if shared.is_stopping() => break,
            Err(err) if is_closed(&err) => {
                warn!(error = %err, "hub connection closed");
                shared.health.record_transport_error(&err);
                break;
            }
            Err(err @ (DriverError::Protocol(_) | DriverError::Frame(_))) => {
                shared.health.record_protocol_error(&err);
            }
            Err(err) => {
                shared.health.record_transport_error(&err);
                thread::sleep(ERROR_BACKOFF);
            }
        }
    }
    info!("receiver stopped");
}
