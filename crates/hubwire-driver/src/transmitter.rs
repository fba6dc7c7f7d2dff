//! Transmitter thread: drains the outbound queue onto the transport.

use std::sync::Arc;

use hubwire_frame::{hex, message};
use tracing::{debug, error, info, trace};

use crate::config::FOREVER;
use crate::error::DriverError;
use crate::hub::Shared;
use crate::transport::Transmit;

pub(crate) fn run(mut transmitter: Box<dyn Transmit>, shared: Arc<Shared>) {
    debug!("transmitter started");
    loop {
        let frame = match shared.outbound.pop(FOREVER) {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(err) => {
                error!(error = %err, "outbound queue failed");
                break;
            }
        };

        // Mark before writing: the reply can arrive before `transmit` returns.
        shared.awaited.note_outbound(&frame);
        trace!(
            kind = message::message_name(frame.message_type()),
            wire = %hex(frame.as_bytes()),
            "transmitting"
        );

        match transmitter.transmit(&frame) {
            Ok(None) => {}
            Ok(Some(ack)) => shared.dispose(shared.router.route(ack)),
            Err(err @ DriverError::Protocol(_)) => shared.health.record_protocol_error(&err),
            Err(err) => shared.health.record_transport_error(&err),
        }
    }
    info!("transmitter stopped");
}
