//! Receiver-side classification of inbound traffic.
//!
//! Every inbound unit is either consumed here (attach/detach bookkeeping,
//! unawaited values and alerts) or forwarded to the response queue for a
//! synchronous caller. Events that need user code are queued on the callback
//! dispatcher; the device layer is told about everything through its
//! [`DeviceObserver`].

use std::sync::Arc;

use hubwire_frame::message::{self, alert, attach, firmware};
use hubwire_frame::{hex, Frame, Value, ValueKind, HUB_ID};
use tracing::{debug, trace};

use crate::awaited::AwaitedResponses;
use crate::callback::{event, CallbackDispatcher, CallbackKind};
use crate::error::{DriverError, Result};
use crate::firmware::FirmwareState;
use crate::observer::DeviceObserver;
use crate::replies::Feedback;

/// What became of one inbound unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Fully handled by the receiver.
    Consumed,
    /// Hand to the response queue.
    Forward(Frame),
}

/// One decoded entry of a console value line: entry index and its datasets.
pub type LineEntry = (Option<u8>, Vec<Value>);

pub struct Router {
    observer: Arc<dyn DeviceObserver>,
    awaited: Arc<AwaitedResponses>,
    callbacks: Arc<CallbackDispatcher>,
    firmware: Arc<FirmwareState>,
    port_count: u8,
}

impl Router {
    pub fn new(
        observer: Arc<dyn DeviceObserver>,
        awaited: Arc<AwaitedResponses>,
        callbacks: Arc<CallbackDispatcher>,
        firmware: Arc<FirmwareState>,
        port_count: u8,
    ) -> Self {
        Self {
            observer,
            awaited,
            callbacks,
            firmware,
            port_count,
        }
    }

    fn is_port(&self, id: u8) -> bool {
        id < self.port_count
    }

    /// Classify a frame read from the Hub (or acknowledged locally).
    pub fn route(&self, frame: Frame) -> Result<Disposition> {
        if frame.hub_id() != HUB_ID {
            return Err(DriverError::protocol(format!(
                "Bad hub ID 0x{:02x}",
                frame.hub_id()
            )));
        }
        trace!(
            kind = message::message_name(frame.message_type()),
            wire = %hex(frame.as_bytes()),
            "routing frame"
        );

        match frame.message_type() {
            message::HUB_ATTACHED_IO => self.attached_io(frame.payload()),
            message::PORT_FORMAT_SINGLE => self.format_single(frame),
            message::PORT_VALUE_SINGLE => self.value_single(frame),
            message::PORT_VALUE_COMBINED => self.value_combined(frame),
            message::PORT_OUTPUT_FEEDBACK => self.output_feedback(frame),
            message::FIRMWARE_RESPONSE => self.firmware_response(frame),
            message::HUB_ALERT => self.alert(frame),
            _ => Ok(Disposition::Forward(frame)),
        }
    }

    fn attached_io(&self, p: &[u8]) -> Result<Disposition> {
        if p.len() < 2 {
            return Err(DriverError::protocol("Bad attach message length"));
        }
        let (id, event_code) = (p[0], p[1]);

        match event_code {
            attach::DETACHED => {
                if self.is_port(id) {
                    debug!(port = id, "detached");
                    self.observer.on_port_detached(id);
                    self.callbacks
                        .queue(CallbackKind::Port, id, event::DETACHED)?;
                } else {
                    debug!(pair = id, "pair detached");
                    self.observer.on_pair_detached(id);
                }
            }
            attach::ATTACHED => {
                if p.len() < 12 {
                    return Err(DriverError::protocol("Bad attach message length"));
                }
                if !self.is_port(id) {
                    return Err(DriverError::protocol(format!("Attach to bad port {id}")));
                }
                let device_type = u16::from_le_bytes([p[2], p[3]]);
                let hw = [p[4], p[5], p[6], p[7]];
                let fw = [p[8], p[9], p[10], p[11]];
                debug!(port = id, device_type, "attached");
                self.observer.on_port_attached(id, device_type, hw, fw);
                self.callbacks
                    .queue(CallbackKind::Port, id, event::ATTACHED)?;
            }
            attach::ATTACHED_VIRTUAL => {
                if p.len() < 6 {
                    return Err(DriverError::protocol("Bad virtual attach message length"));
                }
                let device_type = u16::from_le_bytes([p[2], p[3]]);
                debug!(pair = id, primary = p[4], secondary = p[5], "pair attached");
                self.observer.on_pair_attached(id, p[4], p[5], device_type);
            }
            other => {
                return Err(DriverError::protocol(format!(
                    "Unknown attach event {other}"
                )))
            }
        }
        Ok(Disposition::Consumed)
    }

    fn format_single(&self, frame: Frame) -> Result<Disposition> {
        let p = frame.payload();
        if p.len() < 7 {
            return Err(DriverError::protocol("Bad port format message length"));
        }
        self.observer.on_format_changed(p[0]);
        Ok(Disposition::Forward(frame))
    }

    fn decode_entry(&self, port: u8, entry: Option<u8>, buf: &[u8]) -> Result<usize> {
        let format = self.observer.value_format(port, entry).ok_or_else(|| {
            DriverError::protocol(format!("No value format for port {port}"))
        })?;
        let (values, used) = self.observer.decode_value(&format, buf)?;
        if used == 0 {
            return Err(DriverError::protocol(format!(
                "Empty value for port {port}"
            )));
        }
        self.observer.on_value(port, entry, &values);
        Ok(used)
    }

    fn value_single(&self, frame: Frame) -> Result<Disposition> {
        let p = frame.payload();
        let mut passback = false;
        let mut offset = 0;

        while offset < p.len() {
            if p.len() - offset < 2 {
                return Err(DriverError::protocol("Truncated port value"));
            }
            let port = p[offset];
            if self.awaited.take_port(port) {
                passback = true;
            }
            let used = self.decode_entry(port, None, &p[offset + 1..])?;
            self.callbacks
                .queue(CallbackKind::Device, port, event::DATA)?;
            offset += 1 + used;
        }

        Ok(if passback {
            Disposition::Forward(frame)
        } else {
            Disposition::Consumed
        })
    }

    fn value_combined(&self, frame: Frame) -> Result<Disposition> {
        let p = frame.payload();
        if p.len() < 3 {
            return Err(DriverError::protocol("Bad combined value length"));
        }
        let port = p[0];
        let mask = p[2] as u16 | (p[1] as u16) << 8;
        let mut offset = 3;

        for entry in 0..16u8 {
            if mask & (1 << entry) == 0 {
                continue;
            }
            if offset >= p.len() {
                return Err(DriverError::protocol("Combined value too short"));
            }
            offset += self.decode_entry(port, Some(entry), &p[offset..])?;
        }
        if offset != p.len() {
            return Err(DriverError::protocol("Combined value too long"));
        }

        let passback = self.awaited.take_port(port);
        self.callbacks
            .queue(CallbackKind::Device, port, event::DATA)?;
        Ok(if passback {
            Disposition::Forward(frame)
        } else {
            Disposition::Consumed
        })
    }

    fn output_feedback(&self, frame: Frame) -> Result<Disposition> {
        let p = frame.payload();
        if p.len() < 2 || p.len() % 2 != 0 {
            return Err(DriverError::protocol("Bad output feedback length"));
        }

        for pair in p.chunks_exact(2) {
            let (id, status) = (pair[0], pair[1]);
            self.observer.on_output_feedback(id, status);

            let code = match Feedback::classify(status) {
                Some(Feedback::Completed) => event::COMPLETE,
                Some(Feedback::Discarded) => event::INTERRUPTED,
                Some(Feedback::Stalled) => event::STALLED,
                Some(Feedback::Busy) | None => continue,
            };
            let kind = if self.is_port(id) {
                CallbackKind::Motor
            } else {
                CallbackKind::Pair
            };
            self.callbacks.queue(kind, id, code)?;
        }
        Ok(Disposition::Forward(frame))
    }

    fn firmware_response(&self, frame: Frame) -> Result<Disposition> {
        let p = frame.payload();
        if p.first() != Some(&firmware::INITIALIZE) {
            return Ok(Disposition::Forward(frame));
        }
        if p.len() != 2 {
            return Err(DriverError::protocol("Bad firmware initialize response"));
        }
        self.firmware.finish_erase();
        self.observer.on_firmware_event(p[0], p[1]);
        self.callbacks
            .queue(CallbackKind::Firmware, p[0], p[1])?;
        Ok(Disposition::Consumed)
    }

    fn alert(&self, frame: Frame) -> Result<Disposition> {
        let p = frame.payload();
        if p.len() < 2 || p[1] != alert::OP_UPDATE {
            return Ok(Disposition::Forward(frame));
        }
        if p.len() != 3 {
            return Err(DriverError::protocol("Bad alert update length"));
        }
        let (alert_id, value) = (p[0], p[2]);
        let passback = self.awaited.take_alert(alert_id);
        self.observer.on_alert(alert_id, value);
        self.callbacks
            .queue(CallbackKind::Alert, alert_id, value)?;
        Ok(if passback {
            Disposition::Forward(frame)
        } else {
            Disposition::Consumed
        })
    }

    /// Values already decoded by the console transport.
    ///
    /// An awaited port gets a minimal value marker frame instead of the
    /// values themselves.
    pub fn route_line_values(&self, port: u8, entries: &[LineEntry]) -> Result<Disposition> {
        for (entry, values) in entries {
            self.observer.on_value(port, *entry, values);
        }
        self.callbacks
            .queue(CallbackKind::Device, port, event::DATA)?;
        if self.awaited.take_port(port) {
            Ok(Disposition::Forward(Frame::new(
                message::PORT_VALUE_SINGLE,
                &[port],
            )?))
        } else {
            Ok(Disposition::Consumed)
        }
    }

    /// Mode and value type learned from the console.
    pub fn route_mode_format(&self, port: u8, mode: u8, kind: ValueKind) -> Disposition {
        self.observer.on_mode_format(port, mode, kind);
        Disposition::Consumed
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::sync::Mutex;

    use hubwire_frame::request;

    use super::*;
    use crate::callback::{Event, EventHandler, Handlers, HandlerError};
    use crate::observer::PortRegistry;

    struct Fixture {
        router: Router,
        registry: Arc<PortRegistry>,
        awaited: Arc<AwaitedResponses>,
        firmware: Arc<FirmwareState>,
        callbacks: Arc<CallbackDispatcher>,
        events: mpsc::Receiver<Event>,
    }

    impl Fixture {
        fn new() -> Self {
            let (tx, events) = mpsc::channel();
            let tx = Mutex::new(tx);
            let handler: Arc<dyn EventHandler> =
                Arc::new(move |event: &Event| -> std::result::Result<(), HandlerError> {
                    tx.lock().unwrap().send(*event)?;
                    Ok(())
                });
            let handlers = Arc::new(Handlers::new());
            handlers.set_event_handler(Some(Arc::clone(&handler)));
            handlers.set_firmware_handler(Some(handler));

            let registry = Arc::new(PortRegistry::new());
            let awaited = Arc::new(AwaitedResponses::new());
            let firmware = Arc::new(FirmwareState::new());
            let callbacks = Arc::new(CallbackDispatcher::start(handlers).unwrap());
            let observer: Arc<dyn DeviceObserver> = registry.clone();
            let router = Router::new(
                observer,
                Arc::clone(&awaited),
                Arc::clone(&callbacks),
                Arc::clone(&firmware),
                4,
            );
            Self {
                router,
                registry,
                awaited,
                firmware,
                callbacks,
                events,
            }
        }

        /// Stop the dispatcher and collect everything it delivered.
        fn events(&self) -> Vec<Event> {
            self.callbacks.shutdown();
            self.events.try_iter().collect()
        }

        fn attach(&self, port: u8) {
            let frame = Frame::new(
                message::HUB_ATTACHED_IO,
                &[port, attach::ATTACHED, 0x30, 0x00, 0, 0, 0, 1, 0, 0, 0, 2],
            )
            .unwrap();
            assert_eq!(self.router.route(frame).unwrap(), Disposition::Consumed);
        }
    }

    fn frame(message_type: u8, payload: &[u8]) -> Frame {
        Frame::new(message_type, payload).unwrap()
    }

    #[test]
    fn attach_and_detach_reach_observer_and_callbacks() {
        let fx = Fixture::new();
        fx.attach(1);
        let port = fx.registry.port(1).unwrap();
        assert_eq!(port.device_type, 0x30);
        assert_eq!(port.hw_revision, [0, 0, 0, 1]);
        assert_eq!(port.fw_revision, [0, 0, 0, 2]);

        let detach = frame(message::HUB_ATTACHED_IO, &[1, attach::DETACHED]);
        assert_eq!(fx.router.route(detach).unwrap(), Disposition::Consumed);
        assert!(fx.registry.port(1).is_none());

        let events = fx.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_code, event::ATTACHED);
        assert_eq!(events[1].event_code, event::DETACHED);
    }

    #[test]
    fn attach_outside_physical_ports_is_protocol_error() {
        let fx = Fixture::new();
        let bad = frame(
            message::HUB_ATTACHED_IO,
            &[9, attach::ATTACHED, 0x30, 0, 0, 0, 0, 0, 0, 0, 0, 0],
        );
        assert!(matches!(fx.router.route(bad), Err(DriverError::Protocol(_))));

        let short = frame(message::HUB_ATTACHED_IO, &[1, attach::ATTACHED, 0x30]);
        assert!(matches!(fx.router.route(short), Err(DriverError::Protocol(_))));
    }

    #[test]
    fn virtual_attach_and_detach_use_pairs() {
        let fx = Fixture::new();
        let attach = frame(
            message::HUB_ATTACHED_IO,
            &[0x10, attach::ATTACHED_VIRTUAL, 0x30, 0x00, 0, 1],
        );
        fx.router.route(attach).unwrap();
        assert_eq!(fx.registry.pair(0x10).unwrap().secondary, 1);

        let detach = frame(message::HUB_ATTACHED_IO, &[0x10, attach::DETACHED]);
        fx.router.route(detach).unwrap();
        assert!(fx.registry.pair(0x10).is_none());
    }

    #[test]
    fn wrong_hub_id_is_rejected() {
        let fx = Fixture::new();
        let bad = Frame::from_wire(vec![0x05, 0x01, 0x45, 0x00, 0x01]).unwrap();
        let err = fx.router.route(bad).unwrap_err();
        assert_eq!(err.to_string(), "protocol error: Bad hub ID 0x01");
    }

    #[test]
    fn format_single_notifies_and_forwards() {
        let fx = Fixture::new();
        fx.attach(0);
        let reply = frame(message::PORT_FORMAT_SINGLE, &[0, 2, 1, 0, 0, 0, 1]);
        let routed = fx.router.route(reply.clone()).unwrap();
        assert_eq!(routed, Disposition::Forward(reply));
        assert_eq!(fx.registry.port(0).unwrap().format_changes, 1);
    }

    #[test]
    fn unawaited_value_is_consumed_awaited_is_forwarded() {
        let fx = Fixture::new();
        fx.attach(0);
        fx.attach(2);
        fx.registry
            .set_value_format(0, 1, hubwire_frame::ValueFormat::single(ValueKind::I8));
        fx.registry
            .set_value_format(2, 2, hubwire_frame::ValueFormat::single(ValueKind::I32));

        let mut payload = vec![0, 0xF6, 2];
        payload.extend(1000i32.to_le_bytes());
        let values = frame(message::PORT_VALUE_SINGLE, &payload);
        assert_eq!(
            fx.router.route(values.clone()).unwrap(),
            Disposition::Consumed
        );
        assert_eq!(fx.registry.port(0).unwrap().last_values, vec![Value::Int(-10)]);
        assert_eq!(fx.registry.port(2).unwrap().last_values, vec![Value::Int(1000)]);

        fx.awaited.note_outbound(&request::port_value(2));
        assert_eq!(
            fx.router.route(values.clone()).unwrap(),
            Disposition::Forward(values)
        );
        assert!(!fx.awaited.is_port_set(2));
    }

    #[test]
    fn value_without_format_is_protocol_error() {
        let fx = Fixture::new();
        fx.attach(3);
        let values = frame(message::PORT_VALUE_SINGLE, &[3, 1]);
        assert!(matches!(
            fx.router.route(values),
            Err(DriverError::Protocol(_))
        ));
    }

    #[test]
    fn truncated_value_entry_is_rejected() {
        let fx = Fixture::new();
        fx.attach(0);
        fx.registry
            .set_value_format(0, 0, hubwire_frame::ValueFormat::single(ValueKind::I16));
        let values = frame(message::PORT_VALUE_SINGLE, &[0, 1]);
        assert!(fx.router.route(values).is_err());
    }

    #[test]
    fn combined_values_follow_mask() {
        let fx = Fixture::new();
        fx.attach(1);
        fx.registry.set_combi_formats(
            1,
            vec![
                hubwire_frame::ValueFormat::single(ValueKind::I8),
                hubwire_frame::ValueFormat::single(ValueKind::I8),
                hubwire_frame::ValueFormat::single(ValueKind::I16),
            ],
        );

        // Entries 0 and 2.
        let ok = frame(message::PORT_VALUE_COMBINED, &[1, 0x00, 0x05, 7, 0x2C, 0x01]);
        assert_eq!(fx.router.route(ok).unwrap(), Disposition::Consumed);
        assert_eq!(
            fx.registry.port(1).unwrap().last_values,
            vec![Value::Int(7), Value::Int(300)]
        );

        let short = frame(message::PORT_VALUE_COMBINED, &[1, 0x00, 0x05, 7]);
        assert!(fx.router.route(short).is_err());

        let long = frame(message::PORT_VALUE_COMBINED, &[1, 0x00, 0x01, 7, 9]);
        assert!(fx.router.route(long).is_err());
    }

    #[test]
    fn feedback_is_forwarded_and_raises_motor_or_pair_callbacks() {
        let fx = Fixture::new();
        let feedback = frame(
            message::PORT_OUTPUT_FEEDBACK,
            &[0, 0x0A, 1, 0x01, 0x10, 0x22, 2, 0x06],
        );
        assert_eq!(
            fx.router.route(feedback.clone()).unwrap(),
            Disposition::Forward(feedback)
        );

        let events = fx.events();
        assert_eq!(events.len(), 3);
        assert_eq!(
            (events[0].kind, events[0].event_code),
            (CallbackKind::Motor, event::COMPLETE)
        );
        assert_eq!(
            (events[1].kind, events[1].subject_id, events[1].event_code),
            (CallbackKind::Pair, 0x10, event::STALLED)
        );
        assert_eq!(events[2].event_code, event::INTERRUPTED);
    }

    #[test]
    fn firmware_initialize_goes_to_callbacks_not_responses() {
        let fx = Fixture::new();
        fx.firmware.begin_erase();
        let done = frame(message::FIRMWARE_RESPONSE, &[firmware::INITIALIZE, 1]);
        assert_eq!(fx.router.route(done).unwrap(), Disposition::Consumed);
        assert!(!fx.firmware.is_erasing());

        let store = frame(message::FIRMWARE_RESPONSE, &[firmware::STORE, 1]);
        assert!(matches!(
            fx.router.route(store).unwrap(),
            Disposition::Forward(_)
        ));

        let events = fx.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, CallbackKind::Firmware);
    }

    #[test]
    fn alert_update_always_raises_callback() {
        let fx = Fixture::new();
        let update = frame(message::HUB_ALERT, &[alert::HIGH_CURRENT, alert::OP_UPDATE, 0xFF]);
        assert_eq!(
            fx.router.route(update.clone()).unwrap(),
            Disposition::Consumed
        );

        fx.awaited
            .note_outbound(&request::alert_request(alert::HIGH_CURRENT));
        assert_eq!(
            fx.router.route(update.clone()).unwrap(),
            Disposition::Forward(update)
        );
        assert_eq!(fx.registry.alert(alert::HIGH_CURRENT), Some(0xFF));
        assert_eq!(fx.events().len(), 2);
    }

    #[test]
    fn unknown_frames_are_forwarded() {
        let fx = Fixture::new();
        let property = frame(message::HUB_PROPERTY, &[4, 6, 0, 0, 0, 0x10]);
        assert_eq!(
            fx.router.route(property.clone()).unwrap(),
            Disposition::Forward(property)
        );
    }

    #[test]
    fn line_values_pass_back_marker_when_awaited() {
        let fx = Fixture::new();
        fx.attach(0);
        fx.awaited.set_port(0);
        let routed = fx
            .router
            .route_line_values(0, &[(Some(0), vec![Value::Int(42)])])
            .unwrap();
        let Disposition::Forward(marker) = routed else {
            panic!("expected marker frame");
        };
        assert_eq!(marker.as_bytes(), &[0x04, 0x00, 0x45, 0x00]);
        assert_eq!(fx.registry.port(0).unwrap().last_values, vec![Value::Int(42)]);
    }
}
