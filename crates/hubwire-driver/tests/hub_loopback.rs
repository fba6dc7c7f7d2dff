//! End-to-end runs of a [`Hub`] against a simulated Hub on a socket pair.

#![cfg(unix)]

use std::io::{Read, Write};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use hubwire_driver::{
    event, CallbackKind, CommsState, DriverConfig, DriverError, Event, FramedTransport,
    HandlerError, Hub, LineTransport, PortRegistry,
};
use hubwire_frame::message::{self, property};
use hubwire_frame::{Decoded, Frame, FrameReader, FrameWriter, Value, ValueFormat, ValueKind};
use hubwire_transport::HubStream;

type Respond = Box<dyn FnMut(&Frame) -> Vec<Frame> + Send>;

/// The far end of the socket pair, answering frames like a Hub would.
struct SimHub {
    writer: Arc<Mutex<FrameWriter<HubStream>>>,
    handle: JoinHandle<Vec<Frame>>,
}

impl SimHub {
    fn start(stream: HubStream, mut respond: Respond) -> Self {
        let writer = Arc::new(Mutex::new(FrameWriter::new(stream.try_clone().unwrap())));
        let replies = Arc::clone(&writer);
        let handle = thread::spawn(move || {
            let mut reader = FrameReader::new(stream);
            let mut seen = Vec::new();
            while let Ok(decoded) = reader.read_frame() {
                let Decoded::Frame(frame) = decoded else {
                    continue;
                };
                let mut writer = replies.lock().unwrap();
                for reply in respond(&frame) {
                    writer.write_frame(&reply).unwrap();
                }
                seen.push(frame);
            }
            seen
        });
        Self { writer, handle }
    }

    fn send(&self, bytes: &[u8]) {
        self.writer.lock().unwrap().write_bytes(bytes).unwrap();
    }
}

fn config() -> DriverConfig {
    DriverConfig {
        reply_timeout: Duration::from_millis(500),
        ..DriverConfig::default()
    }
}

fn framed_hub(respond: Respond) -> (Hub, Arc<PortRegistry>, SimHub) {
    let (ours, theirs) = HubStream::pair().unwrap();
    let registry = Arc::new(PortRegistry::new());
    let hub = Hub::start(
        FramedTransport::new(ours).unwrap(),
        registry.clone(),
        config(),
    )
    .unwrap();
    (hub, registry, SimHub::start(theirs, respond))
}

fn event_channel(hub: &Hub) -> mpsc::Receiver<Event> {
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    hub.register_event_handler(move |event: &Event| -> Result<(), HandlerError> {
        tx.lock().unwrap().send(*event)?;
        Ok(())
    });
    rx
}

fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached");
        thread::sleep(Duration::from_millis(5));
    }
}

const ATTACH_PORT_0: [u8; 15] = [15, 0, 0x04, 0, 1, 0x30, 0, 1, 0, 0, 0, 2, 0, 0, 0];

#[test]
fn keepalive_makes_comms_healthy() {
    let (hub, _registry, sim) = framed_hub(Box::new(|_: &Frame| vec![]));
    assert!(matches!(hub.check_comms(), Err(DriverError::NotResponding)));

    sim.send(&[0]);
    wait_for(|| hub.comms_state() == CommsState::Healthy);
    hub.check_comms().unwrap();
    assert_eq!(hub.health().keepalives, 1);
}

#[test]
fn firmware_version_over_loopback() {
    let (hub, _registry, _sim) = framed_hub(Box::new(|f: &Frame| {
        if f.message_type() != message::HUB_PROPERTY {
            return vec![];
        }
        vec![Frame::new(
            message::HUB_PROPERTY,
            &[f.payload()[0], property::OP_UPDATE, 0x00, 0x00, 0x15, 0x11],
        )
        .unwrap()]
    }));
    assert_eq!(hub.commands().firmware_version().unwrap(), "1.1.15.0");
}

#[test]
fn attach_reaches_handler_and_registry() {
    let (hub, registry, sim) = framed_hub(Box::new(|_: &Frame| vec![]));
    let events = event_channel(&hub);

    sim.send(&ATTACH_PORT_0);
    let event = events.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(
        event,
        Event {
            kind: CallbackKind::Port,
            subject_id: 0,
            event_code: event::ATTACHED
        }
    );
    let port = registry.port(0).unwrap();
    assert_eq!(port.device_type, 0x30);
    assert_eq!(port.hw_revision, [1, 0, 0, 0]);
}

#[test]
fn awaited_value_is_passed_back() {
    let (hub, registry, sim) = framed_hub(Box::new(|f: &Frame| {
        if f.message_type() == message::PORT_INFO_REQUEST {
            vec![Frame::new(message::PORT_VALUE_SINGLE, &[f.payload()[0], 42]).unwrap()]
        } else {
            vec![]
        }
    }));
    let events = event_channel(&hub);
    sim.send(&ATTACH_PORT_0);
    events.recv_timeout(Duration::from_secs(2)).unwrap();
    registry.set_value_format(0, 0, ValueFormat::single(ValueKind::I8));

    let frame = hub.commands().get_port_value(0).unwrap();
    assert_eq!(frame.payload(), &[0, 42]);
    assert_eq!(registry.port(0).unwrap().last_values, vec![Value::Int(42)]);
}

#[test]
fn unsolicited_values_stay_with_the_receiver() {
    let (hub, registry, sim) = framed_hub(Box::new(|f: &Frame| {
        if f.message_type() != message::HUB_PROPERTY {
            return vec![];
        }
        vec![Frame::new(
            message::HUB_PROPERTY,
            &[f.payload()[0], property::OP_UPDATE, 0x34, 0x12, 0x07, 0x21],
        )
        .unwrap()]
    }));
    let events = event_channel(&hub);
    sim.send(&ATTACH_PORT_0);
    events.recv_timeout(Duration::from_secs(2)).unwrap();
    registry.set_value_format(0, 0, ValueFormat::single(ValueKind::I8));

    sim.send(&[5, 0, 0x45, 0, 7]);
    wait_for(|| registry.port(0).unwrap().last_values == vec![Value::Int(7)]);
    assert_eq!(hub.commands().hardware_version().unwrap(), "2.1.7.1234");
}

#[test]
fn shutdown_is_idempotent_and_fails_later_calls() {
    let (hub, _registry, sim) = framed_hub(Box::new(|_: &Frame| vec![]));
    hub.shutdown();
    hub.shutdown();
    assert!(matches!(
        hub.commands().hardware_version(),
        Err(DriverError::Shutdown)
    ));
    drop(hub);
    sim.handle.join().unwrap();
}

#[test]
fn console_attach_and_local_pwm_ack() {
    let (ours, mut console) = HubStream::pair().unwrap();
    let registry = Arc::new(PortRegistry::new());
    let hub = Hub::start(LineTransport::new(ours).unwrap(), registry.clone(), config()).unwrap();
    let events = event_channel(&hub);

    console
        .write_all(b"P2: connected to active ID 30\r\n  M0 POWER\r\n    format count=1 type=0\r\n")
        .unwrap();
    let event = events.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(event.subject_id, 2);
    wait_for(|| registry.port(2).is_some_and(|p| p.format.is_some()));

    hub.commands().set_pwm(2, 50).unwrap();
    let mut command = [0u8; 23];
    console.read_exact(&mut command).unwrap();
    assert_eq!(&command, b"port 2 ; pwm ; set 0.5\r");
}
