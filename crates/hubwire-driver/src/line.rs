//! Serial console transport.
//!
//! The console is a human-readable diagnostic interface, not the wire
//! protocol. Status lines are turned into the frames the binary transport
//! would have delivered (attach, detach, feedback, errors) or into already
//! decoded values. Outbound frames are translated into console commands;
//! requests the console answers silently are acknowledged locally.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use hubwire_frame::message::{self, action, attach, combined, output, port_info};
use hubwire_frame::{Frame, Value, ValueKind};
use hubwire_transport::{HubStream, PollReadable, TransportError, Wake, WaitReady, Waker};
use tracing::{debug, trace};

use crate::config::{DriverConfig, SerialConfig};
use crate::error::{DeviceError, DriverError, Result};
use crate::transport::{Inbound, Receive, Transmit, Transport, TransportParts};

/// Longest line kept before the buffer is discarded as garbage.
const MAX_LINE: usize = 4096;

/// Status reported for console motions that have finished.
const MOTION_DONE: u8 = message::feedback::COMPLETED | message::feedback::IDLE;

pub struct LineTransport {
    stream: HubStream,
    waker: Arc<Waker>,
}

impl LineTransport {
    pub fn new(stream: HubStream) -> Result<Self> {
        Ok(Self {
            stream,
            waker: Arc::new(Waker::new()?),
        })
    }

    #[cfg(unix)]
    pub fn open_serial(config: &SerialConfig) -> Result<Self> {
        Self::new(hubwire_transport::SerialPort::open(
            &config.device,
            config.baud,
        )?)
    }
}

impl Transport for LineTransport {
    fn into_parts(self, _config: &DriverConfig) -> Result<TransportParts> {
        let name = self.stream.transport_name();
        let writer = self.stream.try_clone()?;
        let closer = self.stream.try_clone()?;
        let last_command = Arc::new(AtomicU8::new(0));
        let ready = PollReadable::new(&self.stream, Arc::clone(&self.waker));
        debug!(transport = name, "console transport ready");

        Ok(TransportParts {
            name,
            receiver: Box::new(LineReceiver {
                stream: self.stream,
                ready,
                buf: Vec::new(),
                pending: VecDeque::new(),
                parser: LineParser::new(Arc::clone(&last_command)),
            }),
            transmitter: Box::new(LineTransmitter::new(writer, last_command)),
            waker: self.waker,
            closer: Some(closer),
        })
    }
}

struct LineReceiver {
    stream: HubStream,
    ready: PollReadable,
    buf: Vec<u8>,
    pending: VecDeque<Inbound>,
    parser: LineParser,
}

impl LineReceiver {
    /// Split one terminated line off the buffer, if there is one.
    fn next_line(&mut self) -> Option<String> {
        let end = self.buf.iter().position(|&b| b == b'\n' || b == b'\r')?;
        let line: Vec<u8> = self.buf.drain(..=end).collect();
        Some(String::from_utf8_lossy(&line[..end]).into_owned())
    }
}

impl Receive for LineReceiver {
    fn receive(&mut self) -> Result<Inbound> {
        loop {
            if let Some(unit) = self.pending.pop_front() {
                return Ok(unit);
            }
            if let Some(line) = self.next_line() {
                if !line.trim().is_empty() {
                    self.parser.parse(&line, &mut self.pending)?;
                }
                continue;
            }

            if self.ready.wait_ready()? == Wake::Interrupted {
                return Ok(Inbound::Interrupted);
            }
            let mut chunk = [0u8; 256];
            let n = match self.stream.read(&mut chunk) {
                Ok(0) => return Err(hubwire_frame::FrameError::ConnectionClosed.into()),
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Io(err).into()),
            };
            self.buf.extend_from_slice(&chunk[..n]);
            if self.buf.len() > MAX_LINE {
                self.buf.clear();
                return Err(DriverError::protocol("console line too long"));
            }
        }
    }
}

/// Turns console lines into inbound units.
pub(crate) struct LineParser {
    last_port: Option<u8>,
    last_mode: u8,
    /// Mode value types announced for each port.
    formats: BTreeMap<(u8, u8), ValueKind>,
    last_command: Arc<AtomicU8>,
}

impl LineParser {
    pub(crate) fn new(last_command: Arc<AtomicU8>) -> Self {
        Self {
            last_port: None,
            last_mode: 0,
            formats: BTreeMap::new(),
            last_command,
        }
    }

    pub(crate) fn parse(&mut self, line: &str, out: &mut VecDeque<Inbound>) -> Result<()> {
        if line.starts_with("Error") {
            let command = self.last_command.load(Ordering::Acquire);
            let cause = DeviceError::InvalidUse.cause().unwrap_or(5);
            out.push_back(Inbound::Frame(Frame::new(
                message::GENERIC_ERROR,
                &[command, cause],
            )?));
            return Ok(());
        }
        if let Some(rest) = line.strip_prefix("    format ") {
            self.format_line(rest, out);
            return Ok(());
        }
        if let Some(rest) = line.strip_prefix("  M") {
            let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
            if let Ok(mode) = digits.parse() {
                self.last_mode = mode;
            }
            return Ok(());
        }

        let bytes = line.as_bytes();
        if bytes.len() >= 3 && bytes[0] == b'P' && bytes[1].is_ascii_digit() {
            let port = bytes[1] - b'0';
            self.last_port = Some(port);
            return match bytes[2] {
                b':' => self.status_line(port, line[3..].trim(), out),
                b'>' => Ok(()),
                b'C' | b'M' => self.value_line(port, line, out),
                _ => Ok(()),
            };
        }

        trace!(line, "ignored console line");
        Ok(())
    }

    fn format_line(&mut self, rest: &str, out: &mut VecDeque<Inbound>) {
        let Some(port) = self.last_port else {
            return;
        };
        let kind = rest
            .split_whitespace()
            .find_map(|token| token.strip_prefix("type="))
            .and_then(|code| code.parse().ok())
            .and_then(ValueKind::from_code);
        if let Some(kind) = kind {
            let mode = self.last_mode;
            self.formats.insert((port, mode), kind);
            out.push_back(Inbound::ModeFormat { port, mode, kind });
        }
    }

    fn status_line(&mut self, port: u8, status: &str, out: &mut VecDeque<Inbound>) -> Result<()> {
        if status == "disconnected" {
            self.formats.retain(|&(p, _), _| p != port);
            out.push_back(Inbound::Frame(Frame::new(
                message::HUB_ATTACHED_IO,
                &[port, attach::DETACHED],
            )?));
            return Ok(());
        }

        let id = status
            .strip_prefix("connected to active ID ")
            .or_else(|| status.strip_prefix("connected to passive ID "));
        if let Some(id) = id {
            let device_type = u16::from_str_radix(id.trim(), 16).map_err(|_| {
                DriverError::protocol(format!("Bad device id {id:?} on port {port}"))
            })?;
            let [lo, hi] = device_type.to_le_bytes();
            let mut payload = [0u8; 12];
            payload[..4].copy_from_slice(&[port, attach::ATTACHED, lo, hi]);
            out.push_back(Inbound::Frame(Frame::new(
                message::HUB_ATTACHED_IO,
                &payload,
            )?));
            for (&(_, mode), &kind) in self.formats.range((port, 0)..=(port, u8::MAX)) {
                out.push_back(Inbound::ModeFormat { port, mode, kind });
            }
            return Ok(());
        }

        if status == "pulse done" || status == "ramp done" {
            out.push_back(Inbound::Frame(Frame::new(
                message::PORT_OUTPUT_FEEDBACK,
                &[port, MOTION_DONE],
            )?));
            return Ok(());
        }

        trace!(port, status, "ignored port status");
        Ok(())
    }

    fn value_line(&mut self, port: u8, line: &str, out: &mut VecDeque<Inbound>) -> Result<()> {
        let body = match line.split_once(':') {
            Some((_, rest)) => rest,
            None => line.get(5..).unwrap_or(""),
        };
        let entries = body
            .split_whitespace()
            .enumerate()
            .map(|(index, token)| {
                Value::parse_token(token)
                    .map(|value| (Some(index as u8), vec![value]))
                    .ok_or_else(|| {
                        DriverError::protocol(format!("Bad value {token:?} on port {port}"))
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        if !entries.is_empty() {
            out.push_back(Inbound::Values { port, entries });
        }
        Ok(())
    }
}

/// Turns outbound frames into console commands.
struct LineTransmitter {
    stream: HubStream,
    last_command: Arc<AtomicU8>,
    /// Mode last selected on each port, for one-shot value reads.
    modes: HashMap<u8, u8>,
    /// Entries in the combination last set on each port.
    combinations: HashMap<u8, usize>,
}

impl LineTransmitter {
    fn new(stream: HubStream, last_command: Arc<AtomicU8>) -> Self {
        Self {
            stream,
            last_command,
            modes: HashMap::new(),
            combinations: HashMap::new(),
        }
    }

    /// Console command for `frame` (if any) and the local acknowledgement.
    fn translate(&mut self, frame: &Frame) -> Result<(Option<String>, Option<Frame>)> {
        let p = frame.payload();
        let unsupported = || {
            DriverError::protocol(format!(
                "no console equivalent for {}",
                message::message_name(frame.message_type())
            ))
        };
        let port = *p.first().ok_or_else(unsupported)?;

        match frame.message_type() {
            message::PORT_FORMAT_SETUP_SINGLE if p.len() >= 2 => {
                let mode = p[1];
                self.modes.insert(port, mode);
                Ok((
                    Some(format!("port {port} ; select {mode}")),
                    Some(Frame::new(message::PORT_FORMAT_SINGLE, p)?),
                ))
            }
            message::PORT_INFO_REQUEST if p.get(1) == Some(&port_info::VALUE) => {
                let mode = self.modes.get(&port).copied().unwrap_or(0);
                Ok((Some(format!("port {port} ; selonce {mode}")), None))
            }
            message::PORT_OUTPUT if p.len() >= 4 => {
                let level = match (p[2], p[3]) {
                    (output::WRITE_DIRECT_MODE_DATA, output::MODE_POWER) if p.len() >= 5 => {
                        p[4] as i8
                    }
                    (output::START_SPEED, speed) => speed as i8,
                    _ => return Err(unsupported()),
                };
                // Brake has no console form; stopping is the nearest.
                let level = if level == output::POWER_BRAKE { 0 } else { level };
                Ok((
                    Some(format!("port {port} ; pwm ; set {}", f32::from(level) / 100.0)),
                    Some(Frame::new(
                        message::PORT_OUTPUT_FEEDBACK,
                        &[port, MOTION_DONE],
                    )?),
                ))
            }
            message::HUB_ACTION => match p[0] {
                action::VCC_ON => Ok((Some("vcc on".into()), None)),
                action::VCC_OFF => Ok((Some("vcc off".into()), None)),
                _ => Err(unsupported()),
            },
            message::PORT_FORMAT_SETUP_COMBINED if p.len() >= 2 => self.combined(port, p),
            _ => Err(unsupported()),
        }
    }

    fn combined(&mut self, port: u8, p: &[u8]) -> Result<(Option<String>, Option<Frame>)> {
        let ack = |index: u8, bitmap: u16| {
            let [lo, hi] = bitmap.to_le_bytes();
            Frame::new(message::PORT_FORMAT_COMBINED, &[port, index, lo, hi])
        };
        match p[1] {
            combined::SET_COMBINATION if p.len() >= 3 => {
                let mut command = format!("port {port} ; combi {}", p[2]);
                for packed in &p[3..] {
                    command.push_str(&format!(" {} {}", packed >> 4, packed & 0x0f));
                }
                self.combinations.insert(port, p.len() - 3);
                Ok((Some(command), None))
            }
            combined::RESET => {
                self.combinations.remove(&port);
                Ok((Some(format!("port {port} ; combi 0")), Some(ack(0, 0)?)))
            }
            combined::LOCK => Ok((None, Some(ack(0, 0)?))),
            combined::UNLOCK_AND_START_MULTI_UPDATE | combined::UNLOCK_MULTI_UPDATE_DISABLED => {
                let entries = self.combinations.get(&port).copied().unwrap_or(0);
                let bitmap = ((1u32 << entries.min(16)) - 1) as u16;
                Ok((None, Some(ack(0, bitmap)?)))
            }
            _ => Err(DriverError::protocol(
                "no console equivalent for combined format setup",
            )),
        }
    }
}

impl Transmit for LineTransmitter {
    fn transmit(&mut self, frame: &Frame) -> Result<Option<Frame>> {
        self.last_command
            .store(frame.message_type(), Ordering::Release);
        let (command, ack) = self.translate(frame)?;
        if let Some(command) = command {
            debug!(command = %command, "console command");
            self.stream
                .write_all(format!("{command}\r").as_bytes())
                .map_err(TransportError::Io)?;
            self.stream.flush().map_err(TransportError::Io)?;
        }
        Ok(ack)
    }
}
