//! Synchronous request/response calls.
//!
//! A call pushes its request on the outbound queue and blocks on the response
//! queue until the matching reply, a generic error, a timeout, or shutdown.
//! One request is in flight at a time: the response queue is shared, so two
//! overlapping callers could otherwise take each other's replies.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use hubwire_frame::message::{self, alert, combined, mode_info, port_info, property};
use hubwire_frame::{hex, request, Frame, ValueFormat, HUB_ID};
use tracing::{debug, warn};

use crate::config::DriverConfig;
use crate::error::{DeviceError, DriverError, Result};
use crate::firmware::FirmwareState;
use crate::queue::FrameQueue;
use crate::replies::{self, Mapping, PortModes, Range};

/// Accepted total lengths of a reply frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Length {
    Exact(usize),
    Range(usize, usize),
    /// Odd lengths within the range.
    OddRange(usize, usize),
    AtLeast(usize),
}

impl Length {
    fn accepts(self, len: usize) -> bool {
        match self {
            Self::Exact(n) => len == n,
            Self::Range(lo, hi) => (lo..=hi).contains(&len),
            Self::OddRange(lo, hi) => len % 2 == 1 && (lo..=hi).contains(&len),
            Self::AtLeast(n) => len >= n,
        }
    }
}

/// Shape of the reply a request expects.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Expect<'a> {
    pub reply_type: u8,
    pub length: Length,
    /// `(payload index, byte)` pairs the reply must echo.
    pub echo: &'a [(usize, u8)],
    /// Request name used in "Unexpected reply to ..." errors.
    pub context: &'static str,
    /// Keep output feedback instead of discarding it.
    pub accept_feedback: bool,
}

impl Expect<'_> {
    fn mismatch(&self) -> DriverError {
        DriverError::protocol(format!("Unexpected reply to {}", self.context))
    }
}

/// Translate a generic error frame sent in reply to `request_type`.
pub(crate) fn generic_error(request_type: u8, frame: &Frame) -> DriverError {
    let p = frame.payload();
    if frame.len() != 5 {
        return DriverError::protocol("Bad generic error length");
    }
    if p[0] != request_type {
        return DriverError::Device(DeviceError::WrongType);
    }
    DriverError::Device(DeviceError::from_cause(p[1]))
}

pub(crate) fn check_hub_id(frame: &Frame) -> Result<()> {
    if frame.hub_id() != HUB_ID {
        return Err(DriverError::protocol(format!(
            "Bad hub ID 0x{:02x}",
            frame.hub_id()
        )));
    }
    Ok(())
}

const HW_VERSION: &str = "H/W Version Request";
const FW_VERSION: &str = "F/W Version Request";
const PORT_INFO: &str = "Port Information Request";
const MODE_INFO: &str = "Port Mode Information Request";
const FORMAT_SETUP: &str = "Port Format Setup";
const COMBINED_RESET: &str = "Combined Mode Reset";
const COMBINED_LOCK: &str = "Combined Mode Lock";
const COMBINED_UNLOCK: &str = "Combined Mode Unlock";
const ALERT_REQUEST: &str = "Alert Request";
const PORT_VALUE: &str = "Port Value Request";

/// The command layer. Obtained from [`crate::Hub::commands`].
pub struct Commands {
    outbound: Arc<FrameQueue>,
    responses: Arc<FrameQueue>,
    pub(crate) firmware: Arc<FirmwareState>,
    pub(crate) config: DriverConfig,
    in_flight: Mutex<()>,
}

impl Commands {
    pub(crate) fn new(
        outbound: Arc<FrameQueue>,
        responses: Arc<FrameQueue>,
        firmware: Arc<FirmwareState>,
        config: DriverConfig,
    ) -> Self {
        Self {
            outbound,
            responses,
            firmware,
            config,
            in_flight: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub(crate) fn exclusive(&self) -> MutexGuard<'_, ()> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hand a frame to the transmitter.
    pub(crate) fn send(&self, frame: Frame) -> Result<()> {
        debug!(
            kind = message::message_name(frame.message_type()),
            wire = %hex(frame.as_bytes()),
            "request queued"
        );
        self.outbound.push(frame).map_err(DriverError::from)
    }

    /// Next frame from the response queue, or `Shutdown`.
    pub(crate) fn pop_reply(&self, timeout: Duration) -> Result<Frame> {
        self.responses.pop(timeout)?.ok_or(DriverError::Shutdown)
    }

    /// Pop until a frame of the expected type arrives.
    ///
    /// Feedback is dropped unless the caller asked for it. Anything else of
    /// the wrong type, length or echo is a protocol error.
    pub(crate) fn await_reply(
        &self,
        request_type: u8,
        expect: &Expect<'_>,
        timeout: Duration,
    ) -> Result<Frame> {
        loop {
            let frame = self.pop_reply(timeout)?;
            check_hub_id(&frame)?;

            let message_type = frame.message_type();
            if message_type == message::GENERIC_ERROR {
                return Err(generic_error(request_type, &frame));
            }
            if message_type == message::PORT_OUTPUT_FEEDBACK && !expect.accept_feedback {
                debug!(wire = %hex(frame.as_bytes()), "discarding feedback");
                continue;
            }
            if message_type != expect.reply_type || !expect.length.accepts(frame.len()) {
                return Err(expect.mismatch());
            }
            let p = frame.payload();
            if expect
                .echo
                .iter()
                .any(|&(index, byte)| p.get(index) != Some(&byte))
            {
                return Err(expect.mismatch());
            }
            return Ok(frame);
        }
    }

    /// Drop replies nobody claimed.
    pub(crate) fn clear_stale(&self) -> Result<()> {
        let stale = self.responses.clear()?;
        if stale > 0 {
            debug!(stale, "dropped stale replies");
        }
        Ok(())
    }

    /// Clear stale replies, send, and wait for the reply. Caller holds the
    /// in-flight lock.
    pub(crate) fn exchange(
        &self,
        request: Frame,
        expect: &Expect<'_>,
        timeout: Duration,
    ) -> Result<Frame> {
        self.clear_stale()?;
        let request_type = request.message_type();
        self.send(request)?;
        self.await_reply(request_type, expect, timeout)
    }

    /// Single request/response round trip.
    pub(crate) fn make_request(&self, request: Frame, expect: &Expect<'_>) -> Result<Frame> {
        let _guard = self.exclusive();
        self.exchange(request, expect, self.config.reply_timeout)
    }

    fn version(&self, property_id: u8, context: &'static str) -> Result<String> {
        let reply = self.make_request(
            request::hub_property(property_id),
            &Expect {
                reply_type: message::HUB_PROPERTY,
                length: Length::Exact(9),
                echo: &[(0, property_id), (1, property::OP_UPDATE)],
                context,
                accept_feedback: false,
            },
        )?;
        let p = reply.payload();
        Ok(replies::version_string([p[2], p[3], p[4], p[5]]))
    }

    pub fn hardware_version(&self) -> Result<String> {
        self.version(property::HW_VERSION, HW_VERSION)
    }

    pub fn firmware_version(&self) -> Result<String> {
        self.version(property::FW_VERSION, FW_VERSION)
    }

    pub fn port_modes(&self, port: u8) -> Result<PortModes> {
        let reply = self.make_request(
            request::port_info(port, port_info::MODE),
            &Expect {
                reply_type: message::PORT_INFO,
                length: Length::Exact(11),
                echo: &[(0, port), (1, port_info::MODE)],
                context: PORT_INFO,
                accept_feedback: false,
            },
        )?;
        Ok(PortModes::from_payload(reply.payload()))
    }

    /// Mode masks of each combination the port supports (up to 8).
    pub fn combination_masks(&self, port: u8) -> Result<Vec<u16>> {
        let reply = self.make_request(
            request::port_info(port, port_info::MODE_COMBINATIONS),
            &Expect {
                reply_type: message::PORT_INFO,
                length: Length::OddRange(7, 21),
                echo: &[(0, port), (1, port_info::MODE_COMBINATIONS)],
                context: PORT_INFO,
                accept_feedback: false,
            },
        )?;
        Ok(replies::combination_masks(reply.payload()))
    }

    fn mode_info(&self, port: u8, mode: u8, info: u8, length: Length) -> Result<Frame> {
        self.make_request(
            request::port_mode(port, mode, info),
            &Expect {
                reply_type: message::PORT_MODE,
                length,
                echo: &[(0, port), (1, mode), (2, info)],
                context: MODE_INFO,
                accept_feedback: false,
            },
        )
    }

    pub fn mode_name(&self, port: u8, mode: u8) -> Result<String> {
        let reply = self.mode_info(port, mode, mode_info::NAME, Length::Range(7, 17))?;
        Ok(replies::mode_text(reply.payload()))
    }

    pub fn mode_raw_range(&self, port: u8, mode: u8) -> Result<Range> {
        let reply = self.mode_info(port, mode, mode_info::RAW, Length::Exact(14))?;
        Ok(Range::from_payload(reply.payload()))
    }

    pub fn mode_pct_range(&self, port: u8, mode: u8) -> Result<Range> {
        let reply = self.mode_info(port, mode, mode_info::PCT, Length::Exact(14))?;
        Ok(Range::from_payload(reply.payload()))
    }

    pub fn mode_si_range(&self, port: u8, mode: u8) -> Result<Range> {
        let reply = self.mode_info(port, mode, mode_info::SI, Length::Exact(14))?;
        Ok(Range::from_payload(reply.payload()))
    }

    pub fn mode_symbol(&self, port: u8, mode: u8) -> Result<String> {
        let reply = self.mode_info(port, mode, mode_info::SYMBOL, Length::Range(7, 11))?;
        Ok(replies::mode_text(reply.payload()))
    }

    pub fn mode_mapping(&self, port: u8, mode: u8) -> Result<Mapping> {
        let reply = self.mode_info(port, mode, mode_info::MAPPING, Length::Exact(8))?;
        let p = reply.payload();
        Ok(Mapping {
            input: p[3],
            output: p[4],
        })
    }

    pub fn mode_capability(&self, port: u8, mode: u8) -> Result<[u8; 6]> {
        let reply = self.mode_info(port, mode, mode_info::CAPABILITY, Length::Exact(12))?;
        Ok(replies::capability_bytes(reply.payload()))
    }

    pub fn mode_value_format(&self, port: u8, mode: u8) -> Result<ValueFormat> {
        let reply = self.mode_info(port, mode, mode_info::VALUE_FORMAT, Length::Exact(10))?;
        replies::value_format(reply.payload())
    }

    /// Ask for the port's current value and return the frame carrying it.
    ///
    /// The receiver decodes the values for the device layer as usual; the
    /// frame is passed back because the transmitter marked the port awaited.
    pub fn get_port_value(&self, port: u8) -> Result<Frame> {
        let _guard = self.exclusive();
        self.clear_stale()?;
        self.send(request::port_value(port))?;

        loop {
            let frame = self.pop_reply(self.config.reply_timeout)?;
            check_hub_id(&frame)?;
            match frame.message_type() {
                message::GENERIC_ERROR => {
                    return Err(generic_error(message::PORT_INFO_REQUEST, &frame))
                }
                message::PORT_OUTPUT_FEEDBACK => continue,
                message::PORT_VALUE_SINGLE | message::PORT_VALUE_COMBINED
                    if frame.len() >= value_reply_min(frame.message_type())
                        && frame.payload_byte(0) == Some(port) =>
                {
                    return Ok(frame)
                }
                _ => {
                    return Err(DriverError::protocol(format!(
                        "Unexpected reply to {PORT_VALUE}"
                    )))
                }
            }
        }
    }

    /// Request an immediate alert update; returns the alert's value.
    pub fn alert_request(&self, alert_id: u8) -> Result<u8> {
        let reply = self.make_request(
            request::alert_request(alert_id),
            &Expect {
                reply_type: message::HUB_ALERT,
                length: Length::Exact(6),
                echo: &[(0, alert_id), (1, alert::OP_UPDATE)],
                context: ALERT_REQUEST,
                accept_feedback: false,
            },
        )?;
        Ok(reply.payload()[2])
    }

    fn format_setup(&self, port: u8, mode: u8, delta: u32, notify: bool) -> Result<Frame> {
        self.exchange(
            request::format_setup_single(port, mode, delta, notify),
            &format_setup_expect(&[(0, port), (1, mode)]),
            self.config.reply_timeout,
        )
    }

    fn combined_op(&self, port: u8, sub_command: u8, context: &'static str) -> Result<Frame> {
        self.exchange(
            request::format_setup_combined(port, sub_command),
            &combined_expect(&[(0, port)], context),
            self.config.reply_timeout,
        )
    }

    /// Select a single mode with a notification delta.
    ///
    /// Any mode other than 0 is selected, the combined format is reset, and
    /// the mode is selected again.
    pub fn set_mode(&self, port: u8, mode: u8, delta: u32, notify: bool) -> Result<()> {
        let _guard = self.exclusive();
        self.format_setup(port, mode, delta, notify)?;
        if mode != 0 {
            self.combined_op(port, combined::RESET, COMBINED_RESET)?;
            self.format_setup(port, mode, delta, notify)?;
        }
        Ok(())
    }

    /// Configure a combined mode from `(mode, dataset)` entries.
    ///
    /// Reset, lock, one format setup per entry, set the combination, then
    /// unlock and start updates. A failure after the initial reset is followed
    /// by a best-effort reset whose own outcome is not reported.
    pub fn set_combi_mode(
        &self,
        port: u8,
        combination_index: u8,
        entries: &[(u8, u8)],
        delta: u32,
        notify: bool,
    ) -> Result<()> {
        if entries.is_empty() || entries.len() > 16 {
            return Err(DriverError::InvalidArgument(format!(
                "combination needs 1..=16 entries, got {}",
                entries.len()
            )));
        }

        let _guard = self.exclusive();
        self.combined_op(port, combined::RESET, COMBINED_RESET)?;

        let result = self.combi_after_reset(port, combination_index, entries, delta, notify);
        if let Err(err) = &result {
            warn!(port, error = %err, "combined mode setup failed, resetting");
            self.emergency_reset(port);
        }
        result
    }

    fn combi_after_reset(
        &self,
        port: u8,
        combination_index: u8,
        entries: &[(u8, u8)],
        delta: u32,
        notify: bool,
    ) -> Result<()> {
        self.combined_op(port, combined::LOCK, COMBINED_LOCK)?;

        self.clear_stale()?;
        for &(mode, _) in entries {
            self.send(request::format_setup_single(port, mode, delta, notify))?;
        }
        for &(mode, _) in entries {
            self.await_reply(
                message::PORT_FORMAT_SETUP_SINGLE,
                &format_setup_expect(&[(0, port), (1, mode)]),
                self.config.reply_timeout,
            )?;
        }

        self.send(request::set_combination(port, combination_index, entries)?)?;

        let reply = self.combined_op(
            port,
            combined::UNLOCK_AND_START_MULTI_UPDATE,
            COMBINED_UNLOCK,
        )?;
        let p = reply.payload();
        let bitmap = u16::from_le_bytes([p[2], p[3]]);
        let expected = ((1u32 << entries.len()) - 1) as u16;
        if bitmap != expected {
            return Err(DriverError::protocol(format!(
                "Unexpected reply to {COMBINED_UNLOCK}"
            )));
        }
        Ok(())
    }

    /// Send a combined reset and wait briefly for its reply, ignoring the result.
    fn emergency_reset(&self, port: u8) {
        if let Err(err) = self.send(request::combined_reset(port)) {
            warn!(port, error = %err, "emergency reset not sent");
            return;
        }
        if let Err(err) = self.await_reply(
            message::PORT_FORMAT_SETUP_COMBINED,
            &combined_expect(&[(0, port)], COMBINED_RESET),
            self.config.reply_timeout,
        ) {
            debug!(port, error = %err, "emergency reset unconfirmed");
        }
    }

    /// Connect two physical ports as a virtual pair. Fire-and-forget.
    pub fn connect_virtual_port(&self, primary: u8, secondary: u8) -> Result<()> {
        self.send(request::virtual_connect(primary, secondary))
    }

    /// Dissolve a virtual pair. Fire-and-forget.
    pub fn disconnect_virtual_port(&self, pair: u8) -> Result<()> {
        self.send(request::virtual_disconnect(pair))
    }

    pub fn enable_alert(&self, alert_id: u8) -> Result<()> {
        self.send(request::hub_alert(alert_id, alert::OP_ENABLE))
    }

    pub fn disable_alert(&self, alert_id: u8) -> Result<()> {
        self.send(request::hub_alert(alert_id, alert::OP_DISABLE))
    }

    pub fn vcc_on(&self) -> Result<()> {
        self.send(request::hub_action(message::action::VCC_ON))
    }

    pub fn vcc_off(&self) -> Result<()> {
        self.send(request::hub_action(message::action::VCC_OFF))
    }

    pub fn reset_hub(&self) -> Result<()> {
        self.send(request::hub_reset())
    }
}

/// Shortest PORT_VALUE reply: the line transport's marker carries only the port.
fn value_reply_min(message_type: u8) -> usize {
    if message_type == message::PORT_VALUE_COMBINED {
        6
    } else {
        4
    }
}

fn format_setup_expect(echo: &[(usize, u8)]) -> Expect<'_> {
    Expect {
        reply_type: message::PORT_FORMAT_SINGLE,
        length: Length::Exact(10),
        echo,
        context: FORMAT_SETUP,
        accept_feedback: false,
    }
}

fn combined_expect<'a>(echo: &'a [(usize, u8)], context: &'static str) -> Expect<'a> {
    Expect {
        reply_type: message::PORT_FORMAT_COMBINED,
        length: Length::AtLeast(7),
        echo,
        context,
        accept_feedback: false,
    }
}
