//! Builders for every request the host sends.
//!
//! Pure functions: they only lay out bytes. Correlating replies is the
//! driver's job.

use bytes::{BufMut, BytesMut};

use crate::codec::Frame;
use crate::error::Result;
use crate::message::{
    self, action, alert, combined, firmware, output, port_info, property, virtual_port,
};

/// Hub property request, e.g. [`property::HW_VERSION`].
pub fn hub_property(property_id: u8) -> Frame {
    Frame::short(message::HUB_PROPERTY, &[property_id, property::OP_REQUEST])
}

/// Hub action, e.g. [`action::VCC_ON`].
pub fn hub_action(action_code: u8) -> Frame {
    Frame::short(message::HUB_ACTION, &[action_code])
}

/// Hub reset action.
pub fn hub_reset() -> Frame {
    hub_action(action::RESET)
}

/// Hub alert operation on one alert id.
pub fn hub_alert(alert_id: u8, op: u8) -> Frame {
    Frame::short(message::HUB_ALERT, &[alert_id, op])
}

/// Ask for an immediate alert update.
pub fn alert_request(alert_id: u8) -> Frame {
    hub_alert(alert_id, alert::OP_REQUEST)
}

/// Port information request.
pub fn port_info(port: u8, info: u8) -> Frame {
    Frame::short(message::PORT_INFO_REQUEST, &[port, info])
}

/// Ask a port for its current value.
pub fn port_value(port: u8) -> Frame {
    port_info(port, port_info::VALUE)
}

/// Port mode information request.
pub fn port_mode(port: u8, mode: u8, info: u8) -> Frame {
    Frame::short(message::PORT_MODE_REQUEST, &[port, mode, info])
}

/// Single-mode format setup: select `mode` with a change delta.
pub fn format_setup_single(port: u8, mode: u8, delta: u32, notify: bool) -> Frame {
    let delta = delta.to_le_bytes();
    Frame::short(
        message::PORT_FORMAT_SETUP_SINGLE,
        &[
            port,
            mode,
            delta[0],
            delta[1],
            delta[2],
            delta[3],
            u8::from(notify),
        ],
    )
}

/// Combined-format sub-command without arguments (lock, unlock, reset).
pub fn format_setup_combined(port: u8, sub_command: u8) -> Frame {
    Frame::short(message::PORT_FORMAT_SETUP_COMBINED, &[port, sub_command])
}

/// Combined-format reset.
pub fn combined_reset(port: u8) -> Frame {
    format_setup_combined(port, combined::RESET)
}

/// Combined-format set-combination: `(mode, dataset)` entries packed as nibbles.
pub fn set_combination(port: u8, combination_index: u8, entries: &[(u8, u8)]) -> Result<Frame> {
    let mut payload = Vec::with_capacity(3 + entries.len());
    payload.push(port);
    payload.push(combined::SET_COMBINATION);
    payload.push(combination_index);
    payload.extend(
        entries
            .iter()
            .map(|&(mode, dataset)| ((mode & 0x0f) << 4) | (dataset & 0x0f)),
    );
    Frame::new(message::PORT_FORMAT_SETUP_COMBINED, &payload)
}

/// Port output command with the execute-immediately/feedback startup byte.
pub fn port_output(port: u8, sub_command: u8, args: &[u8]) -> Result<Frame> {
    let mut payload = BytesMut::with_capacity(3 + args.len());
    payload.put_u8(port);
    payload.put_u8(output::STARTUP_AND_FEEDBACK);
    payload.put_u8(sub_command);
    payload.put_slice(args);
    Frame::new(message::PORT_OUTPUT, &payload)
}

/// WriteDirectModeData carrying raw mode bytes.
pub fn write_direct_mode_data(port: u8, mode: u8, data: &[u8]) -> Result<Frame> {
    let mut args = Vec::with_capacity(1 + data.len());
    args.push(mode);
    args.extend_from_slice(data);
    port_output(port, output::WRITE_DIRECT_MODE_DATA, &args)
}

/// Direct motor power: -100..=100, or the float/brake sentinels.
pub fn set_power(port: u8, power: i8) -> Frame {
    Frame::short(
        message::PORT_OUTPUT,
        &[
            port,
            output::STARTUP_AND_FEEDBACK,
            output::WRITE_DIRECT_MODE_DATA,
            output::MODE_POWER,
            power as u8,
        ],
    )
}

/// Connect two physical ports as a virtual pair.
pub fn virtual_connect(primary: u8, secondary: u8) -> Frame {
    Frame::short(
        message::VIRTUAL_PORT_SETUP,
        &[virtual_port::CONNECT, primary, secondary],
    )
}

/// Dissolve a virtual pair.
pub fn virtual_disconnect(pair_id: u8) -> Frame {
    Frame::short(
        message::VIRTUAL_PORT_SETUP,
        &[virtual_port::DISCONNECT, pair_id],
    )
}

/// Firmware maintenance request.
pub fn firmware(op: u8, args: &[u8]) -> Result<Frame> {
    let mut payload = Vec::with_capacity(1 + args.len());
    payload.push(op);
    payload.extend_from_slice(args);
    Frame::new(message::FIRMWARE_REQUEST, &payload)
}

/// Start a firmware upload of `image_len` bytes (erases flash).
pub fn firmware_initialize(image_len: u32) -> Frame {
    let len = image_len.to_le_bytes();
    Frame::short(
        message::FIRMWARE_REQUEST,
        &[firmware::INITIALIZE, len[0], len[1], len[2], len[3]],
    )
}
