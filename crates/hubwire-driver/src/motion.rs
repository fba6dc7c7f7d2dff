//! Motor commands for single ports and virtual pairs.
//!
//! Every command here is a port output request with "execute immediately,
//! send feedback" set. The first feedback for the port is the acknowledgement;
//! with [`Completion::Wait`] the call then blocks in
//! [`Commands::wait_for_complete_feedback`] until the motion ends.

use std::time::Instant;

use bytes::{BufMut, BytesMut};
use hubwire_frame::message::{self, output};
use hubwire_frame::{request, Frame};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::command::{check_hub_id, generic_error, Commands};
use crate::error::{DriverError, Result};
use crate::replies::Feedback;

/// When a motion call returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Completion {
    /// After the hub acknowledges the command.
    #[default]
    Acknowledge,
    /// After the motion completes, stalls or is discarded.
    Wait,
}

/// What the motor does once a bounded motion ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum EndState {
    Float = 0,
    Hold = 126,
    #[default]
    Brake = 127,
}

/// Power limit, end state and ramp profile shared by speed commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotionProfile {
    /// 0..=100 percent.
    pub max_power: u8,
    pub end_state: EndState,
    /// Bit 0 uses the acceleration profile, bit 1 the deceleration profile.
    pub use_profile: u8,
}

impl Default for MotionProfile {
    fn default() -> Self {
        Self {
            max_power: 100,
            end_state: EndState::Brake,
            use_profile: 0,
        }
    }
}

impl MotionProfile {
    fn put_tail(&self, args: &mut BytesMut) {
        args.put_u8(self.max_power);
        args.put_u8(self.end_state as u8);
        args.put_u8(self.use_profile);
    }
}

/// Status byte for `port` in an output feedback frame, if present.
pub(crate) fn feedback_status(frame: &Frame, port: u8) -> Option<u8> {
    frame
        .payload()
        .chunks_exact(2)
        .find(|pair| pair[0] == port)
        .map(|pair| pair[1])
}

fn check_power(power: i8) -> Result<i8> {
    if (-100..=100).contains(&power) || power == output::POWER_BRAKE {
        Ok(power)
    } else {
        Err(DriverError::InvalidArgument(format!(
            "power {power} outside -100..=100"
        )))
    }
}

fn check_speed(speed: i8) -> Result<i8> {
    if (-100..=100).contains(&speed) {
        Ok(speed)
    } else {
        Err(DriverError::InvalidArgument(format!(
            "speed {speed} outside -100..=100"
        )))
    }
}

impl Commands {
    /// Send a port output frame, wait for its acknowledgement and, for
    /// [`Completion::Wait`], for the end of the motion.
    pub(crate) fn output_command(
        &self,
        port: u8,
        frame: Frame,
        completion: Completion,
    ) -> Result<()> {
        let _guard = self.exclusive();
        self.clear_stale()?;
        self.send(frame)?;

        let status = self.await_ack(port)?;
        if Feedback::classify(status) == Some(Feedback::Stalled) {
            return Err(DriverError::MotorStalled { port });
        }
        match completion {
            Completion::Acknowledge => Ok(()),
            Completion::Wait => match Feedback::classify(status) {
                Some(Feedback::Discarded) => Err(DriverError::PortBusy { port }),
                Some(Feedback::Completed) if status & message::feedback::BUSY == 0 => Ok(()),
                _ => self.wait_for_complete_feedback(port),
            },
        }
    }

    fn await_ack(&self, port: u8) -> Result<u8> {
        loop {
            let frame = self.pop_reply(self.config.reply_timeout)?;
            check_hub_id(&frame)?;
            match frame.message_type() {
                message::GENERIC_ERROR => return Err(generic_error(message::PORT_OUTPUT, &frame)),
                message::PORT_OUTPUT_FEEDBACK => {
                    if let Some(status) = feedback_status(&frame, port) {
                        return Ok(status);
                    }
                }
                _ => {
                    return Err(DriverError::protocol(
                        "Unexpected reply to Port Output Command",
                    ))
                }
            }
        }
    }

    /// Block until feedback for `port` reports completion, a stall or a
    /// discard.
    ///
    /// Unrelated frames and per-pop timeouts do not end the wait. Only the
    /// configured `feedback_deadline`, shutdown, or a generic error does.
    pub fn wait_for_complete_feedback(&self, port: u8) -> Result<()> {
        let deadline = self
            .config
            .feedback_deadline
            .map(|limit| (Instant::now() + limit, limit));

        loop {
            let wait = match deadline {
                Some((at, limit)) => {
                    let now = Instant::now();
                    if now >= at {
                        return Err(DriverError::Timeout(limit));
                    }
                    (at - now).min(self.config.reply_timeout)
                }
                None => self.config.reply_timeout,
            };

            let frame = match self.pop_reply(wait) {
                Ok(frame) => frame,
                Err(DriverError::Timeout(_)) => continue,
                Err(err) => return Err(err),
            };
            check_hub_id(&frame)?;

            match frame.message_type() {
                message::GENERIC_ERROR => return Err(generic_error(message::PORT_OUTPUT, &frame)),
                message::PORT_OUTPUT_FEEDBACK => {
                    let Some(status) = feedback_status(&frame, port) else {
                        continue;
                    };
                    match Feedback::classify(status) {
                        Some(Feedback::Stalled) => return Err(DriverError::MotorStalled { port }),
                        Some(Feedback::Discarded) => return Err(DriverError::PortBusy { port }),
                        Some(Feedback::Completed) => return Ok(()),
                        Some(Feedback::Busy) | None => {}
                    }
                }
                other => debug!(
                    port,
                    kind = message::message_name(other),
                    "ignoring frame while waiting for feedback"
                ),
            }
        }
    }

    fn output(&self, port: u8, sub_command: u8, args: &[u8], completion: Completion) -> Result<()> {
        let frame = request::port_output(port, sub_command, args)?;
        self.output_command(port, frame, completion)
    }

    /// Set motor power in percent; 0 floats, 127 brakes.
    pub fn set_pwm(&self, port: u8, power: i8) -> Result<()> {
        let power = check_power(power)?;
        self.output_command(port, request::set_power(port, power), Completion::Acknowledge)
    }

    /// Set power on both motors of a virtual pair.
    pub fn set_pwm_dual(&self, pair: u8, left: i8, right: i8) -> Result<()> {
        let args = [check_power(left)? as u8, check_power(right)? as u8];
        self.output(pair, output::START_POWER_DUAL, &args, Completion::Acknowledge)
    }

    pub fn float(&self, port: u8) -> Result<()> {
        self.set_pwm(port, output::POWER_FLOAT)
    }

    pub fn brake(&self, port: u8) -> Result<()> {
        self.set_pwm(port, output::POWER_BRAKE)
    }

    pub fn start_speed(&self, port: u8, speed: i8, max_power: u8, use_profile: u8) -> Result<()> {
        let args = [check_speed(speed)? as u8, max_power, use_profile];
        self.output(port, output::START_SPEED, &args, Completion::Acknowledge)
    }

    pub fn start_speed_dual(
        &self,
        pair: u8,
        left: i8,
        right: i8,
        max_power: u8,
        use_profile: u8,
    ) -> Result<()> {
        let args = [
            check_speed(left)? as u8,
            check_speed(right)? as u8,
            max_power,
            use_profile,
        ];
        self.output(pair, output::START_SPEED_DUAL, &args, Completion::Acknowledge)
    }

    /// Run at `speed` for `time_ms` milliseconds.
    pub fn speed_for_time(
        &self,
        port: u8,
        time_ms: u16,
        speed: i8,
        profile: MotionProfile,
        completion: Completion,
    ) -> Result<()> {
        let mut args = BytesMut::with_capacity(6);
        args.put_u16_le(time_ms);
        args.put_i8(check_speed(speed)?);
        profile.put_tail(&mut args);
        self.output(port, output::START_SPEED_FOR_TIME, &args, completion)
    }

    pub fn speed_for_time_dual(
        &self,
        pair: u8,
        time_ms: u16,
        left: i8,
        right: i8,
        profile: MotionProfile,
        completion: Completion,
    ) -> Result<()> {
        let mut args = BytesMut::with_capacity(7);
        args.put_u16_le(time_ms);
        args.put_i8(check_speed(left)?);
        args.put_i8(check_speed(right)?);
        profile.put_tail(&mut args);
        self.output(pair, output::START_SPEED_FOR_TIME_DUAL, &args, completion)
    }

    /// Turn `degrees` at `speed`; the sign of `speed` sets the direction.
    pub fn speed_for_degrees(
        &self,
        port: u8,
        degrees: i32,
        speed: i8,
        profile: MotionProfile,
        completion: Completion,
    ) -> Result<()> {
        let mut args = BytesMut::with_capacity(8);
        args.put_i32_le(degrees);
        args.put_i8(check_speed(speed)?);
        profile.put_tail(&mut args);
        self.output(port, output::START_SPEED_FOR_DEGREES, &args, completion)
    }

    pub fn speed_for_degrees_dual(
        &self,
        pair: u8,
        degrees: i32,
        left: i8,
        right: i8,
        profile: MotionProfile,
        completion: Completion,
    ) -> Result<()> {
        let mut args = BytesMut::with_capacity(9);
        args.put_i32_le(degrees);
        args.put_i8(check_speed(left)?);
        args.put_i8(check_speed(right)?);
        profile.put_tail(&mut args);
        self.output(pair, output::START_SPEED_FOR_DEGREES_DUAL, &args, completion)
    }

    pub fn goto_position(
        &self,
        port: u8,
        position: i32,
        speed: i8,
        profile: MotionProfile,
        completion: Completion,
    ) -> Result<()> {
        let mut args = BytesMut::with_capacity(8);
        args.put_i32_le(position);
        args.put_i8(check_speed(speed)?);
        profile.put_tail(&mut args);
        self.output(port, output::GOTO_ABSOLUTE_POSITION, &args, completion)
    }

    pub fn goto_position_dual(
        &self,
        pair: u8,
        left: i32,
        right: i32,
        speed: i8,
        profile: MotionProfile,
        completion: Completion,
    ) -> Result<()> {
        let mut args = BytesMut::with_capacity(12);
        args.put_i32_le(left);
        args.put_i32_le(right);
        args.put_i8(check_speed(speed)?);
        profile.put_tail(&mut args);
        self.output(pair, output::GOTO_ABSOLUTE_POSITION_DUAL, &args, completion)
    }

    /// Redefine the encoder's current position.
    pub fn preset_encoder(&self, port: u8, position: i32) -> Result<()> {
        self.write_direct_mode_data(port, output::MODE_PRESET_ENCODER, &position.to_le_bytes())
    }

    pub fn preset_encoder_dual(&self, pair: u8, left: i32, right: i32) -> Result<()> {
        let mut args = BytesMut::with_capacity(8);
        args.put_i32_le(left);
        args.put_i32_le(right);
        self.output(pair, output::PRESET_ENCODER_DUAL, &args, Completion::Acknowledge)
    }

    /// Acceleration ramp time for profile slot `profile`.
    pub fn set_acceleration_time(&self, port: u8, time_ms: u16, profile: u8) -> Result<()> {
        let mut args = BytesMut::with_capacity(3);
        args.put_u16_le(time_ms);
        args.put_u8(profile);
        self.output(port, output::SET_ACC_TIME, &args, Completion::Acknowledge)
    }

    pub fn set_deceleration_time(&self, port: u8, time_ms: u16, profile: u8) -> Result<()> {
        let mut args = BytesMut::with_capacity(3);
        args.put_u16_le(time_ms);
        args.put_u8(profile);
        self.output(port, output::SET_DEC_TIME, &args, Completion::Acknowledge)
    }

    pub fn write_direct_mode_data(&self, port: u8, mode: u8, data: &[u8]) -> Result<()> {
        let frame = request::write_direct_mode_data(port, mode, data)?;
        self.output_command(port, frame, Completion::Acknowledge)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_lookup_by_port() {
        let frame = Frame::new(message::PORT_OUTPUT_FEEDBACK, &[0, 0x01, 2, 0x0A]).unwrap();
        assert_eq!(feedback_status(&frame, 2), Some(0x0A));
        assert_eq!(feedback_status(&frame, 0), Some(0x01));
        assert_eq!(feedback_status(&frame, 1), None);
    }

    #[test]
    fn profile_tail_layout() {
        let mut args = BytesMut::new();
        MotionProfile {
            max_power: 80,
            end_state: EndState::Hold,
            use_profile: 3,
        }
        .put_tail(&mut args);
        assert_eq!(&args[..], &[80, 126, 3]);
    }

    #[test]
    fn power_and_speed_ranges() {
        assert!(check_power(127).is_ok());
        assert!(check_power(-100).is_ok());
        assert!(check_power(101).is_err());
        assert!(check_speed(127).is_err());
        assert!(check_speed(-100).is_ok());
    }
}
