//! Decoders for reply payloads.
//!
//! Callers validate type, length and echoed ids first; these functions only
//! lay the already-checked payload bytes out as values. Offsets are relative
//! to the payload (the byte after the message type).

use hubwire_frame::message::feedback;
use hubwire_frame::{ValueFormat, ValueKind};
use serde::Serialize;

use crate::error::{DriverError, Result};

fn bcd(byte: u8) -> u32 {
    ((byte >> 4) as u32) * 10 + (byte & 0x0f) as u32
}

fn bcd2(hi: u8, lo: u8) -> u32 {
    bcd(hi) * 100 + bcd(lo)
}

/// Render a hub property version (`v0..v3`, little-endian) as `a.b.cc.dddd`.
pub fn version_string(v: [u8; 4]) -> String {
    format!(
        "{}.{}.{}.{}",
        (v[3] >> 4) & 7,
        v[3] & 0x0f,
        bcd(v[2]),
        bcd2(v[1], v[0])
    )
}

/// Port mode summary from a MODE port-info reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PortModes {
    pub capabilities: u8,
    pub count: u8,
    pub input_mask: u16,
    pub output_mask: u16,
}

impl PortModes {
    pub(crate) fn from_payload(p: &[u8]) -> Self {
        Self {
            capabilities: p[2],
            count: p[3],
            input_mask: u16::from_le_bytes([p[4], p[5]]),
            output_mask: u16::from_le_bytes([p[6], p[7]]),
        }
    }
}

/// Mode masks from a MODE_COMBINATIONS port-info reply.
pub(crate) fn combination_masks(p: &[u8]) -> Vec<u16> {
    p[2..]
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// NUL-terminated text field of a mode info reply.
pub(crate) fn mode_text(p: &[u8]) -> String {
    let raw = &p[3..];
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// Minimum and maximum of a RAW, PCT or SI range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Range {
    pub min: f32,
    pub max: f32,
}

impl Range {
    pub(crate) fn from_payload(p: &[u8]) -> Self {
        Self {
            min: f32::from_le_bytes([p[3], p[4], p[5], p[6]]),
            max: f32::from_le_bytes([p[7], p[8], p[9], p[10]]),
        }
    }
}

/// Input and output mapping flags of a mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Mapping {
    pub input: u8,
    pub output: u8,
}

pub(crate) fn capability_bytes(p: &[u8]) -> [u8; 6] {
    [p[3], p[4], p[5], p[6], p[7], p[8]]
}

pub(crate) fn value_format(p: &[u8]) -> Result<ValueFormat> {
    let kind = ValueKind::from_code(p[4])
        .ok_or_else(|| DriverError::protocol(format!("Bad value format type {}", p[4])))?;
    Ok(ValueFormat {
        datasets: p[3],
        kind,
        figures: p[5],
        decimals: p[6],
    })
}

/// Outcome carried by an output feedback status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Feedback {
    Stalled,
    Discarded,
    Completed,
    Busy,
}

impl Feedback {
    /// Classify a status byte. Stall beats discard beats completion beats busy.
    pub fn classify(status: u8) -> Option<Self> {
        if status & feedback::STALLED != 0 {
            Some(Self::Stalled)
        } else if status & feedback::DISCARDED != 0 {
            Some(Self::Discarded)
        } else if status & feedback::COMPLETED != 0 {
            Some(Self::Completed)
        } else if status & feedback::BUSY != 0 {
            Some(Self::Busy)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_from_property_bytes() {
        assert_eq!(version_string([0x34, 0x12, 0x07, 0x21]), "2.1.7.1234");
        assert_eq!(version_string([0x00, 0x00, 0x15, 0x9f]), "1.15.15.0");
    }

    #[test]
    fn discard_beats_completion() {
        assert_eq!(Feedback::classify(0x22), Some(Feedback::Stalled));
        assert_eq!(Feedback::classify(0x06), Some(Feedback::Discarded));
        assert_eq!(Feedback::classify(0x0A), Some(Feedback::Completed));
        assert_eq!(Feedback::classify(0x01), Some(Feedback::Busy));
        assert_eq!(Feedback::classify(0x08), None);
    }

    #[test]
    fn port_modes_layout() {
        let modes = PortModes::from_payload(&[1, 1, 0x0F, 6, 0x3F, 0x00, 0x01, 0x00]);
        assert_eq!(modes.count, 6);
        assert_eq!(modes.input_mask, 0x003F);
        assert_eq!(modes.output_mask, 0x0001);
    }

    #[test]
    fn mode_name_stops_at_nul() {
        assert_eq!(mode_text(&[0, 1, 0, b'P', b'O', b'S', 0, 0]), "POS");
        assert_eq!(mode_text(&[0, 1, 0, b'S', b'P', b'E', b'E', b'D']), "SPEED");
    }

    #[test]
    fn range_is_two_floats() {
        let mut p = vec![0, 0, 1];
        p.extend(0.0f32.to_le_bytes());
        p.extend(100.0f32.to_le_bytes());
        assert_eq!(
            Range::from_payload(&p),
            Range {
                min: 0.0,
                max: 100.0
            }
        );
    }

    #[test]
    fn unknown_value_type_is_protocol_error() {
        let err = value_format(&[0, 0, 0x80, 1, 9, 4, 0]).unwrap_err();
        assert!(matches!(err, DriverError::Protocol(_)));
    }
}
