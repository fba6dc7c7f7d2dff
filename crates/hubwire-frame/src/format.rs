use serde::{Deserialize, Serialize};

use crate::error::{FrameError, Result};

/// Storage type of each dataset in a mode's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    I8,
    I16,
    I32,
    F32,
}

impl ValueKind {
    /// Map the wire type code (0..=3) to a kind.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::I8),
            1 => Some(Self::I16),
            2 => Some(Self::I32),
            3 => Some(Self::F32),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::I8 => 0,
            Self::I16 => 1,
            Self::I32 => 2,
            Self::F32 => 3,
        }
    }

    /// Bytes one dataset of this kind occupies.
    pub fn width(self) -> usize {
        match self {
            Self::I8 => 1,
            Self::I16 => 2,
            Self::I32 | Self::F32 => 4,
        }
    }
}

/// Value format reported for a port mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueFormat {
    /// Number of datasets in one value.
    pub datasets: u8,
    pub kind: ValueKind,
    /// Display figures.
    pub figures: u8,
    /// Display decimals.
    pub decimals: u8,
}

impl ValueFormat {
    /// Bytes one complete value occupies on the wire.
    pub fn value_len(&self) -> usize {
        self.datasets as usize * self.kind.width()
    }

    /// Format with a single dataset of `kind`.
    pub fn single(kind: ValueKind) -> Self {
        Self {
            datasets: 1,
            kind,
            figures: 0,
            decimals: 0,
        }
    }
}

/// One decoded dataset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(i32),
    Float(f32),
}

impl Value {
    /// Parse a console token: a `.` means float, otherwise decimal integer.
    pub fn parse_token(token: &str) -> Option<Self> {
        if token.contains('.') {
            token.parse::<f32>().ok().map(Value::Float)
        } else {
            token.parse::<i32>().ok().map(Value::Int)
        }
    }
}

/// Decode one value of `format` from the front of `buf`.
///
/// Returns the datasets and the number of bytes consumed. Running out of
/// bytes is an error: a multi-entry frame never pads.
pub fn decode_value(format: &ValueFormat, buf: &[u8]) -> Result<(Vec<Value>, usize)> {
    let needed = format.value_len();
    if buf.len() < needed {
        return Err(FrameError::Truncated {
            expected: needed,
            actual: buf.len(),
        });
    }

    let width = format.kind.width();
    let values = buf[..needed]
        .chunks_exact(width)
        .map(|chunk| match format.kind {
            ValueKind::I8 => Value::Int(chunk[0] as i8 as i32),
            ValueKind::I16 => Value::Int(i16::from_le_bytes([chunk[0], chunk[1]]) as i32),
            ValueKind::I32 => {
                Value::Int(i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            }
            ValueKind::F32 => {
                Value::Float(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            }
        })
        .collect();

    Ok((values, needed))
}
