//! Frame codec for the Hub wire protocol.
//!
//! Every message on the binary transport is framed as:
//! - A length prefix counting the whole frame, one byte below 0x80 and two
//!   bytes (low seven bits first, continuation bit set) from 0x80 upwards
//! - A hub id byte, always 0
//! - A message type byte
//! - The type-specific payload
//!
//! A lone zero length byte is a keepalive and carries nothing.
//!
//! [`request`] builds every frame the host sends; [`format`] decodes the
//! values ports report.

pub mod codec;
pub mod error;
pub mod format;
pub mod message;
pub mod reader;
pub mod request;
pub mod writer;

pub use codec::{
    decode_frame, decode_length, encode_frame, encode_length, hex, Decoded, Frame, LengthPrefix,
    HUB_ID, MAX_FRAME_LEN, MIN_FRAME_LEN,
};
pub use error::{FrameError, Result};
pub use format::{decode_value, Value, ValueFormat, ValueKind};
pub use message::message_name;
pub use reader::{FrameConfig, FrameReader};
pub use writer::FrameWriter;
