use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Smallest legal frame: length byte, hub id, message type.
pub const MIN_FRAME_LEN: usize = 3;

/// Largest total length a 15-bit prefix can carry.
pub const MAX_FRAME_LEN: usize = 0x7FFF;

/// Totals at or above this need the two-byte prefix.
pub const LONG_FORM_THRESHOLD: usize = 0x80;

/// The only hub id the host ever talks to.
pub const HUB_ID: u8 = 0;

/// What a length prefix announced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthPrefix {
    /// A zero length byte: the hub had nothing to say.
    Keepalive,
    /// A real frame of `total` bytes, of which `prefix` are length bytes.
    Frame { total: usize, prefix: usize },
}

/// Number of prefix bytes needed for a frame of `total` bytes.
pub fn prefix_len(total: usize) -> usize {
    if total < LONG_FORM_THRESHOLD {
        1
    } else {
        2
    }
}

/// Encode a total frame length.
///
/// ```text
/// total <  0x80:  [total]
/// total >= 0x80:  [(total & 0x7f) | 0x80, total >> 7]
/// ```
pub fn encode_length(total: usize, dst: &mut BytesMut) -> Result<()> {
    if total > MAX_FRAME_LEN {
        return Err(FrameError::FrameTooLarge {
            len: total,
            max: MAX_FRAME_LEN,
        });
    }
    if total < LONG_FORM_THRESHOLD {
        dst.put_u8(total as u8);
    } else {
        dst.put_u8((total & 0x7f) as u8 | 0x80);
        dst.put_u8((total >> 7) as u8);
    }
    Ok(())
}

/// Decode a length prefix from the start of `src`.
///
/// Returns `Ok(None)` when the second byte of a long prefix has not arrived yet.
pub fn decode_length(src: &[u8]) -> Result<Option<LengthPrefix>> {
    let Some(&first) = src.first() else {
        return Ok(None);
    };
    if first == 0 {
        return Ok(Some(LengthPrefix::Keepalive));
    }

    let (total, prefix) = if first & 0x80 == 0 {
        (first as usize, 1)
    } else {
        let Some(&second) = src.get(1) else {
            return Ok(None);
        };
        (((first & 0x7f) as usize) | ((second as usize) << 7), 2)
    };

    if total < prefix + 2 {
        return Err(FrameError::InvalidLength {
            len: total,
            min: prefix + 2,
        });
    }

    Ok(Some(LengthPrefix::Frame { total, prefix }))
}

/// Total wire length of a frame carrying `payload_len` payload bytes.
pub fn frame_len_for_payload(payload_len: usize) -> Result<usize> {
    let short = MIN_FRAME_LEN + payload_len;
    let total = if short < LONG_FORM_THRESHOLD {
        short
    } else {
        short + 1
    };
    if total > MAX_FRAME_LEN {
        return Err(FrameError::FrameTooLarge {
            len: total,
            max: MAX_FRAME_LEN,
        });
    }
    Ok(total)
}

/// One complete protocol message, held exactly as it travels on the wire.
///
/// The frame owns its bytes; handing it to a queue moves it.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    wire: Bytes,
    prefix: usize,
}

impl Frame {
    /// Build a frame addressed to hub 0.
    pub fn new(message_type: u8, payload: &[u8]) -> Result<Self> {
        let mut dst = BytesMut::new();
        encode_frame(message_type, payload, &mut dst)?;
        let prefix = prefix_len(dst.len());
        Ok(Self {
            wire: dst.freeze(),
            prefix,
        })
    }

    /// Build a frame known to fit the one-byte prefix.
    pub(crate) fn short(message_type: u8, payload: &[u8]) -> Self {
        debug_assert!(MIN_FRAME_LEN + payload.len() < LONG_FORM_THRESHOLD);
        let mut dst = BytesMut::with_capacity(MIN_FRAME_LEN + payload.len());
        dst.put_u8((MIN_FRAME_LEN + payload.len()) as u8);
        dst.put_u8(HUB_ID);
        dst.put_u8(message_type);
        dst.put_slice(payload);
        Self {
            wire: dst.freeze(),
            prefix: 1,
        }
    }

    /// Adopt bytes that already hold one complete frame.
    ///
    /// The length prefix must match the number of bytes supplied.
    pub fn from_wire(wire: impl Into<Bytes>) -> Result<Self> {
        let wire = wire.into();
        match decode_length(&wire)? {
            None => Err(FrameError::Truncated {
                expected: 2,
                actual: wire.len(),
            }),
            Some(LengthPrefix::Keepalive) => Err(FrameError::InvalidLength {
                len: 0,
                min: MIN_FRAME_LEN,
            }),
            Some(LengthPrefix::Frame { total, prefix }) => {
                if wire.len() != total {
                    return Err(FrameError::Truncated {
                        expected: total,
                        actual: wire.len(),
                    });
                }
                Ok(Self { wire, prefix })
            }
        }
    }

    /// Hub id byte. Anything other than [`HUB_ID`] is a protocol violation.
    pub fn hub_id(&self) -> u8 {
        self.wire[self.prefix]
    }

    /// Message type byte.
    pub fn message_type(&self) -> u8 {
        self.wire[self.prefix + 1]
    }

    /// Type-specific bytes after the message type.
    pub fn payload(&self) -> &[u8] {
        &self.wire[self.prefix + 2..]
    }

    /// Payload byte at `index`, if present.
    pub fn payload_byte(&self, index: usize) -> Option<u8> {
        self.payload().get(index).copied()
    }

    /// Total wire length, prefix included.
    pub fn len(&self) -> usize {
        self.wire.len()
    }

    /// Always false: a frame carries at least its header.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Whether the frame uses the one-byte length prefix.
    pub fn is_short(&self) -> bool {
        self.prefix == 1
    }

    /// The frame exactly as written to the wire.
    pub fn as_bytes(&self) -> &[u8] {
        &self.wire
    }

    /// Give up the frame and keep its wire bytes.
    pub fn into_bytes(self) -> Bytes {
        self.wire
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("type", &format_args!("{:#04x}", self.message_type()))
            .field("len", &self.len())
            .field("wire", &format_args!("{}", hex(&self.wire)))
            .finish()
    }
}

/// Render bytes as space-separated hex, for logs.
pub fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Result of pulling one unit off a byte buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A zero length byte; consumed, nothing to route.
    Keepalive,
    /// A complete frame.
    Frame(Frame),
}

/// Encode a message into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────┬──────────┬──────────┬──────────────────┐
/// │ Length       │ Hub id   │ Type     │ Payload          │
/// │ (1B or 2B)   │ (1B, 0)  │ (1B)     │ (Length - hdr)   │
/// └──────────────┴──────────┴──────────┴──────────────────┘
/// ```
/// The length counts every byte of the frame, its own bytes included.
pub fn encode_frame(message_type: u8, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    let total = frame_len_for_payload(payload.len())?;
    dst.reserve(total);
    encode_length(total, dst)?;
    dst.put_u8(HUB_ID);
    dst.put_u8(message_type);
    dst.put_slice(payload);
    Ok(())
}

/// Decode one frame (or keepalive) from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the decoded bytes from the buffer.
pub fn decode_frame(src: &mut BytesMut) -> Result<Option<Decoded>> {
    let (total, prefix) = match decode_length(src)? {
        None => return Ok(None),
        Some(LengthPrefix::Keepalive) => {
            src.advance(1);
            return Ok(Some(Decoded::Keepalive));
        }
        Some(LengthPrefix::Frame { total, prefix }) => (total, prefix),
    };

    if src.len() < total {
        return Ok(None);
    }

    let wire = src.split_to(total).freeze();
    Ok(Some(Decoded::Frame(Frame { wire, prefix })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn length_bytes(total: usize) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode_length(total, &mut buf).unwrap();
        buf.to_vec()
    }

    #[test]
    fn test_length_prefix_boundaries() {
        assert_eq!(length_bytes(0x7F), vec![0x7F]);
        assert_eq!(length_bytes(0x80), vec![0x80, 0x01]);
        assert_eq!(length_bytes(200), vec![0xC8, 0x01]);
    }

    #[test]
    fn test_length_prefix_too_large() {
        let mut buf = BytesMut::new();
        let err = encode_length(MAX_FRAME_LEN + 1, &mut buf).unwrap_err();
        assert!(matches!(err, FrameError::FrameTooLarge { .. }));
    }

    #[test]
    fn test_decode_length_forms() {
        assert_eq!(
            decode_length(&[0x05, 0x00]).unwrap(),
            Some(LengthPrefix::Frame {
                total: 5,
                prefix: 1
            })
        );
        assert_eq!(
            decode_length(&[0xC8, 0x01]).unwrap(),
            Some(LengthPrefix::Frame {
                total: 200,
                prefix: 2
            })
        );
        assert_eq!(decode_length(&[0x00]).unwrap(), Some(LengthPrefix::Keepalive));
        assert_eq!(decode_length(&[0x81]).unwrap(), None);
        assert_eq!(decode_length(&[]).unwrap(), None);
    }

    #[test]
    fn test_decode_length_too_short() {
        let err = decode_length(&[0x02]).unwrap_err();
        assert!(matches!(err, FrameError::InvalidLength { len: 2, .. }));
    }

    #[test]
    fn test_port_info_value_request_bytes() {
        let frame = Frame::new(0x21, &[0x02, 0x00]).unwrap();
        assert_eq!(frame.as_bytes(), &[0x05, 0x00, 0x21, 0x02, 0x00]);
        assert_eq!(frame.message_type(), 0x21);
        assert_eq!(frame.payload(), &[0x02, 0x00]);
        assert!(frame.is_short());
    }

    #[test]
    fn test_short_long_switch_point() {
        let short = Frame::new(0x45, &[0u8; 0x7C]).unwrap();
        assert_eq!(short.len(), 0x7F);
        assert_eq!(short.as_bytes()[0], 0x7F);

        let long = Frame::new(0x45, &[0u8; 0x7D]).unwrap();
        assert_eq!(long.len(), 0x81);
        assert_eq!(&long.as_bytes()[..2], &[0x81, 0x01]);
        assert!(!long.is_short());
        assert_eq!(long.payload().len(), 0x7D);
    }

    #[test]
    fn test_encode_decode_across_length_range() {
        for payload_len in [0usize, 1, 0x7B, 0x7C, 0x7D, 0x7E, 200, 0x3FFC] {
            let payload: Vec<u8> = (0..payload_len).map(|i| i as u8).collect();
            let mut buf = BytesMut::new();
            encode_frame(0x46, &payload, &mut buf).unwrap();

            let decoded = decode_frame(&mut buf).unwrap().unwrap();
            let Decoded::Frame(frame) = decoded else {
                panic!("expected frame for payload length {payload_len}");
            };
            assert_eq!(frame.message_type(), 0x46);
            assert_eq!(frame.hub_id(), HUB_ID);
            assert_eq!(frame.payload(), payload.as_slice());
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn test_decode_incomplete() {
        let mut buf = BytesMut::from(&[0x06, 0x00, 0x22][..]);
        assert!(decode_frame(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn test_keepalive_consumes_one_byte() {
        let mut buf = BytesMut::from(&[0x00, 0x05, 0x00, 0x21, 0x02, 0x00][..]);
        assert_eq!(decode_frame(&mut buf).unwrap(), Some(Decoded::Keepalive));
        let next = decode_frame(&mut buf).unwrap().unwrap();
        assert!(matches!(next, Decoded::Frame(ref f) if f.message_type() == 0x21));
    }

    #[test]
    fn test_from_wire_rejects_mismatched_length() {
        let err = Frame::from_wire(vec![0x06, 0x00, 0x21, 0x02, 0x00]).unwrap_err();
        assert!(matches!(
            err,
            FrameError::Truncated {
                expected: 6,
                actual: 5
            }
        ));
    }

    #[test]
    fn test_from_wire_keeps_nonzero_hub_id() {
        let frame = Frame::from_wire(vec![0x04, 0x07, 0x01, 0x03]).unwrap();
        assert_eq!(frame.hub_id(), 0x07);
    }

    #[test]
    fn test_frame_too_large() {
        let payload = vec![0u8; MAX_FRAME_LEN];
        let err = Frame::new(0x45, &payload).unwrap_err();
        assert!(matches!(err, FrameError::FrameTooLarge { .. }));
    }

    #[test]
    fn test_debug_is_hex() {
        let frame = Frame::new(0x01, &[0x04, 0x05]).unwrap();
        let rendered = format!("{frame:?}");
        assert!(rendered.contains("05 00 01 04 05"));
    }
}
