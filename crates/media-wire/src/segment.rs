//! Segment header and segment encoding.
//!
//! A segment is the smallest wire-transmitted unit: a fixed 16-byte
//! header followed by a slice of one encoded frame.
//!
//! Header layout (16 bytes, big-endian):
//! - Frame Sequence: 4 bytes (monotonic per frame, wraps)
//! - Segment Sequence: 2 bytes (index within the frame, 0-based)
//! - Flags: 2 bytes (bit 0 marks the final segment of a frame)
//! - Segment Length: 2 bytes (total length including this header)
//! - Reserved: 6 bytes

use crate::error::WireError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Flag bit marking the final segment of a frame.
const FLAG_LAST: u16 = 0x0001;

/// Segment header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Frame sequence number this segment belongs to.
    pub frame_seq: u32,
    /// Index of this segment within the frame, starting at 0.
    pub segment_seq: u16,
    /// Whether this is the final segment of the frame.
    pub is_last: bool,
    /// Total segment length including the 16-byte header.
    pub segment_len: u16,
}

impl SegmentHeader {
    /// Header size in bytes.
    pub const SIZE: usize = 16;

    /// Maximum total segment length observed on the wire.
    pub const MAX_SEGMENT_LEN: usize = 1500;

    /// Encode the header into `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.frame_seq);
        buf.put_u16(self.segment_seq);
        let mut flags = 0u16;
        if self.is_last {
            flags |= FLAG_LAST;
        }
        buf.put_u16(flags);
        buf.put_u16(self.segment_len);
        buf.put_bytes(0, 6);
    }

    /// Decode a header from `data`, validating the declared length range.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::InsufficientData`] if fewer than 16 bytes
    /// remain, or [`WireError::SegmentLengthOutOfRange`] if the declared
    /// length falls outside `[16, 1500]`.
    pub fn decode(data: &mut impl Buf) -> Result<Self, WireError> {
        if data.remaining() < Self::SIZE {
            return Err(WireError::InsufficientData);
        }

        let frame_seq = data.get_u32();
        let segment_seq = data.get_u16();
        let flags = data.get_u16();
        let segment_len = data.get_u16();
        data.advance(6);

        if (segment_len as usize) < Self::SIZE
            || (segment_len as usize) > Self::MAX_SEGMENT_LEN
        {
            return Err(WireError::SegmentLengthOutOfRange(segment_len));
        }

        Ok(Self {
            frame_seq,
            segment_seq,
            is_last: (flags & FLAG_LAST) != 0,
            segment_len,
        })
    }
}

/// One wire segment: header plus payload.
///
/// Invariant: `header.segment_len == 16 + payload.len()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Segment header.
    pub header: SegmentHeader,
    /// Payload bytes (a slice of the encoded frame).
    pub payload: Bytes,
}

impl Segment {
    /// Build a segment from its parts, computing `segment_len`.
    ///
    /// Returns `None` if the payload would exceed the maximum segment
    /// length.
    #[must_use]
    pub fn new(frame_seq: u32, segment_seq: u16, is_last: bool, payload: Bytes) -> Option<Self> {
        let total = SegmentHeader::SIZE.checked_add(payload.len())?;
        if total > SegmentHeader::MAX_SEGMENT_LEN {
            return None;
        }
        Some(Self {
            header: SegmentHeader {
                frame_seq,
                segment_seq,
                is_last,
                segment_len: total as u16,
            },
            payload,
        })
    }

    /// Encode the segment to a contiguous buffer.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.header.segment_len as usize);
        self.header.encode(&mut buf);
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }

    /// Decode a segment from a complete buffer, validating that the
    /// declared length matches the buffer length.
    ///
    /// # Errors
    ///
    /// Returns an error for a short buffer, an out-of-range declared
    /// length, or a declared length that contradicts the buffer.
    pub fn decode(mut data: Bytes) -> Result<Self, WireError> {
        let total = data.len();
        let header = SegmentHeader::decode(&mut data)?;

        if header.segment_len as usize != total {
            return Err(WireError::LengthMismatch {
                declared: header.segment_len as usize,
                actual: total,
            });
        }

        Ok(Self {
            header,
            payload: data,
        })
    }

    /// Payload length in bytes.
    #[must_use]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let header = SegmentHeader {
            frame_seq: 0xDEAD_BEEF,
            segment_seq: 7,
            is_last: true,
            segment_len: 1040,
        };

        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), SegmentHeader::SIZE);

        let decoded = SegmentHeader::decode(&mut buf.freeze()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_segment_roundtrip() {
        let payload = Bytes::from(vec![0xABu8; 320]);
        let segment = Segment::new(42, 0, true, payload.clone()).unwrap();
        assert_eq!(segment.header.segment_len, 336);

        let wire = segment.encode();
        assert_eq!(wire.len(), 336);

        let decoded = Segment::decode(wire).unwrap();
        assert_eq!(decoded.header, segment.header);
        assert_eq!(decoded.payload, payload);
    }

    #[test]
    fn test_decode_rejects_short_buffer() {
        let err = Segment::decode(Bytes::from_static(&[0u8; 8])).unwrap_err();
        assert_eq!(err, WireError::InsufficientData);
    }

    #[test]
    fn test_decode_rejects_length_mismatch() {
        let segment = Segment::new(1, 0, true, Bytes::from(vec![1u8; 100])).unwrap();
        let mut wire = BytesMut::from(&segment.encode()[..]);
        // Truncate the buffer so the declared length no longer matches.
        wire.truncate(80);
        let err = Segment::decode(wire.freeze()).unwrap_err();
        assert_eq!(
            err,
            WireError::LengthMismatch {
                declared: 116,
                actual: 80
            }
        );
    }

    #[test]
    fn test_decode_rejects_out_of_range_length() {
        let mut buf = BytesMut::new();
        SegmentHeader {
            frame_seq: 1,
            segment_seq: 0,
            is_last: false,
            segment_len: 15, // below header size
        }
        .encode(&mut buf);
        let err = SegmentHeader::decode(&mut buf.freeze()).unwrap_err();
        assert_eq!(err, WireError::SegmentLengthOutOfRange(15));
    }

    #[test]
    fn test_new_rejects_oversized_payload() {
        let payload = Bytes::from(vec![0u8; SegmentHeader::MAX_SEGMENT_LEN]);
        assert!(Segment::new(1, 0, true, payload).is_none());
    }
}
