//! FEC frame encoding.
//!
//! The forward error corrector turns the outgoing segment stream into a
//! stream of FEC frames: every source segment is carried verbatim in a
//! `Source` frame, and each window of `k` source units is followed by
//! `r` `Repair` frames holding Reed-Solomon parity shards. Both kinds
//! draw their sequence number from one monotonic allocator shared
//! across the stream; that sequence is the retransmission (NACK)
//! address and is independent of frame/segment sequencing.
//!
//! Header layout (16 bytes, big-endian):
//! - FEC Sequence: 4 bytes
//! - Kind: 1 byte (0 = source, 1 = repair)
//! - Flags: 1 byte (bit 0 = retransmitted copy)
//! - Shard Index: 1 byte (position within the window)
//! - K: 1 byte (source units in the window)
//! - R: 1 byte (repair units in the window)
//! - Reserved: 1 byte
//! - Window Base: 4 bytes (FEC sequence of the window's first source unit)
//! - Payload Length: 2 bytes

use crate::error::WireError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Flag bit marking a retransmitted copy (set when answering a NACK).
const FLAG_RETRANSMIT: u8 = 0x01;

/// Byte offset of the flags field within an encoded FEC frame.
const FLAGS_OFFSET: usize = 5;

/// Kind of FEC frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FecFrameKind {
    /// Carries one source segment verbatim.
    Source = 0x00,
    /// Carries one Reed-Solomon parity shard.
    Repair = 0x01,
}

impl FecFrameKind {
    fn from_u8(value: u8) -> Result<Self, WireError> {
        match value {
            0x00 => Ok(Self::Source),
            0x01 => Ok(Self::Repair),
            other => Err(WireError::InvalidFecKind(other)),
        }
    }
}

/// FEC frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FecFrameHeader {
    /// Stream-wide monotonic sequence number (NACK address).
    pub fec_seq: u32,
    /// Source or repair.
    pub kind: FecFrameKind,
    /// Whether this copy was sent in answer to a NACK.
    pub is_retransmit: bool,
    /// Position within the window: `0..k` for sources, `0..r` for repairs.
    pub shard_index: u8,
    /// Source unit count of the window this frame belongs to.
    pub k: u8,
    /// Repair unit count of the window this frame belongs to.
    pub r: u8,
    /// FEC sequence of the window's first source unit.
    pub window_base: u32,
    /// Payload length following this header.
    pub payload_len: u16,
}

impl FecFrameHeader {
    /// Header size in bytes.
    pub const SIZE: usize = 16;

    /// Encode the header into `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.fec_seq);
        buf.put_u8(self.kind as u8);
        let mut flags = 0u8;
        if self.is_retransmit {
            flags |= FLAG_RETRANSMIT;
        }
        buf.put_u8(flags);
        buf.put_u8(self.shard_index);
        buf.put_u8(self.k);
        buf.put_u8(self.r);
        buf.put_u8(0);
        buf.put_u32(self.window_base);
        buf.put_u16(self.payload_len);
    }

    /// Decode a header from `data`.
    ///
    /// # Errors
    ///
    /// Returns an error on a short buffer or an unknown frame kind.
    pub fn decode(data: &mut impl Buf) -> Result<Self, WireError> {
        if data.remaining() < Self::SIZE {
            return Err(WireError::InsufficientData);
        }

        let fec_seq = data.get_u32();
        let kind = FecFrameKind::from_u8(data.get_u8())?;
        let flags = data.get_u8();
        let shard_index = data.get_u8();
        let k = data.get_u8();
        let r = data.get_u8();
        data.advance(1);
        let window_base = data.get_u32();
        let payload_len = data.get_u16();

        Ok(Self {
            fec_seq,
            kind,
            is_retransmit: (flags & FLAG_RETRANSMIT) != 0,
            shard_index,
            k,
            r,
            window_base,
            payload_len,
        })
    }
}

/// One FEC frame: header plus source segment bytes or parity shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FecFrame {
    /// FEC frame header.
    pub header: FecFrameHeader,
    /// Source segment bytes or parity shard.
    pub payload: Bytes,
}

impl FecFrame {
    /// Encode the frame to a contiguous buffer.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(FecFrameHeader::SIZE + self.payload.len());
        self.header.encode(&mut buf);
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }

    /// Decode a frame from a complete buffer, validating the declared
    /// payload length against the buffer.
    ///
    /// # Errors
    ///
    /// Returns an error for a short buffer, an unknown kind, or a
    /// declared payload length that contradicts the buffer.
    pub fn decode(mut data: Bytes) -> Result<Self, WireError> {
        let total = data.len();
        let header = FecFrameHeader::decode(&mut data)?;

        let declared = FecFrameHeader::SIZE + header.payload_len as usize;
        if declared != total {
            return Err(WireError::LengthMismatch {
                declared,
                actual: total,
            });
        }

        Ok(Self {
            header,
            payload: data,
        })
    }
}

/// Set the retransmit flag bit in an already-encoded FEC frame buffer.
///
/// Used by the retransmission history when answering a NACK: the stored
/// copy stays pristine, the outgoing copy is marked. A buffer too short
/// to hold a header is left untouched.
pub fn mark_retransmit(buf: &mut [u8]) {
    if let Some(flags) = buf.get_mut(FLAGS_OFFSET) {
        *flags |= FLAG_RETRANSMIT;
    }
}
