//! Audio and video frame headers.
//!
//! Every encoded frame buffer begins with a 24-byte header describing
//! the access unit. The header is consumed by the packetizer to obtain
//! the frame sequence and to validate the declared payload length; it
//! is not re-sent per segment (the whole frame buffer, header included,
//! is what gets segmented and reassembled).
//!
//! Audio header layout (24 bytes, big-endian):
//! - Channels: 1 byte
//! - Codec ID: 1 byte
//! - Sample Rate Class: 1 byte
//! - Reserved: 1 byte
//! - Power Hint: 2 bytes (energy estimate, opaque to transport)
//! - Timestamp: 8 bytes (microseconds)
//! - Frame Sequence: 4 bytes
//! - Payload Length: 4 bytes
//! - Reserved: 2 bytes
//!
//! Video header layout (24 bytes, big-endian):
//! - Codec ID: 1 byte
//! - Flags: 1 byte (bit 0 = keyframe)
//! - Spatial Layer: 1 byte
//! - Temporal Layer: 1 byte
//! - Width / 16: 2 bytes
//! - Height / 16: 2 bytes
//! - Timestamp: 8 bytes (microseconds)
//! - Frame Sequence: 4 bytes
//! - Payload Length: 4 bytes

use crate::error::WireError;
use bytes::{Buf, BufMut, BytesMut};

/// Flag bit marking a video keyframe.
const FLAG_KEYFRAME: u8 = 0x01;

/// Kind of media stream a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamType {
    /// Audio access units (single-segment framing rules).
    Audio,
    /// Video access units (multi-segment framing rules).
    Video,
}

/// Audio sample rate class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SampleRateClass {
    /// 8 kHz narrowband.
    Narrowband = 0x00,
    /// 16 kHz wideband.
    Wideband = 0x01,
    /// 32 kHz super-wideband.
    SuperWideband = 0x02,
    /// 48 kHz fullband.
    Fullband = 0x03,
}

impl SampleRateClass {
    fn from_u8(value: u8) -> Result<Self, WireError> {
        match value {
            0x00 => Ok(Self::Narrowband),
            0x01 => Ok(Self::Wideband),
            0x02 => Ok(Self::SuperWideband),
            0x03 => Ok(Self::Fullband),
            other => Err(WireError::InvalidSampleRate(other)),
        }
    }
}

/// Header prefixing every encoded audio frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFrameHeader {
    /// Channel count.
    pub channels: u8,
    /// Codec identifier (opaque to the transport).
    pub codec: u8,
    /// Sample rate class.
    pub sample_rate: SampleRateClass,
    /// Energy hint for active-speaker selection (opaque to transport).
    pub power_hint: u16,
    /// Capture timestamp in microseconds.
    pub timestamp: u64,
    /// Frame sequence number (monotonic per stream, wraps).
    pub frame_seq: u32,
    /// Declared payload length following this header.
    pub payload_len: u32,
}

impl AudioFrameHeader {
    /// Header size in bytes.
    pub const SIZE: usize = 24;

    /// Encode the header into `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.channels);
        buf.put_u8(self.codec);
        buf.put_u8(self.sample_rate as u8);
        buf.put_u8(0);
        buf.put_u16(self.power_hint);
        buf.put_u64(self.timestamp);
        buf.put_u32(self.frame_seq);
        buf.put_u32(self.payload_len);
        buf.put_bytes(0, 2);
    }

    /// Decode a header from `data`.
    ///
    /// # Errors
    ///
    /// Returns an error on a short buffer or an unknown sample rate class.
    pub fn decode(data: &mut impl Buf) -> Result<Self, WireError> {
        if data.remaining() < Self::SIZE {
            return Err(WireError::InsufficientData);
        }

        let channels = data.get_u8();
        let codec = data.get_u8();
        let sample_rate = SampleRateClass::from_u8(data.get_u8())?;
        data.advance(1);
        let power_hint = data.get_u16();
        let timestamp = data.get_u64();
        let frame_seq = data.get_u32();
        let payload_len = data.get_u32();
        data.advance(2);

        Ok(Self {
            channels,
            codec,
            sample_rate,
            power_hint,
            timestamp,
            frame_seq,
            payload_len,
        })
    }
}

/// Header prefixing every encoded video frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoFrameHeader {
    /// Codec identifier (opaque to the transport).
    pub codec: u8,
    /// Whether this is a keyframe.
    pub is_key: bool,
    /// Spatial layer id (SVC).
    pub spatial_layer: u8,
    /// Temporal layer id (SVC).
    pub temporal_layer: u8,
    /// Width divided by 16.
    pub width_div16: u16,
    /// Height divided by 16.
    pub height_div16: u16,
    /// Capture timestamp in microseconds.
    pub timestamp: u64,
    /// Frame sequence number (monotonic per stream, wraps).
    pub frame_seq: u32,
    /// Declared payload length following this header.
    pub payload_len: u32,
}

impl VideoFrameHeader {
    /// Header size in bytes.
    pub const SIZE: usize = 24;

    /// Encode the header into `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.codec);
        let mut flags = 0u8;
        if self.is_key {
            flags |= FLAG_KEYFRAME;
        }
        buf.put_u8(flags);
        buf.put_u8(self.spatial_layer);
        buf.put_u8(self.temporal_layer);
        buf.put_u16(self.width_div16);
        buf.put_u16(self.height_div16);
        buf.put_u64(self.timestamp);
        buf.put_u32(self.frame_seq);
        buf.put_u32(self.payload_len);
    }

    /// Decode a header from `data`.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::InsufficientData`] on a short buffer.
    pub fn decode(data: &mut impl Buf) -> Result<Self, WireError> {
        if data.remaining() < Self::SIZE {
            return Err(WireError::InsufficientData);
        }

        let codec = data.get_u8();
        let flags = data.get_u8();
        let spatial_layer = data.get_u8();
        let temporal_layer = data.get_u8();
        let width_div16 = data.get_u16();
        let height_div16 = data.get_u16();
        let timestamp = data.get_u64();
        let frame_seq = data.get_u32();
        let payload_len = data.get_u32();

        Ok(Self {
            codec,
            is_key: (flags & FLAG_KEYFRAME) != 0,
            spatial_layer,
            temporal_layer,
            width_div16,
            height_div16,
            timestamp,
            frame_seq,
            payload_len,
        })
    }
}

/// A decoded frame header of either stream type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameHeader {
    /// Audio frame header.
    Audio(AudioFrameHeader),
    /// Video frame header.
    Video(VideoFrameHeader),
}

impl FrameHeader {
    /// Header size in bytes (identical for both stream types).
    pub const SIZE: usize = 24;

    /// Decode the header matching `stream_type` from `data`.
    ///
    /// # Errors
    ///
    /// Propagates the underlying header decode error.
    pub fn decode(stream_type: StreamType, data: &mut impl Buf) -> Result<Self, WireError> {
        match stream_type {
            StreamType::Audio => AudioFrameHeader::decode(data).map(Self::Audio),
            StreamType::Video => VideoFrameHeader::decode(data).map(Self::Video),
        }
    }

    /// Frame sequence number.
    #[must_use]
    pub fn frame_seq(&self) -> u32 {
        match self {
            Self::Audio(h) => h.frame_seq,
            Self::Video(h) => h.frame_seq,
        }
    }

    /// Declared payload length following the header.
    #[must_use]
    pub fn payload_len(&self) -> u32 {
        match self {
            Self::Audio(h) => h.payload_len,
            Self::Video(h) => h.payload_len,
        }
    }
}
