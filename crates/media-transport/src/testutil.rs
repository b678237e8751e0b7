//! Shared fixtures for unit tests.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use bytes::{Bytes, BytesMut};
use media_wire::frame::{AudioFrameHeader, SampleRateClass, VideoFrameHeader};

/// A 320-byte audio frame: 24-byte header plus 296 payload bytes.
pub(crate) fn audio_frame_320(frame_seq: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(320);
    AudioFrameHeader {
        channels: 1,
        codec: 0x10,
        sample_rate: SampleRateClass::Wideband,
        power_hint: 100,
        timestamp: 20_000,
        frame_seq,
        payload_len: 296,
    }
    .encode(&mut buf);
    buf.extend_from_slice(&vec![0xA5u8; 296]);
    buf.freeze()
}

/// A 2000-byte video frame: 24-byte header plus 1976 payload bytes,
/// filled with a position-dependent pattern so reassembly mistakes are
/// visible in byte comparisons.
pub(crate) fn video_frame_2000(frame_seq: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(2000);
    VideoFrameHeader {
        codec: 0x21,
        is_key: true,
        spatial_layer: 0,
        temporal_layer: 0,
        width_div16: 80,
        height_div16: 45,
        timestamp: 33_000,
        frame_seq,
        payload_len: 1976,
    }
    .encode(&mut buf);
    let pattern: Vec<u8> = (0..1976u32)
        .map(|i| ((i + frame_seq) % 251) as u8)
        .collect();
    buf.extend_from_slice(&pattern);
    buf.freeze()
}
