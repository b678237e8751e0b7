//! Frame packetization.
//!
//! Splits one encoded frame into wire segments. The packetizer is a
//! pure function over its inputs: it parses the frame header to obtain
//! the frame sequence and to validate the declared payload length, then
//! chunks the whole frame buffer (header included) into payloads of at
//! most `max_payload` bytes. Reassembling the segments in order yields
//! the original frame byte-for-byte.

use crate::errors::PacketizeError;
use bytes::Bytes;
use media_wire::frame::{FrameHeader, StreamType};
use media_wire::segment::Segment;
use tracing::warn;

/// Stateless segmenter with a configured maximum payload per segment.
#[derive(Debug, Clone, Copy)]
pub struct Packetizer {
    max_payload: usize,
}

impl Packetizer {
    /// Create a packetizer with the given maximum payload per segment.
    #[must_use]
    pub fn new(max_payload: usize) -> Self {
        Self { max_payload }
    }

    /// Split one encoded frame into ascending segments.
    ///
    /// A frame that fits in one segment still gets a full header with
    /// `segment_seq == 0` and `is_last == true`.
    ///
    /// # Errors
    ///
    /// Returns an error (and produces zero segments) when the frame
    /// header cannot be parsed or its declared payload length does not
    /// match the buffer.
    pub fn segment(
        &self,
        stream_type: StreamType,
        frame: Bytes,
    ) -> Result<Vec<Segment>, PacketizeError> {
        let header = FrameHeader::decode(stream_type, &mut frame.clone()).map_err(|e| {
            warn!(
                target: "mt.packetizer",
                stream_type = ?stream_type,
                error = %e,
                "Unparseable frame header, dropping frame"
            );
            e
        })?;

        let declared = FrameHeader::SIZE + header.payload_len() as usize;
        if declared != frame.len() {
            warn!(
                target: "mt.packetizer",
                stream_type = ?stream_type,
                declared,
                actual = frame.len(),
                "Frame length mismatch, dropping frame"
            );
            return Err(PacketizeError::LengthMismatch {
                declared,
                actual: frame.len(),
            });
        }

        let frame_seq = header.frame_seq();
        let chunks = frame.len().div_ceil(self.max_payload);
        let mut segments = Vec::with_capacity(chunks);

        let mut offset = 0;
        let mut segment_seq: u16 = 0;
        while offset < frame.len() {
            let end = (offset + self.max_payload).min(frame.len());
            let is_last = end == frame.len();
            let Some(segment) =
                Segment::new(frame_seq, segment_seq, is_last, frame.slice(offset..end))
            else {
                // Unreachable with a validated max_payload; drop the
                // frame rather than emit a malformed segment.
                warn!(
                    target: "mt.packetizer",
                    frame_seq,
                    segment_seq,
                    "Segment construction failed, dropping frame"
                );
                return Ok(Vec::new());
            };
            segments.push(segment);
            offset = end;
            segment_seq = segment_seq.wrapping_add(1);
        }

        Ok(segments)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::testutil::{audio_frame_320, video_frame_2000};
    use bytes::BytesMut;
    use media_wire::segment::SegmentHeader;

    #[test]
    fn test_audio_frame_single_segment() {
        let packetizer = Packetizer::new(1484);
        let frame = audio_frame_320(7);
        let segments = packetizer.segment(StreamType::Audio, frame.clone()).unwrap();

        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].header.frame_seq, 7);
        assert_eq!(segments[0].header.segment_seq, 0);
        assert!(segments[0].header.is_last);
        assert_eq!(segments[0].header.segment_len, 336);
        assert_eq!(segments[0].payload, frame);
    }

    #[test]
    fn test_video_frame_two_segments_at_1024() {
        let packetizer = Packetizer::new(1024);
        let frame = video_frame_2000(12);
        let segments = packetizer.segment(StreamType::Video, frame.clone()).unwrap();

        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].header.segment_len, 1040);
        assert_eq!(segments[1].header.segment_len, 992);
        assert_eq!(segments[0].header.segment_seq, 0);
        assert_eq!(segments[1].header.segment_seq, 1);
        assert!(!segments[0].header.is_last);
        assert!(segments[1].header.is_last);

        // Concatenated payloads reproduce the frame byte-for-byte.
        let mut rebuilt = BytesMut::new();
        for segment in &segments {
            rebuilt.extend_from_slice(&segment.payload);
        }
        assert_eq!(rebuilt.freeze(), frame);
    }

    #[test]
    fn test_exactly_one_last_segment_at_highest_seq() {
        let packetizer = Packetizer::new(256);
        let frame = video_frame_2000(3);
        let segments = packetizer.segment(StreamType::Video, frame).unwrap();

        let last_count = segments.iter().filter(|s| s.header.is_last).count();
        assert_eq!(last_count, 1);
        let last = segments.last().unwrap();
        assert!(last.header.is_last);
        assert_eq!(last.header.segment_seq as usize, segments.len() - 1);

        for segment in &segments {
            assert_eq!(
                segment.header.segment_len as usize,
                SegmentHeader::SIZE + segment.payload.len()
            );
        }
    }

    #[test]
    fn test_rejects_length_mismatch() {
        let packetizer = Packetizer::new(1484);
        let frame = video_frame_2000(1);
        // Truncate so the declared payload length no longer matches.
        let truncated = frame.slice(..frame.len() - 10);
        let err = packetizer
            .segment(StreamType::Video, truncated)
            .unwrap_err();
        assert_eq!(
            err,
            PacketizeError::LengthMismatch {
                declared: 2000,
                actual: 1990
            }
        );
    }

    #[test]
    fn test_rejects_unparseable_header() {
        let packetizer = Packetizer::new(1484);
        let err = packetizer
            .segment(StreamType::Audio, Bytes::from_static(&[1, 2, 3]))
            .unwrap_err();
        assert!(matches!(err, PacketizeError::Header(_)));
    }
}
