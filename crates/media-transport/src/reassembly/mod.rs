//! Frame reassembly.
//!
//! Per-stream-direction state machines that accept arriving segments
//! (possibly out of order, possibly lost) and deliver complete frames
//! to a [`FrameSink`] in strictly increasing frame-sequence order. Two
//! variants share the contract: [`audio::AudioReassembler`] (strict,
//! minimal buffering) and [`video::VideoReassembler`] (windowed
//! multi-segment reassembly).
//!
//! Both are bounded: when a cache fills, the oldest entry is force
//! delivered or dropped under the named [`EvictionPolicy`], and the
//! implied gap is accounted statistically in the loss rate rather than
//! surfaced as an error.

pub mod audio;
pub mod video;

use bytes::Bytes;

/// Consumer of reassembled frames (render/playout side).
pub trait FrameSink {
    /// Called once per completed frame, in increasing frame-seq order.
    fn on_frame(&mut self, frame_seq: u32, frame: Bytes);
}

impl<F: FnMut(u32, Bytes)> FrameSink for F {
    fn on_frame(&mut self, frame_seq: u32, frame: Bytes) {
        self(frame_seq, frame);
    }
}

/// Policy applied when a reassembly cache reaches its bound.
///
/// The reference behavior is deliberate: rather than grow without
/// bound, the oldest cached entry is pushed (audio) or dropped (video)
/// as if its missing data had arrived, and the gap is charged to the
/// loss counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Evict the oldest cached entry, advancing the delivery watermark
    /// past it.
    ForcePushOldest,
}

/// Wrapping-aware comparison of u32 sequence numbers: is `a` after `b`?
///
/// Interprets distances modulo 2^32, RTP-style: `a` is newer when the
/// forward distance from `b` to `a` is smaller than half the space.
#[must_use]
pub(crate) fn seq_after(a: u32, b: u32) -> bool {
    a != b && a.wrapping_sub(b) < u32::MAX / 2
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_seq_after() {
        assert!(seq_after(5, 4));
        assert!(!seq_after(4, 5));
        assert!(!seq_after(4, 4));
        // Across the wrap point.
        assert!(seq_after(2, u32::MAX - 1));
        assert!(!seq_after(u32::MAX - 1, 2));
    }
}
