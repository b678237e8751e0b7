//! Audio frame reassembly.
//!
//! Audio frames are single-segment, so reassembly reduces to in-order
//! delivery with a small out-of-order cache. A segment for the next
//! expected frame is pushed immediately; a segment further ahead is
//! cached; late or duplicate segments are dropped. When the cache
//! exceeds its bound, the oldest cached frame is force-pushed as if the
//! gap before it had arrived ([`EvictionPolicy::ForcePushOldest`]) and
//! the implied gap is charged to the missed-unit counter.

use super::{seq_after, EvictionPolicy, FrameSink};
use bytes::Bytes;
use media_wire::segment::Segment;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Audio reassembler.
pub struct AudioReassembler<S: FrameSink> {
    sink: S,
    /// Out-of-order cache, frame_seq -> frame bytes.
    cache: HashMap<u32, Bytes>,
    /// Cache bound; exceeding it triggers eviction.
    cache_limit: usize,
    /// Eviction policy (fixed; named so tests can assert on it).
    policy: EvictionPolicy,
    /// Last frame sequence delivered (or force-pushed).
    last_pushed: Option<u32>,
    /// Frames delivered since the last loss-rate read.
    pushed_units: u64,
    /// Frames implied missing since the last loss-rate read.
    missed_units: u64,
}

impl<S: FrameSink> AudioReassembler<S> {
    /// Create a reassembler delivering to `sink`, with the given
    /// out-of-order cache bound.
    pub fn new(sink: S, cache_limit: usize) -> Self {
        Self {
            sink,
            cache: HashMap::new(),
            cache_limit: cache_limit.max(1),
            policy: EvictionPolicy::ForcePushOldest,
            last_pushed: None,
            pushed_units: 0,
            missed_units: 0,
        }
    }

    /// The eviction policy in effect.
    #[must_use]
    pub fn eviction_policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Accept one arriving segment.
    ///
    /// May deliver zero or more frames to the sink.
    pub fn write_segment(&mut self, segment: Segment) {
        let frame_seq = segment.header.frame_seq;

        match self.last_pushed {
            None => {
                // First segment establishes the watermark.
                self.push(frame_seq, segment.payload);
                self.drain_in_order();
            }
            Some(last) if !seq_after(frame_seq, last) => {
                debug!(
                    target: "mt.reassembly.audio",
                    frame_seq,
                    last_pushed = last,
                    "Late or duplicate audio segment, dropping"
                );
            }
            Some(last) if frame_seq == last.wrapping_add(1) => {
                self.push(frame_seq, segment.payload);
                self.drain_in_order();
            }
            Some(_) => {
                // Ahead of the watermark: cache, evicting under pressure.
                if self.cache.insert(frame_seq, segment.payload).is_some() {
                    debug!(
                        target: "mt.reassembly.audio",
                        frame_seq,
                        "Duplicate cached audio segment, replacing"
                    );
                }
                if self.cache.len() > self.cache_limit {
                    self.evict_oldest();
                }
            }
        }
    }

    /// Fraction of expected frames never received since the previous
    /// call; resets to zero after each read. Always in `[0, 1]`.
    pub fn take_loss_rate(&mut self) -> f32 {
        let total = self.missed_units + self.pushed_units;
        let rate = if total == 0 {
            0.0
        } else {
            self.missed_units as f32 / total as f32
        };
        self.missed_units = 0;
        self.pushed_units = 0;
        rate
    }

    fn push(&mut self, frame_seq: u32, frame: Bytes) {
        self.sink.on_frame(frame_seq, frame);
        self.last_pushed = Some(frame_seq);
        self.pushed_units += 1;
    }

    /// Deliver cached frames that are now in order.
    fn drain_in_order(&mut self) {
        while let Some(last) = self.last_pushed {
            let next = last.wrapping_add(1);
            match self.cache.remove(&next) {
                Some(frame) => self.push(next, frame),
                None => break,
            }
        }
    }

    /// Force-push the oldest cached frame, charging the implied gap to
    /// the missed-unit counter.
    fn evict_oldest(&mut self) {
        let Some(last) = self.last_pushed else { return };
        let expected = last.wrapping_add(1);

        // Oldest = smallest forward distance from the expected seq.
        let Some(oldest) = self
            .cache
            .keys()
            .copied()
            .min_by_key(|seq| seq.wrapping_sub(expected))
        else {
            return;
        };

        let gap = u64::from(oldest.wrapping_sub(expected));
        self.missed_units += gap;

        warn!(
            target: "mt.reassembly.audio",
            evicted = oldest,
            gap,
            "Audio cache full, force-pushing oldest cached frame"
        );

        if let Some(frame) = self.cache.remove(&oldest) {
            self.push(oldest, frame);
            self.drain_in_order();
        }
    }
}
