//! Video frame reassembly.
//!
//! Video frames span multiple segments, so the reassembler keeps a
//! bounded window of per-frame segment maps. A frame is delivered when
//! its final segment (`is_last`) is present, its segment count matches,
//! and it is next in sequence after the delivery watermark; a complete
//! later frame stalls behind an incomplete earlier one. When the window
//! fills, the oldest cached frame is dropped
//! ([`EvictionPolicy::ForcePushOldest`]): its received segments count
//! as good, its missing segments are estimated (from `is_last` when
//! seen, otherwise from the running segments-per-frame average) and
//! charged to the loss counters, and the watermark advances past it.

use super::{seq_after, EvictionPolicy, FrameSink};
use bytes::BytesMut;
use media_wire::segment::Segment;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

/// Exponential smoothing weight kept for the old segments-per-frame
/// average (new observations weigh 0.2).
const SEGS_PER_FRAME_DECAY: f32 = 0.8;

/// Video reassembler.
pub struct VideoReassembler<S: FrameSink> {
    sink: S,
    /// Cached incomplete frames: frame_seq -> (segment_seq -> segment).
    frames: BTreeMap<u32, BTreeMap<u16, Segment>>,
    /// Bound on cached frames; exceeding it triggers eviction.
    max_cached_frames: usize,
    /// Eviction policy (fixed; named so tests can assert on it).
    policy: EvictionPolicy,
    /// Last frame sequence delivered or dropped.
    last_pushed: Option<u32>,
    /// Running average of segments per delivered frame.
    segs_per_frame: f32,
    /// Frame sequences observed since the last loss report.
    seen: HashSet<u32>,
    /// Segments accounted as received since the last loss report.
    good_segments: u64,
    /// Segments estimated missing since the last loss report.
    missing_segments: u64,
}

impl<S: FrameSink> VideoReassembler<S> {
    /// Create a reassembler delivering to `sink`, with the given frame
    /// cache bound.
    pub fn new(sink: S, max_cached_frames: usize) -> Self {
        Self {
            sink,
            frames: BTreeMap::new(),
            max_cached_frames: max_cached_frames.max(1),
            policy: EvictionPolicy::ForcePushOldest,
            last_pushed: None,
            segs_per_frame: 0.0,
            seen: HashSet::new(),
            good_segments: 0,
            missing_segments: 0,
        }
    }

    /// The eviction policy in effect.
    #[must_use]
    pub fn eviction_policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Running average of segments per frame.
    #[must_use]
    pub fn segs_per_frame(&self) -> f32 {
        self.segs_per_frame
    }

    /// Accept one arriving segment.
    ///
    /// May deliver zero or more frames to the sink, always in
    /// increasing frame-seq order.
    pub fn write_segment(&mut self, segment: Segment) {
        let frame_seq = segment.header.frame_seq;

        if let Some(last) = self.last_pushed {
            if !seq_after(frame_seq, last) {
                debug!(
                    target: "mt.reassembly.video",
                    frame_seq,
                    last_pushed = last,
                    "Stale video segment, dropping"
                );
                return;
            }
        }

        self.seen.insert(frame_seq);

        // A first segment for a new frame may push the cache over its
        // bound; evict the oldest cached frame before inserting.
        if !self.frames.contains_key(&frame_seq) && self.frames.len() >= self.max_cached_frames {
            self.evict_oldest();

            // Eviction advances the watermark; it may now have passed
            // this segment, which must not occupy a cache slot.
            if let Some(last) = self.last_pushed {
                if !seq_after(frame_seq, last) {
                    debug!(
                        target: "mt.reassembly.video",
                        frame_seq,
                        last_pushed = last,
                        "Segment went stale during eviction, dropping"
                    );
                    return;
                }
            }
        }

        let entry = self.frames.entry(frame_seq).or_default();
        let segment_seq = segment.header.segment_seq;
        if entry.contains_key(&segment_seq) {
            debug!(
                target: "mt.reassembly.video",
                frame_seq,
                segment_seq,
                "Duplicate video segment, ignoring"
            );
        } else {
            entry.insert(segment_seq, segment);
        }

        self.assemble_ready();
    }

    /// Estimated fraction of expected segments never received since the
    /// previous call; resets to zero after each read. Always in `[0, 1]`.
    pub fn take_loss_rate(&mut self) -> f32 {
        // Frame-level gaps across the sequences observed this interval,
        // scaled by the per-frame segment average.
        let gap_frames = self.seen_gap_frames();
        if gap_frames > 0 {
            let per_frame = self.segs_per_frame.max(1.0).round() as u64;
            self.missing_segments += gap_frames * per_frame;
        }

        let total = self.missing_segments + self.good_segments;
        let rate = if total == 0 {
            0.0
        } else {
            self.missing_segments as f32 / total as f32
        };

        self.missing_segments = 0;
        self.good_segments = 0;
        self.seen.clear();
        rate
    }

    /// Count frame sequences absent from the observed set's span.
    fn seen_gap_frames(&self) -> u64 {
        if self.seen.len() < 2 {
            return 0;
        }
        // Order observations by wrapping distance from a base so the
        // count stays correct across the u32 wrap point.
        let base = self
            .seen
            .iter()
            .copied()
            .min_by_key(|s| self.last_pushed.map_or(*s, |l| s.wrapping_sub(l)))
            .unwrap_or_default();
        let mut seqs: Vec<u32> = self.seen.iter().copied().collect();
        seqs.sort_unstable_by_key(|s| s.wrapping_sub(base));

        let mut gaps = 0u64;
        for pair in seqs.windows(2) {
            if let [prev, next] = pair {
                gaps += u64::from(next.wrapping_sub(*prev).saturating_sub(1));
            }
        }
        gaps
    }

    /// Deliver consecutive complete frames following the watermark.
    fn assemble_ready(&mut self) {
        loop {
            let Some(next_seq) = self.next_deliverable_seq() else {
                break;
            };
            let Some(segments) = self.frames.get(&next_seq) else {
                break;
            };
            let Some(last_seg) = segments.values().find(|s| s.header.is_last) else {
                break;
            };
            let expected = usize::from(last_seg.header.segment_seq) + 1;
            if segments.len() != expected {
                break;
            }

            // Complete: concatenate payloads in ascending segment order.
            let Some(segments) = self.frames.remove(&next_seq) else {
                break;
            };
            let total: usize = segments.values().map(Segment::payload_len).sum();
            let mut frame = BytesMut::with_capacity(total);
            for segment in segments.values() {
                frame.extend_from_slice(&segment.payload);
            }

            let count = segments.len() as u64;
            self.good_segments += count;
            self.update_segs_per_frame(count as f32);
            self.last_pushed = Some(next_seq);
            self.sink.on_frame(next_seq, frame.freeze());
        }
    }

    /// The only sequence eligible for delivery: the one right after the
    /// watermark, or the lowest cached frame when nothing has been
    /// delivered yet.
    fn next_deliverable_seq(&self) -> Option<u32> {
        match self.last_pushed {
            Some(last) => {
                let next = last.wrapping_add(1);
                self.frames.contains_key(&next).then_some(next)
            }
            None => self.oldest_cached_seq(),
        }
    }

    fn oldest_cached_seq(&self) -> Option<u32> {
        let base = self.last_pushed.map(|l| l.wrapping_add(1));
        self.frames
            .keys()
            .copied()
            .min_by_key(|seq| base.map_or(*seq, |b| seq.wrapping_sub(b)))
    }

    /// Drop the oldest cached frame, accounting its received segments
    /// as good and its estimated missing segments as lost, and advance
    /// the watermark past it.
    fn evict_oldest(&mut self) {
        let Some(oldest) = self.oldest_cached_seq() else {
            return;
        };
        let Some(segments) = self.frames.remove(&oldest) else {
            return;
        };

        let received = segments.len() as u64;
        let missing = match segments.values().find(|s| s.header.is_last) {
            Some(last_seg) => {
                (u64::from(last_seg.header.segment_seq) + 1).saturating_sub(received)
            }
            None => {
                let estimate = self.segs_per_frame.max(1.0).round() as u64;
                estimate.saturating_sub(received)
            }
        };

        self.good_segments += received;
        self.missing_segments += missing;
        self.last_pushed = Some(oldest);

        warn!(
            target: "mt.reassembly.video",
            frame_seq = oldest,
            received,
            missing,
            "Video cache full, dropping oldest incomplete frame"
        );
    }

    fn update_segs_per_frame(&mut self, observed: f32) {
        if self.segs_per_frame == 0.0 {
            self.segs_per_frame = observed;
        } else {
            self.segs_per_frame = SEGS_PER_FRAME_DECAY * self.segs_per_frame
                + (1.0 - SEGS_PER_FRAME_DECAY) * observed;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::packetizer::Packetizer;
    use crate::testutil::video_frame_2000;
    use bytes::Bytes;
    use media_wire::frame::StreamType;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn collector() -> (Rc<RefCell<Vec<(u32, Bytes)>>>, impl FnMut(u32, Bytes)) {
        let frames = Rc::new(RefCell::new(Vec::new()));
        let sink_frames = Rc::clone(&frames);
        (frames, move |seq, frame: Bytes| {
            sink_frames.borrow_mut().push((seq, frame));
        })
    }

    fn segments_for(frame_seq: u32) -> Vec<Segment> {
        Packetizer::new(1024)
            .segment(StreamType::Video, video_frame_2000(frame_seq))
            .unwrap()
    }

    #[test]
    fn test_in_order_roundtrip() {
        let (frames, sink) = collector();
        let mut reassembler = VideoReassembler::new(sink, 32);

        for segment in segments_for(0) {
            reassembler.write_segment(segment);
        }

        let frames = frames.borrow();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0, 0);
        assert_eq!(frames[0].1, video_frame_2000(0));
    }

    #[test]
    fn test_reversed_segments_roundtrip() {
        let (frames, sink) = collector();
        let mut reassembler = VideoReassembler::new(sink, 32);

        let mut segments = segments_for(5);
        segments.reverse();
        for segment in segments {
            reassembler.write_segment(segment);
        }

        let frames = frames.borrow();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].1, video_frame_2000(5));
    }

    #[test]
    fn test_redelivery_after_assembly_is_ignored() {
        let (frames, sink) = collector();
        let mut reassembler = VideoReassembler::new(sink, 32);

        let segments = segments_for(0);
        for segment in &segments {
            reassembler.write_segment(segment.clone());
        }
        for segment in segments {
            reassembler.write_segment(segment);
        }

        assert_eq!(frames.borrow().len(), 1);
    }

    #[test]
    fn test_duplicate_segment_is_noop() {
        let (frames, sink) = collector();
        let mut reassembler = VideoReassembler::new(sink, 32);

        let segments = segments_for(0);
        reassembler.write_segment(segments[0].clone());
        reassembler.write_segment(segments[0].clone());
        assert_eq!(frames.borrow().len(), 0);

        reassembler.write_segment(segments[1].clone());
        assert_eq!(frames.borrow().len(), 1);
    }

    #[test]
    fn test_later_complete_frame_stalls_behind_gap() {
        let (frames, sink) = collector();
        let mut reassembler = VideoReassembler::new(sink, 32);

        for segment in segments_for(0) {
            reassembler.write_segment(segment);
        }
        assert_eq!(frames.borrow().len(), 1);

        // Frame 1 never arrives; frame 2 completes but must stall.
        for segment in segments_for(2) {
            reassembler.write_segment(segment);
        }
        assert_eq!(frames.borrow().len(), 1);
    }

    #[test]
    fn test_gap_frame_completion_releases_stalled_frames() {
        let (frames, sink) = collector();
        let mut reassembler = VideoReassembler::new(sink, 32);

        for segment in segments_for(0) {
            reassembler.write_segment(segment);
        }
        for segment in segments_for(2) {
            reassembler.write_segment(segment);
        }
        // Late-arriving frame 1 releases frame 2 behind it.
        for segment in segments_for(1) {
            reassembler.write_segment(segment);
        }

        let delivered: Vec<u32> = frames.borrow().iter().map(|(s, _)| *s).collect();
        assert_eq!(delivered, vec![0, 1, 2]);
    }

    #[test]
    fn test_eviction_under_cache_pressure_accounts_loss() {
        let (frames, sink) = collector();
        let mut reassembler = VideoReassembler::new(sink, 2);

        for segment in segments_for(0) {
            reassembler.write_segment(segment);
        }

        // Frame 1: only the first of two segments arrives.
        let partial = segments_for(1).remove(0);
        reassembler.write_segment(partial);

        // Frames 2 and 3 fill the cache; frame 4 evicts frame 1.
        for seq in 2..=4 {
            for segment in segments_for(seq) {
                reassembler.write_segment(segment);
            }
        }

        // Frame 1 was dropped, frames 2..=4 delivered after eviction
        // advanced the watermark past it.
        let delivered: Vec<u32> = frames.borrow().iter().map(|(s, _)| *s).collect();
        assert_eq!(delivered, vec![0, 2, 3, 4]);

        // Frame 1's last segment never arrived, so its missing count
        // comes from the segments-per-frame estimate.
        let rate = reassembler.take_loss_rate();
        assert!(rate > 0.0);
        assert!(rate <= 1.0);
        assert_eq!(reassembler.take_loss_rate(), 0.0);
    }

    #[test]
    fn test_segment_gone_stale_during_eviction_is_dropped() {
        let (frames, sink) = collector();
        let mut reassembler = VideoReassembler::new(sink, 2);

        for segment in segments_for(0) {
            reassembler.write_segment(segment);
        }

        // Partial frames 5 and 6 fill the cache.
        reassembler.write_segment(segments_for(5).remove(0));
        reassembler.write_segment(segments_for(6).remove(0));

        // A late frame-2 segment forces an eviction that advances the
        // watermark to 5, so the segment itself must be dropped rather
        // than cached as an undeliverable entry.
        reassembler.write_segment(segments_for(2).remove(0));

        // Frame 6 completes; frame 7 delivers normally.
        reassembler.write_segment(segments_for(6).remove(1));
        for segment in segments_for(7) {
            reassembler.write_segment(segment);
        }

        // Frames 8 and 9 interleave their segments. With no dead entry
        // holding a cache slot, neither triggers an eviction and both
        // deliver.
        let mut eight = segments_for(8);
        let mut nine = segments_for(9);
        reassembler.write_segment(eight.remove(0));
        reassembler.write_segment(nine.remove(0));
        reassembler.write_segment(eight.remove(0));
        reassembler.write_segment(nine.remove(0));

        let delivered: Vec<u32> = frames.borrow().iter().map(|(s, _)| *s).collect();
        assert_eq!(delivered, vec![0, 6, 7, 8, 9]);
    }

    #[test]
    fn test_loss_rate_counts_unseen_frame_gaps() {
        let (_frames, sink) = collector();
        let mut reassembler = VideoReassembler::new(sink, 32);

        for segment in segments_for(0) {
            reassembler.write_segment(segment);
        }
        // Frames 1..=3 vanish entirely; frame 4 arrives complete but
        // stalls behind the gap.
        for segment in segments_for(4) {
            reassembler.write_segment(segment);
        }

        let rate = reassembler.take_loss_rate();
        assert!(rate > 0.0);
        assert!(rate <= 1.0);
    }

    #[test]
    fn test_eviction_logs_dropped_frame() {
        use std::sync::{Arc, Mutex};

        #[derive(Clone)]
        struct SharedWriter(Arc<Mutex<Vec<u8>>>);

        impl std::io::Write for SharedWriter {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }

            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SharedWriter {
            type Writer = SharedWriter;

            fn make_writer(&'a self) -> Self::Writer {
                self.clone()
            }
        }

        let output = Arc::new(Mutex::new(Vec::new()));
        let subscriber = tracing_subscriber::fmt()
            .with_writer(SharedWriter(Arc::clone(&output)))
            .with_ansi(false)
            .finish();

        let (_frames, sink) = collector();
        let mut reassembler = VideoReassembler::new(sink, 2);
        tracing::subscriber::with_default(subscriber, || {
            for segment in segments_for(0) {
                reassembler.write_segment(segment);
            }
            // Frames 2 and 3 arrive partially; frame 4 forces eviction.
            reassembler.write_segment(segments_for(2).remove(0));
            reassembler.write_segment(segments_for(3).remove(0));
            reassembler.write_segment(segments_for(4).remove(0));
        });

        let logs = String::from_utf8(output.lock().unwrap().clone()).unwrap();
        assert!(logs.contains("Video cache full, dropping oldest incomplete frame"));
        assert!(logs.contains("frame_seq=2"));
    }

    #[test]
    fn test_segs_per_frame_smoothing() {
        let (_frames, sink) = collector();
        let mut reassembler = VideoReassembler::new(sink, 32);

        for seq in 0..3 {
            for segment in segments_for(seq) {
                reassembler.write_segment(segment);
            }
        }
        // Every fixture frame is two segments.
        assert!((reassembler.segs_per_frame() - 2.0).abs() < 1e-6);
    }
}
