//! Retransmission history (NACK cache).
//!
//! A bounded store of recently emitted FEC frames, addressed by FEC
//! sequence number. The stored copy is defensive: answering a NACK
//! marks the retransmit bit on a fresh copy, never on the archive.
//! Lookups for evicted or never-saved sequences return nothing — NACK
//! satisfaction is best-effort by design and callers tolerate partial
//! answers.

use crate::errors::ChannelId;
use bytes::{Bytes, BytesMut};
use media_wire::fec::{mark_retransmit, FecFrame};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// Bounded FEC frame archive addressed by sequence number.
pub struct RetransmissionHistory {
    capacity: usize,
    frames: HashMap<u32, Bytes>,
    /// Insertion order for eviction.
    order: VecDeque<u32>,
}

impl RetransmissionHistory {
    /// Create a history bounded to `capacity` frames.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            frames: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    /// Archive a copy of an emitted FEC frame, evicting the oldest
    /// entry once the bound is exceeded.
    pub fn save(&mut self, frame: &FecFrame) {
        let seq = frame.header.fec_seq;
        if self.frames.insert(seq, frame.encode()).is_none() {
            self.order.push_back(seq);
        }
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.frames.remove(&evicted);
            }
        }
    }

    /// Look up an archived frame. Returns `None` for evicted or
    /// never-saved sequences; never an error.
    #[must_use]
    pub fn find(&self, seq: u32) -> Option<Bytes> {
        self.frames.get(&seq).cloned()
    }

    /// Answer a NACK: look up each requested sequence independently and
    /// return retransmit-marked copies of those found. Missing
    /// sequences are logged and silently omitted.
    pub fn on_nack_request(
        &self,
        channel_id: ChannelId,
        user_id: u64,
        sequences: &[u32],
    ) -> Vec<Bytes> {
        let mut found = Vec::with_capacity(sequences.len());
        for seq in sequences {
            match self.find(*seq) {
                Some(frame) => {
                    let mut copy = BytesMut::from(&frame[..]);
                    mark_retransmit(&mut copy);
                    found.push(copy.freeze());
                }
                None => {
                    debug!(
                        target: "mt.history",
                        channel_id,
                        user_id,
                        seq,
                        "NACKed sequence not in history, skipping"
                    );
                }
            }
        }
        found
    }

    /// Number of frames currently archived.
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether the archive is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use media_wire::fec::{FecFrameHeader, FecFrameKind};

    fn frame(seq: u32) -> FecFrame {
        FecFrame {
            header: FecFrameHeader {
                fec_seq: seq,
                kind: FecFrameKind::Source,
                is_retransmit: false,
                shard_index: 0,
                k: 4,
                r: 1,
                window_base: seq,
                payload_len: 8,
            },
            payload: Bytes::from(vec![seq as u8; 8]),
        }
    }

    #[test]
    fn test_find_returns_saved_frame() {
        let mut history = RetransmissionHistory::new(16);
        let f = frame(10);
        history.save(&f);

        assert_eq!(history.find(10), Some(f.encode()));
        assert_eq!(history.find(11), None);
    }

    #[test]
    fn test_eviction_past_capacity() {
        let mut history = RetransmissionHistory::new(4);
        for seq in 0..6 {
            history.save(&frame(seq));
        }

        assert_eq!(history.len(), 4);
        assert!(history.find(0).is_none());
        assert!(history.find(1).is_none());
        assert!(history.find(5).is_some());
    }

    #[test]
    fn test_nack_returns_found_subset_marked() {
        let mut history = RetransmissionHistory::new(16);
        history.save(&frame(1));
        history.save(&frame(3));

        let answers = history.on_nack_request(77, 42, &[1, 2, 3]);
        assert_eq!(answers.len(), 2);

        for answer in &answers {
            let decoded = FecFrame::decode(answer.clone()).unwrap();
            assert!(decoded.header.is_retransmit);
        }
        // The archive copies stay pristine.
        let archived = FecFrame::decode(history.find(1).unwrap()).unwrap();
        assert!(!archived.header.is_retransmit);
    }

    #[test]
    fn test_nack_for_unknown_sequences_is_empty_not_error() {
        let history = RetransmissionHistory::new(16);
        assert!(history.on_nack_request(1, 1, &[100, 200]).is_empty());
    }
}
