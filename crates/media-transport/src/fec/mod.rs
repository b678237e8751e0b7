//! Forward error correction.
//!
//! The encoder consumes the outgoing segment stream and produces the
//! FEC frame stream: every source segment passes through verbatim as a
//! `Source` frame, and each window of `k` source units is closed with
//! `r` `Repair` frames holding Reed-Solomon parity shards
//! (`reed-solomon-erasure`, GF(2^8), systematic). Window shards are
//! zero-padded to the window's longest segment; receivers recover the
//! original lengths from the segment headers inside the shards.
//!
//! [`FecDecoder`] is the receive-side counterpart; the parameter
//! controller that retunes `(k, r)` from receiver feedback lives in
//! [`control`].

pub mod control;
pub mod decoder;

pub use control::FecParamController;
pub use decoder::FecDecoder;

use bytes::Bytes;
use media_wire::fec::{FecFrame, FecFrameHeader, FecFrameKind};
use media_wire::segment::Segment;
use reed_solomon_erasure::galois_8::ReedSolomon;
use tracing::{debug, error};

/// FEC window parameters: `k` source units protected by `r` repair
/// units. Both are always at least 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FecParam {
    /// Source units per window.
    pub k: u8,
    /// Repair units per window.
    pub r: u8,
}

/// FEC encoder for one stream direction.
///
/// Owns the stream-wide FEC sequence allocator shared by source and
/// repair frames; that sequence is the NACK retransmission address.
pub struct FecEncoder {
    param: FecParam,
    /// Parameter change deferred to the next window boundary.
    pending_param: Option<FecParam>,
    next_seq: u32,
    /// Encoded source segments of the open window.
    window: Vec<Bytes>,
    /// FEC sequence of the open window's first source unit.
    window_base: u32,
}

impl FecEncoder {
    /// Create an encoder with initial parameters.
    #[must_use]
    pub fn new(param: FecParam) -> Self {
        Self {
            param: clamp_param(param),
            pending_param: None,
            next_seq: 0,
            window: Vec::new(),
            window_base: 0,
        }
    }

    /// Parameters in effect for the current window.
    #[must_use]
    pub fn param(&self) -> FecParam {
        self.param
    }

    /// Change `(k, r)` for subsequent windows. Takes effect at the next
    /// window boundary, never retroactively.
    pub fn set_param(&mut self, param: FecParam) {
        let param = clamp_param(param);
        if self.window.is_empty() {
            self.param = param;
            self.pending_param = None;
        } else {
            self.pending_param = Some(param);
        }
    }

    /// Accept one outgoing segment, emitting FEC frames via `sink`.
    ///
    /// Emits the segment's `Source` frame immediately; when the window
    /// reaches `k` source units, also emits the window's `r` repair
    /// frames and opens a new window.
    pub fn write_segment(&mut self, segment: &Segment, sink: &mut dyn FnMut(FecFrame)) {
        if self.window.is_empty() {
            self.window_base = self.next_seq;
        }

        let encoded = segment.encode();
        let shard_index = self.window.len() as u8;
        let frame = FecFrame {
            header: FecFrameHeader {
                fec_seq: self.alloc_seq(),
                kind: FecFrameKind::Source,
                is_retransmit: false,
                shard_index,
                k: self.param.k,
                r: self.param.r,
                window_base: self.window_base,
                payload_len: encoded.len() as u16,
            },
            payload: encoded.clone(),
        };
        self.window.push(encoded);
        sink(frame);

        if self.window.len() >= usize::from(self.param.k) {
            self.close_window(sink);
        }
    }

    /// Close a partial window early, emitting repair frames over the
    /// units accumulated so far. No-op on an empty window.
    pub fn flush(&mut self, sink: &mut dyn FnMut(FecFrame)) {
        if !self.window.is_empty() {
            self.close_window(sink);
        }
    }

    fn alloc_seq(&mut self) -> u32 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        seq
    }

    /// Encode and emit the window's repair frames, then open a new
    /// window (applying any deferred parameter change).
    fn close_window(&mut self, sink: &mut dyn FnMut(FecFrame)) {
        let k = self.window.len();
        let r = usize::from(self.param.r);

        match self.encode_parity(k, r) {
            Ok(parity) => {
                for (index, shard) in parity.into_iter().enumerate() {
                    sink(FecFrame {
                        header: FecFrameHeader {
                            fec_seq: self.alloc_seq(),
                            kind: FecFrameKind::Repair,
                            is_retransmit: false,
                            shard_index: index as u8,
                            k: k as u8,
                            r: r as u8,
                            window_base: self.window_base,
                            payload_len: shard.len() as u16,
                        },
                        payload: Bytes::from(shard),
                    });
                }
            }
            Err(e) => {
                // Fail soft: the window goes out unprotected.
                error!(
                    target: "mt.fec",
                    k,
                    r,
                    error = %e,
                    "Repair encoding failed, window sent without redundancy"
                );
            }
        }

        self.window.clear();
        if let Some(param) = self.pending_param.take() {
            debug!(
                target: "mt.fec",
                k = param.k,
                r = param.r,
                "FEC parameters applied at window boundary"
            );
            self.param = param;
        }
    }

    fn encode_parity(
        &self,
        k: usize,
        r: usize,
    ) -> Result<Vec<Vec<u8>>, reed_solomon_erasure::Error> {
        let shard_len = self.window.iter().map(Bytes::len).max().unwrap_or(0);
        let rs = ReedSolomon::new(k, r)?;

        let mut shards: Vec<Vec<u8>> = self
            .window
            .iter()
            .map(|source| {
                let mut shard = vec![0u8; shard_len];
                if let Some(dst) = shard.get_mut(..source.len()) {
                    dst.copy_from_slice(source);
                }
                shard
            })
            .collect();
        shards.resize(k + r, vec![0u8; shard_len]);

        rs.encode(&mut shards)?;
        Ok(shards.split_off(k))
    }
}

fn clamp_param(param: FecParam) -> FecParam {
    FecParam {
        k: param.k.max(1),
        r: param.r.max(1),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn segment(frame_seq: u32, len: usize) -> Segment {
        Segment::new(frame_seq, 0, true, Bytes::from(vec![frame_seq as u8; len])).unwrap()
    }

    fn collect_window(encoder: &mut FecEncoder, count: u32, len: usize) -> Vec<FecFrame> {
        let mut frames = Vec::new();
        for seq in 0..count {
            encoder.write_segment(&segment(seq, len), &mut |f| frames.push(f));
        }
        frames
    }

    #[test]
    fn test_source_frames_precede_repairs() {
        let mut encoder = FecEncoder::new(FecParam { k: 4, r: 2 });
        let frames = collect_window(&mut encoder, 4, 100);

        assert_eq!(frames.len(), 6);
        assert!(frames[..4]
            .iter()
            .all(|f| f.header.kind == FecFrameKind::Source));
        assert!(frames[4..]
            .iter()
            .all(|f| f.header.kind == FecFrameKind::Repair));
    }

    #[test]
    fn test_fec_sequences_are_monotonic_and_shared() {
        let mut encoder = FecEncoder::new(FecParam { k: 2, r: 1 });
        let frames = collect_window(&mut encoder, 4, 50);

        let seqs: Vec<u32> = frames.iter().map(|f| f.header.fec_seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4, 5]);
        // Second window's base points at its first source unit.
        assert_eq!(frames[3].header.window_base, 3);
    }

    #[test]
    fn test_set_param_applies_at_window_boundary() {
        let mut encoder = FecEncoder::new(FecParam { k: 3, r: 1 });
        let mut frames = Vec::new();

        encoder.write_segment(&segment(0, 64), &mut |f| frames.push(f));
        encoder.set_param(FecParam { k: 2, r: 2 });
        // Mid-window: the open window keeps k=3.
        assert_eq!(encoder.param(), FecParam { k: 3, r: 1 });

        encoder.write_segment(&segment(1, 64), &mut |f| frames.push(f));
        encoder.write_segment(&segment(2, 64), &mut |f| frames.push(f));
        // Window closed with one repair, new parameters now in effect.
        assert_eq!(encoder.param(), FecParam { k: 2, r: 2 });
        assert_eq!(
            frames
                .iter()
                .filter(|f| f.header.kind == FecFrameKind::Repair)
                .count(),
            1
        );
    }

    #[test]
    fn test_flush_closes_partial_window() {
        let mut encoder = FecEncoder::new(FecParam { k: 8, r: 2 });
        let mut frames = Vec::new();

        for seq in 0..3 {
            encoder.write_segment(&segment(seq, 80), &mut |f| frames.push(f));
        }
        assert_eq!(frames.len(), 3);

        encoder.flush(&mut |f| frames.push(f));
        let repairs: Vec<&FecFrame> = frames
            .iter()
            .filter(|f| f.header.kind == FecFrameKind::Repair)
            .collect();
        assert_eq!(repairs.len(), 2);
        // Repair headers carry the actual window size.
        assert!(repairs.iter().all(|f| f.header.k == 3));
    }

    #[test]
    fn test_zero_params_clamped() {
        let encoder = FecEncoder::new(FecParam { k: 0, r: 0 });
        assert_eq!(encoder.param(), FecParam { k: 1, r: 1 });
    }

    #[test]
    fn test_repair_shards_padded_to_longest_source() {
        let mut encoder = FecEncoder::new(FecParam { k: 2, r: 1 });
        let mut frames = Vec::new();
        encoder.write_segment(&segment(0, 40), &mut |f| frames.push(f));
        encoder.write_segment(&segment(1, 200), &mut |f| frames.push(f));

        let repair = frames
            .iter()
            .find(|f| f.header.kind == FecFrameKind::Repair)
            .unwrap();
        // Longest source is the 200-byte payload plus 16-byte header.
        assert_eq!(repair.payload.len(), 216);
    }
}
