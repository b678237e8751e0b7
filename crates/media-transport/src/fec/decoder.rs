//! Receive-side FEC decoding.
//!
//! Collects the source and repair shards of each FEC window. Source
//! segments are surfaced as soon as they arrive; when enough shards of
//! a window are present to run Reed-Solomon reconstruction and at
//! least one source is still missing, the decoder recovers the missing
//! segments and surfaces those too. Each source segment is surfaced at
//! most once, so retransmitted copies deduplicate naturally.

use media_wire::fec::{FecFrame, FecFrameKind};
use media_wire::segment::{Segment, SegmentHeader};
use reed_solomon_erasure::galois_8::ReedSolomon;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, warn};

/// Default bound on concurrently tracked FEC windows.
pub const DEFAULT_MAX_WINDOWS: usize = 8;

/// Per-window reconstruction state.
struct WindowState {
    /// Window size; authoritative value comes from repair headers
    /// (flushed windows close smaller than the sources announced).
    k: u8,
    r: u8,
    /// `k` from a repair header, which overrides the source-announced
    /// value once seen.
    k_confirmed: bool,
    /// Received source shards by index, unpadded.
    sources: HashMap<u8, Vec<u8>>,
    /// Received repair shards by index, padded length.
    repairs: HashMap<u8, Vec<u8>>,
    /// Source indices already surfaced to the caller.
    emitted: Vec<u8>,
}

impl WindowState {
    fn new(k: u8, r: u8) -> Self {
        Self {
            k,
            r,
            k_confirmed: false,
            sources: HashMap::new(),
            repairs: HashMap::new(),
            emitted: Vec::new(),
        }
    }
}

/// FEC decoder for one stream direction.
pub struct FecDecoder {
    windows: HashMap<u32, WindowState>,
    /// Insertion order for window eviction.
    order: VecDeque<u32>,
    max_windows: usize,
}

impl FecDecoder {
    /// Create a decoder tracking at most `max_windows` open windows.
    #[must_use]
    pub fn new(max_windows: usize) -> Self {
        Self {
            windows: HashMap::new(),
            order: VecDeque::new(),
            max_windows: max_windows.max(1),
        }
    }

    /// Accept one arriving FEC frame, returning any source segments
    /// that became available: the carried segment for a first-seen
    /// source frame, plus any segments recovered by reconstruction.
    pub fn on_fec_frame(&mut self, frame: FecFrame) -> Vec<Segment> {
        let base = frame.header.window_base;

        if !self.windows.contains_key(&base) {
            if self.windows.len() >= self.max_windows {
                self.evict_oldest();
            }
            self.windows
                .insert(base, WindowState::new(frame.header.k, frame.header.r));
            self.order.push_back(base);
        }
        let Some(window) = self.windows.get_mut(&base) else {
            return Vec::new();
        };

        let mut available = Vec::new();
        match frame.header.kind {
            FecFrameKind::Source => {
                let index = frame.header.shard_index;
                if window.emitted.contains(&index) {
                    debug!(
                        target: "mt.fec.decoder",
                        window_base = base,
                        shard_index = index,
                        "Source already surfaced, ignoring copy"
                    );
                } else {
                    match Segment::decode(frame.payload.clone()) {
                        Ok(segment) => {
                            window.sources.insert(index, frame.payload.to_vec());
                            window.emitted.push(index);
                            available.push(segment);
                        }
                        Err(e) => {
                            warn!(
                                target: "mt.fec.decoder",
                                window_base = base,
                                error = %e,
                                "Malformed source segment in FEC frame, dropping"
                            );
                        }
                    }
                }
            }
            FecFrameKind::Repair => {
                // Repair headers carry the window's final size.
                if !window.k_confirmed {
                    window.k = frame.header.k;
                    window.r = frame.header.r;
                    window.k_confirmed = true;
                }
                window
                    .repairs
                    .insert(frame.header.shard_index, frame.payload.to_vec());
            }
        }

        available.extend(Self::try_reconstruct(window, base));
        available
    }

    /// Attempt Reed-Solomon reconstruction of a window's missing
    /// sources. Returns recovered segments, already marked emitted.
    fn try_reconstruct(window: &mut WindowState, base: u32) -> Vec<Segment> {
        let k = usize::from(window.k);
        let r = usize::from(window.r);
        let missing = k.saturating_sub(window.sources.len());

        if missing == 0 || window.repairs.is_empty() {
            return Vec::new();
        }
        if window.sources.len() + window.repairs.len() < k {
            return Vec::new();
        }

        let Some(shard_len) = window.repairs.values().map(Vec::len).max() else {
            return Vec::new();
        };

        let rs = match ReedSolomon::new(k, r) {
            Ok(rs) => rs,
            Err(e) => {
                warn!(
                    target: "mt.fec.decoder",
                    window_base = base,
                    k,
                    r,
                    error = %e,
                    "Invalid window geometry, skipping reconstruction"
                );
                return Vec::new();
            }
        };

        let mut shards: Vec<Option<Vec<u8>>> = (0..k + r)
            .map(|index| {
                if index < k {
                    window.sources.get(&(index as u8)).map(|source| {
                        let mut shard = source.clone();
                        shard.resize(shard_len, 0);
                        shard
                    })
                } else {
                    window.repairs.get(&((index - k) as u8)).cloned()
                }
            })
            .collect();

        if let Err(e) = rs.reconstruct(&mut shards) {
            debug!(
                target: "mt.fec.decoder",
                window_base = base,
                error = %e,
                "Reconstruction not yet possible"
            );
            return Vec::new();
        }

        let mut recovered = Vec::new();
        for index in 0..k {
            let index_u8 = index as u8;
            if window.emitted.contains(&index_u8) {
                continue;
            }
            let Some(Some(shard)) = shards.get(index) else {
                continue;
            };
            match segment_from_padded(shard) {
                Some(segment) => {
                    window.sources.insert(index_u8, shard.clone());
                    window.emitted.push(index_u8);
                    recovered.push(segment);
                }
                None => {
                    warn!(
                        target: "mt.fec.decoder",
                        window_base = base,
                        shard_index = index,
                        "Recovered shard does not decode to a segment, dropping"
                    );
                }
            }
        }
        recovered
    }

    fn evict_oldest(&mut self) {
        if let Some(base) = self.order.pop_front() {
            debug!(
                target: "mt.fec.decoder",
                window_base = base,
                "Window cache full, evicting oldest FEC window"
            );
            self.windows.remove(&base);
        }
    }
}

/// Decode a segment from a zero-padded shard: the segment header's
/// declared length bounds the real bytes.
fn segment_from_padded(shard: &[u8]) -> Option<Segment> {
    let mut prefix = shard.get(..SegmentHeader::SIZE.min(shard.len()))?;
    let header = SegmentHeader::decode(&mut prefix).ok()?;
    let bytes = shard.get(..usize::from(header.segment_len))?;
    Segment::decode(bytes::Bytes::copy_from_slice(bytes)).ok()
}
