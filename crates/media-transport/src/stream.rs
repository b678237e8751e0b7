//! Stream identity and per-stream counters.

/// Kind of media source feeding a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaSourceKind {
    /// Camera capture.
    Camera,
    /// Microphone capture.
    Microphone,
    /// Screen share.
    Screen,
    /// Pre-recorded file playout.
    File,
}

/// Reference to the concrete media source of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MediaSource {
    /// Source kind.
    pub kind: MediaSourceKind,
    /// Source identifier within the publisher's device set.
    pub id: u32,
}

/// Kind of stream within a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Full-quality primary stream.
    Primary,
    /// Reduced-quality simulcast stream.
    Simulcast,
}

/// Reference to one stream of a media source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamRef {
    /// Stream kind.
    pub kind: StreamKind,
    /// Stream identifier within the source.
    pub id: u32,
}

/// Identity of a media stream. Immutable once the stream exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId {
    /// Owning application id.
    pub app_id: u32,
    /// Publishing user id.
    pub user_id: u64,
    /// Media source reference.
    pub source: MediaSource,
    /// Stream reference within the source.
    pub stream: StreamRef,
}

/// Running counters for one stream, reported by the hub.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Frames accepted from the publisher.
    pub frames_published: u64,
    /// Segments produced by packetization.
    pub segments_produced: u64,
    /// FEC frames (source + repair) emitted.
    pub fec_frames_emitted: u64,
    /// NACK sequences answered from the history.
    pub nacks_answered: u64,
    /// NACK sequences requested but already evicted or never seen.
    pub nacks_missed: u64,
    /// FEC parameter updates applied.
    pub fec_param_updates: u64,
    /// Frames dropped before fan-out (unparseable or no subscribers).
    pub frames_dropped: u64,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_stream_id_is_a_map_key() {
        let id = StreamId {
            app_id: 1,
            user_id: 42,
            source: MediaSource {
                kind: MediaSourceKind::Camera,
                id: 0,
            },
            stream: StreamRef {
                kind: StreamKind::Primary,
                id: 0,
            },
        };
        let mut set = HashSet::new();
        assert!(set.insert(id));
        assert!(!set.insert(id));
    }
}
