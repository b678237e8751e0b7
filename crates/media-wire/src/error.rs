//! Wire decode errors.

use thiserror::Error;

/// Error type for wire encode/decode operations.
///
/// A `WireError` never escalates beyond the decode call site: callers
/// log the malformed unit and drop it, the stream keeps running.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    /// Buffer too short for the structure being decoded.
    #[error("Insufficient data")]
    InsufficientData,

    /// A declared length contradicts the actual buffer length.
    #[error("Length mismatch: declared {declared}, actual {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    /// Segment length outside the valid `[16, 1500]` range.
    #[error("Segment length out of range: {0}")]
    SegmentLengthOutOfRange(u16),

    /// Unknown top-level message kind.
    #[error("Invalid message kind: {0}")]
    InvalidMessageKind(u8),

    /// Unknown feedback body kind.
    #[error("Invalid feedback kind: {0}")]
    InvalidFeedbackKind(u8),

    /// Unknown FEC frame kind.
    #[error("Invalid FEC frame kind: {0}")]
    InvalidFecKind(u8),

    /// Unknown audio sample rate class.
    #[error("Invalid sample rate class: {0}")]
    InvalidSampleRate(u8),

    /// Unknown negotiation result code.
    #[error("Invalid negotiation result: {0}")]
    InvalidNegotiationResult(u8),

    /// A capability string was not valid UTF-8.
    #[error("Invalid capability string")]
    InvalidCapability,
}
