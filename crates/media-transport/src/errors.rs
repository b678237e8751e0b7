//! Transport core error types.
//!
//! Errors follow a fail-soft discipline: malformed wire input is logged
//! and dropped at the decode site, protocol-state errors are returned
//! to the immediate caller, and resource bounds are handled by named
//! eviction policies. Nothing here stops a stream.

use media_wire::WireError;
use thiserror::Error;

/// Channel identifier assigned by the session layer.
pub type ChannelId = u64;

/// Stream hub error type.
#[derive(Debug, Error)]
pub enum HubError {
    /// The inbound slot is already bound to a publisher channel.
    #[error("Publisher already bound")]
    PublisherAlreadyBound,

    /// A subscriber entry already exists for this channel.
    #[error("Duplicate channel: {0}")]
    DuplicateChannel(ChannelId),

    /// The referenced channel is not known to the hub.
    #[error("Unknown channel: {0}")]
    UnknownChannel(ChannelId),

    /// A frame failed to packetize (bad header or length mismatch).
    #[error("Packetize error: {0}")]
    Packetize(#[from] PacketizeError),

    /// The hub mailbox is gone (actor stopped).
    #[error("Hub unavailable: {0}")]
    Mailbox(String),
}

/// Packetization error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketizeError {
    /// The frame's encoded header could not be parsed.
    #[error("Frame header: {0}")]
    Header(#[from] WireError),

    /// The header's declared payload length contradicts the buffer.
    #[error("Frame length mismatch: declared {declared}, actual {actual}")]
    LengthMismatch { declared: usize, actual: usize },
}

/// Error delivering a buffer to a channel via the session layer.
#[derive(Debug, Error)]
pub enum SendError {
    /// The session layer no longer knows this channel.
    #[error("Channel closed: {0}")]
    ChannelClosed(ChannelId),

    /// Transient delivery failure.
    #[error("Send failed: {0}")]
    Failed(String),
}
