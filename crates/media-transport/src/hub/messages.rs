//! Stream hub mailbox messages.

use crate::errors::{ChannelId, HubError};
use crate::stream::StreamStats;
use bytes::Bytes;
use media_wire::message::MessageKind;
use tokio::sync::oneshot;

/// Messages processed by the [`super::StreamHub`] actor.
pub enum HubMessage {
    /// Bind the inbound slot to the publisher's channel.
    BindPublisher {
        channel_id: ChannelId,
        user_id: u64,
        respond_to: oneshot::Sender<Result<(), HubError>>,
    },

    /// Release the inbound slot.
    UnbindPublisher {
        channel_id: ChannelId,
        respond_to: oneshot::Sender<Result<(), HubError>>,
    },

    /// Add a subscriber channel to the outbound set.
    AddSubscriber {
        channel_id: ChannelId,
        user_id: u64,
        respond_to: oneshot::Sender<Result<(), HubError>>,
    },

    /// Remove a subscriber channel from the outbound set.
    RemoveSubscriber {
        channel_id: ChannelId,
        respond_to: oneshot::Sender<Result<(), HubError>>,
    },

    /// One encoded frame from the publisher, ready for the data path.
    PublishFrame { frame: Bytes },

    /// Raw signaling arriving on a channel, dispatched by kind.
    ChannelMessage {
        channel_id: ChannelId,
        kind: MessageKind,
        body: Bytes,
    },

    /// Read the stream's running counters.
    GetStats {
        respond_to: oneshot::Sender<StreamStats>,
    },
}
