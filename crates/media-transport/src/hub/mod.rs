//! Per-stream relay hub.
//!
//! Each media stream runs one [`StreamHub`] actor that owns the
//! stream's packetizer, FEC encoder, retransmission history, parameter
//! controller, and negotiator. The hub binds at most one publisher
//! (inbound) channel and a set of subscriber (outbound) channels, and
//! multiplexes data, feedback, and capability negotiation between them.
//!
//! All state mutation goes through the actor's ordered mailbox; callers
//! hold a cloneable [`StreamHubHandle`]. Channels themselves are owned
//! by the external session layer, reached through the injected
//! [`ChannelTransport`]; the hub holds channel ids only.

mod actor;
mod messages;

pub use actor::{ChannelTransport, StreamHub, StreamHubHandle};
pub use messages::HubMessage;
