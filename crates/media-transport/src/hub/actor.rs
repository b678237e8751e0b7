//! The stream hub actor and its handle.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use media_wire::fec::FecFrame;
use media_wire::frame::StreamType;
use media_wire::message::{Feedback, MessageKind, NegotiationRequest, NegotiationResponse, NegotiationResult};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::TransportConfig;
use crate::errors::{ChannelId, HubError, SendError};
use crate::fec::{FecEncoder, FecParam, FecParamController};
use crate::history::RetransmissionHistory;
use crate::hub::messages::HubMessage;
use crate::negotiate::{NegotiatedCapability, Negotiator};
use crate::packetizer::Packetizer;
use crate::stream::{StreamId, StreamStats};

/// Hub mailbox depth. The data path backpressures the publisher when
/// the hub falls behind.
const HUB_CHANNEL_BUFFER: usize = 256;

/// Session-layer delivery seam.
///
/// The hub only ever pushes encoded message bodies through this trait;
/// the session layer owns channel lifetimes and the actual sockets.
/// Failures are reported per call and never stop the stream.
#[async_trait::async_trait]
pub trait ChannelTransport: Send + Sync {
    /// Deliver one encoded message body of `kind` to `channel_id`.
    async fn send_to_channel(
        &self,
        channel_id: ChannelId,
        kind: MessageKind,
        body: Bytes,
    ) -> Result<(), SendError>;
}

/// The publisher's inbound slot. At most one per stream.
struct PublisherSlot {
    channel_id: ChannelId,
    user_id: u64,
}

/// Per-subscriber state.
struct SubscriberContext {
    user_id: u64,
    /// Set once negotiation accepts a capability; gates the data path.
    negotiated: Option<NegotiatedCapability>,
}

/// Per-stream relay actor.
///
/// Owns the full send-side pipeline for one stream: packetization,
/// FEC encoding, the retransmission archive, and fan-out to subscriber
/// channels. All state is private to the actor task; interaction goes
/// through [`StreamHubHandle`].
pub struct StreamHub {
    stream_id: StreamId,
    stream_type: StreamType,
    receiver: mpsc::Receiver<HubMessage>,
    cancel_token: CancellationToken,
    transport: Arc<dyn ChannelTransport>,
    packetizer: Packetizer,
    fec: FecEncoder,
    history: RetransmissionHistory,
    controller: FecParamController,
    negotiator: Negotiator,
    publisher: Option<PublisherSlot>,
    subscribers: HashMap<ChannelId, SubscriberContext>,
    stats: StreamStats,
}

/// Cloneable handle to a running [`StreamHub`].
#[derive(Clone)]
pub struct StreamHubHandle {
    sender: mpsc::Sender<HubMessage>,
    cancel_token: CancellationToken,
    stream_id: StreamId,
}

impl StreamHub {
    /// Spawn a new stream hub actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        stream_id: StreamId,
        stream_type: StreamType,
        config: &TransportConfig,
        supported: Vec<String>,
        transport: Arc<dyn ChannelTransport>,
        cancel_token: CancellationToken,
    ) -> (StreamHubHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(HUB_CHANNEL_BUFFER);

        let actor = Self {
            stream_id,
            stream_type,
            receiver,
            cancel_token: cancel_token.clone(),
            transport,
            packetizer: Packetizer::new(config.max_payload),
            fec: FecEncoder::new(FecParam {
                k: config.fec_k,
                r: config.fec_r,
            }),
            history: RetransmissionHistory::new(config.history_capacity),
            controller: FecParamController::new(config),
            negotiator: Negotiator::new(supported),
            publisher: None,
            subscribers: HashMap::new(),
            stats: StreamStats::default(),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = StreamHubHandle {
            sender,
            cancel_token,
            stream_id,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(
        skip_all,
        name = "mt.hub",
        fields(
            app_id = self.stream_id.app_id,
            user_id = self.stream_id.user_id,
        )
    )]
    async fn run(mut self) {
        debug!(
            target: "mt.hub",
            app_id = self.stream_id.app_id,
            user_id = self.stream_id.user_id,
            stream_type = ?self.stream_type,
            "StreamHub started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "mt.hub",
                        user_id = self.stream_id.user_id,
                        "StreamHub received cancellation signal"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message).await,
                        None => {
                            debug!(
                                target: "mt.hub",
                                user_id = self.stream_id.user_id,
                                "StreamHub mailbox closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "mt.hub",
            user_id = self.stream_id.user_id,
            frames_published = self.stats.frames_published,
            fec_frames_emitted = self.stats.fec_frames_emitted,
            "StreamHub stopped"
        );
    }

    /// Handle a single mailbox message.
    async fn handle_message(&mut self, message: HubMessage) {
        match message {
            HubMessage::BindPublisher {
                channel_id,
                user_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_bind_publisher(channel_id, user_id));
            }

            HubMessage::UnbindPublisher {
                channel_id,
                respond_to,
            } => {
                let result = self.handle_unbind_publisher(channel_id).await;
                let _ = respond_to.send(result);
            }

            HubMessage::AddSubscriber {
                channel_id,
                user_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_add_subscriber(channel_id, user_id));
            }

            HubMessage::RemoveSubscriber {
                channel_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_remove_subscriber(channel_id));
            }

            HubMessage::PublishFrame { frame } => {
                self.handle_publish_frame(frame).await;
            }

            HubMessage::ChannelMessage {
                channel_id,
                kind,
                body,
            } => {
                self.handle_channel_message(channel_id, kind, body).await;
            }

            HubMessage::GetStats { respond_to } => {
                let _ = respond_to.send(self.stats);
            }
        }
    }

    fn handle_bind_publisher(
        &mut self,
        channel_id: ChannelId,
        user_id: u64,
    ) -> Result<(), HubError> {
        if self.publisher.is_some() {
            warn!(
                target: "mt.hub",
                channel_id,
                user_id,
                "Rejected publisher bind, inbound slot already taken"
            );
            return Err(HubError::PublisherAlreadyBound);
        }

        info!(
            target: "mt.hub",
            channel_id,
            user_id,
            "Publisher bound"
        );
        self.publisher = Some(PublisherSlot {
            channel_id,
            user_id,
        });
        Ok(())
    }

    /// Release the inbound slot, flushing any partial FEC window so its
    /// repair frames still go out.
    async fn handle_unbind_publisher(&mut self, channel_id: ChannelId) -> Result<(), HubError> {
        match &self.publisher {
            Some(slot) if slot.channel_id == channel_id => {
                info!(
                    target: "mt.hub",
                    channel_id,
                    user_id = slot.user_id,
                    "Publisher unbound"
                );
                self.publisher = None;

                let mut fec_frames = Vec::new();
                self.fec.flush(&mut |frame| fec_frames.push(frame));
                self.stats.fec_frames_emitted += fec_frames.len() as u64;
                self.dispatch_fec_frames(fec_frames).await;
                Ok(())
            }
            _ => Err(HubError::UnknownChannel(channel_id)),
        }
    }

    fn handle_add_subscriber(
        &mut self,
        channel_id: ChannelId,
        user_id: u64,
    ) -> Result<(), HubError> {
        if self.subscribers.contains_key(&channel_id) {
            return Err(HubError::DuplicateChannel(channel_id));
        }

        debug!(
            target: "mt.hub",
            channel_id,
            user_id,
            "Subscriber added"
        );
        self.subscribers.insert(
            channel_id,
            SubscriberContext {
                user_id,
                negotiated: None,
            },
        );
        Ok(())
    }

    fn handle_remove_subscriber(&mut self, channel_id: ChannelId) -> Result<(), HubError> {
        if self.subscribers.remove(&channel_id).is_none() {
            return Err(HubError::UnknownChannel(channel_id));
        }
        debug!(target: "mt.hub", channel_id, "Subscriber removed");
        Ok(())
    }

    /// Data path: packetize the frame, run the segments through the FEC
    /// encoder, archive every FEC frame, and fan out to negotiated
    /// subscribers.
    async fn handle_publish_frame(&mut self, frame: Bytes) {
        let segments = match self.packetizer.segment(self.stream_type, frame) {
            Ok(segments) => segments,
            Err(error) => {
                warn!(
                    target: "mt.hub",
                    user_id = self.stream_id.user_id,
                    %error,
                    "Dropping unparseable published frame"
                );
                self.stats.frames_dropped += 1;
                return;
            }
        };

        self.stats.frames_published += 1;
        self.stats.segments_produced += segments.len() as u64;

        let mut fec_frames = Vec::new();
        for segment in &segments {
            self.fec
                .write_segment(segment, &mut |frame| fec_frames.push(frame));
        }
        self.stats.fec_frames_emitted += fec_frames.len() as u64;

        if !self
            .subscribers
            .values()
            .any(|sub| sub.negotiated.is_some())
        {
            self.stats.frames_dropped += 1;
        }

        self.dispatch_fec_frames(fec_frames).await;
    }

    /// Archive FEC frames and deliver them to every negotiated
    /// subscriber. Send failures are logged and skipped; one slow or
    /// dead channel never blocks the rest.
    async fn dispatch_fec_frames(&mut self, frames: Vec<FecFrame>) {
        let targets: Vec<ChannelId> = self
            .subscribers
            .iter()
            .filter(|(_, sub)| sub.negotiated.is_some())
            .map(|(channel_id, _)| *channel_id)
            .collect();

        for frame in &frames {
            self.history.save(frame);

            let body = frame.encode();
            for channel_id in &targets {
                if let Err(error) = self
                    .transport
                    .send_to_channel(*channel_id, MessageKind::StreamData, body.clone())
                    .await
                {
                    warn!(
                        target: "mt.hub",
                        channel_id,
                        fec_seq = frame.header.fec_seq,
                        %error,
                        "Failed to deliver FEC frame to subscriber"
                    );
                }
            }
        }
    }

    /// Dispatch inbound signaling by message kind. Malformed bodies and
    /// messages from unexpected channels are logged and dropped.
    async fn handle_channel_message(&mut self, channel_id: ChannelId, kind: MessageKind, body: Bytes) {
        match kind {
            MessageKind::StreamData => {
                let from_publisher = self
                    .publisher
                    .as_ref()
                    .is_some_and(|slot| slot.channel_id == channel_id);
                if from_publisher {
                    self.handle_publish_frame(body).await;
                } else {
                    warn!(
                        target: "mt.hub",
                        channel_id,
                        "Dropping stream data from non-publisher channel"
                    );
                }
            }

            MessageKind::StreamFeedback => {
                self.handle_feedback(channel_id, body).await;
            }

            MessageKind::NegotiationRequest => {
                self.handle_negotiation_request(channel_id, body).await;
            }

            MessageKind::NegotiationResponse => {
                self.handle_negotiation_response(channel_id, body);
            }
        }
    }

    /// Feedback from the publisher's channel is passed through
    /// unprocessed. Feedback from a subscriber is routed: NACKs are
    /// answered from the archive, state reports feed the FEC parameter
    /// controller and are relayed to the publisher so the sender side
    /// can adapt too.
    async fn handle_feedback(&mut self, channel_id: ChannelId, body: Bytes) {
        if let Some(slot) = &self.publisher {
            if slot.channel_id == channel_id {
                if let Err(error) = self
                    .transport
                    .send_to_channel(channel_id, MessageKind::StreamFeedback, body)
                    .await
                {
                    warn!(
                        target: "mt.hub",
                        channel_id,
                        %error,
                        "Failed to pass publisher feedback through"
                    );
                }
                return;
            }
        }

        let Some(subscriber) = self.subscribers.get(&channel_id) else {
            warn!(
                target: "mt.hub",
                channel_id,
                "Dropping feedback from unknown channel"
            );
            return;
        };
        let user_id = subscriber.user_id;

        let feedback = match Feedback::decode(&mut body.clone()) {
            Ok(feedback) => feedback,
            Err(error) => {
                warn!(
                    target: "mt.hub",
                    channel_id,
                    user_id,
                    %error,
                    "Dropping malformed feedback body"
                );
                return;
            }
        };

        match feedback {
            Feedback::Nack(nack) => {
                let answers = self
                    .history
                    .on_nack_request(channel_id, user_id, &nack.sequences);
                self.stats.nacks_answered += answers.len() as u64;
                self.stats.nacks_missed +=
                    (nack.sequences.len() - answers.len()) as u64;

                for answer in answers {
                    if let Err(error) = self
                        .transport
                        .send_to_channel(channel_id, MessageKind::StreamData, answer)
                        .await
                    {
                        warn!(
                            target: "mt.hub",
                            channel_id,
                            %error,
                            "Failed to deliver retransmission"
                        );
                    }
                }
            }

            Feedback::StateReport(report) => {
                if let Some(param) = self.controller.on_state_feedback(&report) {
                    self.fec.set_param(param);
                    self.stats.fec_param_updates += 1;
                    info!(
                        target: "mt.hub",
                        user_id = self.stream_id.user_id,
                        k = param.k,
                        r = param.r,
                        "Applied new FEC parameters"
                    );
                }

                if let Some(slot) = &self.publisher {
                    if let Err(error) = self
                        .transport
                        .send_to_channel(slot.channel_id, MessageKind::StreamFeedback, body)
                        .await
                    {
                        warn!(
                            target: "mt.hub",
                            channel_id = slot.channel_id,
                            %error,
                            "Failed to relay state report to publisher"
                        );
                    }
                }
            }
        }
    }

    async fn handle_negotiation_request(&mut self, channel_id: ChannelId, body: Bytes) {
        let request = match NegotiationRequest::decode(&mut body.clone()) {
            Ok(request) => request,
            Err(error) => {
                warn!(
                    target: "mt.hub",
                    channel_id,
                    %error,
                    "Dropping malformed negotiation request"
                );
                return;
            }
        };

        let response = self.negotiator.negotiate(&request);
        if response.result == NegotiationResult::Accepted {
            self.mark_negotiated(channel_id, &response.capability);
        }

        if let Err(error) = self
            .transport
            .send_to_channel(
                channel_id,
                MessageKind::NegotiationResponse,
                response.encode(),
            )
            .await
        {
            warn!(
                target: "mt.hub",
                channel_id,
                %error,
                "Failed to deliver negotiation response"
            );
        }
    }

    /// A response arrives when the hub initiated negotiation toward a
    /// receiver; an accepted capability opens that channel's data path.
    /// The claimed capability must be one this stream supports, so a
    /// remote side cannot open its own data path with an arbitrary
    /// response.
    fn handle_negotiation_response(&mut self, channel_id: ChannelId, body: Bytes) {
        let response = match NegotiationResponse::decode(&mut body.clone()) {
            Ok(response) => response,
            Err(error) => {
                warn!(
                    target: "mt.hub",
                    channel_id,
                    %error,
                    "Dropping malformed negotiation response"
                );
                return;
            }
        };

        if response.result != NegotiationResult::Accepted {
            return;
        }
        if !self.negotiator.supports(&response.capability) {
            warn!(
                target: "mt.hub",
                channel_id,
                capability = %response.capability,
                "Dropping negotiation response for unsupported capability"
            );
            return;
        }
        self.mark_negotiated(channel_id, &response.capability);
    }

    /// Records the agreed capability for a subscriber. A channel
    /// negotiates at most once; repeat agreements keep the original
    /// capability.
    fn mark_negotiated(&mut self, channel_id: ChannelId, capability: &str) {
        if let Some(subscriber) = self.subscribers.get_mut(&channel_id) {
            if subscriber.negotiated.is_some() {
                debug!(
                    target: "mt.hub",
                    channel_id,
                    capability,
                    "Channel already negotiated, keeping existing capability"
                );
                return;
            }
            info!(
                target: "mt.hub",
                channel_id,
                user_id = subscriber.user_id,
                capability,
                "Subscriber negotiated"
            );
            subscriber.negotiated = Some(NegotiatedCapability(capability.to_string()));
        }
    }
}

impl StreamHubHandle {
    /// Identity of the stream this hub relays.
    #[must_use]
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    /// Bind the publisher's channel to the inbound slot.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::PublisherAlreadyBound`] if a publisher is
    /// already bound, or [`HubError::Mailbox`] if the actor is gone.
    pub async fn bind_publisher(
        &self,
        channel_id: ChannelId,
        user_id: u64,
    ) -> Result<(), HubError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(HubMessage::BindPublisher {
                channel_id,
                user_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| HubError::Mailbox(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| HubError::Mailbox(format!("response receive failed: {e}")))?
    }

    /// Release the inbound slot.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::UnknownChannel`] if the slot is not bound to
    /// this channel, or [`HubError::Mailbox`] if the actor is gone.
    pub async fn unbind_publisher(&self, channel_id: ChannelId) -> Result<(), HubError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(HubMessage::UnbindPublisher {
                channel_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| HubError::Mailbox(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| HubError::Mailbox(format!("response receive failed: {e}")))?
    }

    /// Add a subscriber channel. The channel receives stream data only
    /// after successful capability negotiation.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::DuplicateChannel`] if the channel is already
    /// subscribed, or [`HubError::Mailbox`] if the actor is gone.
    pub async fn add_subscriber(
        &self,
        channel_id: ChannelId,
        user_id: u64,
    ) -> Result<(), HubError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(HubMessage::AddSubscriber {
                channel_id,
                user_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| HubError::Mailbox(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| HubError::Mailbox(format!("response receive failed: {e}")))?
    }

    /// Remove a subscriber channel.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::UnknownChannel`] if the channel is not
    /// subscribed, or [`HubError::Mailbox`] if the actor is gone.
    pub async fn remove_subscriber(&self, channel_id: ChannelId) -> Result<(), HubError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(HubMessage::RemoveSubscriber {
                channel_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| HubError::Mailbox(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| HubError::Mailbox(format!("response receive failed: {e}")))?
    }

    /// Push one encoded media frame into the data path. Fire and
    /// forget; per-frame failures are logged inside the actor.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Mailbox`] if the actor is gone.
    pub async fn publish_frame(&self, frame: Bytes) -> Result<(), HubError> {
        self.sender
            .send(HubMessage::PublishFrame { frame })
            .await
            .map_err(|e| HubError::Mailbox(format!("channel send failed: {e}")))
    }

    /// Hand the hub an inbound channel message for dispatch by kind.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Mailbox`] if the actor is gone.
    pub async fn channel_message(
        &self,
        channel_id: ChannelId,
        kind: MessageKind,
        body: Bytes,
    ) -> Result<(), HubError> {
        self.sender
            .send(HubMessage::ChannelMessage {
                channel_id,
                kind,
                body,
            })
            .await
            .map_err(|e| HubError::Mailbox(format!("channel send failed: {e}")))
    }

    /// Read the stream's running counters.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Mailbox`] if the actor is gone.
    pub async fn stats(&self) -> Result<StreamStats, HubError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(HubMessage::GetStats { respond_to: tx })
            .await
            .map_err(|e| HubError::Mailbox(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| HubError::Mailbox(format!("response receive failed: {e}")))
    }

    /// Stop the actor.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}
