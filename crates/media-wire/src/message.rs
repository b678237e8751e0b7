//! Channel message bodies: stream data framing, feedback (state
//! reports, NACKs), and capability negotiation.
//!
//! Incoming signaling on a channel is tagged with a [`MessageKind`] and
//! dispatched by the stream hub; unrecognized kinds are logged and
//! dropped, never fatal.

use crate::error::WireError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Upper bound on sequences in one NACK request.
pub const MAX_NACK_SEQUENCES: usize = 64;

/// Upper bound on capability strings in one negotiation request.
pub const MAX_CAPABILITIES: usize = 16;

/// Upper bound on one capability string's encoded length.
pub const MAX_CAPABILITY_LEN: usize = 256;

/// Top-level kind of a channel message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    /// Encoded media frame (publisher) or FEC frame (subscriber).
    StreamData = 0x01,
    /// Feedback body: state report or NACK.
    StreamFeedback = 0x02,
    /// Capability negotiation request.
    NegotiationRequest = 0x03,
    /// Capability negotiation response.
    NegotiationResponse = 0x04,
}

impl MessageKind {
    /// Parse a message kind tag.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::InvalidMessageKind`] for an unknown tag.
    pub fn from_u8(value: u8) -> Result<Self, WireError> {
        match value {
            0x01 => Ok(Self::StreamData),
            0x02 => Ok(Self::StreamFeedback),
            0x03 => Ok(Self::NegotiationRequest),
            0x04 => Ok(Self::NegotiationResponse),
            other => Err(WireError::InvalidMessageKind(other)),
        }
    }
}

/// A decoded feedback body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feedback {
    /// Periodic receiver state report.
    StateReport(StateFeedback),
    /// Retransmission request for specific FEC sequences.
    Nack(NackRequest),
}

impl Feedback {
    /// Encode the feedback body (1-byte kind tag plus payload).
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        match self {
            Self::StateReport(report) => {
                buf.put_u8(0x02);
                report.encode(&mut buf);
            }
            Self::Nack(nack) => {
                buf.put_u8(0x01);
                nack.encode(&mut buf);
            }
        }
        buf.freeze()
    }

    /// Decode a feedback body.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty buffer, an unknown kind tag, or a
    /// malformed payload.
    pub fn decode(data: &mut impl Buf) -> Result<Self, WireError> {
        if data.remaining() < 1 {
            return Err(WireError::InsufficientData);
        }
        match data.get_u8() {
            0x01 => NackRequest::decode(data).map(Self::Nack),
            0x02 => StateFeedback::decode(data).map(Self::StateReport),
            other => Err(WireError::InvalidFeedbackKind(other)),
        }
    }
}

/// Periodic receiver state report.
///
/// Loss ratios are carried as basis points (0..=10000) so the body has
/// a fixed integer layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StateFeedback {
    /// Observation window start, milliseconds since epoch.
    pub window_start_ms: u64,
    /// Observation window end, milliseconds since epoch.
    pub window_end_ms: u64,
    /// Packets received in the window.
    pub packets_received: u32,
    /// Packets lost in the window.
    pub packets_lost: u32,
    /// Round-trip time estimate in milliseconds.
    pub rtt_ms: u32,
    /// Overall loss ratio, basis points.
    pub loss_overall_bp: u16,
    /// Loss recoverable by FEC, basis points.
    pub loss_recoverable_bp: u16,
    /// Loss attributable to the network, basis points.
    pub loss_network_bp: u16,
    /// Loss corrected by FEC, basis points.
    pub loss_corrected_bp: u16,
}

impl StateFeedback {
    /// Encoded body size in bytes.
    pub const SIZE: usize = 36;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64(self.window_start_ms);
        buf.put_u64(self.window_end_ms);
        buf.put_u32(self.packets_received);
        buf.put_u32(self.packets_lost);
        buf.put_u32(self.rtt_ms);
        buf.put_u16(self.loss_overall_bp);
        buf.put_u16(self.loss_recoverable_bp);
        buf.put_u16(self.loss_network_bp);
        buf.put_u16(self.loss_corrected_bp);
    }

    fn decode(data: &mut impl Buf) -> Result<Self, WireError> {
        if data.remaining() < Self::SIZE {
            return Err(WireError::InsufficientData);
        }
        Ok(Self {
            window_start_ms: data.get_u64(),
            window_end_ms: data.get_u64(),
            packets_received: data.get_u32(),
            packets_lost: data.get_u32(),
            rtt_ms: data.get_u32(),
            loss_overall_bp: data.get_u16(),
            loss_recoverable_bp: data.get_u16(),
            loss_network_bp: data.get_u16(),
            loss_corrected_bp: data.get_u16(),
        })
    }
}

/// Retransmission request: FEC sequence numbers the receiver is missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NackRequest {
    /// Missing FEC sequence numbers.
    pub sequences: Vec<u32>,
}

impl NackRequest {
    fn encode(&self, buf: &mut BytesMut) {
        let count = self.sequences.len().min(MAX_NACK_SEQUENCES);
        buf.put_u16(count as u16);
        for seq in self.sequences.iter().take(count) {
            buf.put_u32(*seq);
        }
    }

    fn decode(data: &mut impl Buf) -> Result<Self, WireError> {
        if data.remaining() < 2 {
            return Err(WireError::InsufficientData);
        }
        let count = data.get_u16() as usize;
        if count > MAX_NACK_SEQUENCES {
            return Err(WireError::LengthMismatch {
                declared: count,
                actual: MAX_NACK_SEQUENCES,
            });
        }
        if data.remaining() < count * 4 {
            return Err(WireError::InsufficientData);
        }
        let mut sequences = Vec::with_capacity(count);
        for _ in 0..count {
            sequences.push(data.get_u32());
        }
        Ok(Self { sequences })
    }
}

/// Capability negotiation request: candidate capability strings in
/// preference order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationRequest {
    /// Candidate capabilities, most preferred first.
    pub capabilities: Vec<String>,
}

impl NegotiationRequest {
    /// Encode the request body.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        let count = self.capabilities.len().min(MAX_CAPABILITIES);
        buf.put_u8(count as u8);
        for cap in self.capabilities.iter().take(count) {
            let bytes = cap.as_bytes();
            let len = bytes.len().min(MAX_CAPABILITY_LEN);
            buf.put_u16(len as u16);
            buf.extend_from_slice(bytes.get(..len).unwrap_or_default());
        }
        buf.freeze()
    }

    /// Decode a request body.
    ///
    /// # Errors
    ///
    /// Returns an error for short buffers, oversized counts or lengths,
    /// or non-UTF-8 capability strings.
    pub fn decode(data: &mut impl Buf) -> Result<Self, WireError> {
        if data.remaining() < 1 {
            return Err(WireError::InsufficientData);
        }
        let count = data.get_u8() as usize;
        if count > MAX_CAPABILITIES {
            return Err(WireError::LengthMismatch {
                declared: count,
                actual: MAX_CAPABILITIES,
            });
        }
        let mut capabilities = Vec::with_capacity(count);
        for _ in 0..count {
            capabilities.push(decode_capability(data)?);
        }
        Ok(Self { capabilities })
    }
}

/// Result code of a negotiation exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NegotiationResult {
    /// A mutually supported capability was selected.
    Accepted = 0x00,
    /// No requested capability is supported.
    Unsupported = 0x01,
}

impl NegotiationResult {
    fn from_u8(value: u8) -> Result<Self, WireError> {
        match value {
            0x00 => Ok(Self::Accepted),
            0x01 => Ok(Self::Unsupported),
            other => Err(WireError::InvalidNegotiationResult(other)),
        }
    }
}

/// Capability negotiation response: result code plus the accepted
/// capability (empty when unsupported).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationResponse {
    /// Outcome of the exchange.
    pub result: NegotiationResult,
    /// Accepted capability string (empty on `Unsupported`).
    pub capability: String,
}

impl NegotiationResponse {
    /// Encode the response body.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(self.result as u8);
        let bytes = self.capability.as_bytes();
        let len = bytes.len().min(MAX_CAPABILITY_LEN);
        buf.put_u16(len as u16);
        buf.extend_from_slice(bytes.get(..len).unwrap_or_default());
        buf.freeze()
    }

    /// Decode a response body.
    ///
    /// # Errors
    ///
    /// Returns an error for short buffers, unknown result codes, or a
    /// non-UTF-8 capability string.
    pub fn decode(data: &mut impl Buf) -> Result<Self, WireError> {
        if data.remaining() < 1 {
            return Err(WireError::InsufficientData);
        }
        let result = NegotiationResult::from_u8(data.get_u8())?;
        let capability = decode_capability(data)?;
        Ok(Self { result, capability })
    }
}

fn decode_capability(data: &mut impl Buf) -> Result<String, WireError> {
    if data.remaining() < 2 {
        return Err(WireError::InsufficientData);
    }
    let len = data.get_u16() as usize;
    if len > MAX_CAPABILITY_LEN {
        return Err(WireError::LengthMismatch {
            declared: len,
            actual: MAX_CAPABILITY_LEN,
        });
    }
    if data.remaining() < len {
        return Err(WireError::InsufficientData);
    }
    let mut bytes = vec![0u8; len];
    data.copy_to_slice(&mut bytes);
    String::from_utf8(bytes).map_err(|_| WireError::InvalidCapability)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_state_report_roundtrip() {
        let report = StateFeedback {
            window_start_ms: 10_000,
            window_end_ms: 12_000,
            packets_received: 480,
            packets_lost: 12,
            rtt_ms: 85,
            loss_overall_bp: 250,
            loss_recoverable_bp: 180,
            loss_network_bp: 70,
            loss_corrected_bp: 160,
        };

        let wire = Feedback::StateReport(report).encode();
        let decoded = Feedback::decode(&mut wire.clone()).unwrap();
        assert_eq!(decoded, Feedback::StateReport(report));
    }

    #[test]
    fn test_nack_roundtrip() {
        let nack = NackRequest {
            sequences: vec![17, 19, 23],
        };
        let wire = Feedback::Nack(nack.clone()).encode();
        let decoded = Feedback::decode(&mut wire.clone()).unwrap();
        assert_eq!(decoded, Feedback::Nack(nack));
    }

    #[test]
    fn test_nack_rejects_oversized_count() {
        let mut buf = BytesMut::new();
        buf.put_u8(0x01);
        buf.put_u16(5000);
        let err = Feedback::decode(&mut buf.freeze()).unwrap_err();
        assert!(matches!(err, WireError::LengthMismatch { .. }));
    }

    #[test]
    fn test_feedback_rejects_unknown_kind() {
        let mut buf = BytesMut::new();
        buf.put_u8(0x09);
        let err = Feedback::decode(&mut buf.freeze()).unwrap_err();
        assert_eq!(err, WireError::InvalidFeedbackKind(0x09));
    }

    #[test]
    fn test_negotiation_roundtrip() {
        let request = NegotiationRequest {
            capabilities: vec!["opus/48000/2".to_string(), "pcma/8000/1".to_string()],
        };
        let wire = request.encode();
        let decoded = NegotiationRequest::decode(&mut wire.clone()).unwrap();
        assert_eq!(decoded, request);

        let response = NegotiationResponse {
            result: NegotiationResult::Accepted,
            capability: "opus/48000/2".to_string(),
        };
        let wire = response.encode();
        let decoded = NegotiationResponse::decode(&mut wire.clone()).unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn test_negotiation_rejects_bad_utf8() {
        let mut buf = BytesMut::new();
        buf.put_u8(1);
        buf.put_u16(2);
        buf.extend_from_slice(&[0xFF, 0xFE]);
        let err = NegotiationRequest::decode(&mut buf.freeze()).unwrap_err();
        assert_eq!(err, WireError::InvalidCapability);
    }

    #[test]
    fn test_message_kind_parse() {
        assert_eq!(MessageKind::from_u8(0x01).unwrap(), MessageKind::StreamData);
        assert_eq!(
            MessageKind::from_u8(0x7E).unwrap_err(),
            WireError::InvalidMessageKind(0x7E)
        );
    }
}
