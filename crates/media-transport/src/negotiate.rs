//! Capability negotiation.
//!
//! Each channel agrees on one media capability before data flows. The
//! hub holds the stream's supported capability list; a request carries
//! the remote side's candidates in preference order, and the first
//! mutually supported entry wins.

use media_wire::message::{NegotiationRequest, NegotiationResponse, NegotiationResult};
use tracing::debug;

/// The capability both sides agreed on for a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedCapability(pub String);

/// Stream-side negotiation logic.
pub struct Negotiator {
    supported: Vec<String>,
}

impl Negotiator {
    /// Create a negotiator with the stream's supported capabilities.
    #[must_use]
    pub fn new(supported: Vec<String>) -> Self {
        Self { supported }
    }

    /// Whether the stream supports `capability`.
    #[must_use]
    pub fn supports(&self, capability: &str) -> bool {
        self.supported.iter().any(|s| s == capability)
    }

    /// Answer a negotiation request: the first requested capability the
    /// stream supports is accepted.
    #[must_use]
    pub fn negotiate(&self, request: &NegotiationRequest) -> NegotiationResponse {
        for candidate in &request.capabilities {
            if self.supports(candidate) {
                return NegotiationResponse {
                    result: NegotiationResult::Accepted,
                    capability: candidate.clone(),
                };
            }
        }

        debug!(
            target: "mt.negotiate",
            requested = request.capabilities.len(),
            "No mutually supported capability"
        );
        NegotiationResponse {
            result: NegotiationResult::Unsupported,
            capability: String::new(),
        }
    }
}
