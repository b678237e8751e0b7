//! Media transport core.
//!
//! This crate is the subsystem that moves live audio/video between one
//! publisher and many subscribers: it turns an encoded frame into
//! wire-sized segments, protects the segment stream with forward error
//! correction, archives emitted FEC frames for NACK-driven
//! retransmission, adapts FEC strength to receiver feedback, and
//! reassembles frames on the far side while tolerating loss and
//! reordering.
//!
//! # Architecture
//!
//! Publish path (inside the [`hub::StreamHub`] actor):
//!
//! ```text
//! publisher frame
//!   └── Packetizer           (frame -> segments)
//!         └── FecEncoder     (segments -> source + repair FEC frames)
//!               ├── RetransmissionHistory   (archival copy, NACK answers)
//!               └── fan-out to every negotiated subscriber channel
//! ```
//!
//! Receive path (subscriber side, independent of the hub):
//!
//! ```text
//! arriving FEC frames
//!   └── FecDecoder           (recovers lost source segments)
//!         └── Audio/VideoReassembler -> FrameSink (render/playout)
//! ```
//!
//! Feedback from subscribers flows back through the hub: NACKs are
//! answered from the retransmission history, state reports drive the
//! [`fec::FecParamController`], whose recommendations retune the
//! encoder's `(k, r)`.
//!
//! # Concurrency
//!
//! Each stream runs one [`hub::StreamHub`] actor draining an ordered
//! mailbox; all per-stream state is owned by that task and no locking
//! is needed. Callers hold a cloneable [`hub::StreamHubHandle`]. None
//! of the core transformations block; network I/O belongs to the
//! session layer behind the [`hub::ChannelTransport`] trait.

#![warn(clippy::pedantic)]

pub mod config;
pub mod errors;
pub mod fec;
pub mod history;
pub mod hub;
pub mod negotiate;
pub mod packetizer;
pub mod reassembly;
pub mod stream;

#[cfg(test)]
pub(crate) mod testutil;
