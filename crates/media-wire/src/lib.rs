//! Wire formats for the media transport core.
//!
//! This crate implements the binary encodings that cross the network:
//! segment headers, audio/video frame headers, FEC frames, and the
//! feedback / NACK / negotiation message bodies. Everything here is a
//! pure transformation over byte buffers with no I/O and no state.
//!
//! All multi-byte fields are big-endian (network order). Decoding is
//! bounds-checked and returns a typed [`error::WireError`]; a buffer is
//! never reinterpreted in place as a header struct.

#![warn(clippy::pedantic)]

pub mod error;
pub mod fec;
pub mod frame;
pub mod message;
pub mod segment;

pub use error::WireError;
