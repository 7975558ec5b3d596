//! oscb Protocol - OSC 1.0 data model and wire codec
//!
//! This crate provides the value types exchanged by the bridge
//! (atoms, messages, bundles, time tags), the binary codec that turns
//! them into UDP payloads, and address-pattern matching used for dispatch.
//!
//! All code follows the panic-free policy: decoding untrusted bytes
//! returns an error, it never panics.

pub mod atom;
pub mod codec;
pub mod message;
pub mod pattern;
pub mod time;

pub use atom::{Atom, AtomKind, TypeMismatch};
pub use codec::{decode, decode_message, encode, encode_message, encode_packet, DecodeError, EncodeError};
pub use message::{Bundle, Message, Packet};
pub use pattern::{pattern_matches, AddressPattern, PatternError};
pub use time::TimeTag;
