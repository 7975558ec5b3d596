//! OSC 1.0 binary codec.
//!
//! # Wire format
//!
//! ```text
//! message := address-string  type-tag-string  argument*
//! string  := bytes NUL, padded with NUL to a multiple of 4
//! tags    := ',' tag* as a string
//! blob    := int32 size, bytes, padded to a multiple of 4
//! bundle  := "#bundle\0"  timetag(8)  (int32 size, packet)*
//! ```
//!
//! All numbers are big-endian. [`decode`] accepts untrusted input: every
//! failure is a [`DecodeError`], never a panic.

use thiserror::Error;

use crate::atom::Atom;
use crate::message::{Bundle, Message, Packet};
use crate::time::TimeTag;

/// Marker that opens every bundle.
pub const BUNDLE_TAG: &[u8; 8] = b"#bundle\0";

/// Nested bundles deeper than this are rejected.
pub const MAX_BUNDLE_DEPTH: usize = 8;

/// Largest payload a single UDP datagram can carry.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Reasons an inbound packet could not be decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Empty packet")]
    Empty,

    #[error("Address must start with '/': {0:?}")]
    MissingAddressPrefix(String),

    #[error("Missing ',' type tag string")]
    MissingTypeTags,

    #[error("Truncated packet: needed {needed} bytes at offset {offset}, {remaining} remaining")]
    Truncated {
        offset: usize,
        needed: usize,
        remaining: usize,
    },

    #[error("Unterminated string at offset {0}")]
    UnterminatedString(usize),

    #[error("Invalid UTF-8 in string at offset {0}")]
    InvalidUtf8(usize),

    #[error("Unknown type tag '{0}'")]
    UnknownTypeTag(char),

    #[error("Negative size {size} at offset {offset}")]
    NegativeSize { size: i32, offset: usize },

    #[error("Invalid char code point {0:#x}")]
    InvalidChar(u32),

    #[error("Bundle nesting exceeds {0} levels")]
    TooDeep(usize),

    #[error("{0} trailing bytes after last argument")]
    TrailingBytes(usize),
}

/// Reasons an outbound message could not be encoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("Address must start with '/': {0:?}")]
    InvalidAddress(String),

    #[error("String contains an interior NUL byte: {0:?}")]
    InteriorNul(String),

    #[error("Blob of {0} bytes exceeds the int32 size field")]
    BlobTooLarge(usize),

    #[error("Encoded packet of {0} bytes exceeds the {max}-byte datagram limit", max = MAX_DATAGRAM_SIZE)]
    TooLarge(usize),
}

// ============================================================================
// Encoding
// ============================================================================

/// Encodes `address` and `args` as a single OSC message.
pub fn encode(address: &str, args: &[Atom]) -> Result<Vec<u8>, EncodeError> {
    let mut buf = Vec::with_capacity(encoded_len_hint(address, args));
    write_message(&mut buf, address, args)?;
    fit_datagram(buf)
}

pub fn encode_message(message: &Message) -> Result<Vec<u8>, EncodeError> {
    encode(&message.address, &message.args)
}

pub fn encode_packet(packet: &Packet) -> Result<Vec<u8>, EncodeError> {
    let mut buf = Vec::new();
    write_packet(&mut buf, packet)?;
    fit_datagram(buf)
}

/// Anything larger cannot leave as one UDP datagram.
fn fit_datagram(buf: Vec<u8>) -> Result<Vec<u8>, EncodeError> {
    if buf.len() > MAX_DATAGRAM_SIZE {
        return Err(EncodeError::TooLarge(buf.len()));
    }
    Ok(buf)
}

fn encoded_len_hint(address: &str, args: &[Atom]) -> usize {
    padded_len(address.len() + 1) + padded_len(args.len() + 2) + args.len() * 8
}

fn write_packet(buf: &mut Vec<u8>, packet: &Packet) -> Result<(), EncodeError> {
    match packet {
        Packet::Message(msg) => write_message(buf, &msg.address, &msg.args),
        Packet::Bundle(bundle) => {
            buf.extend_from_slice(BUNDLE_TAG);
            buf.extend_from_slice(&bundle.time.to_bits().to_be_bytes());
            for element in &bundle.content {
                let size_at = buf.len();
                buf.extend_from_slice(&[0; 4]);
                write_packet(buf, element)?;
                let size = buf.len() - size_at - 4;
                let size = i32::try_from(size).map_err(|_| EncodeError::BlobTooLarge(size))?;
                buf[size_at..size_at + 4].copy_from_slice(&size.to_be_bytes());
            }
            Ok(())
        }
    }
}

fn write_message(buf: &mut Vec<u8>, address: &str, args: &[Atom]) -> Result<(), EncodeError> {
    if !address.starts_with('/') {
        return Err(EncodeError::InvalidAddress(address.to_string()));
    }
    write_string(buf, address)?;

    let tags: String = std::iter::once(',').chain(args.iter().map(Atom::type_tag)).collect();
    write_string(buf, &tags)?;

    for arg in args {
        write_atom(buf, arg)?;
    }
    Ok(())
}

fn write_atom(buf: &mut Vec<u8>, atom: &Atom) -> Result<(), EncodeError> {
    match atom {
        Atom::Int(v) => buf.extend_from_slice(&v.to_be_bytes()),
        Atom::Float(v) => buf.extend_from_slice(&v.to_be_bytes()),
        Atom::String(v) => write_string(buf, v)?,
        Atom::Blob(v) => {
            let size = i32::try_from(v.len()).map_err(|_| EncodeError::BlobTooLarge(v.len()))?;
            buf.extend_from_slice(&size.to_be_bytes());
            buf.extend_from_slice(v);
            pad(buf);
        }
        Atom::Bool(_) | Atom::Nil | Atom::Impulse => {}
        Atom::TimeTag(v) => buf.extend_from_slice(&v.to_bits().to_be_bytes()),
        Atom::Long(v) => buf.extend_from_slice(&v.to_be_bytes()),
        Atom::Double(v) => buf.extend_from_slice(&v.to_be_bytes()),
        Atom::Char(v) => buf.extend_from_slice(&u32::from(*v).to_be_bytes()),
        Atom::Midi(v) => buf.extend_from_slice(v),
    }
    Ok(())
}

fn write_string(buf: &mut Vec<u8>, s: &str) -> Result<(), EncodeError> {
    if s.as_bytes().contains(&0) {
        return Err(EncodeError::InteriorNul(s.to_string()));
    }
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
    pad(buf);
    Ok(())
}

fn pad(buf: &mut Vec<u8>) {
    buf.resize(padded_len(buf.len()), 0);
}

fn padded_len(len: usize) -> usize {
    (len + 3) & !3
}

// ============================================================================
// Decoding
// ============================================================================

/// Decodes one datagram into a message or bundle.
pub fn decode(bytes: &[u8]) -> Result<Packet, DecodeError> {
    decode_at_depth(bytes, 0)
}

/// Decodes a datagram that must hold a single message (not a bundle).
pub fn decode_message(bytes: &[u8]) -> Result<Message, DecodeError> {
    let mut reader = Reader::new(bytes);
    let msg = reader.message()?;
    reader.finish()?;
    Ok(msg)
}

fn decode_at_depth(bytes: &[u8], depth: usize) -> Result<Packet, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    if bytes.starts_with(BUNDLE_TAG) {
        if depth >= MAX_BUNDLE_DEPTH {
            return Err(DecodeError::TooDeep(MAX_BUNDLE_DEPTH));
        }
        return decode_bundle(bytes, depth).map(Packet::Bundle);
    }
    decode_message(bytes).map(Packet::Message)
}

fn decode_bundle(bytes: &[u8], depth: usize) -> Result<Bundle, DecodeError> {
    let mut reader = Reader::new(bytes);
    reader.take(BUNDLE_TAG.len())?;
    let time = TimeTag::from_bits(reader.u64()?);

    let mut content = Vec::new();
    while !reader.is_at_end() {
        let offset = reader.pos;
        let size = reader.i32()?;
        let size = usize::try_from(size).map_err(|_| DecodeError::NegativeSize { size, offset })?;
        let element = reader.take(size)?;
        content.push(decode_at_depth(element, depth + 1)?);
    }
    Ok(Bundle { time, content })
}

/// Bounds-checked cursor over a datagram.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.pos)
    }

    fn is_at_end(&self) -> bool {
        self.remaining() == 0
    }

    fn finish(&self) -> Result<(), DecodeError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(DecodeError::TrailingBytes(n)),
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(DecodeError::Truncated {
                offset: self.pos,
                needed: n,
                remaining: self.remaining(),
            })?;
        let slice = self.bytes.get(self.pos..end).ok_or(DecodeError::Truncated {
            offset: self.pos,
            needed: n,
            remaining: self.remaining(),
        })?;
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn i32(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_be_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_be_bytes(self.array()?))
    }

    fn string(&mut self) -> Result<&'a str, DecodeError> {
        let start = self.pos;
        let rest = self.bytes.get(start..).unwrap_or_default();
        let nul = rest
            .iter()
            .position(|b| *b == 0)
            .ok_or(DecodeError::UnterminatedString(start))?;
        let raw = self.take(padded_len(nul + 1))?;
        let text = raw.get(..nul).unwrap_or_default();
        std::str::from_utf8(text).map_err(|_| DecodeError::InvalidUtf8(start))
    }

    fn blob(&mut self) -> Result<Vec<u8>, DecodeError> {
        let offset = self.pos;
        let size = self.i32()?;
        let size = usize::try_from(size).map_err(|_| DecodeError::NegativeSize { size, offset })?;
        let data = self.take(size)?.to_vec();
        self.take(padded_len(size) - size)?;
        Ok(data)
    }

    fn message(&mut self) -> Result<Message, DecodeError> {
        let address = self.string()?;
        if !address.starts_with('/') {
            return Err(DecodeError::MissingAddressPrefix(address.to_string()));
        }
        let address = address.to_string();

        if self.is_at_end() {
            return Err(DecodeError::MissingTypeTags);
        }
        let tags = self.string()?;
        let tags = tags.strip_prefix(',').ok_or(DecodeError::MissingTypeTags)?;

        let mut args = Vec::with_capacity(tags.len());
        for tag in tags.chars() {
            args.push(self.atom(tag)?);
        }
        Ok(Message { address, args })
    }

    fn atom(&mut self, tag: char) -> Result<Atom, DecodeError> {
        let atom = match tag {
            'i' => Atom::Int(self.i32()?),
            'f' => Atom::Float(f32::from_be_bytes(self.array()?)),
            's' | 'S' => Atom::String(self.string()?.to_string()),
            'b' => Atom::Blob(self.blob()?),
            'T' => Atom::Bool(true),
            'F' => Atom::Bool(false),
            'N' => Atom::Nil,
            'I' => Atom::Impulse,
            't' => Atom::TimeTag(TimeTag::from_bits(self.u64()?)),
            'h' => Atom::Long(i64::from_be_bytes(self.array()?)),
            'd' => Atom::Double(f64::from_be_bytes(self.array()?)),
            'c' => {
                let code = self.u32()?;
                Atom::Char(char::from_u32(code).ok_or(DecodeError::InvalidChar(code))?)
            }
            'm' => Atom::Midi(self.array()?),
            other => return Err(DecodeError::UnknownTypeTag(other)),
        };
        Ok(atom)
    }
}
