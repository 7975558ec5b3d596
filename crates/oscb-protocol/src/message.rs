//! OSC message and bundle envelopes.

use serde::Serialize;

use crate::atom::Atom;
use crate::time::TimeTag;

/// An address plus its positional arguments.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub address: String,
    pub args: Vec<Atom>,
}

impl Message {
    pub fn new(address: impl Into<String>, args: Vec<Atom>) -> Self {
        Self {
            address: address.into(),
            args,
        }
    }

    /// Creates a message with no arguments.
    pub fn bare(address: impl Into<String>) -> Self {
        Self::new(address, Vec::new())
    }

    /// Returns the type tag string, e.g. `",si"`.
    pub fn type_tags(&self) -> String {
        std::iter::once(',')
            .chain(self.args.iter().map(Atom::type_tag))
            .collect()
    }

    /// Returns the first argument if it is a string.
    ///
    /// Most bridge traffic is single-string control messages, so this saves
    /// the `args.first().and_then(..)` dance in handlers.
    pub fn first_string(&self) -> Option<&str> {
        self.args.first().and_then(|a| a.as_string().ok())
    }
}

/// A time-tagged group of packets delivered together.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bundle {
    pub time: TimeTag,
    pub content: Vec<Packet>,
}

impl Bundle {
    pub fn new(time: TimeTag, content: Vec<Packet>) -> Self {
        Self { time, content }
    }

    pub fn immediate(content: Vec<Packet>) -> Self {
        Self::new(TimeTag::IMMEDIATE, content)
    }
}

/// Anything that can travel in one datagram.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Packet {
    Message(Message),
    Bundle(Bundle),
}

impl Packet {
    /// Returns every message in the packet, depth-first in wire order.
    pub fn messages(&self) -> Vec<&Message> {
        let mut out = Vec::new();
        self.collect_messages(&mut out);
        out
    }

    /// Consumes the packet, returning its messages depth-first in wire order.
    pub fn into_messages(self) -> Vec<Message> {
        match self {
            Packet::Message(msg) => vec![msg],
            Packet::Bundle(bundle) => bundle
                .content
                .into_iter()
                .flat_map(Packet::into_messages)
                .collect(),
        }
    }

    fn collect_messages<'a>(&'a self, out: &mut Vec<&'a Message>) {
        match self {
            Packet::Message(msg) => out.push(msg),
            Packet::Bundle(bundle) => {
                for packet in &bundle.content {
                    packet.collect_messages(out);
                }
            }
        }
    }
}

impl From<Message> for Packet {
    fn from(msg: Message) -> Self {
        Packet::Message(msg)
    }
}

impl From<Bundle> for Packet {
    fn from(bundle: Bundle) -> Self {
        Packet::Bundle(bundle)
    }
}
