//! Typed OSC argument values.
//!
//! An [`Atom`] carries exactly one OSC argument. Accessors are type-checked:
//! calling `as_string()` on an integer atom returns a [`TypeMismatch`]
//! instead of coercing.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::time::TimeTag;

/// A single typed OSC argument.
///
/// Serializes untagged, so a message prints as plain JSON values
/// (`["hello", 1, 0.5]`).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Atom {
    /// `i` - 32-bit signed integer
    Int(i32),
    /// `f` - 32-bit IEEE 754 float
    Float(f32),
    /// `s` - UTF-8 string (no interior NUL)
    String(String),
    /// `b` - opaque bytes
    Blob(Vec<u8>),
    /// `T` / `F` - carried in the type tag only
    Bool(bool),
    /// `N`
    Nil,
    /// `I` - "infinitum", used as a bang/trigger
    Impulse,
    /// `t` - NTP timestamp
    TimeTag(TimeTag),
    /// `h` - 64-bit signed integer
    Long(i64),
    /// `d` - 64-bit IEEE 754 float
    Double(f64),
    /// `c` - ASCII character sent as 32 bits
    Char(char),
    /// `m` - port id, status byte, data1, data2
    Midi([u8; 4]),
}

/// The variant of an [`Atom`] without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtomKind {
    Int,
    Float,
    String,
    Blob,
    Bool,
    Nil,
    Impulse,
    TimeTag,
    Long,
    Double,
    Char,
    Midi,
}

impl fmt::Display for AtomKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AtomKind::Int => "int32",
            AtomKind::Float => "float32",
            AtomKind::String => "string",
            AtomKind::Blob => "blob",
            AtomKind::Bool => "bool",
            AtomKind::Nil => "nil",
            AtomKind::Impulse => "impulse",
            AtomKind::TimeTag => "timetag",
            AtomKind::Long => "int64",
            AtomKind::Double => "float64",
            AtomKind::Char => "char",
            AtomKind::Midi => "midi",
        };
        f.write_str(name)
    }
}

/// Returned by an [`Atom`] accessor called on the wrong variant.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Type mismatch: expected {expected}, found {found}")]
pub struct TypeMismatch {
    pub expected: AtomKind,
    pub found: AtomKind,
}

impl Atom {
    /// Returns the variant of this atom.
    pub fn kind(&self) -> AtomKind {
        match self {
            Atom::Int(_) => AtomKind::Int,
            Atom::Float(_) => AtomKind::Float,
            Atom::String(_) => AtomKind::String,
            Atom::Blob(_) => AtomKind::Blob,
            Atom::Bool(_) => AtomKind::Bool,
            Atom::Nil => AtomKind::Nil,
            Atom::Impulse => AtomKind::Impulse,
            Atom::TimeTag(_) => AtomKind::TimeTag,
            Atom::Long(_) => AtomKind::Long,
            Atom::Double(_) => AtomKind::Double,
            Atom::Char(_) => AtomKind::Char,
            Atom::Midi(_) => AtomKind::Midi,
        }
    }

    /// Returns the OSC type tag character for this atom.
    pub fn type_tag(&self) -> char {
        match self {
            Atom::Int(_) => 'i',
            Atom::Float(_) => 'f',
            Atom::String(_) => 's',
            Atom::Blob(_) => 'b',
            Atom::Bool(true) => 'T',
            Atom::Bool(false) => 'F',
            Atom::Nil => 'N',
            Atom::Impulse => 'I',
            Atom::TimeTag(_) => 't',
            Atom::Long(_) => 'h',
            Atom::Double(_) => 'd',
            Atom::Char(_) => 'c',
            Atom::Midi(_) => 'm',
        }
    }

    fn mismatch(&self, expected: AtomKind) -> TypeMismatch {
        TypeMismatch {
            expected,
            found: self.kind(),
        }
    }

    pub fn is_int(&self) -> bool {
        matches!(self, Atom::Int(_))
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Atom::Float(_))
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Atom::String(_))
    }

    pub fn is_blob(&self) -> bool {
        matches!(self, Atom::Blob(_))
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, Atom::Bool(_))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Atom::Nil)
    }

    /// Returns true for any numeric variant (`i`, `f`, `h`, `d`).
    pub fn is_number(&self) -> bool {
        matches!(
            self,
            Atom::Int(_) | Atom::Float(_) | Atom::Long(_) | Atom::Double(_)
        )
    }

    pub fn as_int(&self) -> Result<i32, TypeMismatch> {
        match self {
            Atom::Int(v) => Ok(*v),
            other => Err(other.mismatch(AtomKind::Int)),
        }
    }

    pub fn as_float(&self) -> Result<f32, TypeMismatch> {
        match self {
            Atom::Float(v) => Ok(*v),
            other => Err(other.mismatch(AtomKind::Float)),
        }
    }

    pub fn as_string(&self) -> Result<&str, TypeMismatch> {
        match self {
            Atom::String(v) => Ok(v),
            other => Err(other.mismatch(AtomKind::String)),
        }
    }

    pub fn as_blob(&self) -> Result<&[u8], TypeMismatch> {
        match self {
            Atom::Blob(v) => Ok(v),
            other => Err(other.mismatch(AtomKind::Blob)),
        }
    }

    pub fn as_bool(&self) -> Result<bool, TypeMismatch> {
        match self {
            Atom::Bool(v) => Ok(*v),
            other => Err(other.mismatch(AtomKind::Bool)),
        }
    }

    pub fn as_time_tag(&self) -> Result<TimeTag, TypeMismatch> {
        match self {
            Atom::TimeTag(v) => Ok(*v),
            other => Err(other.mismatch(AtomKind::TimeTag)),
        }
    }

    pub fn as_long(&self) -> Result<i64, TypeMismatch> {
        match self {
            Atom::Long(v) => Ok(*v),
            other => Err(other.mismatch(AtomKind::Long)),
        }
    }

    pub fn as_double(&self) -> Result<f64, TypeMismatch> {
        match self {
            Atom::Double(v) => Ok(*v),
            other => Err(other.mismatch(AtomKind::Double)),
        }
    }

    pub fn as_char(&self) -> Result<char, TypeMismatch> {
        match self {
            Atom::Char(v) => Ok(*v),
            other => Err(other.mismatch(AtomKind::Char)),
        }
    }

    pub fn as_midi(&self) -> Result<[u8; 4], TypeMismatch> {
        match self {
            Atom::Midi(v) => Ok(*v),
            other => Err(other.mismatch(AtomKind::Midi)),
        }
    }

    /// Widens any numeric atom to `f64`.
    ///
    /// Max patches often send floats where an int is expected (and vice
    /// versa), so handlers that only care about the value use this.
    pub fn to_f64(&self) -> Result<f64, TypeMismatch> {
        match self {
            Atom::Int(v) => Ok(f64::from(*v)),
            Atom::Float(v) => Ok(f64::from(*v)),
            Atom::Long(v) => Ok(*v as f64),
            Atom::Double(v) => Ok(*v),
            other => Err(other.mismatch(AtomKind::Double)),
        }
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Atom::Int(v) => write!(f, "{v}"),
            Atom::Float(v) => write!(f, "{v}"),
            Atom::String(v) => write!(f, "{v:?}"),
            Atom::Blob(v) => write!(f, "<blob {} bytes>", v.len()),
            Atom::Bool(v) => write!(f, "{v}"),
            Atom::Nil => f.write_str("nil"),
            Atom::Impulse => f.write_str("impulse"),
            Atom::TimeTag(v) => write!(f, "{v}"),
            Atom::Long(v) => write!(f, "{v}"),
            Atom::Double(v) => write!(f, "{v}"),
            Atom::Char(v) => write!(f, "{v:?}"),
            Atom::Midi([port, status, d1, d2]) => {
                write!(f, "<midi {port:02x} {status:02x} {d1:02x} {d2:02x}>")
            }
        }
    }
}

impl From<i32> for Atom {
    fn from(v: i32) -> Self {
        Atom::Int(v)
    }
}

impl From<f32> for Atom {
    fn from(v: f32) -> Self {
        Atom::Float(v)
    }
}

impl From<i64> for Atom {
    fn from(v: i64) -> Self {
        Atom::Long(v)
    }
}

impl From<f64> for Atom {
    fn from(v: f64) -> Self {
        Atom::Double(v)
    }
}

impl From<bool> for Atom {
    fn from(v: bool) -> Self {
        Atom::Bool(v)
    }
}

impl From<char> for Atom {
    fn from(v: char) -> Self {
        Atom::Char(v)
    }
}

impl From<&str> for Atom {
    fn from(v: &str) -> Self {
        Atom::String(v.to_string())
    }
}

impl From<String> for Atom {
    fn from(v: String) -> Self {
        Atom::String(v)
    }
}

impl From<&String> for Atom {
    fn from(v: &String) -> Self {
        Atom::String(v.clone())
    }
}

impl From<Vec<u8>> for Atom {
    fn from(v: Vec<u8>) -> Self {
        Atom::Blob(v)
    }
}

impl From<&[u8]> for Atom {
    fn from(v: &[u8]) -> Self {
        Atom::Blob(v.to_vec())
    }
}

impl From<TimeTag> for Atom {
    fn from(v: TimeTag) -> Self {
        Atom::TimeTag(v)
    }
}

impl From<()> for Atom {
    fn from(_: ()) -> Self {
        Atom::Nil
    }
}

/// Builds a `Vec<Atom>` from values convertible into [`Atom`].
///
/// ```
/// use oscb_protocol::{atoms, Atom};
///
/// let args = atoms!["hello", 42, 0.5f32];
/// assert_eq!(args[0], Atom::String("hello".into()));
/// assert_eq!(args[1], Atom::Int(42));
/// ```
#[macro_export]
macro_rules! atoms {
    () => {
        ::std::vec::Vec::<$crate::Atom>::new()
    };
    ($($value:expr),+ $(,)?) => {
        ::std::vec![$($crate::Atom::from($value)),+]
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_accessor() {
        let atom = Atom::from("hello");
        assert!(atom.is_string());
        assert_eq!(atom.as_string().unwrap(), "hello");
    }

    #[test]
    fn test_accessor_type_mismatch() {
        let atom = Atom::Int(7);
        let err = atom.as_string().unwrap_err();
        assert_eq!(err.expected, AtomKind::String);
        assert_eq!(err.found, AtomKind::Int);
        assert!(err.to_string().contains("expected string"));
        assert!(err.to_string().contains("found int32"));
    }

    #[test]
    fn test_type_tags() {
        assert_eq!(Atom::Int(1).type_tag(), 'i');
        assert_eq!(Atom::Float(1.0).type_tag(), 'f');
        assert_eq!(Atom::from("x").type_tag(), 's');
        assert_eq!(Atom::Blob(vec![1]).type_tag(), 'b');
        assert_eq!(Atom::Bool(true).type_tag(), 'T');
        assert_eq!(Atom::Bool(false).type_tag(), 'F');
        assert_eq!(Atom::Nil.type_tag(), 'N');
        assert_eq!(Atom::Impulse.type_tag(), 'I');
        assert_eq!(Atom::Long(1).type_tag(), 'h');
        assert_eq!(Atom::Double(1.0).type_tag(), 'd');
        assert_eq!(Atom::Char('a').type_tag(), 'c');
        assert_eq!(Atom::Midi([0, 0x90, 60, 100]).type_tag(), 'm');
    }

    #[test]
    fn test_to_f64_widens_numbers() {
        assert_eq!(Atom::Int(3).to_f64().unwrap(), 3.0);
        assert_eq!(Atom::Float(0.5).to_f64().unwrap(), 0.5);
        assert_eq!(Atom::Long(-2).to_f64().unwrap(), -2.0);
        assert!(Atom::from("3").to_f64().is_err());
    }

    #[test]
    fn test_atoms_macro() {
        let args = atoms!["after_liveset_loaded", 1, 2.5f32, true];
        assert_eq!(args.len(), 4);
        assert_eq!(args[0].as_string().unwrap(), "after_liveset_loaded");
        assert_eq!(args[1].as_int().unwrap(), 1);
        assert_eq!(args[2].as_float().unwrap(), 2.5);
        assert!(args[3].as_bool().unwrap());

        let empty = atoms![];
        assert!(empty.is_empty());
    }

    #[test]
    fn test_serialize_untagged() {
        let args = atoms!["a", 1, Atom::Nil];
        let json = serde_json::to_string(&args).unwrap();
        assert_eq!(json, r#"["a",1,null]"#);
    }

    #[test]
    fn test_display() {
        assert_eq!(Atom::from("hi").to_string(), "\"hi\"");
        assert_eq!(Atom::Blob(vec![0; 3]).to_string(), "<blob 3 bytes>");
        assert_eq!(Atom::Midi([0, 0x90, 0x3c, 0x64]).to_string(), "<midi 00 90 3c 64>");
    }
}
