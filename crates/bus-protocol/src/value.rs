//! Typed argument values.
//!
//! Every argument carries one of three wire types. The conversions mirror
//! the serializer rules: integers become `Uint`, text becomes `Text`, raw
//! bytes become `Binary`, and booleans become `Uint` 0/1.

use indexmap::IndexMap;
use std::borrow::Cow;
use std::fmt;

/// An insertion-ordered argument map.
pub type Args = IndexMap<String, Value>;

/// One typed argument value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Wire type 0: opaque bytes.
    Binary(Vec<u8>),
    /// Wire type 1: UTF-8 text.
    Text(String),
    /// Wire type 2: 32-bit unsigned integer, big-endian on the wire.
    Uint(u32),
}

impl Value {
    /// Borrow the value as text if it is a `Text`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The value as an integer if it is a `Uint`.
    pub fn as_uint(&self) -> Option<u32> {
        match self {
            Value::Uint(n) => Some(*n),
            _ => None,
        }
    }

    /// Render the value as text regardless of type: binary is decoded
    /// lossily, integers print in decimal.
    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            Value::Binary(b) => String::from_utf8_lossy(b),
            Value::Text(s) => Cow::Borrowed(s),
            Value::Uint(n) => Cow::Owned(n.to_string()),
        }
    }

    /// Interpret the value as a flag. Zero, the empty string/bytes, `"0"`,
    /// and `"false"` are false; everything else is true.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Binary(b) => !b.is_empty(),
            Value::Text(s) => !s.is_empty() && s != "0" && !s.eq_ignore_ascii_case("false"),
            Value::Uint(n) => *n != 0,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_text())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Binary(b)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Uint(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Uint(u32::from(b))
    }
}
