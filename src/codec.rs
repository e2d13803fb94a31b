// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Value Codec
//!
//! Self-describing binary encoding for preference values. The persistence
//! layer only understands non-null strings, so every typed value (including
//! null strings and null-bearing sets) is flattened into bytes here before it
//! is encrypted.
//!
//! ## Layout
//!
//! ```text
//! +----------------+---------------------------------------------+
//! | tag: i32 (BE)  | payload                                     |
//! +----------------+---------------------------------------------+
//!   0 String        len: i32 (BE) | utf8 bytes
//!   1 StringSet     (len: i32 (BE) | utf8 bytes)*   zero or more members
//!   2 Int           i32 (BE)
//!   3 Long          i64 (BE)
//!   4 Float         f32 bits (BE)
//!   5 Boolean       u8 (0 or 1)
//! ```
//!
//! This layout is persisted (encrypted) and must stay stable across versions.

use std::collections::BTreeSet;
use std::fmt;

/// Sentinel written in place of a null string, and as the single member of a
/// null string set.
pub const NULL_VALUE: &str = "__NULL__";

/// Sentinel written in place of a null member inside a non-null string set.
pub const NULL_ELEMENT: &str = "__NULL_ELEMENT__";

/// A set of optional strings. Ordered so the encoding is deterministic.
pub type StringSet = BTreeSet<Option<String>>;

/// Errors raised while decoding an encoded value.
///
/// All of these indicate corrupted plaintext or codec version skew and are
/// not recoverable by retrying.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodingError {
    #[error("unknown value type tag: {0}")]
    UnknownTypeTag(i32),

    #[error("encoded value truncated: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    #[error("negative length prefix: {0}")]
    NegativeLength(i32),

    #[error("string payload is not valid UTF-8")]
    InvalidUtf8,
}

/// Logical type of a stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    String,
    StringSet,
    Int,
    Long,
    Float,
    Boolean,
}

impl ValueType {
    /// Wire tag for this type.
    pub fn tag(self) -> i32 {
        match self {
            ValueType::String => 0,
            ValueType::StringSet => 1,
            ValueType::Int => 2,
            ValueType::Long => 3,
            ValueType::Float => 4,
            ValueType::Boolean => 5,
        }
    }

    /// Resolve a wire tag, `None` if unknown.
    pub fn from_tag(tag: i32) -> Option<Self> {
        match tag {
            0 => Some(ValueType::String),
            1 => Some(ValueType::StringSet),
            2 => Some(ValueType::Int),
            3 => Some(ValueType::Long),
            4 => Some(ValueType::Float),
            5 => Some(ValueType::Boolean),
            _ => None,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::String => "String",
            ValueType::StringSet => "StringSet",
            ValueType::Int => "Int",
            ValueType::Long => "Long",
            ValueType::Float => "Float",
            ValueType::Boolean => "Boolean",
        };
        f.write_str(name)
    }
}

/// A decoded preference value.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    String(Option<String>),
    StringSet(Option<StringSet>),
    Int(i32),
    Long(i64),
    Float(f32),
    Boolean(bool),
}

impl TypedValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            TypedValue::String(_) => ValueType::String,
            TypedValue::StringSet(_) => ValueType::StringSet,
            TypedValue::Int(_) => ValueType::Int,
            TypedValue::Long(_) => ValueType::Long,
            TypedValue::Float(_) => ValueType::Float,
            TypedValue::Boolean(_) => ValueType::Boolean,
        }
    }
}

/// Encode a value. Total and deterministic.
///
/// The layout cannot represent strings (or set members) longer than
/// `i32::MAX` bytes: they are cut to the longest prefix that fits, ending on
/// a character boundary, and do not round-trip.
pub fn encode(value: &TypedValue) -> Vec<u8> {
    let mut out = Vec::with_capacity(16);
    out.extend_from_slice(&value.value_type().tag().to_be_bytes());

    match value {
        TypedValue::String(s) => {
            put_str(&mut out, s.as_deref().unwrap_or(NULL_VALUE));
        }
        TypedValue::StringSet(None) => {
            put_str(&mut out, NULL_VALUE);
        }
        TypedValue::StringSet(Some(set)) => {
            for member in set {
                put_str(&mut out, member.as_deref().unwrap_or(NULL_ELEMENT));
            }
        }
        TypedValue::Int(v) => out.extend_from_slice(&v.to_be_bytes()),
        TypedValue::Long(v) => out.extend_from_slice(&v.to_be_bytes()),
        TypedValue::Float(v) => out.extend_from_slice(&v.to_bits().to_be_bytes()),
        TypedValue::Boolean(v) => out.push(u8::from(*v)),
    }

    out
}

/// Decode a value produced by [`encode`].
pub fn decode(bytes: &[u8]) -> Result<TypedValue, EncodingError> {
    let mut reader = Reader::new(bytes);
    let tag = reader.read_i32()?;
    let value_type = ValueType::from_tag(tag).ok_or(EncodingError::UnknownTypeTag(tag))?;

    let value = match value_type {
        ValueType::String => {
            let s = reader.read_str()?;
            if s == NULL_VALUE {
                TypedValue::String(None)
            } else {
                TypedValue::String(Some(s.to_string()))
            }
        }
        ValueType::StringSet => TypedValue::StringSet(decode_set(&mut reader)?),
        ValueType::Int => TypedValue::Int(reader.read_i32()?),
        ValueType::Long => TypedValue::Long(i64::from_be_bytes(reader.take_array()?)),
        ValueType::Float => TypedValue::Float(f32::from_bits(u32::from_be_bytes(
            reader.take_array()?,
        ))),
        ValueType::Boolean => TypedValue::Boolean(reader.take_array::<1>()?[0] != 0),
    };

    Ok(value)
}

fn decode_set(reader: &mut Reader<'_>) -> Result<Option<StringSet>, EncodingError> {
    let mut set = StringSet::new();
    let mut first = true;

    while reader.remaining() > 0 {
        let member = reader.read_str()?;
        // A null set is written as one sentinel member; a genuinely empty set
        // is written with no members at all. A leading sentinel marks the
        // whole set null whatever follows it.
        if first && member == NULL_VALUE {
            return Ok(None);
        }
        first = false;

        if member == NULL_ELEMENT {
            set.insert(None);
        } else {
            set.insert(Some(member.to_string()));
        }
    }

    Ok(Some(set))
}

/// Longest string the `i32` length prefix can describe.
const MAX_STR_LEN: usize = i32::MAX as usize;

fn put_str(out: &mut Vec<u8>, s: &str) {
    let s = representable_prefix(s, MAX_STR_LEN);
    out.extend_from_slice(&(s.len() as i32).to_be_bytes());
    out.extend_from_slice(s.as_bytes());
}

/// Longest prefix of `s` of at most `limit` bytes that ends on a character
/// boundary, so a cut string still decodes as UTF-8.
fn representable_prefix(s: &str, limit: usize) -> &str {
    if s.len() <= limit {
        return s;
    }
    let mut end = limit;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], EncodingError> {
        if self.remaining() < n {
            return Err(EncodingError::Truncated {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], EncodingError> {
        let mut arr = [0u8; N];
        arr.copy_from_slice(self.take(N)?);
        Ok(arr)
    }

    fn read_i32(&mut self) -> Result<i32, EncodingError> {
        Ok(i32::from_be_bytes(self.take_array()?))
    }

    fn read_str(&mut self) -> Result<&'a str, EncodingError> {
        let len = self.read_i32()?;
        let len = usize::try_from(len).map_err(|_| EncodingError::NegativeLength(len))?;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes).map_err(|_| EncodingError::InvalidUtf8)
    }
}
