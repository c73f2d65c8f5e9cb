//! Key/location comparison capabilities (spec Section 9, "Covariant
//! factory objects with polymorphic new/max" redesign flag).
//!
//! The teacher's B-tree is hard-wired to its own `Tuple`/`IntField`
//! types; the spec replaces the original's reflective key/location
//! "factory" registry with two small traits the tree is generic over,
//! each with one concrete byte-oriented implementation — variable
//! length keys compared lexicographically, and a fixed 8-byte row
//! location. `INFINITY` is the sentinel high key of the rightmost
//! page at every level (spec Section 3, "rightmost key ... INFINITY
//! that cannot be deleted").

use std::cmp::Ordering;
use std::fmt;

use crate::io::{Decodeable, Encodeable};

/// A comparable, encodable key. `INFINITY` must compare greater than
/// every key a codec will ever produce from real data.
pub trait KeyCodec: fmt::Debug + Clone + Eq {
    fn compare(&self, other: &Self) -> Ordering;
    fn is_infinity(&self) -> bool;
    fn infinity() -> Self;
}

/// A comparable, encodable row location (spec Section 3, "Index
/// Item", the `location` field).
pub trait LocationCodec: fmt::Debug + Clone + Copy + Eq {
    fn compare(&self, other: &Self) -> Ordering;
}

/// Variable-length byte-string keys, compared lexicographically. The
/// infinity sentinel is represented out-of-band (`is_infinity`/a
/// dedicated constructor) rather than as a reserved byte value, so
/// every possible byte string remains a valid ordinary key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BytesKey {
    Value(Vec<u8>),
    Infinity,
}

impl KeyCodec for BytesKey {
    fn compare(&self, other: &Self) -> Ordering {
        match (self, other) {
            (BytesKey::Infinity, BytesKey::Infinity) => Ordering::Equal,
            (BytesKey::Infinity, _) => Ordering::Greater,
            (_, BytesKey::Infinity) => Ordering::Less,
            (BytesKey::Value(a), BytesKey::Value(b)) => a.cmp(b),
        }
    }

    fn is_infinity(&self) -> bool {
        matches!(self, BytesKey::Infinity)
    }

    fn infinity() -> Self {
        BytesKey::Infinity
    }
}

impl BytesKey {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        BytesKey::Value(bytes.into())
    }
}

impl Encodeable for BytesKey {
    fn encode(&self) -> Vec<u8> {
        match self {
            BytesKey::Infinity => {
                let mut buf = vec![1u8];
                buf.extend(Vec::<u8>::new().encode());
                buf
            }
            BytesKey::Value(v) => {
                let mut buf = vec![0u8];
                buf.extend(v.encode());
                buf
            }
        }
    }
}

impl Decodeable for BytesKey {
    fn decode_from<R: std::io::Read>(reader: &mut R) -> Self {
        let tag = u8::decode_from(reader);
        let bytes = Vec::<u8>::decode_from(reader);
        if tag == 1 {
            BytesKey::Infinity
        } else {
            BytesKey::Value(bytes)
        }
    }
}

/// A row identifier: for this crate's scope, the heap page number and
/// slot holding the tuple the key indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowLocation {
    pub page_number: u32,
    pub slot: u16,
}

impl RowLocation {
    pub const NULL: RowLocation = RowLocation {
        page_number: u32::MAX,
        slot: u16::MAX,
    };

    pub fn new(page_number: u32, slot: u16) -> Self {
        Self { page_number, slot }
    }
}

impl LocationCodec for RowLocation {
    fn compare(&self, other: &Self) -> Ordering {
        (self.page_number, self.slot).cmp(&(other.page_number, other.slot))
    }
}

impl Encodeable for RowLocation {
    fn encode(&self) -> Vec<u8> {
        let mut buf = self.page_number.encode();
        buf.extend(self.slot.encode());
        buf
    }
}

impl Decodeable for RowLocation {
    fn decode_from<R: std::io::Read>(reader: &mut R) -> Self {
        let page_number = u32::decode_from(reader);
        let slot = u16::decode_from(reader);
        Self { page_number, slot }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infinity_sorts_last() {
        let a = BytesKey::from_bytes(b"zzzz".to_vec());
        let inf = BytesKey::infinity();
        assert_eq!(a.compare(&inf), Ordering::Less);
        assert_eq!(inf.compare(&inf), Ordering::Equal);
    }

    #[test]
    fn key_round_trips() {
        let key = BytesKey::from_bytes(b"abc".to_vec());
        let bytes = key.encode();
        let mut cursor = std::io::Cursor::new(bytes);
        assert_eq!(BytesKey::decode_from(&mut cursor), key);
    }
}
