//! Log Sequence Numbers.
//!
//! An LSN is `(fileIndex, offsetInFile)`, compared lexicographically.
//! `Lsn::NULL` denotes "no predecessor" / "nothing logged yet".

use std::cmp::Ordering;
use std::fmt;

use crate::io::{Decodeable, Encodeable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Lsn {
    pub file_index: i32,
    pub offset: i32,
}

impl Lsn {
    pub const NULL: Lsn = Lsn {
        file_index: 0,
        offset: 0,
    };

    pub fn new(file_index: i32, offset: i32) -> Self {
        Self { file_index, offset }
    }

    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }
}

impl Default for Lsn {
    fn default() -> Self {
        Self::NULL
    }
}

impl PartialOrd for Lsn {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Lsn {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.file_index, self.offset).cmp(&(other.file_index, other.offset))
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({},{})", self.file_index, self.offset)
    }
}

impl Encodeable for Lsn {
    fn encode(&self) -> Vec<u8> {
        let mut buf = self.file_index.encode();
        buf.extend(self.offset.encode());
        buf
    }
}

impl Decodeable for Lsn {
    fn decode_from<R: std::io::Read>(reader: &mut R) -> Self {
        let file_index = i32::decode_from(reader);
        let offset = i32::decode_from(reader);
        Self { file_index, offset }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_lexicographic() {
        assert!(Lsn::new(1, 100) < Lsn::new(1, 200));
        assert!(Lsn::new(1, 900) < Lsn::new(2, 0));
        assert_eq!(Lsn::NULL, Lsn::new(0, 0));
    }

    #[test]
    fn round_trip() {
        let lsn = Lsn::new(3, 4096);
        let bytes = lsn.encode();
        let mut cursor = std::io::Cursor::new(bytes);
        assert_eq!(Lsn::decode_from(&mut cursor), lsn);
    }
}
