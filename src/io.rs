//! Binary encode/decode primitives and a thin file wrapper.
//!
//! Grounded on the teacher's `io.rs` (`SmallFile`, `Encodeable`,
//! `Decodeable`, `read_into`, `read_exact`). The log and page-container
//! modules both serialize through these traits so record/page layouts
//! stay explicit rather than going through `serde`/reflection — per the
//! redesign flag in spec Section 9 ("replace global type registries with
//! explicit match over a tagged variant").

use std::convert::TryInto;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::RssError;
use crate::types::VoidResult;

pub trait Encodeable {
    fn encode(&self) -> Vec<u8>;
}

pub trait Decodeable {
    fn decode_from<R: Read>(reader: &mut R) -> Self;
}

macro_rules! impl_codec_for_int {
    ($t:ty) => {
        impl Encodeable for $t {
            fn encode(&self) -> Vec<u8> {
                self.to_be_bytes().to_vec()
            }
        }

        impl Decodeable for $t {
            fn decode_from<R: Read>(reader: &mut R) -> Self {
                let mut buf = [0u8; std::mem::size_of::<$t>()];
                reader.read_exact(&mut buf).expect("io error decoding integer");
                <$t>::from_be_bytes(buf)
            }
        }
    };
}

impl_codec_for_int!(u8);
impl_codec_for_int!(u16);
impl_codec_for_int!(u32);
impl_codec_for_int!(u64);
impl_codec_for_int!(i16);
impl_codec_for_int!(i32);
impl_codec_for_int!(i64);

impl Encodeable for usize {
    fn encode(&self) -> Vec<u8> {
        (*self as u64).encode()
    }
}

impl Decodeable for usize {
    fn decode_from<R: Read>(reader: &mut R) -> Self {
        u64::decode_from(reader) as usize
    }
}

impl Encodeable for bool {
    fn encode(&self) -> Vec<u8> {
        vec![if *self { 1 } else { 0 }]
    }
}

impl Decodeable for bool {
    fn decode_from<R: Read>(reader: &mut R) -> Self {
        read_exact(reader, 1)[0] != 0
    }
}

/// Length-prefixed byte blob: `[u64 length][bytes]`.
impl Encodeable for Vec<u8> {
    fn encode(&self) -> Vec<u8> {
        let mut buf = self.len().encode();
        buf.extend_from_slice(self);
        buf
    }
}

impl Decodeable for Vec<u8> {
    fn decode_from<R: Read>(reader: &mut R) -> Self {
        let len = usize::decode_from(reader);
        read_exact(reader, len)
    }
}

impl Encodeable for String {
    fn encode(&self) -> Vec<u8> {
        self.as_bytes().to_vec().encode()
    }
}

impl Decodeable for String {
    fn decode_from<R: Read>(reader: &mut R) -> Self {
        let bytes = Vec::<u8>::decode_from(reader);
        String::from_utf8(bytes).expect("invalid utf8 in encoded string")
    }
}

pub fn read_into<T: Decodeable, R: Read>(reader: &mut R) -> T {
    T::decode_from(reader)
}

pub fn read_exact<R: Read>(reader: &mut R, bytes_count: usize) -> Vec<u8> {
    let mut buffer = vec![0u8; bytes_count];
    reader
        .read_exact(&mut buffer)
        .unwrap_or_else(|e| panic!("io error, expected {} bytes: {}", bytes_count, e));
    buffer
}

/// A simple FNV-1a style checksum, used instead of pulling in a crc
/// crate: cheap, deterministic, and good enough to catch torn writes
/// and truncated records (spec Section 7, `Corrupt`).
pub fn checksum(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Thin wrapper over `std::fs::File` with the read/write/seek surface
/// the log and container code needs.
pub struct BinaryFile {
    file: File,
}

impl BinaryFile {
    pub fn open<P: AsRef<Path>>(path: P) -> RssResultFile {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(RssError::from)?;
        Ok(Self { file })
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> VoidResult {
        self.file.write_all(bytes).map_err(RssError::from)
    }

    pub fn write<T: Encodeable>(&mut self, value: &T) -> VoidResult {
        self.write_bytes(&value.encode())
    }

    pub fn read_exact_bytes(&mut self, n: usize) -> Result<Vec<u8>, RssError> {
        let mut buf = vec![0u8; n];
        self.file.read_exact(&mut buf).map_err(RssError::from)?;
        Ok(buf)
    }

    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64, RssError> {
        self.file.seek(pos).map_err(RssError::from)
    }

    pub fn position(&mut self) -> Result<u64, RssError> {
        self.seek(SeekFrom::Current(0))
    }

    pub fn len(&self) -> Result<u64, RssError> {
        Ok(self.file.metadata().map_err(RssError::from)?.len())
    }

    pub fn set_len(&mut self, len: u64) -> VoidResult {
        self.file.set_len(len).map_err(RssError::from)
    }

    pub fn flush(&mut self) -> VoidResult {
        self.file.flush().map_err(RssError::from)
    }

    pub fn sync_all(&mut self) -> VoidResult {
        self.file.sync_all().map_err(RssError::from)
    }
}

type RssResultFile = Result<BinaryFile, RssError>;

pub fn bytes_to_u64(bytes: &[u8]) -> u64 {
    u64::from_be_bytes(bytes[0..8].try_into().expect("need 8 bytes"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trip_integers() {
        let mut buf = Vec::new();
        buf.extend(42u32.encode());
        buf.extend((-7i64).encode());
        let mut cursor = Cursor::new(buf);
        assert_eq!(u32::decode_from(&mut cursor), 42);
        assert_eq!(i64::decode_from(&mut cursor), -7);
    }

    #[test]
    fn round_trip_blob_and_string() {
        let blob = vec![1u8, 2, 3, 4, 5];
        let mut cursor = Cursor::new(blob.encode());
        assert_eq!(Vec::<u8>::decode_from(&mut cursor), blob);

        let s = "hello world".to_string();
        let mut cursor = Cursor::new(s.encode());
        assert_eq!(String::decode_from(&mut cursor), s);
    }

    #[test]
    fn checksum_detects_tamper() {
        let a = checksum(b"the quick brown fox");
        let b = checksum(b"the quick brown fog");
        assert_ne!(a, b);
    }
}
