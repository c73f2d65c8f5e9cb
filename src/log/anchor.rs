//! The log's control ("anchor") block (spec Section 4.A "File model",
//! "Durability protocol").
//!
//! Every configured control file holds a full copy of this struct,
//! `{length, checksum}`-prefixed. An `anchor-dirty` flag (owned by
//! `LogManager`, not by the anchor itself) coalesces writes into the
//! next flush.

use std::path::PathBuf;

use crate::io::{checksum, Decodeable, Encodeable};
use crate::lsn::Lsn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Unused,
    Current,
    Full,
    Invalid,
}

impl FileStatus {
    fn to_u8(self) -> u8 {
        match self {
            FileStatus::Unused => 0,
            FileStatus::Current => 1,
            FileStatus::Full => 2,
            FileStatus::Invalid => 3,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => FileStatus::Unused,
            1 => FileStatus::Current,
            2 => FileStatus::Full,
            _ => FileStatus::Invalid,
        }
    }
}

impl Encodeable for FileStatus {
    fn encode(&self) -> Vec<u8> {
        vec![self.to_u8()]
    }
}

impl Decodeable for FileStatus {
    fn decode_from<R: std::io::Read>(reader: &mut R) -> Self {
        Self::from_u8(u8::decode_from(reader))
    }
}

#[derive(Debug, Clone)]
pub struct GroupAnchor {
    pub path: PathBuf,
    /// status of each online file slot `0..files_per_group` in this group.
    pub file_statuses: Vec<FileStatus>,
    /// the monotonic log-file index currently occupying each physical
    /// slot (`-1` if the slot has never been used). Physical filenames
    /// are `slot.log`; `logIndexes[slot]` is what that slot *means* in
    /// LSN terms and what an archived copy of it will be named.
    pub log_indexes: Vec<i64>,
}

#[derive(Debug, Clone)]
pub struct Anchor {
    pub ctl_file_paths: Vec<PathBuf>,
    pub groups: Vec<GroupAnchor>,
    pub archive_path: PathBuf,
    pub buffer_size: usize,
    pub file_size: u64,
    /// index of the file currently being written, within each group.
    pub current_file: i32,
    /// monotonic index of the current file across the whole ring (never
    /// wraps, used to name archive files `<index>.log`).
    pub current_index: i64,
    /// highest file index that has already been archived.
    pub archived_index: i64,
    pub current_lsn: Lsn,
    pub max_lsn: Lsn,
    pub durable_lsn: Lsn,
    pub checkpoint_lsn: Lsn,
    pub oldest_interesting_lsn: Lsn,
    pub max_buffers: usize,
    pub flush_interval_secs: u64,
}

impl Anchor {
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend(self.ctl_file_paths.len().encode());
        for p in &self.ctl_file_paths {
            body.extend(p.to_string_lossy().to_string().encode());
        }
        body.extend(self.groups.len().encode());
        for g in &self.groups {
            body.extend(g.path.to_string_lossy().to_string().encode());
            body.extend(g.file_statuses.len().encode());
            for s in &g.file_statuses {
                body.extend(s.encode());
            }
            for idx in &g.log_indexes {
                body.extend(idx.encode());
            }
        }
        body.extend(self.archive_path.to_string_lossy().to_string().encode());
        body.extend(self.buffer_size.encode());
        body.extend(self.file_size.encode());
        body.extend(self.current_file.encode());
        body.extend(self.current_index.encode());
        body.extend(self.archived_index.encode());
        body.extend(self.current_lsn.encode());
        body.extend(self.max_lsn.encode());
        body.extend(self.durable_lsn.encode());
        body.extend(self.checkpoint_lsn.encode());
        body.extend(self.oldest_interesting_lsn.encode());
        body.extend(self.max_buffers.encode());
        body.extend(self.flush_interval_secs.encode());

        let sum = checksum(&body);
        let mut framed = body.len().encode();
        framed.extend(checksum_u64_bytes(sum));
        framed.extend(body);
        framed
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, String> {
        let mut cursor = std::io::Cursor::new(bytes);
        let body_len = usize::decode_from(&mut cursor);
        let sum_bytes = crate::io::read_exact(&mut cursor, 8);
        let stored_sum = u64::from_be_bytes(sum_bytes.try_into().unwrap());
        let body_start = cursor.position() as usize;
        if bytes.len() < body_start + body_len {
            return Err("truncated anchor".to_string());
        }
        let body = &bytes[body_start..body_start + body_len];
        if checksum(body) != stored_sum {
            return Err("anchor checksum mismatch".to_string());
        }

        let mut c = std::io::Cursor::new(body);
        let n_ctl = usize::decode_from(&mut c);
        let mut ctl_file_paths = Vec::with_capacity(n_ctl);
        for _ in 0..n_ctl {
            ctl_file_paths.push(PathBuf::from(String::decode_from(&mut c)));
        }
        let n_groups = usize::decode_from(&mut c);
        let mut groups = Vec::with_capacity(n_groups);
        for _ in 0..n_groups {
            let path = PathBuf::from(String::decode_from(&mut c));
            let n_files = usize::decode_from(&mut c);
            let mut file_statuses = Vec::with_capacity(n_files);
            for _ in 0..n_files {
                file_statuses.push(FileStatus::decode_from(&mut c));
            }
            let mut log_indexes = Vec::with_capacity(n_files);
            for _ in 0..n_files {
                log_indexes.push(i64::decode_from(&mut c));
            }
            groups.push(GroupAnchor {
                path,
                file_statuses,
                log_indexes,
            });
        }
        let archive_path = PathBuf::from(String::decode_from(&mut c));
        let buffer_size = usize::decode_from(&mut c);
        let file_size = u64::decode_from(&mut c);
        let current_file = i32::decode_from(&mut c);
        let current_index = i64::decode_from(&mut c);
        let archived_index = i64::decode_from(&mut c);
        let current_lsn = Lsn::decode_from(&mut c);
        let max_lsn = Lsn::decode_from(&mut c);
        let durable_lsn = Lsn::decode_from(&mut c);
        let checkpoint_lsn = Lsn::decode_from(&mut c);
        let oldest_interesting_lsn = Lsn::decode_from(&mut c);
        let max_buffers = usize::decode_from(&mut c);
        let flush_interval_secs = u64::decode_from(&mut c);

        Ok(Anchor {
            ctl_file_paths,
            groups,
            archive_path,
            buffer_size,
            file_size,
            current_file,
            current_index,
            archived_index,
            current_lsn,
            max_lsn,
            durable_lsn,
            checkpoint_lsn,
            oldest_interesting_lsn,
            max_buffers,
            flush_interval_secs,
        })
    }
}

fn checksum_u64_bytes(sum: u64) -> Vec<u8> {
    sum.to_be_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Anchor {
        Anchor {
            ctl_file_paths: vec![PathBuf::from("a.ctl"), PathBuf::from("b.ctl")],
            groups: vec![GroupAnchor {
                path: PathBuf::from("group0"),
                file_statuses: vec![FileStatus::Current, FileStatus::Unused],
                log_indexes: vec![0, -1],
            }],
            archive_path: PathBuf::from("archive"),
            buffer_size: 4096,
            file_size: 1 << 20,
            current_file: 0,
            current_index: 3,
            archived_index: 1,
            current_lsn: Lsn::new(0, 128),
            max_lsn: Lsn::new(0, 128),
            durable_lsn: Lsn::new(0, 64),
            checkpoint_lsn: Lsn::NULL,
            oldest_interesting_lsn: Lsn::NULL,
            max_buffers: 16,
            flush_interval_secs: 5,
        }
    }

    #[test]
    fn round_trips() {
        let anchor = sample();
        let bytes = anchor.encode();
        let decoded = Anchor::decode(&bytes).unwrap();
        assert_eq!(decoded.ctl_file_paths, anchor.ctl_file_paths);
        assert_eq!(decoded.durable_lsn, anchor.durable_lsn);
        assert_eq!(decoded.groups[0].file_statuses.len(), 2);
    }

    #[test]
    fn detects_corruption() {
        let anchor = sample();
        let mut bytes = anchor.encode();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert!(Anchor::decode(&bytes).is_err());
    }
}
