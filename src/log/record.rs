//! Log record framing (spec Section 3 "Log Record", Section 6 "Log
//! file layout").
//!
//! Grounded on the teacher's `transaction/log_aries.rs` `RecordType`
//! enum and hand-rolled encode/decode, but reworked per the redesign
//! flag in spec Section 9: instead of a global numeric-type registry
//! the record is one tagged variant (`LogPayload`), and `UpdateRecord`
//! carries the Redoable/Undoable/Compensation/MultiPageRedo facets as
//! explicit fields rather than separate record classes.

use std::io::Read;

use crate::io::{checksum, Decodeable, Encodeable};
use crate::lsn::Lsn;
use crate::page_id::PageId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Tag {
    Begin = 0,
    Commit = 1,
    Abort = 2,
    End = 3,
    Checkpoint = 4,
    Update = 5,
}

impl Tag {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Tag::Begin,
            1 => Tag::Commit,
            2 => Tag::Abort,
            3 => Tag::End,
            4 => Tag::Checkpoint,
            5 => Tag::Update,
            other => panic!("invalid log record tag: {}", other),
        }
    }
}

/// An update (page-mutating) record. Every B-tree/space-map operation
/// logs one of these. The four categories of spec Section 3 map onto
/// this struct's fields rather than onto separate record kinds:
///
/// - *Redoable*: every `UpdateRecord` is redoable by definition.
/// - *Compensation* (CLR): `compensation == true`, `undo_next_lsn ==
///   Some(_)`; never re-undone.
/// - *Undoable*: `undoable == true` has an undo handler; `logical_undo
///   == true` marks that the page containing the key may have moved.
/// - *MultiPageRedo*: `page_ids.len() > 1`.
#[derive(Debug, Clone)]
pub struct UpdateRecord {
    pub undoable: bool,
    pub logical_undo: bool,
    pub compensation: bool,
    pub undo_next_lsn: Option<Lsn>,
    pub page_ids: Vec<PageId>,
    /// Operation-code understood by the owning module (B-tree, space
    /// map); the log manager itself never interprets `data`.
    pub op_code: u8,
    pub data: Vec<u8>,
}

impl Encodeable for UpdateRecord {
    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend(self.undoable.encode());
        buf.extend(self.logical_undo.encode());
        buf.extend(self.compensation.encode());
        match self.undo_next_lsn {
            Some(lsn) => {
                buf.extend(true.encode());
                buf.extend(lsn.encode());
            }
            None => buf.extend(false.encode()),
        }
        buf.extend(self.page_ids.len().encode());
        for pid in &self.page_ids {
            buf.extend(pid.encode());
        }
        buf.extend(self.op_code.encode());
        buf.extend(self.data.encode());
        buf
    }
}

impl Decodeable for UpdateRecord {
    fn decode_from<R: Read>(reader: &mut R) -> Self {
        let undoable = bool::decode_from(reader);
        let logical_undo = bool::decode_from(reader);
        let compensation = bool::decode_from(reader);
        let undo_next_lsn = if bool::decode_from(reader) {
            Some(Lsn::decode_from(reader))
        } else {
            None
        };
        let page_count = usize::decode_from(reader);
        let mut page_ids = Vec::with_capacity(page_count);
        for _ in 0..page_count {
            page_ids.push(PageId::decode_from(reader));
        }
        let op_code = u8::decode_from(reader);
        let data = Vec::<u8>::decode_from(reader);
        Self {
            undoable,
            logical_undo,
            compensation,
            undo_next_lsn,
            page_ids,
            op_code,
            data,
        }
    }
}

#[derive(Debug, Clone)]
pub enum LogPayload {
    Begin,
    Commit,
    Abort,
    /// Written once a transaction's commit/abort processing (lock
    /// release) has fully completed; analysis treats this the same as
    /// Commit/Abort for "is this transaction still active" purposes.
    End,
    Checkpoint {
        active_transactions: Vec<(u64, Lsn)>,
        dirty_pages: Vec<(PageId, Lsn)>,
    },
    Update(UpdateRecord),
}

impl Encodeable for LogPayload {
    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            LogPayload::Begin => buf.push(Tag::Begin as u8),
            LogPayload::Commit => buf.push(Tag::Commit as u8),
            LogPayload::Abort => buf.push(Tag::Abort as u8),
            LogPayload::End => buf.push(Tag::End as u8),
            LogPayload::Checkpoint {
                active_transactions,
                dirty_pages,
            } => {
                buf.push(Tag::Checkpoint as u8);
                buf.extend(active_transactions.len().encode());
                for (tid, lsn) in active_transactions {
                    buf.extend(tid.encode());
                    buf.extend(lsn.encode());
                }
                buf.extend(dirty_pages.len().encode());
                for (pid, lsn) in dirty_pages {
                    buf.extend(pid.encode());
                    buf.extend(lsn.encode());
                }
            }
            LogPayload::Update(update) => {
                buf.push(Tag::Update as u8);
                buf.extend(update.encode());
            }
        }
        buf
    }
}

impl Decodeable for LogPayload {
    fn decode_from<R: Read>(reader: &mut R) -> Self {
        let tag = Tag::from_u8(u8::decode_from(reader));
        match tag {
            Tag::Begin => LogPayload::Begin,
            Tag::Commit => LogPayload::Commit,
            Tag::Abort => LogPayload::Abort,
            Tag::End => LogPayload::End,
            Tag::Checkpoint => {
                let active_count = usize::decode_from(reader);
                let mut active_transactions = Vec::with_capacity(active_count);
                for _ in 0..active_count {
                    let tid = u64::decode_from(reader);
                    let lsn = Lsn::decode_from(reader);
                    active_transactions.push((tid, lsn));
                }
                let dirty_count = usize::decode_from(reader);
                let mut dirty_pages = Vec::with_capacity(dirty_count);
                for _ in 0..dirty_count {
                    let pid = PageId::decode_from(reader);
                    let lsn = Lsn::decode_from(reader);
                    dirty_pages.push((pid, lsn));
                }
                LogPayload::Checkpoint {
                    active_transactions,
                    dirty_pages,
                }
            }
            Tag::Update => LogPayload::Update(UpdateRecord::decode_from(reader)),
        }
    }
}

/// A fully framed log record as it appears on disk:
/// `{length, lsn, prevLsn, txId, payload, checksum}`.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub lsn: Lsn,
    pub prev_lsn: Lsn,
    pub tx_id: u64,
    pub payload: LogPayload,
}

impl LogRecord {
    /// Encode the body (everything but the record's own LSN, which the
    /// log manager assigns from the write position rather than storing
    /// redundantly) plus a trailing checksum over header+payload.
    pub fn encode_body(&self) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend(self.prev_lsn.encode());
        body.extend(self.tx_id.encode());
        body.extend(self.payload.encode());
        let sum = checksum(&body);
        let mut framed = body.len().encode();
        framed.extend(body);
        framed.extend(sum.encode());
        framed
    }

    /// Decode a body previously produced by `encode_body`, given the
    /// LSN the log manager recorded it at. Returns `Err` if the
    /// checksum does not match (spec Section 7, `Corrupt`).
    pub fn decode_body(lsn: Lsn, framed: &[u8]) -> Result<Self, String> {
        let mut cursor = std::io::Cursor::new(framed);
        let len = usize::decode_from(&mut cursor);
        let body_start = cursor.position() as usize;
        if framed.len() < body_start + len + 8 {
            return Err("truncated record".to_string());
        }
        let body = &framed[body_start..body_start + len];
        let sum_bytes = &framed[body_start + len..body_start + len + 8];
        let stored_sum = u64::from_be_bytes(sum_bytes.try_into().unwrap());
        if checksum(body) != stored_sum {
            return Err(format!("checksum mismatch at lsn {}", lsn));
        }
        let mut body_cursor = std::io::Cursor::new(body);
        let prev_lsn = Lsn::decode_from(&mut body_cursor);
        let tx_id = u64::decode_from(&mut body_cursor);
        let payload = LogPayload::decode_from(&mut body_cursor);
        Ok(LogRecord {
            lsn,
            prev_lsn,
            tx_id,
            payload,
        })
    }

    pub fn is_redoable(&self) -> bool {
        matches!(self.payload, LogPayload::Update(_))
    }

    pub fn is_compensation(&self) -> bool {
        matches!(&self.payload, LogPayload::Update(u) if u.compensation)
    }

    pub fn is_undoable(&self) -> bool {
        matches!(&self.payload, LogPayload::Update(u) if u.undoable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_update_record() {
        let record = LogRecord {
            lsn: Lsn::new(1, 100),
            prev_lsn: Lsn::new(1, 50),
            tx_id: 7,
            payload: LogPayload::Update(UpdateRecord {
                undoable: true,
                logical_undo: true,
                compensation: false,
                undo_next_lsn: None,
                page_ids: vec![PageId::new(1, 2)],
                op_code: 3,
                data: vec![1, 2, 3, 4],
            }),
        };
        let framed = record.encode_body();
        let decoded = LogRecord::decode_body(record.lsn, &framed).unwrap();
        assert_eq!(decoded.tx_id, 7);
        assert_eq!(decoded.prev_lsn, Lsn::new(1, 50));
        match decoded.payload {
            LogPayload::Update(u) => {
                assert!(u.undoable);
                assert!(u.logical_undo);
                assert!(!u.compensation);
                assert_eq!(u.data, vec![1, 2, 3, 4]);
            }
            _ => panic!("wrong payload kind"),
        }
    }

    #[test]
    fn checksum_mismatch_is_detected() {
        let record = LogRecord {
            lsn: Lsn::new(1, 0),
            prev_lsn: Lsn::NULL,
            tx_id: 1,
            payload: LogPayload::Commit,
        };
        let mut framed = record.encode_body();
        let last = framed.len() - 1;
        framed[last] ^= 0xff;
        assert!(LogRecord::decode_body(record.lsn, &framed).is_err());
    }
}
