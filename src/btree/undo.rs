//! Logical undo/redo for the B-tree (spec Section 4.E, "logical
//! undo"), registered with the transaction manager as a
//! [`RecoveryHandler`].
//!
//! Redo is physical: every record the tree logs carries the page
//! id(s) it touched, and replay just reapplies the recorded change if
//! the page's `page_lsn` hasn't caught up to it yet (SMOs log a whole
//! page image for this reason — simpler to replay than re-deriving a
//! split). Undo is logical: the handlers re-seek the tree by key
//! rather than trusting the original page id, since a split or merge
//! may have moved the key since the update being undone.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::buffer::{read_latch, write_latch, BufferManager, LatchMode};
use crate::error::RssError;
use crate::log::UpdateRecord;
use crate::lsn::Lsn;
use crate::txn::RecoveryHandler;
use crate::types::{RssResult, VoidResult};

use super::codec::KeyCodec;
use super::cursor::{Cursor, TraversalMode};
use super::node::{self, LeafEntry};
use super::tree::{BTreeIndex, OP_DELETE, OP_INSERT, OP_NESTED_DONE, OP_PAGE_IMAGE};

impl RecoveryHandler for BTreeIndex {
    fn redo(&self, buffer: &BufferManager, record: &UpdateRecord, lsn: Lsn) -> VoidResult {
        match record.op_code {
            OP_PAGE_IMAGE => redo_page_image(buffer, record, lsn),
            OP_INSERT => redo_insert(buffer, record, lsn),
            OP_DELETE => redo_delete(buffer, record, lsn),
            OP_NESTED_DONE => Ok(()),
            other => Err(RssError::invalid_state(format!("unknown B-tree op code {}", other))),
        }
    }

    fn undo(&self, _buffer: &BufferManager, record: &UpdateRecord) -> RssResult<(u8, Vec<u8>)> {
        match record.op_code {
            OP_INSERT => self.undo_insert(record),
            OP_DELETE => self.undo_delete(record),
            other => Err(RssError::invalid_state(format!(
                "op code {} belongs to a nested top action and is never individually undone",
                other
            ))),
        }
    }
}

impl BTreeIndex {
    fn undo_insert(&self, record: &UpdateRecord) -> RssResult<(u8, Vec<u8>)> {
        let entry = LeafEntry::decode(&record.data);
        let cursor = Cursor::seek(Arc::clone(&self.buffer), self.root_page(), &entry.key, TraversalMode::Update, 0)?;
        {
            let mut guard = write_latch(&cursor.current);
            let sp = node::slotted();
            let slot = node::leaf_lower_bound(&guard.data, &entry.key);
            if slot < sp.slot_count(&guard.data) && node::leaf_entry(&guard.data, slot).key.compare(&entry.key) == Ordering::Equal {
                sp.delete(&mut guard.data, slot).map_err(|e| RssError::invalid_state(e.to_string()))?;
                sp.compact(&mut guard.data);
            }
        }
        cursor.release();
        Ok((OP_DELETE, record.data.clone()))
    }

    fn undo_delete(&self, record: &UpdateRecord) -> RssResult<(u8, Vec<u8>)> {
        let entry = LeafEntry::decode(&record.data);
        let cursor = Cursor::seek(Arc::clone(&self.buffer), self.root_page(), &entry.key, TraversalMode::Update, 0)?;
        {
            let mut guard = write_latch(&cursor.current);
            let slot = node::leaf_lower_bound(&guard.data, &entry.key);
            node::slotted()
                .insert(&mut guard.data, slot, &record.data)
                .map_err(|e| RssError::invalid_state(e.to_string()))?;
        }
        cursor.release();
        Ok((OP_INSERT, record.data.clone()))
    }
}

fn redo_page_image(buffer: &BufferManager, record: &UpdateRecord, lsn: Lsn) -> VoidResult {
    let page_id = record.page_ids[0];
    let page = buffer.fix(page_id, LatchMode::Exclusive)?;
    {
        let mut guard = write_latch(&page);
        if guard.page_lsn < lsn {
            guard.data.copy_from_slice(&record.data);
            guard.mark_dirty(lsn);
        }
    }
    buffer.unfix(page_id);
    Ok(())
}

fn redo_insert(buffer: &BufferManager, record: &UpdateRecord, lsn: Lsn) -> VoidResult {
    let page_id = record.page_ids[0];
    let entry = LeafEntry::decode(&record.data);
    let page = buffer.fix(page_id, LatchMode::Exclusive)?;
    {
        let mut guard = write_latch(&page);
        if guard.page_lsn < lsn {
            let slot = node::leaf_lower_bound(&guard.data, &entry.key);
            node::slotted()
                .insert(&mut guard.data, slot, &record.data)
                .map_err(|e| RssError::invalid_state(e.to_string()))?;
            guard.mark_dirty(lsn);
        }
    }
    buffer.unfix(page_id);
    Ok(())
}

fn redo_delete(buffer: &BufferManager, record: &UpdateRecord, lsn: Lsn) -> VoidResult {
    let page_id = record.page_ids[0];
    let entry = LeafEntry::decode(&record.data);
    let page = buffer.fix(page_id, LatchMode::Exclusive)?;
    {
        let mut guard = write_latch(&page);
        if guard.page_lsn < lsn {
            let sp = node::slotted();
            let slot = node::leaf_lower_bound(&guard.data, &entry.key);
            if slot < sp.slot_count(&guard.data) && node::leaf_entry(&guard.data, slot).key.compare(&entry.key) == Ordering::Equal {
                sp.delete(&mut guard.data, slot).map_err(|e| RssError::invalid_state(e.to_string()))?;
                sp.compact(&mut guard.data);
            }
            guard.mark_dirty(lsn);
        }
    }
    buffer.unfix(page_id);
    Ok(())
}
