//! Forward index scan (spec Section 4.E, "scan"): repeated
//! `fetch_next` calls, each re-seeking from the last key returned
//! rather than holding a cursor fixed across calls, so a scan never
//! blocks an SMO on some other page of the tree between calls.
//!
//! Every key handed back is protected by a commit-duration shared
//! next-key lock before it's returned, so a concurrent delete of an
//! already-scanned key has to wait for the scanning transaction to
//! finish (spec Section 4.D, "next-key locking" — here applied with
//! `Commit` duration since a scan's isolation guarantee should last
//! the whole transaction, unlike insert's narrower purpose). This is
//! also why [`BTreeIndex::delete`](super::tree::BTreeIndex::delete)
//! locks the key *after* the one it removes: a scan landing in the
//! gap left by an in-flight delete locks that next key too, and so
//! still blocks on the deleting transaction even though the deleted
//! key itself is physically gone by the time the scan gets there.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::buffer::read_latch;
use crate::lock::{LockDuration, LockMode, TransactionId};
use crate::types::RssResult;

use super::codec::{BytesKey, KeyCodec, RowLocation};
use super::cursor::{Cursor, TraversalMode};
use super::node::{self, LeafEntry};
use super::tree::BTreeIndex;

pub struct Scan<'a> {
    index: &'a BTreeIndex,
    tx: TransactionId,
    next_key: BytesKey,
    done: bool,
}

impl<'a> Scan<'a> {
    pub fn new(index: &'a BTreeIndex, tx: TransactionId, from: Option<BytesKey>) -> Self {
        Self {
            index,
            tx,
            next_key: from.unwrap_or_else(|| BytesKey::from_bytes(Vec::new())),
            done: false,
        }
    }

    /// Returns the next `(key, location)` pair in ascending order, or
    /// `None` once the scan has passed the rightmost `INFINITY`
    /// sentinel.
    pub fn fetch_next(&mut self) -> RssResult<Option<(BytesKey, RowLocation)>> {
        loop {
            if self.done {
                return Ok(None);
            }

            let entry = match self.find_candidate()? {
                Some(entry) => entry,
                None => {
                    self.done = true;
                    return Ok(None);
                }
            };

            if entry.key.is_infinity() {
                self.done = true;
                return Ok(None);
            }

            let resource = self.index.lock_resource(&entry.key);
            self.index.locks.acquire(self.tx, resource, LockMode::S, LockDuration::Commit)?;

            // The lock wait above may have let some other transaction
            // commit or abort a change at or before this key — reseek
            // rather than trusting the entry found before the wait, so
            // an abort's logical undo reinserting a key this scan had
            // skipped past is still picked up.
            match self.find_candidate()? {
                Some(fresh) if fresh.key.compare(&entry.key) == Ordering::Equal => {
                    self.next_key = bump(&fresh.key);
                    return Ok(Some((fresh.key, fresh.location)));
                }
                _ => continue,
            }
        }
    }

    fn find_candidate(&self) -> RssResult<Option<LeafEntry>> {
        let cursor = Cursor::seek(
            Arc::clone(&self.index.buffer),
            self.index.root_page(),
            &self.next_key,
            TraversalMode::Read,
            0,
        )?;
        let found = {
            let guard = read_latch(&cursor.current);
            let slot = node::leaf_lower_bound(&guard.data, &self.next_key);
            let count = node::slotted().slot_count(&guard.data);
            if slot < count {
                Some(node::leaf_entry(&guard.data, slot))
            } else {
                None
            }
        };
        cursor.release();
        Ok(found)
    }
}

/// The lexicographically smallest key strictly greater than `key`,
/// used to advance the scan past a key already returned without
/// needing a second comparison operator on [`KeyCodec`].
fn bump(key: &BytesKey) -> BytesKey {
    match key {
        BytesKey::Infinity => BytesKey::Infinity,
        BytesKey::Value(v) => {
            let mut next = v.clone();
            next.push(0);
            BytesKey::Value(next)
        }
    }
}
