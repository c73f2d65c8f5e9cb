//! The traversal cursor (spec Section 4.E, "P/Q/R cursor").
//!
//! The cursor latch-couples on the way down: fix the child, then
//! unfix the parent — so at most one page is ever held for longer
//! than the instant it takes to decide the next hop. When the current
//! page (`Q`) turns out to be stale (its high key no longer covers the
//! search key, because a concurrent split moved the tail of its
//! contents onto a new right sibling), the cursor fixes that sibling
//! (`R`) and moves right before continuing down, per Lehman and Yao's
//! rule for reading a B-link tree without blocking on in-progress
//! splits. `TraversalMode::Update` differs from `Read` only in which
//! [`LatchMode`] it asks the buffer manager for; callers that need to
//! revisit an ancestor (to insert a separator after a split, say)
//! re-seek by key rather than holding a parent stack, trading one
//! extra root-to-target descent for never holding more than one latch.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::buffer::{read_latch, BufferManager, LatchMode, Page};
use crate::page_id::PageId;
use crate::types::{Pod, RssResult};

use super::codec::{BytesKey, KeyCodec};
use super::node::{self, NodeType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalMode {
    Read,
    Update,
}

pub struct Cursor {
    buffer: Arc<BufferManager>,
    pub current_id: PageId,
    pub current: Pod<Page>,
}

impl Cursor {
    /// Descend from `root` towards `key`, stopping at the first node
    /// whose `level == stop_level` (`0` reaches the leaves).
    pub fn seek(
        buffer: Arc<BufferManager>,
        root: PageId,
        key: &BytesKey,
        mode: TraversalMode,
        stop_level: u8,
    ) -> RssResult<Self> {
        let latch_mode = match mode {
            TraversalMode::Read => LatchMode::Shared,
            TraversalMode::Update => LatchMode::Update,
        };

        let mut current_id = root;
        let mut current = buffer.fix(current_id, latch_mode)?;

        loop {
            let (level, right_sibling, move_right) = {
                let guard = read_latch(&current);
                let header = node::NodeHeader::read(&guard.data);
                let hk = node::high_key(&guard.data, header.node_type);
                let move_right = header.right_sibling.is_valid()
                    && hk.map(|k| k.compare(key) == Ordering::Less).unwrap_or(false);
                (header.level, header.right_sibling, move_right)
            };

            if move_right {
                let next = buffer.fix(right_sibling, latch_mode)?;
                buffer.unfix(current_id);
                current_id = right_sibling;
                current = next;
                continue;
            }

            if level == stop_level {
                break;
            }

            let child_id = {
                let guard = read_latch(&current);
                debug_assert_eq!(NodeType::Internal, node::NodeHeader::read(&guard.data).node_type);
                let slot = node::internal_child_slot(&guard.data, key);
                node::internal_entry(&guard.data, slot).child
            };

            buffer.unfix(current_id);
            current_id = child_id;
            current = buffer.fix(current_id, latch_mode)?;
        }

        Ok(Self {
            buffer,
            current_id,
            current,
        })
    }

    pub fn release(self) {
        self.buffer.unfix(self.current_id);
    }
}
