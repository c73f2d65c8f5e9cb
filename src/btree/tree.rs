//! The B-link tree index manager (spec Section 4.E): insert, delete,
//! and the six structure modification operations (SMOs) that keep the
//! tree balanced — Split, Merge, Redistribute, Link, Unlink, and
//! Increase/Decrease tree height.
//!
//! Every SMO runs as a nested top action (spec Section 4.D): its
//! intermediate page mutations are logged as ordinary, non-undoable
//! `UPDATE` records (physical whole-page images — simpler than
//! replaying the split/merge algorithm during redo, and sufficient
//! since only `undo` needs to be logical per spec Section 4.E), and the
//! action closes with a single CLR whose `undo_next_lsn` skips the
//! whole sequence, so an abort never partially unwinds an SMO. Insert
//! and delete undo logically instead: [`super::undo`] re-seeks the
//! current tree for the key rather than trusting a stale page id,
//! since a split or merge may have moved it since the original update.
//!
//! Root page 2 never moves (spec Section 3); Increase/Decrease tree
//! height works by re-purposing its fixed page number rather than
//! changing which page is "the root".

use std::cmp::Ordering;
use std::sync::Arc;

use crate::buffer::{read_latch, write_latch, BufferManager, LatchMode, Page};
use crate::error::RssError;
use crate::lock::{LockDuration, LockManager, LockMode, Resource, TransactionId};
use crate::log::UpdateRecord;
use crate::lsn::Lsn;
use crate::page_id::{PageId, ROOT_PAGE_NUMBER};
use crate::space::SpaceMap;
use crate::txn::TransactionManager;
use crate::types::{Pod, RssResult, VoidResult};

use super::codec::{BytesKey, KeyCodec, RowLocation};
use super::cursor::{Cursor, TraversalMode};
use super::node::{self, InternalEntry, LeafEntry, NodeHeader, NodeType};

pub const OP_NESTED_DONE: u8 = 0;
pub const OP_INSERT: u8 = 1;
pub const OP_DELETE: u8 = 2;
pub const OP_PAGE_IMAGE: u8 = 3;

/// Minimum live entries a non-rightmost leaf keeps before a delete
/// triggers redistribution or merge (spec Section 4.E, "underflow").
const MIN_LEAF_ENTRIES: u16 = 1;

pub struct BTreeIndex {
    pub(super) buffer: Arc<BufferManager>,
    pub(super) txn: Arc<TransactionManager>,
    pub(super) locks: Arc<LockManager>,
    space_map: SpaceMap,
    pub container_id: u32,
    pub index_id: u32,
    pub unique: bool,
}

impl BTreeIndex {
    /// Format a fresh container: page 0 as the space map, page
    /// [`ROOT_PAGE_NUMBER`] as an empty leaf root carrying only the
    /// `INFINITY` sentinel (spec Section 3, "rightmost key ...
    /// INFINITY that cannot be deleted").
    pub fn create(
        buffer: Arc<BufferManager>,
        txn: Arc<TransactionManager>,
        locks: Arc<LockManager>,
        container_id: u32,
        index_id: u32,
        unique: bool,
    ) -> RssResult<Arc<Self>> {
        let space_map = SpaceMap::new(crate::buffer::PAGE_SIZE);

        let map_page = buffer.fix(PageId::new(container_id, 0), LatchMode::ExclusiveNew)?;
        {
            let mut guard = write_latch(&map_page);
            space_map.init(&mut guard.data);
        }
        buffer.unfix(PageId::new(container_id, 0));

        let root_id = PageId::new(container_id, ROOT_PAGE_NUMBER);
        let root_page = buffer.fix(root_id, LatchMode::ExclusiveNew)?;
        {
            let mut guard = write_latch(&root_page);
            node::init_node(
                &mut guard.data,
                NodeHeader {
                    node_type: NodeType::Leaf,
                    left_sibling: PageId::INVALID,
                    right_sibling: PageId::INVALID,
                    level: 0,
                },
            );
            let entry = LeafEntry {
                key: BytesKey::infinity(),
                location: RowLocation::NULL,
            };
            node::slotted()
                .insert(&mut guard.data, 0, &entry.encode())
                .expect("fresh page has room for one entry");
        }
        buffer.unfix(root_id);

        Ok(Arc::new(Self {
            buffer,
            txn,
            locks,
            space_map,
            container_id,
            index_id,
            unique,
        }))
    }

    /// Attach to an already-formatted container (used after recovery,
    /// once [`crate::txn::Recovery`] has replayed the log).
    pub fn open(
        buffer: Arc<BufferManager>,
        txn: Arc<TransactionManager>,
        locks: Arc<LockManager>,
        container_id: u32,
        index_id: u32,
        unique: bool,
    ) -> Self {
        Self {
            buffer,
            txn,
            locks,
            space_map: SpaceMap::new(crate::buffer::PAGE_SIZE),
            container_id,
            index_id,
            unique,
        }
    }

    pub fn root_page(&self) -> PageId {
        PageId::new(self.container_id, ROOT_PAGE_NUMBER)
    }

    /// `fetchNext`-style scan from `from` (inclusive) to the end of
    /// the index, or from the very first key when `from` is `None`
    /// (spec Section 4.E, "scan").
    pub fn scan(&self, tx: TransactionId, from: Option<BytesKey>) -> super::scan::Scan<'_> {
        super::scan::Scan::new(self, tx, from)
    }

    /// The key immediately following `slot` in `leaf`'s order (spec.md
    /// line 148's next-key lock target): the entry at `slot` if `leaf`
    /// still has one there, otherwise the first key held by the right
    /// sibling chain (skipping any sibling a merge left empty — see
    /// `merge_with_left_sibling`'s tombstone-leaf note), or the
    /// rightmost `INFINITY` sentinel if the chain ends.
    fn next_key_after(&self, leaf: &Pod<Page>, slot: usize) -> RssResult<BytesKey> {
        let (key, mut right_sibling) = {
            let guard = read_latch(leaf);
            let count = node::slotted().slot_count(&guard.data);
            let key = if slot < count {
                Some(node::leaf_entry(&guard.data, slot).key)
            } else {
                None
            };
            (key, NodeHeader::read(&guard.data).right_sibling)
        };
        if let Some(key) = key {
            return Ok(key);
        }

        loop {
            if !right_sibling.is_valid() {
                return Ok(BytesKey::infinity());
            }
            let sibling = self.buffer.fix(right_sibling, LatchMode::Shared)?;
            let (key, next_sibling) = {
                let guard = read_latch(&sibling);
                let count = node::slotted().slot_count(&guard.data);
                let key = if count > 0 {
                    Some(node::leaf_entry(&guard.data, 0).key)
                } else {
                    None
                };
                (key, NodeHeader::read(&guard.data).right_sibling)
            };
            self.buffer.unfix(right_sibling);
            if let Some(key) = key {
                return Ok(key);
            }
            right_sibling = next_sibling;
        }
    }

    pub(super) fn lock_resource(&self, key: &BytesKey) -> Resource {
        Resource::Key {
            index_id: self.index_id,
            key: key.encode(),
        }
    }

    // ---- point lookup --------------------------------------------------

    pub fn get(&self, key: &BytesKey) -> RssResult<Option<RowLocation>> {
        let cursor = Cursor::seek(Arc::clone(&self.buffer), self.root_page(), key, TraversalMode::Read, 0)?;
        let found = {
            let guard = read_latch(&cursor.current);
            let slot = node::leaf_lower_bound(&guard.data, key);
            let count = node::slotted().slot_count(&guard.data);
            if slot < count {
                let entry = node::leaf_entry(&guard.data, slot);
                if entry.key.compare(key) == Ordering::Equal {
                    Some(entry.location)
                } else {
                    None
                }
            } else {
                None
            }
        };
        cursor.release();
        Ok(found)
    }

    // ---- insert ----------------------------------------------------------

    /// `insert(tx, key, location)` (spec Section 4.E, step 5 of
    /// spec.md line 148). A unique index checks for an existing key
    /// under an instant shared lock first. Before the leaf is touched,
    /// an instant exclusive lock is taken on the key immediately
    /// following the inserted one (in this leaf, the right sibling's
    /// first key, or the rightmost `INFINITY` sentinel) — this is what
    /// makes a concurrent scan that has already passed this point, or
    /// is waiting to, serialize against the insert instead of racing
    /// it. The new key itself is then held with a commit-duration
    /// exclusive lock so a concurrent inserter of the same key blocks
    /// on it rather than racing the leaf mutation.
    pub fn insert(&self, tx: TransactionId, key: BytesKey, location: RowLocation) -> VoidResult {
        let resource = self.lock_resource(&key);

        if self.unique {
            self.locks.acquire(tx, resource.clone(), LockMode::S, LockDuration::Instant)?;
            if self.get(&key)?.is_some() {
                return Err(RssError::unique_violation(format!(
                    "key already present in unique index {}",
                    self.index_id
                )));
            }
        }

        let cursor = Cursor::seek(Arc::clone(&self.buffer), self.root_page(), &key, TraversalMode::Update, 0)?;
        let slot = {
            let guard = read_latch(&cursor.current);
            node::leaf_lower_bound(&guard.data, &key)
        };
        let next_key = self.next_key_after(&cursor.current, slot)?;
        let next_resource = self.lock_resource(&next_key);
        self.locks.acquire(tx, next_resource, LockMode::X, LockDuration::Instant)?;

        self.locks.acquire(tx, resource, LockMode::X, LockDuration::Commit)?;

        self.insert_into_leaf(tx, cursor, key, location)
    }

    fn insert_into_leaf(&self, tx: TransactionId, cursor: Cursor, key: BytesKey, location: RowLocation) -> VoidResult {
        let leaf_id = cursor.current_id;
        let entry = LeafEntry { key: key.clone(), location };
        let encoded = entry.encode();

        let fits = {
            let guard = read_latch(&cursor.current);
            node::slotted().can_fit(&guard.data, encoded.len())
        };

        if fits {
            {
                let mut guard = write_latch(&cursor.current);
                let slot = node::leaf_lower_bound(&guard.data, &key);
                node::slotted()
                    .insert(&mut guard.data, slot, &encoded)
                    .map_err(|e| RssError::invalid_state(e.to_string()))?;
            }
            let lsn = self.txn.log_update(
                tx,
                UpdateRecord {
                    undoable: true,
                    logical_undo: true,
                    compensation: false,
                    undo_next_lsn: None,
                    page_ids: vec![leaf_id],
                    op_code: OP_INSERT,
                    data: encoded,
                },
            )?;
            write_latch(&cursor.current).mark_dirty(lsn);
            cursor.release();
            return Ok(());
        }

        self.split(tx, cursor)?;
        let cursor = Cursor::seek(Arc::clone(&self.buffer), self.root_page(), &key, TraversalMode::Update, 0)?;
        self.insert_into_leaf(tx, cursor, key, location)
    }

    fn log_page_image(&self, tx: TransactionId, page_id: PageId, page: &Pod<Page>) -> RssResult<Lsn> {
        let data = read_latch(page).data.clone();
        self.txn.log_update(
            tx,
            UpdateRecord {
                undoable: false,
                logical_undo: false,
                compensation: false,
                undo_next_lsn: None,
                page_ids: vec![page_id],
                op_code: OP_PAGE_IMAGE,
                data,
            },
        )
    }

    fn allocate_page(&self, tx: TransactionId) -> RssResult<PageId> {
        let map_id = PageId::new(self.container_id, 0);
        let map_page = self.buffer.fix(map_id, LatchMode::Exclusive)?;
        let claimed = {
            let mut guard = write_latch(&map_page);
            self.space_map.allocate(&mut guard.data)
        };
        let result = match claimed {
            Some(page_number) => {
                let lsn = self.log_page_image(tx, map_id, &map_page)?;
                write_latch(&map_page).mark_dirty(lsn);
                PageId::new(self.container_id, page_number)
            }
            None => PageId::new(self.container_id, self.buffer.allocate_page_number(self.container_id)),
        };
        self.buffer.unfix(map_id);
        Ok(result)
    }

    fn free_page(&self, tx: TransactionId, page_id: PageId) -> VoidResult {
        let map_id = PageId::new(self.container_id, 0);
        let map_page = self.buffer.fix(map_id, LatchMode::Exclusive)?;
        {
            let mut guard = write_latch(&map_page);
            self.space_map.free(&mut guard.data, page_id.page_number);
        }
        let lsn = self.log_page_image(tx, map_id, &map_page)?;
        write_latch(&map_page).mark_dirty(lsn);
        self.buffer.unfix(map_id);
        Ok(())
    }

    /// Split SMO: half the full node's entries move to a freshly
    /// allocated right sibling; the left half keeps the original page
    /// id except when the full node is the root, whose page number is
    /// permanent, so its content is relocated to a fresh page first
    /// and the root re-purposed by [`Self::increase_tree_height`].
    fn split(&self, tx: TransactionId, cursor: Cursor) -> VoidResult {
        let was_root = cursor.current_id == self.root_page();
        let return_lsn = self.txn.begin_nested_top_action(tx)?;
        let header = NodeHeader::read(&read_latch(&cursor.current).data);

        let (node_id, node_page) = if was_root {
            let fresh_id = self.allocate_page(tx)?;
            let fresh_page = self.buffer.fix(fresh_id, LatchMode::ExclusiveNew)?;
            {
                let root_guard = read_latch(&cursor.current);
                let mut fresh_guard = write_latch(&fresh_page);
                fresh_guard.data.copy_from_slice(&root_guard.data);
            }
            let lsn = self.log_page_image(tx, fresh_id, &fresh_page)?;
            write_latch(&fresh_page).mark_dirty(lsn);
            (fresh_id, fresh_page)
        } else {
            (cursor.current_id, Arc::clone(&cursor.current))
        };

        let new_id = self.allocate_page(tx)?;
        let new_page = self.buffer.fix(new_id, LatchMode::ExclusiveNew)?;

        let separator_key = {
            let mut node_guard = write_latch(&node_page);
            let mut new_guard = write_latch(&new_page);
            node::init_node(
                &mut new_guard.data,
                NodeHeader {
                    node_type: header.node_type,
                    left_sibling: node_id,
                    right_sibling: header.right_sibling,
                    level: header.level,
                },
            );
            let sp = node::slotted();
            let count = sp.slot_count(&node_guard.data);
            let mid = count / 2;
            sp.split_off(&mut node_guard.data, &mut new_guard.data, mid);

            let mut left_header = header;
            left_header.right_sibling = new_id;
            left_header.write(&mut node_guard.data);

            let remaining = sp.slot_count(&node_guard.data);
            match header.node_type {
                NodeType::Leaf => node::leaf_entry(&node_guard.data, remaining - 1).key,
                NodeType::Internal => node::internal_entry(&node_guard.data, remaining - 1).key,
            }
        };

        let lsn1 = self.log_page_image(tx, node_id, &node_page)?;
        write_latch(&node_page).mark_dirty(lsn1);
        let lsn2 = self.log_page_image(tx, new_id, &new_page)?;
        write_latch(&new_page).mark_dirty(lsn2);

        self.txn
            .end_nested_top_action(tx, return_lsn, vec![node_id, new_id], OP_NESTED_DONE, Vec::new())?;

        self.buffer.unfix(new_id);
        if was_root {
            self.buffer.unfix(node_id);
        }
        let level = header.level;
        cursor.release();

        if was_root {
            self.increase_tree_height(tx, node_id, new_id, separator_key, level)
        } else {
            self.insert_separator(tx, level, separator_key, node_id, new_id)
        }
    }

    /// Increase tree height SMO: re-initialize the fixed root page as
    /// a new top-level internal node pointing at the two halves of
    /// what used to be its own content.
    fn increase_tree_height(
        &self,
        tx: TransactionId,
        left_child: PageId,
        right_child: PageId,
        separator_key: BytesKey,
        child_level: u8,
    ) -> VoidResult {
        let root_id = self.root_page();
        let return_lsn = self.txn.begin_nested_top_action(tx)?;
        let root_page = self.buffer.fix(root_id, LatchMode::Exclusive)?;
        {
            let mut guard = write_latch(&root_page);
            node::init_node(
                &mut guard.data,
                NodeHeader {
                    node_type: NodeType::Internal,
                    left_sibling: PageId::INVALID,
                    right_sibling: PageId::INVALID,
                    level: child_level + 1,
                },
            );
            let sp = node::slotted();
            sp.insert(
                &mut guard.data,
                0,
                &InternalEntry {
                    key: separator_key,
                    child: left_child,
                }
                .encode(),
            )
            .map_err(|e| RssError::invalid_state(e.to_string()))?;
            sp.insert(
                &mut guard.data,
                1,
                &InternalEntry {
                    key: BytesKey::infinity(),
                    child: right_child,
                }
                .encode(),
            )
            .map_err(|e| RssError::invalid_state(e.to_string()))?;
        }
        let lsn = self.log_page_image(tx, root_id, &root_page)?;
        write_latch(&root_page).mark_dirty(lsn);
        self.txn
            .end_nested_top_action(tx, return_lsn, vec![root_id], OP_NESTED_DONE, Vec::new())?;
        self.buffer.unfix(root_id);
        Ok(())
    }

    /// Insert the separator a split produced into the parent at
    /// `child_level + 1`, retargeting the parent entry that used to
    /// route to `left_child` (the pre-split page) so it now points at
    /// `right_child`, since the right half keeps the old high key.
    /// Splits the parent in turn if it has no room.
    fn insert_separator(
        &self,
        tx: TransactionId,
        child_level: u8,
        separator_key: BytesKey,
        left_child: PageId,
        right_child: PageId,
    ) -> VoidResult {
        let parent_level = child_level + 1;
        let cursor = Cursor::seek(
            Arc::clone(&self.buffer),
            self.root_page(),
            &separator_key,
            TraversalMode::Update,
            parent_level,
        )?;
        let parent_id = cursor.current_id;

        let new_entry = InternalEntry {
            key: separator_key.clone(),
            child: left_child,
        };
        let encoded = new_entry.encode();
        let fits = {
            let guard = read_latch(&cursor.current);
            node::slotted().can_fit(&guard.data, encoded.len())
        };

        if !fits {
            cursor.release();
            self.split(
                tx,
                Cursor::seek(
                    Arc::clone(&self.buffer),
                    self.root_page(),
                    &separator_key,
                    TraversalMode::Update,
                    parent_level,
                )?,
            )?;
            return self.insert_separator(tx, child_level, separator_key, left_child, right_child);
        }

        let return_lsn = self.txn.begin_nested_top_action(tx)?;
        {
            let mut guard = write_latch(&cursor.current);
            let slot = node::internal_child_slot(&guard.data, &separator_key);
            let existing = node::internal_entry(&guard.data, slot);
            let retargeted = InternalEntry {
                key: existing.key,
                child: right_child,
            };
            let sp = node::slotted();
            sp.set(&mut guard.data, slot, &retargeted.encode())
                .map_err(|e| RssError::invalid_state(e.to_string()))?;
            sp.insert(&mut guard.data, slot, &encoded)
                .map_err(|e| RssError::invalid_state(e.to_string()))?;
        }
        let lsn = self.log_page_image(tx, parent_id, &cursor.current)?;
        write_latch(&cursor.current).mark_dirty(lsn);
        self.txn
            .end_nested_top_action(tx, return_lsn, vec![parent_id], OP_NESTED_DONE, Vec::new())?;
        cursor.release();
        Ok(())
    }

    // ---- delete ------------------------------------------------------

    /// `delete(tx, key)` (spec Section 4.E): a manual-duration
    /// exclusive next-key lock, held until the caller's transaction
    /// ends, rather than insert's commit-duration lock — the spec
    /// distinguishes the two so a deleter can release early via an
    /// explicit unlock if it decides not to commit the delete. The
    /// lock is taken on `key` *and* on the key immediately following
    /// it (in this leaf, the right sibling's first key, or the
    /// rightmost `INFINITY` sentinel — spec.md line 148/155): the
    /// physical slot is removed right away, so without also locking
    /// the successor a concurrent scan or insert landing in the gap
    /// this delete just created would never serialize against it.
    pub fn delete(&self, tx: TransactionId, key: &BytesKey) -> VoidResult {
        let resource = self.lock_resource(key);
        self.locks.acquire(tx, resource, LockMode::X, LockDuration::Manual)?;

        let cursor = Cursor::seek(Arc::clone(&self.buffer), self.root_page(), key, TraversalMode::Update, 0)?;
        let leaf_id = cursor.current_id;

        let found = {
            let guard = read_latch(&cursor.current);
            let slot = node::leaf_lower_bound(&guard.data, key);
            let count = node::slotted().slot_count(&guard.data);
            if slot < count && node::leaf_entry(&guard.data, slot).key.compare(key) == Ordering::Equal {
                Some((slot, node::leaf_entry(&guard.data, slot)))
            } else {
                None
            }
        };

        let (slot, entry) = match found {
            Some(pair) => pair,
            None => {
                cursor.release();
                return Err(RssError::key_not_found(format!(
                    "key not present in index {}",
                    self.index_id
                )));
            }
        };

        let next_key = self.next_key_after(&cursor.current, slot + 1)?;
        let next_resource = self.lock_resource(&next_key);
        self.locks.acquire(tx, next_resource, LockMode::X, LockDuration::Manual)?;

        {
            let mut guard = write_latch(&cursor.current);
            node::slotted()
                .delete(&mut guard.data, slot)
                .map_err(|e| RssError::invalid_state(e.to_string()))?;
            node::slotted().compact(&mut guard.data);
        }
        let lsn = self.txn.log_update(
            tx,
            UpdateRecord {
                undoable: true,
                logical_undo: true,
                compensation: false,
                undo_next_lsn: None,
                page_ids: vec![leaf_id],
                op_code: OP_DELETE,
                data: entry.encode(),
            },
        )?;
        write_latch(&cursor.current).mark_dirty(lsn);

        let remaining = {
            let guard = read_latch(&cursor.current);
            node::slotted().slot_count(&guard.data)
        };
        let is_rightmost = {
            let guard = read_latch(&cursor.current);
            !NodeHeader::read(&guard.data).right_sibling.is_valid()
        };
        let is_root = leaf_id == self.root_page();
        cursor.release();

        if remaining == 0 && !is_rightmost && !is_root {
            self.merge_with_left_sibling(tx, leaf_id, 0, key)?;
        }
        Ok(())
    }

    /// Underflow handling for a leaf emptied by delete: borrow one
    /// entry from the left sibling (Redistribute SMO) if it can spare
    /// one, otherwise fold the (empty) leaf away entirely (Merge SMO,
    /// which also performs the Link/Unlink bookkeeping — relinking the
    /// left sibling's right pointer and dropping the dead parent
    /// separator — as its two phases). If `empty_id` has no left
    /// sibling under the same parent, it is left behind as a tombstone
    /// leaf rather than reached via a cross-parent merge, a documented
    /// simplification of the full SMO set.
    fn merge_with_left_sibling(&self, tx: TransactionId, empty_id: PageId, level: u8, key_hint: &BytesKey) -> VoidResult {
        let parent_cursor = Cursor::seek(
            Arc::clone(&self.buffer),
            self.root_page(),
            key_hint,
            TraversalMode::Update,
            level + 1,
        )?;
        let parent_id = parent_cursor.current_id;

        let (slot, left_child) = {
            let guard = read_latch(&parent_cursor.current);
            let slot = node::internal_child_slot(&guard.data, key_hint);
            if slot == 0 {
                (0, None)
            } else {
                (slot, Some(node::internal_entry(&guard.data, slot - 1).child))
            }
        };
        let left_child = match left_child {
            Some(id) => id,
            None => {
                parent_cursor.release();
                return Ok(());
            }
        };

        let left_page = self.buffer.fix(left_child, LatchMode::Exclusive)?;
        let left_count = {
            let guard = read_latch(&left_page);
            node::slotted().slot_count(&guard.data)
        };

        if left_count > MIN_LEAF_ENTRIES {
            self.buffer.unfix(left_child);
            parent_cursor.release();
            return self.redistribute_from_left(tx, left_child, empty_id, parent_id, slot, key_hint);
        }

        // Merge: relink the left sibling past the empty page (Link),
        // drop the parent's now-dead separator (Unlink), then reclaim
        // the page.
        let return_lsn = self.txn.begin_nested_top_action(tx)?;

        let empty_page = self.buffer.fix(empty_id, LatchMode::Exclusive)?;
        {
            let empty_header = NodeHeader::read(&read_latch(&empty_page).data);
            let mut left_guard = write_latch(&left_page);
            let mut left_header = NodeHeader::read(&left_guard.data);
            left_header.right_sibling = empty_header.right_sibling;
            left_header.write(&mut left_guard.data);
        }
        let lsn = self.log_page_image(tx, left_child, &left_page)?;
        write_latch(&left_page).mark_dirty(lsn);
        self.buffer.unfix(left_child);
        self.buffer.unfix(empty_id);

        {
            let mut guard = write_latch(&parent_cursor.current);
            node::slotted()
                .delete(&mut guard.data, slot)
                .map_err(|e| RssError::invalid_state(e.to_string()))?;
            node::slotted().compact(&mut guard.data);
        }
        let lsn = self.log_page_image(tx, parent_id, &parent_cursor.current)?;
        write_latch(&parent_cursor.current).mark_dirty(lsn);

        let parent_remaining = {
            let guard = read_latch(&parent_cursor.current);
            node::slotted().slot_count(&guard.data)
        };
        let parent_is_root = parent_id == self.root_page();
        parent_cursor.release();

        self.txn.end_nested_top_action(
            tx,
            return_lsn,
            vec![parent_id, left_child, empty_id],
            OP_NESTED_DONE,
            Vec::new(),
        )?;

        self.free_page(tx, empty_id)?;

        if parent_remaining == 1 && parent_is_root {
            self.decrease_tree_height(tx, parent_id)?;
        }
        Ok(())
    }

    /// Redistribute SMO: move the left sibling's last entry into the
    /// underflowing right page, then repoint the parent separator
    /// between them at the left sibling's new (smaller) high key.
    fn redistribute_from_left(
        &self,
        tx: TransactionId,
        left_id: PageId,
        right_id: PageId,
        parent_id: PageId,
        parent_slot: crate::space::SlotId,
        key_hint: &BytesKey,
    ) -> VoidResult {
        let _ = key_hint;
        let return_lsn = self.txn.begin_nested_top_action(tx)?;

        let left_page = self.buffer.fix(left_id, LatchMode::Exclusive)?;
        let right_page = self.buffer.fix(right_id, LatchMode::Exclusive)?;
        let node_type = NodeHeader::read(&read_latch(&left_page).data).node_type;

        let new_left_high = {
            let sp = node::slotted();
            let mut left_guard = write_latch(&left_page);
            let mut right_guard = write_latch(&right_page);
            let last = sp.slot_count(&left_guard.data) - 1;
            let bytes = sp.get(&left_guard.data, last).unwrap().to_vec();
            sp.delete(&mut left_guard.data, last).unwrap();
            sp.compact(&mut left_guard.data);
            sp.insert(&mut right_guard.data, 0, &bytes)
                .map_err(|e| RssError::invalid_state(e.to_string()))?;

            let remaining = sp.slot_count(&left_guard.data);
            match node_type {
                NodeType::Leaf => node::leaf_entry(&left_guard.data, remaining - 1).key,
                NodeType::Internal => node::internal_entry(&left_guard.data, remaining - 1).key,
            }
        };

        let lsn1 = self.log_page_image(tx, left_id, &left_page)?;
        write_latch(&left_page).mark_dirty(lsn1);
        let lsn2 = self.log_page_image(tx, right_id, &right_page)?;
        write_latch(&right_page).mark_dirty(lsn2);
        self.buffer.unfix(left_id);
        self.buffer.unfix(right_id);

        let parent_page = self.buffer.fix(parent_id, LatchMode::Exclusive)?;
        {
            let mut guard = write_latch(&parent_page);
            let existing_child = node::internal_entry(&guard.data, parent_slot - 1).child;
            let retargeted = InternalEntry {
                key: new_left_high,
                child: existing_child,
            };
            node::slotted()
                .set(&mut guard.data, parent_slot - 1, &retargeted.encode())
                .map_err(|e| RssError::invalid_state(e.to_string()))?;
        }
        let lsn = self.log_page_image(tx, parent_id, &parent_page)?;
        write_latch(&parent_page).mark_dirty(lsn);
        self.buffer.unfix(parent_id);

        self.txn.end_nested_top_action(
            tx,
            return_lsn,
            vec![left_id, right_id, parent_id],
            OP_NESTED_DONE,
            Vec::new(),
        )?;
        Ok(())
    }

    /// Decrease tree height SMO: when the root has collapsed to a
    /// single child, copy that child's content back into the
    /// permanent root page and reclaim the child.
    fn decrease_tree_height(&self, tx: TransactionId, root_id: PageId) -> VoidResult {
        let return_lsn = self.txn.begin_nested_top_action(tx)?;
        let root_page = self.buffer.fix(root_id, LatchMode::Exclusive)?;
        let sole_child = {
            let guard = read_latch(&root_page);
            if node::slotted().slot_count(&guard.data) != 1 {
                None
            } else {
                Some(node::internal_entry(&guard.data, 0).child)
            }
        };
        let sole_child = match sole_child {
            Some(id) => id,
            None => {
                self.buffer.unfix(root_id);
                return Ok(());
            }
        };

        let child_page = self.buffer.fix(sole_child, LatchMode::Exclusive)?;
        {
            let child_guard = read_latch(&child_page);
            let mut root_guard = write_latch(&root_page);
            root_guard.data.copy_from_slice(&child_guard.data);
            let mut header = NodeHeader::read(&root_guard.data);
            header.left_sibling = PageId::INVALID;
            header.right_sibling = PageId::INVALID;
            header.write(&mut root_guard.data);
        }
        let lsn = self.log_page_image(tx, root_id, &root_page)?;
        write_latch(&root_page).mark_dirty(lsn);
        self.buffer.unfix(sole_child);
        self.buffer.unfix(root_id);

        self.txn
            .end_nested_top_action(tx, return_lsn, vec![root_id, sole_child], OP_NESTED_DONE, Vec::new())?;
        self.free_page(tx, sole_child)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, LogGroupConfig};
    use crate::lock::LockManager;
    use crate::log::LogManager;

    fn test_index(dir: &std::path::Path) -> Arc<BTreeIndex> {
        let config = Config {
            control_files: vec![dir.join("a.ctl"), dir.join("b.ctl")],
            groups: vec![LogGroupConfig { path: dir.join("group0") }],
            files_per_group: 3,
            file_size: 1 << 20,
            buffer_size: 4096,
            buffer_limit: 64,
            flush_interval_secs: 3600,
            archive_path: dir.join("archive"),
            storage_base_path: dir.join("data"),
        };
        let log = LogManager::open(config.clone()).unwrap();
        let buffer = Arc::new(BufferManager::new(config, Arc::clone(&log), 64));
        let locks = Arc::new(LockManager::new());
        let txn = TransactionManager::new(log, Arc::clone(&buffer), Arc::clone(&locks));
        let index = BTreeIndex::create(buffer, txn.clone(), locks, 1, 1, false).unwrap();
        txn.set_recovery_handler(index.clone());
        index
    }

    #[test]
    fn insert_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let index = test_index(dir.path());
        let txn = Arc::clone(&index.txn);
        let tx = txn.begin().unwrap();
        index
            .insert(tx.id, BytesKey::from_bytes(b"hello".to_vec()), RowLocation::new(1, 0))
            .unwrap();
        txn.commit(tx.id).unwrap();

        let found = index.get(&BytesKey::from_bytes(b"hello".to_vec())).unwrap();
        assert_eq!(found, Some(RowLocation::new(1, 0)));
    }

    #[test]
    fn delete_removes_key() {
        let dir = tempfile::tempdir().unwrap();
        let index = test_index(dir.path());
        let txn = Arc::clone(&index.txn);
        let tx = txn.begin().unwrap();
        let key = BytesKey::from_bytes(b"gone".to_vec());
        index.insert(tx.id, key.clone(), RowLocation::new(1, 1)).unwrap();
        index.delete(tx.id, &key).unwrap();
        txn.commit(tx.id).unwrap();
        assert_eq!(index.get(&key).unwrap(), None);
    }

    #[test]
    fn duplicate_key_rejected_on_unique_index() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            storage_base_path: dir.path().join("data"),
            ..Config::default()
        };
        let log = LogManager::open(Config {
            control_files: vec![dir.path().join("a.ctl"), dir.path().join("b.ctl")],
            ..config.clone()
        })
        .unwrap();
        let buffer = Arc::new(BufferManager::new(config, Arc::clone(&log), 64));
        let locks = Arc::new(LockManager::new());
        let txn = TransactionManager::new(log, Arc::clone(&buffer), Arc::clone(&locks));
        let index = BTreeIndex::create(buffer, txn.clone(), locks, 2, 2, true).unwrap();
        txn.set_recovery_handler(index.clone());

        let tx = txn.begin().unwrap();
        let key = BytesKey::from_bytes(b"dup".to_vec());
        index.insert(tx.id, key.clone(), RowLocation::new(1, 0)).unwrap();
        let err = index.insert(tx.id, key, RowLocation::new(1, 1)).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::UniqueConstraintViolation);
    }

    #[test]
    fn splitting_leaves_keeps_all_keys_reachable() {
        let dir = tempfile::tempdir().unwrap();
        let index = test_index(dir.path());
        let txn = Arc::clone(&index.txn);
        let tx = txn.begin().unwrap();
        for i in 0..200u32 {
            let key = BytesKey::from_bytes(format!("k{:05}", i).into_bytes());
            index.insert(tx.id, key, RowLocation::new(1, i as u16)).unwrap();
        }
        txn.commit(tx.id).unwrap();

        for i in 0..200u32 {
            let key = BytesKey::from_bytes(format!("k{:05}", i).into_bytes());
            assert_eq!(index.get(&key).unwrap(), Some(RowLocation::new(1, i as u16)), "missing key {}", i);
        }
    }
}
