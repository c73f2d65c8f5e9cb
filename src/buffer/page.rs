//! A fixed-size buffer-pool frame (spec Section 4.B, "Page frame").
//!
//! Grounded on the teacher's page wrapper style (`Rc<RefCell<Page>>`
//! keyed by page id in `btree/buffer_pool.rs`) but made thread-safe per
//! `types::Pod` (`Arc<RwLock<T>>`) since the spec requires concurrent
//! fixers rather than the teacher's single-threaded `Rc`/`RefCell`.

use std::fmt;

use crate::lsn::Lsn;
use crate::page_id::PageId;

pub const PAGE_SIZE: usize = 8192;

/// Raw page contents plus the bookkeeping the buffer manager needs to
/// decide when a page must be written (WAL-before-write) and when it
/// can be discarded or must be replayed during recovery.
pub struct Page {
    pub page_id: PageId,
    pub data: Vec<u8>,
    /// set once, on the first update since the page was last clean
    /// (spec Section 4.B, "oldest interesting LSN" derivation).
    pub first_dirty_lsn: Lsn,
    /// LSN of the most recent update applied to this page; every WAL
    /// protocol check compares a record's LSN against this value.
    pub page_lsn: Lsn,
    pub dirty: bool,
}

impl Page {
    pub fn new(page_id: PageId) -> Self {
        Self {
            page_id,
            data: vec![0u8; PAGE_SIZE],
            first_dirty_lsn: Lsn::NULL,
            page_lsn: Lsn::NULL,
            dirty: false,
        }
    }

    pub fn from_bytes(page_id: PageId, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), PAGE_SIZE);
        Self {
            page_id,
            data,
            first_dirty_lsn: Lsn::NULL,
            page_lsn: Lsn::NULL,
            dirty: false,
        }
    }

    /// Record that this page was updated at `lsn`. Call this under the
    /// page's exclusive latch, after WAL has already durably logged the
    /// change (or at least buffered it — actual durability is enforced
    /// at commit by the transaction manager's flush-to-commit-LSN rule).
    pub fn mark_dirty(&mut self, lsn: Lsn) {
        if !self.dirty {
            self.first_dirty_lsn = lsn;
            self.dirty = true;
        }
        self.page_lsn = lsn;
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
        self.first_dirty_lsn = Lsn::NULL;
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Page")
            .field("page_id", &self.page_id)
            .field("page_lsn", &self.page_lsn)
            .field("dirty", &self.dirty)
            .finish()
    }
}
