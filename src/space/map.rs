//! Per-container free-page bitmap (spec Section 3, "Space Map Page").
//!
//! Grounded on the teacher's `btree/page/header_page.rs`: a `BitVec`
//! where a set bit means "free", scanned linearly for the first
//! available slot. Here it tracks page *numbers* within a container
//! rather than tuple slots within one page, so the buffer manager can
//! reuse pages freed by a B-tree merge instead of only ever growing
//! the container file.
//!
//! One space map page tracks `capacity()` page numbers; a container
//! larger than that needs more than one (chained via `next`), which
//! this module does not implement yet — adequate for the scope here,
//! noted as a simplification rather than a silent limitation.

use bit_vec::BitVec;

use crate::page_id::ROOT_PAGE_NUMBER;

/// Byte offset within the page where the bitmap begins; byte 0 holds a
/// format tag so a space map page is self-identifying when read off
/// disk during recovery or a consistency check.
const BITMAP_OFFSET: usize = 1;

pub struct SpaceMap {
    page_size: usize,
}

impl SpaceMap {
    pub fn new(page_size: usize) -> Self {
        Self { page_size }
    }

    /// How many page numbers one space map page can track.
    pub fn capacity(&self) -> usize {
        (self.page_size - BITMAP_OFFSET) * 8
    }

    pub fn init(&self, data: &mut [u8]) {
        data[0] = 0x53; // 'S'
        let bits = BitVec::from_elem(self.capacity(), true);
        data[BITMAP_OFFSET..].copy_from_slice(&bits.to_bytes());
        // page 0 (the space map page itself) and the fixed root page
        // are never handed out by `allocate`.
        self.mark(data, 0, false);
        self.mark(data, ROOT_PAGE_NUMBER as usize, false);
    }

    fn bitmap(&self, data: &[u8]) -> BitVec<u32> {
        BitVec::from_bytes(&data[BITMAP_OFFSET..])
    }

    fn mark(&self, data: &mut [u8], page_number: usize, free: bool) {
        let mut bits = self.bitmap(data);
        bits.set(page_number, free);
        data[BITMAP_OFFSET..].copy_from_slice(&bits.to_bytes());
    }

    pub fn is_free(&self, data: &[u8], page_number: u32) -> bool {
        let bits = self.bitmap(data);
        let idx = page_number as usize;
        idx >= bits.len() || bits[idx]
    }

    /// Claim the lowest-numbered free page, returning `None` if this
    /// space map page has no free slots left (the caller then grows
    /// the container and allocates a fresh space map page).
    pub fn allocate(&self, data: &mut [u8]) -> Option<u32> {
        let bits = self.bitmap(data);
        let mut found = None;
        for i in 0..bits.len() {
            if bits[i] {
                found = Some(i);
                break;
            }
        }
        let page_number = found?;
        self.mark(data, page_number, false);
        Some(page_number as u32)
    }

    pub fn free(&self, data: &mut [u8], page_number: u32) {
        self.mark(data, page_number as usize, true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_skips_reserved_pages() {
        let map = SpaceMap::new(512);
        let mut data = vec![0u8; 512];
        map.init(&mut data);
        let first = map.allocate(&mut data).unwrap();
        assert_ne!(first, 0);
        assert_ne!(first, ROOT_PAGE_NUMBER);
    }

    #[test]
    fn freed_page_is_reused() {
        let map = SpaceMap::new(512);
        let mut data = vec![0u8; 512];
        map.init(&mut data);
        let a = map.allocate(&mut data).unwrap();
        let b = map.allocate(&mut data).unwrap();
        assert_ne!(a, b);
        map.free(&mut data, a);
        assert!(map.is_free(&data, a));
        let reused = map.allocate(&mut data).unwrap();
        assert_eq!(reused, a);
    }
}
