//! B-tree node page format: a fixed header plus a [`SlottedPage`] body
//! (spec Section 3, "B-Tree Node Header").
//!
//! Every node, leaf or internal, carries the same header — node type,
//! sibling pointers, tree level — ahead of a slotted body of
//! [`LeafEntry`]/[`InternalEntry`] records kept in ascending key order.
//! A node's *high key* is never stored separately: it is always the
//! key of the node's last entry, which doubles as the upper bound
//! readers compare against to decide whether a concurrent split moved
//! their target right (spec Section 4.E, "move right"). The single
//! exception is the tree's rightmost node at each level, whose last
//! entry is the `INFINITY` sentinel rather than real data.

use std::cmp::Ordering;

use crate::btree::codec::{BytesKey, KeyCodec, RowLocation};
use crate::io::{Decodeable, Encodeable};
use crate::page_id::PageId;
use crate::space::{SlotId, SlottedPage};

pub const HEADER_LEN: usize = 18;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Leaf,
    Internal,
}

#[derive(Debug, Clone, Copy)]
pub struct NodeHeader {
    pub node_type: NodeType,
    pub left_sibling: PageId,
    pub right_sibling: PageId,
    pub level: u8,
}

impl NodeHeader {
    pub fn read(data: &[u8]) -> Self {
        let node_type = if data[0] == 0 { NodeType::Leaf } else { NodeType::Internal };
        let mut cursor = std::io::Cursor::new(&data[1..17]);
        let left_sibling = PageId::decode_from(&mut cursor);
        let right_sibling = PageId::decode_from(&mut cursor);
        let level = data[17];
        Self {
            node_type,
            left_sibling,
            right_sibling,
            level,
        }
    }

    pub fn write(&self, data: &mut [u8]) {
        data[0] = match self.node_type {
            NodeType::Leaf => 0,
            NodeType::Internal => 1,
        };
        let mut buf = self.left_sibling.encode();
        buf.extend(self.right_sibling.encode());
        data[1..17].copy_from_slice(&buf);
        data[17] = self.level;
    }
}

pub fn slotted() -> SlottedPage {
    SlottedPage::new(HEADER_LEN)
}

/// Write `header` and reset the slotted body to empty. Used both for a
/// brand-new page and for re-purposing the fixed root page during an
/// increase/decrease tree height SMO.
pub fn init_node(data: &mut [u8], header: NodeHeader) {
    header.write(data);
    slotted().init(data);
}

#[derive(Debug, Clone)]
pub struct LeafEntry {
    pub key: BytesKey,
    pub location: RowLocation,
}

impl LeafEntry {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = self.key.encode();
        buf.extend(self.location.encode());
        buf
    }

    pub fn decode(bytes: &[u8]) -> Self {
        let mut cursor = std::io::Cursor::new(bytes);
        let key = BytesKey::decode_from(&mut cursor);
        let location = RowLocation::decode_from(&mut cursor);
        Self { key, location }
    }
}

#[derive(Debug, Clone)]
pub struct InternalEntry {
    pub key: BytesKey,
    pub child: PageId,
}

impl InternalEntry {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = self.key.encode();
        buf.extend(self.child.encode());
        buf
    }

    pub fn decode(bytes: &[u8]) -> Self {
        let mut cursor = std::io::Cursor::new(bytes);
        let key = BytesKey::decode_from(&mut cursor);
        let child = PageId::decode_from(&mut cursor);
        Self { key, child }
    }
}

pub fn leaf_entry(data: &[u8], slot: SlotId) -> LeafEntry {
    LeafEntry::decode(slotted().get(data, slot).expect("slot in range"))
}

pub fn internal_entry(data: &[u8], slot: SlotId) -> InternalEntry {
    InternalEntry::decode(slotted().get(data, slot).expect("slot in range"))
}

/// A node's high key: the key of its last entry, or `None` for an
/// empty node (a tombstone left behind by a delete that emptied a leaf
/// without a left sibling to merge into — see `btree::tree`).
pub fn high_key(data: &[u8], node_type: NodeType) -> Option<BytesKey> {
    let sp = slotted();
    let count = sp.slot_count(data);
    if count == 0 {
        return None;
    }
    match node_type {
        NodeType::Leaf => Some(leaf_entry(data, count - 1).key),
        NodeType::Internal => Some(internal_entry(data, count - 1).key),
    }
}

/// First slot whose key is `>= key` (the position `key` occupies or
/// should be inserted at, in a leaf's ascending key order).
pub fn leaf_lower_bound(data: &[u8], key: &BytesKey) -> SlotId {
    let sp = slotted();
    let count = sp.slot_count(data);
    let mut lo = 0u16;
    let mut hi = count;
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if leaf_entry(data, mid).key.compare(key) == Ordering::Less {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}

/// The slot whose child subtree may contain `key`: the first entry
/// whose key is `>= key`, since every internal entry's key is the
/// high key (inclusive upper bound) of the subtree it points at (spec
/// Section 4.E, "separator keys are upper bounds").
pub fn internal_child_slot(data: &[u8], key: &BytesKey) -> SlotId {
    let sp = slotted();
    let count = sp.slot_count(data);
    let mut lo = 0u16;
    let mut hi = count;
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if internal_entry(data, mid).key.compare(key) == Ordering::Less {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo.min(count.saturating_sub(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf_page() -> Vec<u8> {
        let mut data = vec![0u8; 512];
        init_node(
            &mut data,
            NodeHeader {
                node_type: NodeType::Leaf,
                left_sibling: PageId::INVALID,
                right_sibling: PageId::INVALID,
                level: 0,
            },
        );
        data
    }

    #[test]
    fn header_round_trips() {
        let mut data = leaf_page();
        let header = NodeHeader {
            node_type: NodeType::Internal,
            left_sibling: PageId::new(1, 2),
            right_sibling: PageId::new(1, 3),
            level: 4,
        };
        header.write(&mut data);
        let read = NodeHeader::read(&data);
        assert_eq!(read.node_type, NodeType::Internal);
        assert_eq!(read.left_sibling, PageId::new(1, 2));
        assert_eq!(read.right_sibling, PageId::new(1, 3));
        assert_eq!(read.level, 4);
    }

    #[test]
    fn leaf_lower_bound_finds_insertion_point() {
        let mut data = leaf_page();
        let sp = slotted();
        for (i, k) in [b"b".to_vec(), b"d".to_vec(), b"f".to_vec()].into_iter().enumerate() {
            let entry = LeafEntry {
                key: BytesKey::from_bytes(k),
                location: RowLocation::new(1, i as u16),
            };
            sp.insert(&mut data, i as SlotId, &entry.encode()).unwrap();
        }
        let slot = leaf_lower_bound(&data, &BytesKey::from_bytes(b"c".to_vec()));
        assert_eq!(slot, 1);
        let slot = leaf_lower_bound(&data, &BytesKey::from_bytes(b"d".to_vec()));
        assert_eq!(slot, 1);
    }

    #[test]
    fn high_key_is_last_entry() {
        let mut data = leaf_page();
        let sp = slotted();
        sp.insert(
            &mut data,
            0,
            &LeafEntry {
                key: BytesKey::from_bytes(b"a".to_vec()),
                location: RowLocation::new(1, 0),
            }
            .encode(),
        )
        .unwrap();
        sp.insert(
            &mut data,
            1,
            &LeafEntry {
                key: BytesKey::from_bytes(b"z".to_vec()),
                location: RowLocation::new(1, 1),
            }
            .encode(),
        )
        .unwrap();
        assert_eq!(high_key(&data, NodeType::Leaf), Some(BytesKey::from_bytes(b"z".to_vec())));
    }
}
