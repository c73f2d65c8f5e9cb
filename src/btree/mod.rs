//! B-link tree index manager (spec Section 4.E).

mod codec;
mod cursor;
mod node;
mod scan;
mod tree;
mod undo;

pub use codec::{BytesKey, KeyCodec, LocationCodec, RowLocation};
pub use cursor::TraversalMode;
pub use scan::Scan;
pub use tree::BTreeIndex;
