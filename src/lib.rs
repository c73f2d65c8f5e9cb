//! SimpleDBM-RSS: an embedded transactional storage subsystem —
//! ARIES-style write-ahead logging, a buffer pool, hierarchical
//! locking, and a B-link tree index manager (spec Section 1,
//! "Overview").
//!
//! Grounded on the teacher repo's module layout (`transaction/`,
//! `btree/`, `io.rs`, `error.rs`, `types.rs`, `utils.rs`), reworked per
//! spec Section 9's redesign flags: logical rather than physical undo,
//! explicit tagged log records instead of a type registry, and the
//! B-link tree's `KeyCodec`/`LocationCodec` capabilities in place of
//! the original's reflective key/location factories.

pub mod btree;
pub mod buffer;
pub mod config;
pub mod error;
pub mod io;
pub mod lock;
pub mod log;
pub mod lsn;
pub mod page_id;
pub mod space;
pub mod txn;
pub mod types;
pub mod utils;

pub use btree::{BTreeIndex, BytesKey, KeyCodec, LocationCodec, RowLocation};
pub use buffer::BufferManager;
pub use config::Config;
pub use error::{ErrorKind, RssError};
pub use lock::LockManager;
pub use log::LogManager;
pub use lsn::Lsn;
pub use page_id::PageId;
pub use txn::{Transaction, TransactionManager};
pub use types::{RssResult, VoidResult};
