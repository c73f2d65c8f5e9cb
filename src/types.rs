//! Common type aliases, in the spirit of the teacher's `types.rs`.

use std::sync::{Arc, RwLock};

use crate::error::RssError;

/// Type alias, not a new type: cannot define methods on it, but saves
/// writing `Arc<RwLock<T>>` at every call site.
pub type Pod<T> = Arc<RwLock<T>>;

pub type RssResult<T> = Result<T, RssError>;
pub type VoidResult = Result<(), RssError>;

pub fn pod<T>(value: T) -> Pod<T> {
    Arc::new(RwLock::new(value))
}
