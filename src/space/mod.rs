//! Slotted page layout and per-container free-space tracking (spec
//! Section 3, "Page" and "Space Map Page").

mod map;
mod slotted_page;

pub use map::SpaceMap;
pub use slotted_page::{SlotId, SlottedPage, SlottedPageError};
