//! Durable side table of ids the client has flagged but the server may not
//! reflect yet.
//!
//! Marks are merged into every fresh server snapshot so an item does not
//! flicker back to unflagged. The overlay only records "mark"; there is no
//! unmark. The size bound is the exception: an evicted mark no longer masks
//! a lagging server.

pub mod backend;
pub mod store;

pub use backend::{FileBackend, MemoryBackend, OverlayBackend, OverlayError};
pub use store::{LocalOverlay, DEFAULT_MAX_ENTRIES, DEFAULT_NAMESPACE};
