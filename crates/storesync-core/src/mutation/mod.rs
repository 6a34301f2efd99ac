//! Optimistic mutations over flagged items (read/unread, delete).
//!
//! A mutation is applied to local state first, then sent to the server
//! through a verb ladder. Success is recorded in the `LocalOverlay`;
//! rejection rolls the item back to where it was.

pub mod error;
pub mod item;
pub mod reconciler;

pub use error::MutationError;
pub use item::{FlagItem, Flagged, MutationPhase, Transition};
pub use reconciler::{FlagBackend, Reconciler, ReconcilerOptions, Settlement};
