//! Notification feed and its background poller.
//!
//! The feed ties the cache, the reconciler and a `FlagBackend` together so
//! hosts deal with one object per list. The poller keeps it current.

pub mod feed;
pub mod poller;

pub use feed::NotificationFeed;
pub use poller::{Poller, PollerHandle};
