//! In-memory stale-while-revalidate cache.
//!
//! Every entry moves through three age bands relative to its `CacheConfig`:
//! - fresh: served as is
//! - stale: served immediately while a background fetch revalidates it
//! - expired: discarded on access, the caller waits for a new fetch
//!
//! Fetches for the same key are de-duplicated, and the `PrefetchScheduler`
//! warms keys before any consumer asks for them.

pub mod entry;
pub mod error;
pub mod prefetch;
pub mod store;

pub use entry::{age_display, CacheConfig, EntryInfo, Freshness};
pub use error::CacheError;
pub use prefetch::{PrefetchBatch, PrefetchReport, PrefetchScheduler};
pub use store::{CacheStore, Query};
