//! Client-side data synchronization for the storefront web client.
//!
//! - `cache`: keyed stale-while-revalidate store with single-flight fetches
//!   and a prefetch scheduler
//! - `mutation`: optimistic flag mutations with revert on rejection
//! - `overlay`: durable record of marks the server has not reflected yet
//! - `status`: enrollment status to action button mapping
//! - `api`: REST client and the verb ladder used for writes
//! - `sync`: notification feed and poller
//! - `context`: one session's worth of the above, wired together

pub mod api;
pub mod cache;
pub mod config;
pub mod context;
pub mod models;
pub mod mutation;
pub mod overlay;
pub mod status;
pub mod sync;

pub use api::{ApiClient, ApiError};
pub use cache::{CacheConfig, CacheError, CacheStore, Freshness, PrefetchScheduler, Query};
pub use config::Config;
pub use context::SyncContext;
pub use mutation::{MutationError, Reconciler, Settlement, Transition};
pub use overlay::LocalOverlay;
pub use status::{derive_action, derive_action_for, ActionAffordance, ActionVerb, Icon, RequestStatus};
pub use sync::{NotificationFeed, Poller, PollerHandle};
