//! Keyed stale-while-revalidate store with single-flight fetches.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::entry::{downcast, AnyValue, CacheConfig, CacheEntry, EntryInfo, Freshness};
use super::CacheError;

type LoadOutcome = Result<AnyValue, Arc<anyhow::Error>>;
type SharedFetch = Shared<BoxFuture<'static, LoadOutcome>>;

/// Whether anyone is waiting on a fetch. Only changes how failures are logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchMode {
    Blocking,
    Background,
}

struct InFlight {
    id: u64,
    fetch: SharedFetch,
}

#[derive(Default)]
struct StoreState {
    entries: HashMap<String, CacheEntry>,
    inflight: HashMap<String, InFlight>,
    next_fetch_id: u64,
    /// Bumped by `clear`; fetches from an older generation are discarded.
    generation: u64,
}

/// Process-wide cache of server payloads.
///
/// Cloning is cheap and every clone sees the same entries. Hosts create one
/// per session and hand it to consumers (see `SyncContext`).
#[derive(Clone, Default)]
pub struct CacheStore {
    state: Arc<Mutex<StoreState>>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        // Entry writes are single assignments, a poisoned table is still consistent
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read `key`, loading it through `loader` when needed.
    ///
    /// - fresh: returned without calling `loader`
    /// - stale: returned immediately, `loader` runs in the background
    /// - missing or expired: `loader` is awaited; concurrent callers share it
    pub async fn get<T, F, Fut>(
        &self,
        key: &str,
        loader: F,
        config: CacheConfig,
    ) -> Result<Arc<T>, CacheError>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let stale = {
            let mut state = self.lock();
            let now = Instant::now();
            let cached = state
                .entries
                .get(key)
                .map(|entry| (entry.freshness(now), Arc::clone(&entry.value)));

            match cached {
                Some((Freshness::Fresh, value)) => {
                    debug!(key, "Cache hit");
                    return downcast(key, value);
                }
                Some((Freshness::Stale, value)) => {
                    if state.inflight.contains_key(key) {
                        return downcast(key, value);
                    }
                    debug!(key, "Serving stale value, revalidating");
                    Some(value)
                }
                Some((Freshness::Expired, _)) => {
                    debug!(key, "Evicting expired entry");
                    state.entries.remove(key);
                    None
                }
                None => None,
            }
        };

        if let Some(value) = stale {
            let _ = self.join_or_start(key, loader, config, FetchMode::Background);
            return downcast(key, value);
        }

        let fetch = self.join_or_start(key, loader, config, FetchMode::Blocking);
        let value = fetch.await.map_err(|cause| CacheError::LoadFailure {
            key: key.to_string(),
            cause,
        })?;
        downcast(key, value)
    }

    /// Warm `key` without handing the value back.
    pub async fn prefetch<T, F, Fut>(
        &self,
        key: &str,
        loader: F,
        config: CacheConfig,
    ) -> Result<(), CacheError>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.get(key, loader, config).await.map(|_: Arc<T>| ())
    }

    /// Reload `key` regardless of freshness.
    ///
    /// This is the one entry point for polling and manual retries. It joins a
    /// fetch that is already in flight instead of starting a second one. On
    /// failure the previous entry stays in place.
    pub async fn refresh<T, F, Fut>(
        &self,
        key: &str,
        loader: F,
        config: CacheConfig,
    ) -> Result<Arc<T>, CacheError>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let fetch = self.join_or_start(key, loader, config, FetchMode::Blocking);
        let value = fetch.await.map_err(|cause| CacheError::LoadFailure {
            key: key.to_string(),
            cause,
        })?;
        downcast(key, value)
    }

    /// Write a value directly, as if a fetch had just completed.
    pub fn set<T: Send + Sync + 'static>(&self, key: &str, value: T, config: CacheConfig) {
        let value: AnyValue = Arc::new(value);
        self.lock()
            .entries
            .insert(key.to_string(), CacheEntry::new(value, config));
    }

    /// Current value if it may still be served. Expired entries are evicted.
    pub fn peek<T: Send + Sync + 'static>(&self, key: &str) -> Option<Arc<T>> {
        let mut state = self.lock();
        let now = Instant::now();
        let freshness = state.entries.get(key)?.freshness(now);
        if freshness == Freshness::Expired {
            state.entries.remove(key);
            return None;
        }
        let value = Arc::clone(&state.entries.get(key)?.value);
        downcast(key, value).ok()
    }

    pub fn freshness(&self, key: &str) -> Option<Freshness> {
        let state = self.lock();
        state
            .entries
            .get(key)
            .map(|entry| entry.freshness(Instant::now()))
    }

    pub fn is_fetching(&self, key: &str) -> bool {
        self.lock().inflight.contains_key(key)
    }

    /// Drop the entry and forget any in-flight fetch for `key`.
    ///
    /// A forgotten fetch still writes its result when it completes.
    pub fn invalidate(&self, key: &str) {
        let mut state = self.lock();
        state.entries.remove(key);
        state.inflight.remove(key);
    }

    /// Invalidate every key starting with `prefix` (e.g. `"blog:"`).
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.retain(|key, _| !key.starts_with(prefix));
        state.inflight.retain(|key, _| !key.starts_with(prefix));
        before - state.entries.len()
    }

    /// Drop every entry and in-flight fetch.
    ///
    /// Unlike `invalidate`, fetches started before the clear never write
    /// their results, so a reset store stays empty.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.inflight.clear();
        state.generation += 1;
    }

    /// Remove every expired entry. Eviction also happens lazily on access.
    pub fn evict_expired(&self) -> usize {
        let mut state = self.lock();
        let now = Instant::now();
        let before = state.entries.len();
        state
            .entries
            .retain(|_, entry| entry.freshness(now) != Freshness::Expired);
        let evicted = before - state.entries.len();
        if evicted > 0 {
            debug!(evicted, "Evicted expired cache entries");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entry ages sorted by key.
    pub fn ages(&self) -> Vec<EntryInfo> {
        let state = self.lock();
        let now = Instant::now();
        let mut infos: Vec<EntryInfo> = state
            .entries
            .iter()
            .map(|(key, entry)| EntryInfo {
                key: key.clone(),
                freshness: entry.freshness(now),
                fetched_at: entry.fetched_at_wall,
                fetching: state.inflight.contains_key(key),
            })
            .collect();
        infos.sort_by(|a, b| a.key.cmp(&b.key));
        infos
    }

    // ===== Fetch coordination =====

    /// Join the fetch in flight for `key` or start one.
    ///
    /// `loader` is called without the store lock held, so it may read the
    /// store itself.
    fn join_or_start<T, F, Fut>(
        &self,
        key: &str,
        loader: F,
        config: CacheConfig,
        mode: FetchMode,
    ) -> SharedFetch
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        if let Some(fetch) = self.inflight_fetch(key) {
            debug!(key, "Joining in-flight fetch");
            return fetch;
        }
        if mode == FetchMode::Blocking {
            debug!(key, "Cache miss, fetching");
        }

        let load = loader();

        let mut state = self.lock();
        // Another caller may have started a fetch while the loader was building
        if let Some(inflight) = state.inflight.get(key) {
            debug!(key, "Joining fetch started concurrently");
            return inflight.fetch.clone();
        }
        self.start_fetch(&mut state, key, load, config, mode)
    }

    fn inflight_fetch(&self, key: &str) -> Option<SharedFetch> {
        self.lock().inflight.get(key).map(|inflight| inflight.fetch.clone())
    }

    /// Spawn the load so the store is updated even if every caller goes away.
    fn start_fetch<T, Fut>(
        &self,
        state: &mut StoreState,
        key: &str,
        load: Fut,
        config: CacheConfig,
        mode: FetchMode,
    ) -> SharedFetch
    where
        T: Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let id = state.next_fetch_id;
        state.next_fetch_id += 1;
        let generation = state.generation;

        let guard = InFlightGuard {
            store: self.clone(),
            key: key.to_string(),
            id,
        };

        let task = tokio::spawn(async move {
            let outcome: LoadOutcome = load
                .await
                .map(|value| Arc::new(value) as AnyValue)
                .map_err(Arc::new);
            guard.store.settle(&guard.key, config, mode, generation, &outcome);
            drop(guard);
            outcome
        });

        let fetch = async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(e) => Err(Arc::new(anyhow::anyhow!("Fetch task failed: {}", e))),
            }
        }
        .boxed()
        .shared();

        state.inflight.insert(
            key.to_string(),
            InFlight {
                id,
                fetch: fetch.clone(),
            },
        );
        fetch
    }

    fn settle(
        &self,
        key: &str,
        config: CacheConfig,
        mode: FetchMode,
        generation: u64,
        outcome: &LoadOutcome,
    ) {
        match outcome {
            Ok(value) => {
                let mut state = self.lock();
                if state.generation != generation {
                    debug!(key, "Store cleared during fetch, discarding result");
                    return;
                }
                // Last write wins: whichever fetch completes later owns the entry
                state
                    .entries
                    .insert(key.to_string(), CacheEntry::new(Arc::clone(value), config));
                debug!(key, "Stored fetched value");
            }
            Err(e) => match mode {
                FetchMode::Background => {
                    warn!(key, error = %e, "Background refresh failed, keeping stale value");
                }
                FetchMode::Blocking => {
                    debug!(key, error = %e, "Fetch failed");
                }
            },
        }
    }
}

/// Releases the single-flight slot, also when the loader panics.
struct InFlightGuard {
    store: CacheStore,
    key: String,
    id: u64,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut state = self.store.lock();
        if state.inflight.get(&self.key).map(|f| f.id) == Some(self.id) {
            state.inflight.remove(&self.key);
        }
    }
}

/// Reusable description of one cached resource.
///
/// Keeps the key, windows and loader together so polling, prefetching and
/// consumers all go through the same definition.
pub struct Query<T> {
    key: String,
    config: CacheConfig,
    loader: Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<T>> + Send + Sync>,
}

impl<T> Clone for Query<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            config: self.config,
            loader: Arc::clone(&self.loader),
        }
    }
}

impl<T: Send + Sync + 'static> Query<T> {
    pub fn new<F, Fut>(key: impl Into<String>, config: CacheConfig, loader: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self {
            key: key.into(),
            config,
            loader: Arc::new(move || loader().boxed()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn config(&self) -> CacheConfig {
        self.config
    }

    pub async fn fetch(&self, store: &CacheStore) -> Result<Arc<T>, CacheError> {
        let loader = Arc::clone(&self.loader);
        store.get(&self.key, move || loader(), self.config).await
    }

    pub async fn prefetch(&self, store: &CacheStore) -> Result<(), CacheError> {
        let loader = Arc::clone(&self.loader);
        store
            .prefetch::<T, _, _>(&self.key, move || loader(), self.config)
            .await
    }

    pub async fn refresh(&self, store: &CacheStore) -> Result<Arc<T>, CacheError> {
        let loader = Arc::clone(&self.loader);
        store.refresh(&self.key, move || loader(), self.config).await
    }
}
