//! Fire-and-forget cache warmers run after the host starts up.

use futures::future::{BoxFuture, FutureExt};
use tokio::task::JoinHandle;
use tracing::debug;

use super::store::{CacheStore, Query};
use super::CacheError;

type Warmer = Box<dyn Fn(CacheStore) -> BoxFuture<'static, Result<(), CacheError>> + Send + Sync>;

/// Collects queries to warm and fires them all at once.
pub struct PrefetchScheduler {
    store: CacheStore,
    warmers: Vec<(String, Warmer)>,
}

impl PrefetchScheduler {
    pub fn new(store: CacheStore) -> Self {
        Self {
            store,
            warmers: Vec::new(),
        }
    }

    pub fn register<T: Send + Sync + 'static>(&mut self, query: Query<T>) -> &mut Self {
        let key = query.key().to_string();
        let warmer: Warmer = Box::new(move |store: CacheStore| {
            let query = query.clone();
            async move { query.prefetch(&store).await }.boxed()
        });
        self.warmers.push((key, warmer));
        self
    }

    pub fn len(&self) -> usize {
        self.warmers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.warmers.is_empty()
    }

    /// Spawn every warmer. Failures are logged, never surfaced.
    ///
    /// Dropping the returned batch detaches the tasks; they still fill the store.
    pub fn run(&self) -> PrefetchBatch {
        let handles = self
            .warmers
            .iter()
            .map(|(key, warmer)| {
                let warm = warmer(self.store.clone());
                let task_key = key.clone();
                let handle = tokio::spawn(async move {
                    let result = warm.await;
                    match &result {
                        Ok(()) => debug!(key = %task_key, "Prefetch complete"),
                        Err(e) => debug!(key = %task_key, error = %e, "Prefetch failed"),
                    }
                    result
                });
                (key.clone(), handle)
            })
            .collect();

        PrefetchBatch { handles }
    }
}

/// Handles for one prefetch run.
pub struct PrefetchBatch {
    handles: Vec<(String, JoinHandle<Result<(), CacheError>>)>,
}

impl PrefetchBatch {
    /// Wait for every warmer and report which keys failed.
    pub async fn settled(self) -> PrefetchReport {
        let mut report = PrefetchReport::default();
        for (key, handle) in self.handles {
            match handle.await {
                Ok(Ok(())) => report.warmed.push(key),
                Ok(Err(_)) | Err(_) => report.failed.push(key),
            }
        }
        report
    }
}

#[derive(Debug, Default)]
pub struct PrefetchReport {
    pub warmed: Vec<String>,
    pub failed: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;

    #[tokio::test(start_paused = true)]
    async fn test_prefetch_warms_store_and_contains_failures() {
        let store = CacheStore::new();
        let mut scheduler = PrefetchScheduler::new(store.clone());
        scheduler
            .register(Query::new("products:all", CacheConfig::default(), || async {
                Ok(vec![String::from("mug"), String::from("poster")])
            }))
            .register(Query::new("courses:all", CacheConfig::default(), || async {
                Err::<Vec<String>, _>(anyhow::anyhow!("503 Service Unavailable"))
            }));
        assert_eq!(scheduler.len(), 2);

        let report = scheduler.run().settled().await;
        assert_eq!(report.warmed, vec!["products:all".to_string()]);
        assert_eq!(report.failed, vec!["courses:all".to_string()]);

        let products = store.peek::<Vec<String>>("products:all").unwrap();
        assert_eq!(products.len(), 2);
        assert!(store.peek::<Vec<String>>("courses:all").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_detached_prefetch_still_fills_store() {
        let store = CacheStore::new();
        let mut scheduler = PrefetchScheduler::new(store.clone());
        scheduler.register(Query::new("blog:all", CacheConfig::default(), || async {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            Ok(3u32)
        }));

        drop(scheduler.run());
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(*store.peek::<u32>("blog:all").unwrap(), 3);
    }
}
