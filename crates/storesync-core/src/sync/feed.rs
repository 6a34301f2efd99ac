use std::sync::Arc;

use crate::cache::{CacheError, CacheStore, Query};
use crate::models::Notification;
use crate::mutation::{FlagBackend, FlagItem, MutationError, Reconciler, Settlement};

/// Notification list as the UI sees it: cached server snapshot merged with
/// optimistic state and the overlay.
pub struct NotificationFeed<B> {
    store: CacheStore,
    query: Query<Vec<Notification>>,
    reconciler: Reconciler<Notification>,
    backend: Arc<B>,
}

impl<B> Clone for NotificationFeed<B> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            query: self.query.clone(),
            reconciler: self.reconciler.clone(),
            backend: Arc::clone(&self.backend),
        }
    }
}

impl<B: FlagBackend + 'static> NotificationFeed<B> {
    pub fn new(
        store: CacheStore,
        query: Query<Vec<Notification>>,
        reconciler: Reconciler<Notification>,
        backend: Arc<B>,
    ) -> Self {
        Self {
            store,
            query,
            reconciler,
            backend,
        }
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn reconciler(&self) -> &Reconciler<Notification> {
        &self.reconciler
    }

    /// Cached read: a stale list is served at once and revalidated behind.
    pub async fn load(&self) -> Result<Vec<FlagItem<Notification>>, CacheError> {
        let snapshot = self.query.fetch(&self.store).await?;
        self.reconciler.merge_snapshot(&snapshot);
        Ok(self.reconciler.items())
    }

    /// Forced reload, used by the poller and manual refresh.
    ///
    /// On failure the previous items stay visible.
    pub async fn refresh(&self) -> Result<Vec<FlagItem<Notification>>, CacheError> {
        let snapshot = self.query.refresh(&self.store).await?;
        self.reconciler.merge_snapshot(&snapshot);
        Ok(self.reconciler.items())
    }

    pub async fn mark_as_read(&self, id: &str) -> Result<Settlement, MutationError> {
        self.reconciler.mark(self.backend.as_ref(), id).await
    }

    pub async fn delete(&self, id: &str) -> Result<Settlement, MutationError> {
        self.reconciler.delete(self.backend.as_ref(), id).await
    }

    pub fn items(&self) -> Vec<FlagItem<Notification>> {
        self.reconciler.items()
    }

    pub fn unread_count(&self) -> usize {
        self.reconciler.unflagged_count()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::api::ApiError;
    use crate::cache::CacheConfig;
    use crate::mutation::ReconcilerOptions;
    use crate::overlay::LocalOverlay;

    pub(crate) fn notification(id: &str, is_read: bool) -> Notification {
        Notification {
            id: id.to_string(),
            title: format!("Notification {}", id),
            message: String::new(),
            is_read,
            created_at: None,
        }
    }

    /// Server stand-in: a mutable list plus ids whose writes fail.
    #[derive(Default)]
    pub(crate) struct FakeServer {
        pub(crate) items: Mutex<Vec<Notification>>,
        pub(crate) failing: Mutex<HashSet<String>>,
        pub(crate) loads: AtomicUsize,
    }

    impl FlagBackend for FakeServer {
        async fn mark(&self, id: &str) -> Result<(), ApiError> {
            if self.failing.lock().unwrap().contains(id) {
                return Err(ApiError::ServerError("write failed".to_string()));
            }
            Ok(())
        }

        async fn delete(&self, id: &str) -> Result<(), ApiError> {
            if self.failing.lock().unwrap().contains(id) {
                return Err(ApiError::ServerError("write failed".to_string()));
            }
            self.items.lock().unwrap().retain(|n| n.id != id);
            Ok(())
        }
    }

    pub(crate) fn feed(server: &Arc<FakeServer>) -> NotificationFeed<FakeServer> {
        let source = Arc::clone(server);
        let query: Query<Vec<Notification>> = Query::new(
            "notifications:all",
            CacheConfig::from_secs(15, 300).unwrap(),
            move || {
                let source = Arc::clone(&source);
                async move {
                    source.loads.fetch_add(1, Ordering::SeqCst);
                    let items = source.items.lock().unwrap().clone();
                    Ok::<_, anyhow::Error>(items)
                }
            },
        );
        let reconciler = Reconciler::new(
            LocalOverlay::in_memory("notifications:read"),
            ReconcilerOptions::default(),
        );
        NotificationFeed::new(CacheStore::new(), query, reconciler, Arc::clone(server))
    }

    #[tokio::test]
    async fn test_read_survives_lagging_server() {
        let server = Arc::new(FakeServer::default());
        *server.items.lock().unwrap() = vec![notification("n1", false), notification("n2", false)];
        let feed = feed(&server);

        feed.load().await.unwrap();
        assert_eq!(feed.unread_count(), 2);

        assert_eq!(feed.mark_as_read("n1").await.unwrap(), Settlement::Committed);
        assert_eq!(feed.unread_count(), 1);

        // Server still reports n1 unread on the next poll
        let items = feed.refresh().await.unwrap();
        let n1 = items.iter().find(|i| i.id == "n1").unwrap();
        assert!(n1.effective_flag());
        assert_eq!(feed.unread_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_mark_keeps_item_unread() {
        let server = Arc::new(FakeServer::default());
        *server.items.lock().unwrap() = vec![notification("n1", false)];
        server.failing.lock().unwrap().insert("n1".to_string());
        let feed = feed(&server);
        feed.load().await.unwrap();

        assert!(feed.mark_as_read("n1").await.is_err());
        assert_eq!(feed.unread_count(), 1);
        assert!(!feed.reconciler().overlay().is_locally_marked("n1"));
    }

    #[tokio::test]
    async fn test_delete_removes_item() {
        let server = Arc::new(FakeServer::default());
        *server.items.lock().unwrap() = vec![notification("n1", true), notification("n2", false)];
        let feed = feed(&server);
        feed.load().await.unwrap();

        feed.delete("n2").await.unwrap();
        assert_eq!(feed.items().len(), 1);
        assert_eq!(feed.unread_count(), 0);

        feed.refresh().await.unwrap();
        assert_eq!(feed.items().len(), 1);
    }

    #[tokio::test]
    async fn test_deleted_item_stays_gone_after_cached_load() {
        let server = Arc::new(FakeServer::default());
        *server.items.lock().unwrap() = vec![notification("n1", true), notification("n2", false)];
        let feed = feed(&server);
        feed.load().await.unwrap();

        feed.delete("n2").await.unwrap();

        // Cached snapshot still lists n2
        let items = feed.load().await.unwrap();
        assert_eq!(server.loads.load(Ordering::SeqCst), 1);
        assert!(items.iter().all(|i| i.id != "n2"));
        assert_eq!(feed.unread_count(), 0);
    }

    #[tokio::test]
    async fn test_load_uses_cache() {
        let server = Arc::new(FakeServer::default());
        *server.items.lock().unwrap() = vec![notification("n1", false)];
        let feed = feed(&server);

        feed.load().await.unwrap();
        feed.load().await.unwrap();
        assert_eq!(server.loads.load(Ordering::SeqCst), 1);

        feed.refresh().await.unwrap();
        assert_eq!(server.loads.load(Ordering::SeqCst), 2);
    }
}
