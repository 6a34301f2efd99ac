use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::warn;

use super::backend::{FileBackend, MemoryBackend, OverlayBackend, OverlayError};

/// Namespace used for notification read marks.
pub const DEFAULT_NAMESPACE: &str = "notifications:read";

/// Oldest marks are dropped beyond this many ids.
pub const DEFAULT_MAX_ENTRIES: usize = 500;

/// Persisted set of locally marked ids, stored as a JSON array in insertion
/// order.
///
/// Every query reads the backend and every change rewrites it, so two
/// overlays over the same backend always agree. Backend failures are logged
/// and read as "nothing marked".
///
/// Marks only go away through `clear_local` or `reset`, with one exception:
/// past `max_entries` the oldest marks are evicted, and an evicted item reads
/// as unflagged again until the server reports it flagged.
#[derive(Clone)]
pub struct LocalOverlay {
    backend: Arc<dyn OverlayBackend>,
    namespace: String,
    max_entries: usize,
    write_lock: Arc<Mutex<()>>,
}

impl LocalOverlay {
    pub fn new(backend: Arc<dyn OverlayBackend>, namespace: impl Into<String>, max_entries: usize) -> Self {
        Self {
            backend,
            namespace: namespace.into(),
            max_entries: max_entries.max(1),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn in_memory(namespace: impl Into<String>) -> Self {
        Self::new(Arc::new(MemoryBackend::new()), namespace, DEFAULT_MAX_ENTRIES)
    }

    pub fn open(dir: PathBuf, namespace: impl Into<String>, max_entries: usize) -> Result<Self, OverlayError> {
        let backend = FileBackend::new(dir)?;
        Ok(Self::new(Arc::new(backend), namespace, max_entries))
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn mark_local(&self, id: &str) {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut ids = self.load();
        if ids.iter().any(|existing| existing == id) {
            return;
        }
        ids.push(id.to_string());
        if ids.len() > self.max_entries {
            let dropped = ids.len() - self.max_entries;
            let evicted = ids.drain(..dropped).collect::<Vec<_>>().join(",");
            warn!(
                namespace = %self.namespace,
                dropped,
                evicted = %evicted,
                "Overlay full, evicted oldest marks"
            );
        }
        self.save(&ids);
    }

    pub fn clear_local(&self, id: &str) {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut ids = self.load();
        let before = ids.len();
        ids.retain(|existing| existing != id);
        if ids.len() != before {
            self.save(&ids);
        }
    }

    pub fn is_locally_marked(&self, id: &str) -> bool {
        self.load().iter().any(|existing| existing == id)
    }

    pub fn marked_ids(&self) -> Vec<String> {
        self.load()
    }

    pub fn len(&self) -> usize {
        self.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every mark (app-level reset, e.g. on logout).
    pub fn reset(&self) {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.save(&[]);
    }

    fn load(&self) -> Vec<String> {
        let parsed = self
            .backend
            .read(&self.namespace)
            .and_then(|raw| match raw {
                Some(raw) => Ok(serde_json::from_str::<Vec<String>>(&raw)?),
                None => Ok(Vec::new()),
            });

        match parsed {
            Ok(ids) => ids,
            Err(e) => {
                warn!(namespace = %self.namespace, error = %e, "Failed to read overlay, ignoring it");
                Vec::new()
            }
        }
    }

    fn save(&self, ids: &[String]) {
        let result = serde_json::to_string(ids)
            .map_err(OverlayError::from)
            .and_then(|contents| self.backend.write(&self.namespace, &contents));

        if let Err(e) = result {
            warn!(namespace = %self.namespace, error = %e, "Failed to persist overlay");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenBackend;

    impl OverlayBackend for BrokenBackend {
        fn read(&self, _namespace: &str) -> Result<Option<String>, OverlayError> {
            Ok(Some("not json".to_string()))
        }

        fn write(&self, _namespace: &str, _contents: &str) -> Result<(), OverlayError> {
            Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only").into())
        }
    }

    #[test]
    fn test_mark_and_clear() {
        let overlay = LocalOverlay::in_memory(DEFAULT_NAMESPACE);
        assert!(!overlay.is_locally_marked("n1"));

        overlay.mark_local("n1");
        overlay.mark_local("n1");
        assert!(overlay.is_locally_marked("n1"));
        assert_eq!(overlay.len(), 1);

        overlay.clear_local("n1");
        assert!(!overlay.is_locally_marked("n1"));
        assert!(overlay.is_empty());
    }

    #[test]
    fn test_bounded_growth_drops_oldest() {
        let overlay = LocalOverlay::new(Arc::new(MemoryBackend::new()), "ns", 3);
        for id in ["a", "b", "c", "d"] {
            overlay.mark_local(id);
        }
        assert_eq!(overlay.marked_ids(), vec!["b", "c", "d"]);
        assert!(!overlay.is_locally_marked("a"));

        // An evicted id can be marked again, pushing out the next oldest
        overlay.mark_local("a");
        assert_eq!(overlay.marked_ids(), vec!["c", "d", "a"]);
    }

    #[test]
    fn test_marks_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let first = LocalOverlay::open(dir.path().to_path_buf(), DEFAULT_NAMESPACE, 10).unwrap();
        first.mark_local("n7");
        drop(first);

        let reopened = LocalOverlay::open(dir.path().to_path_buf(), DEFAULT_NAMESPACE, 10).unwrap();
        assert!(reopened.is_locally_marked("n7"));
    }

    #[test]
    fn test_overlays_sharing_a_backend_agree() {
        let backend: Arc<dyn OverlayBackend> = Arc::new(MemoryBackend::new());
        let tab_a = LocalOverlay::new(Arc::clone(&backend), DEFAULT_NAMESPACE, 10);
        let tab_b = LocalOverlay::new(backend, DEFAULT_NAMESPACE, 10);

        tab_a.mark_local("n1");
        assert!(tab_b.is_locally_marked("n1"));
    }

    #[test]
    fn test_reset_forgets_everything() {
        let overlay = LocalOverlay::in_memory(DEFAULT_NAMESPACE);
        overlay.mark_local("x");
        overlay.mark_local("y");
        overlay.reset();
        assert!(overlay.is_empty());
    }

    #[test]
    fn test_broken_backend_is_best_effort() {
        let overlay = LocalOverlay::new(Arc::new(BrokenBackend), DEFAULT_NAMESPACE, 10);
        overlay.mark_local("n1");
        assert!(!overlay.is_locally_marked("n1"));
        assert!(overlay.marked_ids().is_empty());
    }
}
