use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::item::{FlagItem, Flagged, Transition};
use super::MutationError;
use crate::api::ApiError;
use crate::overlay::LocalOverlay;

/// Remote calls for the two transitions.
pub trait FlagBackend: Send + Sync {
    fn mark(&self, id: &str) -> impl Future<Output = Result<(), ApiError>> + Send;

    fn delete(&self, id: &str) -> impl Future<Output = Result<(), ApiError>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerOptions {
    /// The backend refuses to delete unflagged items, so mark them first.
    pub mark_before_delete: bool,
    /// Drop an overlay mark once a server snapshot reports the item flagged.
    pub clear_on_confirm: bool,
}

impl Default for ReconcilerOptions {
    fn default() -> Self {
        Self {
            mark_before_delete: true,
            clear_on_confirm: true,
        }
    }
}

/// How a mutation request ended (rejections are errors).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Server accepted, local state committed.
    Committed,
    /// Another mutation for the same id was in flight.
    Ignored,
    /// Nothing to do, the item already has the target state.
    Unchanged,
}

/// What is needed to roll one transition back.
enum Undo {
    Flag { previous_override: Option<bool> },
    Delete { position: usize },
}

struct ReconcilerState<P> {
    items: Vec<FlagItem<P>>,
    /// Items with a delete in flight, kept out of `items` until settled.
    hidden: HashMap<String, FlagItem<P>>,
    /// Committed deletes the server snapshots may still list.
    deleted: HashSet<String>,
    inflight: HashSet<String>,
}

impl<P> Default for ReconcilerState<P> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            hidden: HashMap::new(),
            deleted: HashSet::new(),
            inflight: HashSet::new(),
        }
    }
}

impl<P> ReconcilerState<P> {
    fn position(&self, id: &str) -> Option<usize> {
        self.items.iter().position(|item| item.id == id)
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut FlagItem<P>> {
        self.items.iter_mut().find(|item| item.id == id)
    }

    fn apply_local(&mut self, id: &str, transition: Transition) -> Result<Undo, MutationError> {
        let position = self
            .position(id)
            .ok_or_else(|| MutationError::UnknownItem(id.to_string()))?;

        match transition {
            Transition::Mark => {
                let item = &mut self.items[position];
                let previous_override = item.local_override;
                item.local_override = Some(true);
                item.begin();
                Ok(Undo::Flag { previous_override })
            }
            Transition::Delete => {
                let mut item = self.items.remove(position);
                item.begin();
                self.hidden.insert(id.to_string(), item);
                Ok(Undo::Delete { position })
            }
        }
    }
}

/// Applies flag mutations optimistically and reconciles them with server
/// snapshots and the `LocalOverlay`.
pub struct Reconciler<P> {
    state: Arc<Mutex<ReconcilerState<P>>>,
    overlay: LocalOverlay,
    options: ReconcilerOptions,
}

impl<P> Clone for Reconciler<P> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            overlay: self.overlay.clone(),
            options: self.options,
        }
    }
}

impl<P: Flagged + Clone> Reconciler<P> {
    pub fn new(overlay: LocalOverlay, options: ReconcilerOptions) -> Self {
        Self {
            state: Arc::new(Mutex::new(ReconcilerState::default())),
            overlay,
            options,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ReconcilerState<P>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn overlay(&self) -> &LocalOverlay {
        &self.overlay
    }

    /// Replace local items with a fresh server snapshot.
    ///
    /// Each item's flag becomes `server_flag || locally marked`. Items with a
    /// mutation in flight keep their optimistic state, and a pending delete
    /// stays hidden. Committed deletes stay out until a snapshot no longer
    /// lists them.
    pub fn merge_snapshot(&self, snapshot: &[P]) {
        let marked: HashSet<String> = self.overlay.marked_ids().into_iter().collect();
        let mut state = self.lock();
        let mut merged = Vec::with_capacity(snapshot.len());

        if !state.deleted.is_empty() {
            let listed: HashSet<&str> = snapshot.iter().map(|p| p.flag_id()).collect();
            state.deleted.retain(|id| listed.contains(id.as_str()));
        }

        for payload in snapshot {
            let id = payload.flag_id();

            if state.deleted.contains(id) {
                debug!(id, "Snapshot still lists a deleted item, skipping");
                continue;
            }

            if let Some(hidden) = state.hidden.get_mut(id) {
                hidden.server_flag = payload.server_flag();
                hidden.payload = payload.clone();
                continue;
            }

            let mut item = FlagItem::from_payload(payload.clone());
            let pending = state.inflight.contains(id);

            if pending {
                if let Some(previous) = state.items.iter().find(|i| i.id == id) {
                    item.local_override = previous.local_override;
                    item.phase = previous.phase;
                }
            } else if marked.contains(id) {
                if item.server_flag && self.options.clear_on_confirm {
                    debug!(id, "Server confirmed flag, clearing overlay mark");
                    self.overlay.clear_local(id);
                } else {
                    if !item.server_flag {
                        debug!(id, "Server has not caught up, overlay mark wins");
                    }
                    item.local_override = Some(true);
                }
            }

            merged.push(item);
        }

        state.items = merged;
    }

    /// Apply `transition` to `id` now and confirm it with `remote_call`.
    ///
    /// Returns `Ignored` if a mutation for `id` is already in flight. On
    /// rejection the item is restored to its pre-transition state.
    pub async fn apply<F, Fut>(
        &self,
        id: &str,
        transition: Transition,
        remote_call: F,
    ) -> Result<Settlement, MutationError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), ApiError>>,
    {
        let undo = {
            let mut state = self.lock();
            if state.inflight.contains(id) {
                debug!(id, %transition, "Mutation already in flight, ignoring");
                return Ok(Settlement::Ignored);
            }
            let undo = state.apply_local(id, transition)?;
            state.inflight.insert(id.to_string());
            undo
        };
        let _release = InFlightRelease {
            state: Arc::clone(&self.state),
            id: id.to_string(),
        };

        match remote_call().await {
            Ok(()) => {
                self.commit(id, transition);
                info!(id, %transition, "Mutation committed");
                Ok(Settlement::Committed)
            }
            Err(e) => {
                self.revert(id, undo);
                warn!(id, %transition, error = %e, "Mutation rejected, reverted local state");
                Err(MutationError::Rejected {
                    id: id.to_string(),
                    transition,
                    source: e,
                })
            }
        }
    }

    /// Flag `id` through `backend`.
    pub async fn mark<B: FlagBackend>(&self, backend: &B, id: &str) -> Result<Settlement, MutationError> {
        match self.effective_flag(id) {
            None => return Err(MutationError::UnknownItem(id.to_string())),
            Some(true) if !self.is_pending(id) => return Ok(Settlement::Unchanged),
            _ => {}
        }
        self.apply(id, Transition::Mark, || backend.mark(id)).await
    }

    /// Delete `id` through `backend`, flagging it first when required.
    ///
    /// If the preliminary mark is rejected the delete is not attempted.
    pub async fn delete<B: FlagBackend>(&self, backend: &B, id: &str) -> Result<Settlement, MutationError> {
        let flagged = self
            .effective_flag(id)
            .ok_or_else(|| MutationError::UnknownItem(id.to_string()))?;

        if self.options.mark_before_delete && !flagged {
            debug!(id, "Marking before delete");
            if self.apply(id, Transition::Mark, || backend.mark(id)).await? == Settlement::Ignored {
                return Ok(Settlement::Ignored);
            }
        }

        self.apply(id, Transition::Delete, || backend.delete(id)).await
    }

    /// `mark` as a detached task; the handle reports settlement.
    pub fn spawn_mark<B>(&self, backend: Arc<B>, id: String) -> JoinHandle<Result<Settlement, MutationError>>
    where
        B: FlagBackend + 'static,
        P: Send + 'static,
    {
        let reconciler = self.clone();
        tokio::spawn(async move { reconciler.mark(backend.as_ref(), &id).await })
    }

    /// `delete` as a detached task; the handle reports settlement.
    pub fn spawn_delete<B>(&self, backend: Arc<B>, id: String) -> JoinHandle<Result<Settlement, MutationError>>
    where
        B: FlagBackend + 'static,
        P: Send + 'static,
    {
        let reconciler = self.clone();
        tokio::spawn(async move { reconciler.delete(backend.as_ref(), &id).await })
    }

    pub fn items(&self) -> Vec<FlagItem<P>> {
        self.lock().items.clone()
    }

    pub fn get(&self, id: &str) -> Option<FlagItem<P>> {
        self.lock().items.iter().find(|item| item.id == id).cloned()
    }

    pub fn effective_flag(&self, id: &str) -> Option<bool> {
        self.lock()
            .items
            .iter()
            .find(|item| item.id == id)
            .map(|item| item.effective_flag())
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.lock().inflight.contains(id)
    }

    /// Visible items whose flag is not set (the unread badge).
    pub fn unflagged_count(&self) -> usize {
        self.lock()
            .items
            .iter()
            .filter(|item| !item.effective_flag())
            .count()
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ===== Settlement =====

    fn commit(&self, id: &str, transition: Transition) {
        match transition {
            Transition::Mark => {
                self.overlay.mark_local(id);
                if let Some(item) = self.lock().find_mut(id) {
                    item.confirm();
                }
            }
            Transition::Delete => {
                let mut state = self.lock();
                state.hidden.remove(id);
                state.deleted.insert(id.to_string());
                drop(state);
                self.overlay.clear_local(id);
            }
        }
    }

    fn revert(&self, id: &str, undo: Undo) {
        let mut state = self.lock();
        match undo {
            Undo::Flag { previous_override } => {
                if let Some(item) = state.find_mut(id) {
                    item.revert(previous_override);
                }
            }
            Undo::Delete { position } => {
                if let Some(mut item) = state.hidden.remove(id) {
                    let previous_override = item.local_override;
                    item.revert(previous_override);
                    let position = position.min(state.items.len());
                    state.items.insert(position, item);
                }
            }
        }
    }
}

/// Clears the per-id in-flight guard on every exit path.
struct InFlightRelease<P> {
    state: Arc<Mutex<ReconcilerState<P>>>,
    id: String,
}

impl<P> Drop for InFlightRelease<P> {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.inflight.remove(&self.id);
    }
}
