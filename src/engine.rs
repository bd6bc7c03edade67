//! Optimistic task mutations over a remote store
//!
//! Each mutation edits the cached views right away, calls the store, rolls
//! the views back from a snapshot if the store refuses, and always finishes
//! by invalidating every task view. The invalidation is what guarantees the
//! cache converges on the store; the optimistic edit only hides latency.

use chrono::Utc;
use std::sync::Arc;

use crate::cache::{QueryCache, Snapshot, ViewPattern};
use crate::error::{EngineError, StoreError};
use crate::models::{NewTask, Task, TaskPatch, ViewFilter, ViewKey, ViewSort, is_temp_id};
use crate::session::SessionHandle;
use crate::store::TaskStore;

pub struct MutationEngine<S: ?Sized> {
    store: Arc<S>,
    cache: Arc<QueryCache>,
    session: SessionHandle,
}

impl<S: TaskStore + ?Sized> MutationEngine<S> {
    pub fn new(store: Arc<S>, cache: Arc<QueryCache>, session: SessionHandle) -> Self {
        Self {
            store,
            cache,
            session,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    fn owner(&self) -> Result<String, EngineError> {
        self.session.current().ok_or(EngineError::NotAuthenticated)
    }

    /// Cached view if fresh, otherwise fetched. Signed out means no data.
    pub async fn view(&self, filter: ViewFilter, sort: ViewSort) -> Result<Vec<Task>, EngineError> {
        let Some(owner) = self.session.current() else {
            return Ok(Vec::new());
        };

        let key = ViewKey::new(owner, filter, sort);
        if let Some(cached) = self.cache.read(&key)
            && !cached.stale
        {
            return Ok(cached.data);
        }

        self.refetch(key).await
    }

    /// Fetch a view from the store. A result that was superseded while in
    /// flight is not cached; the caller gets whatever the cache holds instead.
    pub async fn refetch(&self, key: ViewKey) -> Result<Vec<Task>, EngineError> {
        let ticket = self.cache.begin_fetch(key.clone());
        let tasks = self.store.query(&key.owner, key.filter, key.sort).await?;

        if self.cache.complete_fetch(ticket, tasks.clone()) {
            return Ok(tasks);
        }

        tracing::debug!(view = %key, "Discarded superseded fetch");
        Ok(self.cache.read(&key).map_or(tasks, |cached| cached.data))
    }

    /// Refetch every stale view of the signed-in user
    pub async fn reconcile(&self) -> Result<usize, EngineError> {
        let Some(owner) = self.session.current() else {
            return Ok(0);
        };

        let stale = self.cache.stale_keys(&ViewPattern::owner(&owner));
        let count = stale.len();
        for key in stale {
            self.refetch(key).await?;
        }
        Ok(count)
    }

    /// Mark every cached task view stale. Nothing is refetched here; stale
    /// views reload on the next `view` or `reconcile`.
    pub fn invalidate_all(&self) -> usize {
        self.cache.invalidate(&ViewPattern::all())
    }

    pub async fn create(&self, new_task: NewTask) -> Result<Task, EngineError> {
        let owner = self.owner()?;
        let new_task = new_task.validated()?;

        let optimistic = Task::optimistic(&owner, &new_task, Utc::now());
        let snapshot = self
            .cache
            .apply_optimistic(&ViewPattern::owner(&owner), |key, tasks| {
                if key.filter.matches(&optimistic) {
                    tasks.insert(0, optimistic.clone());
                }
            });

        let result = self.store.insert(&owner, &new_task).await;
        match &result {
            Ok(task) => tracing::debug!(task_id = %task.id, temp_id = %optimistic.id, "Create confirmed"),
            Err(err) => self.rollback(snapshot, "create", err),
        }

        self.settle();
        Ok(result?)
    }

    pub async fn update(&self, id: &str, patch: TaskPatch) -> Result<Task, EngineError> {
        let owner = self.owner()?;
        if is_temp_id(id) {
            return Err(EngineError::PendingCreate(id.to_string()));
        }
        patch.validate()?;

        let now = Utc::now();
        let snapshot = self
            .cache
            .apply_optimistic(&ViewPattern::owner(&owner), |_, tasks| {
                for task in tasks.iter_mut().filter(|t| t.id == id) {
                    task.merge(&patch, now);
                }
            });

        let result = self.store.update(&owner, id, &patch).await;
        match &result {
            Ok(confirmed) => {
                // Server-computed fields win over the optimistic merge
                self.cache.modify(&ViewPattern::owner(&owner), |_, tasks| {
                    for task in tasks.iter_mut().filter(|t| t.id == confirmed.id) {
                        *task = confirmed.clone();
                    }
                });
                tracing::debug!(task_id = id, "Update confirmed");
            }
            Err(err) => self.rollback(snapshot, "update", err),
        }

        self.settle();
        Ok(result?)
    }

    /// Delete without further confirmation; asking the user is the caller's job
    pub async fn delete(&self, id: &str) -> Result<(), EngineError> {
        let owner = self.owner()?;
        if is_temp_id(id) {
            return Err(EngineError::PendingCreate(id.to_string()));
        }

        let snapshot = self
            .cache
            .apply_optimistic(&ViewPattern::owner(&owner), |_, tasks| {
                tasks.retain(|t| t.id != id)
            });

        let result = self.store.delete(&owner, id).await;
        match &result {
            Ok(()) => tracing::debug!(task_id = id, "Delete confirmed"),
            Err(err) => self.rollback(snapshot, "delete", err),
        }

        self.settle();
        Ok(result?)
    }

    fn rollback(&self, snapshot: Snapshot, operation: &str, err: &StoreError) {
        let restored = self.cache.restore(snapshot);
        tracing::warn!(operation, error = %err, restored, "Rolled back optimistic write");
    }

    // Reconciliation is lazy: views stay stale until read or reconciled
    fn settle(&self) {
        let invalidated = self.invalidate_all();
        tracing::debug!(invalidated, "Invalidated task views");
    }
}
