//! Live-update feed
//!
//! Changes pushed by the store are not merged into the cache. They mark every
//! view stale and trigger a refetch, the same path a settled mutation takes.

use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::cache::ViewPattern;
use crate::engine::MutationEngine;
use crate::store::TaskStore;

/// Change subscription for one user. Dropping it stops the listener and
/// releases the store subscription.
pub struct LiveSubscription {
    owner: String,
    task: JoinHandle<()>,
}

impl LiveSubscription {
    pub fn start<S>(engine: Arc<MutationEngine<S>>, owner: &str) -> Self
    where
        S: TaskStore + ?Sized + 'static,
    {
        // Subscribe before spawning so nothing published after `start` is missed
        let mut feed = engine.store().subscribe(owner);
        let task = tokio::spawn(async move {
            while let Some(event) = feed.recv().await {
                tracing::debug!(
                    owner = %event.owner,
                    task_id = ?event.task_id,
                    kind = ?event.kind,
                    "Remote change"
                );
                engine.invalidate_all();
                if let Err(err) = engine.reconcile().await {
                    tracing::warn!(error = %err, "Refetch after remote change failed");
                }
            }
            tracing::debug!(owner = %feed.owner(), "Change feed closed");
        });

        tracing::info!(owner, "Live updates subscribed");
        Self {
            owner: owner.to_string(),
            task,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }
}

impl Drop for LiveSubscription {
    fn drop(&mut self) {
        self.task.abort();
        tracing::info!(owner = %self.owner, "Live updates unsubscribed");
    }
}

/// Keeps exactly one `LiveSubscription` alive for whoever is signed in.
/// On sign-out or a user switch the old subscription is released and that
/// user's cached views are evicted. Dropping `LiveSync` releases everything.
pub struct LiveSync {
    task: JoinHandle<()>,
}

impl LiveSync {
    pub fn attach<S>(engine: Arc<MutationEngine<S>>) -> Self
    where
        S: TaskStore + ?Sized + 'static,
    {
        let mut session = engine.session().clone();
        let mut current = session
            .current()
            .map(|user| LiveSubscription::start(engine.clone(), &user));

        let task = tokio::spawn(async move {
            while let Some(user) = session.changed().await {
                let unchanged = matches!(
                    (&current, &user),
                    (Some(sub), Some(user)) if sub.owner() == user.as_str()
                );
                if unchanged {
                    continue;
                }

                if let Some(previous) = current.take() {
                    let evicted = engine.cache().evict(&ViewPattern::owner(previous.owner()));
                    tracing::debug!(owner = %previous.owner(), evicted, "Evicted views");
                }
                current = user.map(|user| LiveSubscription::start(engine.clone(), &user));
            }
            // Session gone; `current` drops here
        });

        Self { task }
    }
}

impl Drop for LiveSync {
    fn drop(&mut self) {
        self.task.abort();
    }
}
