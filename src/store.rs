//! Remote task store boundary
//!
//! The engine only needs owner-scoped CRUD plus a change feed; `db::Database`
//! is the SQLite implementation served by the HTTP API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};

use crate::error::StoreError;
use crate::models::{NewTask, Task, TaskPatch, ViewFilter, ViewSort};

/// Row-oriented task store. Every call is scoped to `owner`; rows of other
/// owners behave as if they did not exist.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn insert(&self, owner: &str, task: &NewTask) -> Result<Task, StoreError>;

    async fn update(&self, owner: &str, id: &str, patch: &TaskPatch) -> Result<Task, StoreError>;

    async fn delete(&self, owner: &str, id: &str) -> Result<(), StoreError>;

    async fn query(
        &self,
        owner: &str,
        filter: ViewFilter,
        sort: ViewSort,
    ) -> Result<Vec<Task>, StoreError>;

    /// Start listening for changes to `owner`'s rows
    fn subscribe(&self, owner: &str) -> ChangeFeed;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
    /// Events were dropped; consumers should assume anything changed
    Resync,
}

/// Notification that an owner's rows changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub owner: String,
    pub task_id: Option<String>,
    pub kind: ChangeKind,
}

/// Broadcast channel that stores publish their writes on
pub struct ChangeBus {
    sender: broadcast::Sender<ChangeEvent>,
}

impl ChangeBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, owner: &str, task_id: &str, kind: ChangeKind) {
        // No receivers is fine
        let _ = self.sender.send(ChangeEvent {
            owner: owner.to_string(),
            task_id: Some(task_id.to_string()),
            kind,
        });
    }

    pub fn subscribe(&self, owner: &str) -> ChangeFeed {
        ChangeFeed {
            owner: owner.to_string(),
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Change subscription filtered to one owner. Dropping it unsubscribes.
pub struct ChangeFeed {
    owner: String,
    receiver: broadcast::Receiver<ChangeEvent>,
}

impl ChangeFeed {
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Wait for the next change to this owner's rows.
    /// Returns `None` once the store has gone away.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.owner == self.owner => return Some(event),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(owner = %self.owner, skipped, "Change feed lagged");
                    return Some(ChangeEvent {
                        owner: self.owner.clone(),
                        task_id: None,
                        kind: ChangeKind::Resync,
                    });
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
