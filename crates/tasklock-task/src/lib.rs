//! Task repository over any [`TaskStore`] plus the coordinator that owns the
//! observable task collection.

pub mod coordinator;

use std::sync::Arc;

use async_trait::async_trait;
use tasklock_core::{StoreError, Task, TaskRepository, TaskStore, TaskStream};
use tracing::{debug, instrument};

pub use coordinator::TaskCoordinator;

/// Task repository backed by a `TaskStore` (the encrypted database in production).
pub struct StoreTaskRepo<S: TaskStore> {
    store: Arc<S>,
}

impl<S: TaskStore> StoreTaskRepo<S> {
    pub fn new(store: S) -> Self {
        Self {
            store: Arc::new(store),
        }
    }

    /// Share a store that is also held elsewhere, e.g. the process-wide handle.
    pub fn from_shared(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: TaskStore> TaskRepository for StoreTaskRepo<S> {
    fn tasks(&self) -> TaskStream {
        self.store.query_all()
    }

    #[instrument(skip_all)]
    async fn add_task(&self, task: &Task) -> Result<Task, StoreError> {
        let ids = self.store.insert(std::slice::from_ref(task)).await?;
        let id = ids
            .first()
            .copied()
            .ok_or_else(|| StoreError::storage("insert returned no id"))?;
        debug!(id, "task added");
        Ok(Task { id, ..task.clone() })
    }

    #[instrument(skip_all, fields(id = task.id))]
    async fn complete_task(&self, task: &Task) -> Result<(), StoreError> {
        self.store.update(task).await
    }

    #[instrument(skip_all, fields(id = task.id))]
    async fn delete_task(&self, task: &Task) -> Result<(), StoreError> {
        self.store.delete(task).await
    }

    #[instrument(skip_all)]
    async fn delete_all(&self) -> Result<(), StoreError> {
        self.store.delete_all().await
    }
}
