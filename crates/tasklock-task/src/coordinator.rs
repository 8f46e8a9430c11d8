use std::sync::Arc;

use tasklock_core::{StoreError, Task, TaskRepository};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, instrument, warn};

/// Owns the observable task collection.
///
/// Every mutation is followed by a re-query of the repository; the published
/// collection is always a store snapshot, never a locally patched copy.
pub struct TaskCoordinator<R: TaskRepository> {
    repo: Arc<R>,
    tasks: watch::Sender<Vec<Task>>,
    /// Orders read-then-publish across concurrent reloads.
    reload_lock: Mutex<()>,
}

impl<R: TaskRepository> TaskCoordinator<R> {
    /// Build a coordinator and load the initial collection.
    pub async fn new(repo: R) -> Result<Self, StoreError> {
        let (tasks, _rx) = watch::channel(Vec::new());
        let coordinator = Self {
            repo: Arc::new(repo),
            tasks,
            reload_lock: Mutex::new(()),
        };
        coordinator.reload().await?;
        Ok(coordinator)
    }

    /// Read-only view of the collection.
    pub fn tasks(&self) -> watch::Receiver<Vec<Task>> {
        self.tasks.subscribe()
    }

    pub fn snapshot(&self) -> Vec<Task> {
        self.tasks.borrow().clone()
    }

    #[instrument(skip_all)]
    pub async fn add_task(
        &self,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<Task, StoreError> {
        let task = self.repo.add_task(&Task::new(title, description)).await?;
        debug!(id = task.id, "added task");
        self.reload().await?;
        Ok(task)
    }

    /// Set the completion flag. A task that no longer exists is logged and ignored.
    #[instrument(skip_all, fields(id = task.id, completed = completed))]
    pub async fn complete_task(&self, task: &Task, completed: bool) -> Result<(), StoreError> {
        match self.repo.complete_task(&task.with_completed(completed)).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => warn!(id = task.id, "task vanished before update"),
            Err(err) => return Err(err),
        }
        self.reload().await
    }

    #[instrument(skip_all, fields(id = task.id))]
    pub async fn delete_task(&self, task: &Task) -> Result<(), StoreError> {
        self.repo.delete_task(task).await?;
        self.reload().await
    }

    /// Delete every completed task in the current snapshot; returns how many.
    #[instrument(skip_all)]
    pub async fn clear_completed_tasks(&self) -> Result<usize, StoreError> {
        let completed: Vec<Task> = self
            .snapshot()
            .into_iter()
            .filter(|task| task.is_completed)
            .collect();

        if completed.is_empty() {
            debug!("no completed tasks to clear");
        }
        for task in &completed {
            debug!(id = task.id, "clearing completed task");
            self.repo.delete_task(task).await?;
        }
        self.reload().await?;
        info!(cleared = completed.len(), "cleared completed tasks");
        Ok(completed.len())
    }

    /// Re-query the repository and publish the result.
    ///
    /// The query runs under the reload lock, so publishes happen in the order
    /// the snapshots were read and an older snapshot never replaces a newer one.
    pub async fn reload(&self) -> Result<(), StoreError> {
        let _ordered = self.reload_lock.lock().await;
        let snapshot = self
            .repo
            .tasks()
            .next()
            .await
            .ok_or_else(|| StoreError::storage("task stream ended"))?;
        self.tasks.send_replace(snapshot);
        Ok(())
    }
}
