mod memory;
mod stream;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

pub use memory::InMemoryTaskStore;
pub use stream::TaskStream;

/// Store-assigned task identifier. `0` marks a task that has not been inserted yet.
pub type TaskId = i64;

/// Task entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    pub is_completed: bool,
}

impl Task {
    /// A not-yet-stored task; the store assigns the id on insert.
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: 0,
            title: title.into(),
            description: description.into(),
            is_completed: false,
        }
    }

    pub fn is_new(&self) -> bool {
        self.id == 0
    }

    /// Copy of this task with only the completion flag changed.
    pub fn with_completed(&self, completed: bool) -> Self {
        Self {
            is_completed: completed,
            ..self.clone()
        }
    }

    /// Rejects tasks the store must never persist.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.title.trim().is_empty() {
            return Err(StoreError::InvalidInput(
                "task title cannot be empty".to_string(),
            ));
        }
        if self.id < 0 {
            return Err(StoreError::InvalidInput(format!(
                "task id must not be negative (got {})",
                self.id
            )));
        }
        Ok(())
    }
}

/// Persistence contract for tasks. Implemented by the encrypted SQLite store and
/// by [`InMemoryTaskStore`] for tests.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Upsert by id; tasks with id `0` get a fresh id. Returns the ids in input order.
    async fn insert(&self, tasks: &[Task]) -> Result<Vec<TaskId>, StoreError>;

    /// Replace the row with the task's id. Fails with `NotFound` if there is none.
    async fn update(&self, task: &Task) -> Result<(), StoreError>;

    /// Remove the row with the task's id (idempotent).
    async fn delete(&self, task: &Task) -> Result<(), StoreError>;

    /// Remove every row.
    async fn delete_all(&self) -> Result<(), StoreError>;

    /// Subscribe to the full task collection, ordered by id.
    fn query_all(&self) -> TaskStream;
}

/// Domain-facing seam the coordinator depends on.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    fn tasks(&self) -> TaskStream;

    /// Store a new task and return it with its assigned id.
    async fn add_task(&self, task: &Task) -> Result<Task, StoreError>;

    async fn complete_task(&self, task: &Task) -> Result<(), StoreError>;

    async fn delete_task(&self, task: &Task) -> Result<(), StoreError>;

    async fn delete_all(&self) -> Result<(), StoreError>;
}
