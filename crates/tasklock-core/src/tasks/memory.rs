use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use tokio::sync::watch;

use super::{Task, TaskId, TaskStore, TaskStream};
use crate::error::StoreError;

/// Non-durable task store for tests and smoke runs. Nothing survives a restart.
#[derive(Debug, Clone)]
pub struct InMemoryTaskStore {
    inner: Arc<Mutex<Rows>>,
    changes: Arc<watch::Sender<Vec<Task>>>,
}

#[derive(Debug, Default)]
struct Rows {
    last_id: TaskId,
    by_id: BTreeMap<TaskId, Task>,
}

impl Rows {
    fn snapshot(&self) -> Vec<Task> {
        self.by_id.values().cloned().collect()
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        let (tx, _rx) = watch::channel(Vec::new());
        Self {
            inner: Arc::new(Mutex::new(Rows::default())),
            changes: Arc::new(tx),
        }
    }
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Rows>, StoreError> {
        self.inner
            .lock()
            .map_err(|err| StoreError::storage(format!("lock poisoned: {err}")))
    }

    fn publish(&self, rows: &Rows) {
        self.changes.send_replace(rows.snapshot());
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, tasks: &[Task]) -> Result<Vec<TaskId>, StoreError> {
        for task in tasks {
            task.validate()?;
        }

        let mut rows = self.lock()?;
        let mut ids = Vec::with_capacity(tasks.len());
        for task in tasks {
            let id = if task.is_new() {
                rows.last_id + 1
            } else {
                task.id
            };
            rows.last_id = rows.last_id.max(id);
            rows.by_id.insert(
                id,
                Task {
                    id,
                    ..task.clone()
                },
            );
            ids.push(id);
        }
        self.publish(&rows);
        Ok(ids)
    }

    async fn update(&self, task: &Task) -> Result<(), StoreError> {
        task.validate()?;
        let mut rows = self.lock()?;
        let slot = rows
            .by_id
            .get_mut(&task.id)
            .ok_or(StoreError::NotFound { id: task.id })?;
        *slot = task.clone();
        self.publish(&rows);
        Ok(())
    }

    async fn delete(&self, task: &Task) -> Result<(), StoreError> {
        let mut rows = self.lock()?;
        if rows.by_id.remove(&task.id).is_some() {
            self.publish(&rows);
        }
        Ok(())
    }

    async fn delete_all(&self) -> Result<(), StoreError> {
        let mut rows = self.lock()?;
        rows.by_id.clear();
        self.publish(&rows);
        Ok(())
    }

    fn query_all(&self) -> TaskStream {
        TaskStream::new(self.changes.subscribe())
    }
}
