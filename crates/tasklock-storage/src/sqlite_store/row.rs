use rusqlite::Row;
use tasklock_core::{Task, TaskId};

pub(super) const SELECT_ALL: &str =
    "SELECT id, title, description, is_completed FROM task_table ORDER BY id ASC";

/// Raw `task_table` row. Never leaves this module as anything but a [`Task`].
#[derive(Debug)]
pub(super) struct TaskRow {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    pub is_completed: i64,
}

impl TaskRow {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            is_completed: row.get(3)?,
        })
    }
}

impl From<TaskRow> for Task {
    fn from(row: TaskRow) -> Self {
        Task {
            id: row.id,
            title: row.title,
            description: row.description,
            is_completed: row.is_completed != 0,
        }
    }
}
