use rusqlite::{Connection, OptionalExtension};
use tasklock_core::StoreError;

pub(super) const SCHEMA_VERSION: i64 = 1;

const CREATE_SCHEMA: &str = r#"
CREATE TABLE task_table (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    description TEXT NOT NULL,
    is_completed INTEGER NOT NULL DEFAULT 0
);
PRAGMA user_version = 1;
"#;

pub(super) fn create(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(CREATE_SCHEMA)
}

/// Check a decrypted image before handing it out. There are no migrations, so
/// anything but version 1 with the task table present is rejected.
pub(super) fn validate(conn: &Connection) -> Result<(), StoreError> {
    let version: i64 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(StoreError::open)?;
    if version != SCHEMA_VERSION {
        return Err(StoreError::open(format!(
            "unsupported schema version {version}"
        )));
    }

    let table: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'task_table'",
            [],
            |row| row.get(0),
        )
        .optional()
        .map_err(StoreError::open)?;
    if table.is_none() {
        return Err(StoreError::open("task_table is missing"));
    }
    Ok(())
}
