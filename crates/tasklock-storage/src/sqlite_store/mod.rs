//! Encrypted SQLite task store.
//!
//! The database lives in memory while open. Every committed mutation serializes
//! the image, seals it with the passphrase-derived key and atomically replaces
//! the file, then publishes the new task collection to subscribers. A write that
//! cannot be persisted is rolled back to the last image on disk.

mod row;
mod schema;

use std::{
    fs,
    path::{Path, PathBuf},
    ptr::NonNull,
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use rusqlite::{serialize::OwnedData, Connection, DatabaseName};
use tasklock_core::{StoreError, Task, TaskId, TaskStore, TaskStream};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    crypto::{read_salt, DatabaseKey},
    fs::write_atomic,
    passphrase::Passphrase,
};
use row::{TaskRow, SELECT_ALL};

/// Handle to an open encrypted task database.
pub struct EncryptedTaskStore {
    inner: Arc<Inner>,
}

struct Inner {
    path: PathBuf,
    key: DatabaseKey,
    /// `None` once closed.
    db: Mutex<Option<OpenDb>>,
    changes: watch::Sender<Vec<Task>>,
}

struct OpenDb {
    conn: Connection,
    /// Sealed image matching the file on disk.
    sealed: Vec<u8>,
}

impl EncryptedTaskStore {
    /// Open the database at `path`, creating it if the file does not exist.
    ///
    /// An existing file that cannot be decrypted or validated fails with
    /// `StoreOpen` and is left untouched; it is never recreated.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn open(path: impl AsRef<Path>, passphrase: &Passphrase) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let passphrase = passphrase.clone();
        let inner = tokio::task::spawn_blocking(move || Inner::open(path, &passphrase))
            .await
            .map_err(|e| StoreError::open(format!("open task failed: {e}")))??;
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn is_open(&self) -> bool {
        self.inner
            .lock_db()
            .map(|db| db.is_some())
            .unwrap_or(false)
    }

    /// Flush and release the connection. Later operations fail; existing
    /// subscribers keep their last snapshot.
    #[instrument(skip_all)]
    pub async fn close(&self) -> Result<(), StoreError> {
        self.run(|inner| {
            let mut guard = inner.lock_db()?;
            if let Some(db) = guard.take() {
                inner.persist(&db.conn)?;
                info!(path = %inner.path.display(), "task store closed");
            }
            Ok(())
        })
        .await
    }

    async fn run<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Inner) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || op(&inner))
            .await
            .map_err(|e| StoreError::storage(format!("store task failed: {e}")))?
    }
}

#[async_trait]
impl TaskStore for EncryptedTaskStore {
    #[instrument(skip_all, fields(count = tasks.len()))]
    async fn insert(&self, tasks: &[Task]) -> Result<Vec<TaskId>, StoreError> {
        for task in tasks {
            task.validate()?;
        }
        let tasks = tasks.to_vec();
        self.run(move |inner| {
            inner.mutate(|conn| {
                let tx = conn.transaction().map_err(sql_err)?;
                let mut ids = Vec::with_capacity(tasks.len());
                for task in &tasks {
                    if task.is_new() {
                        tx.execute(
                            "INSERT INTO task_table (title, description, is_completed) VALUES (?1, ?2, ?3)",
                            (&task.title, &task.description, task.is_completed),
                        )
                        .map_err(sql_err)?;
                        ids.push(tx.last_insert_rowid());
                    } else {
                        tx.execute(
                            "INSERT OR REPLACE INTO task_table (id, title, description, is_completed) VALUES (?1, ?2, ?3, ?4)",
                            (task.id, &task.title, &task.description, task.is_completed),
                        )
                        .map_err(sql_err)?;
                        ids.push(task.id);
                    }
                }
                tx.commit().map_err(sql_err)?;
                Ok(ids)
            })
        })
        .await
    }

    #[instrument(skip_all, fields(id = task.id))]
    async fn update(&self, task: &Task) -> Result<(), StoreError> {
        task.validate()?;
        let task = task.clone();
        self.run(move |inner| {
            inner.mutate(|conn| {
                let changed = conn
                    .execute(
                        "UPDATE task_table SET title = ?2, description = ?3, is_completed = ?4 WHERE id = ?1",
                        (task.id, &task.title, &task.description, task.is_completed),
                    )
                    .map_err(sql_err)?;
                if changed == 0 {
                    return Err(StoreError::NotFound { id: task.id });
                }
                Ok(())
            })
        })
        .await
    }

    #[instrument(skip_all, fields(id = task.id))]
    async fn delete(&self, task: &Task) -> Result<(), StoreError> {
        let id = task.id;
        self.run(move |inner| {
            inner.mutate(|conn| {
                let removed = conn
                    .execute("DELETE FROM task_table WHERE id = ?1", [id])
                    .map_err(sql_err)?;
                if removed == 0 {
                    debug!(id, "delete of absent task ignored");
                }
                Ok(())
            })
        })
        .await
    }

    #[instrument(skip_all)]
    async fn delete_all(&self) -> Result<(), StoreError> {
        self.run(|inner| {
            inner.mutate(|conn| {
                let removed = conn
                    .execute("DELETE FROM task_table", [])
                    .map_err(sql_err)?;
                debug!(removed, "cleared task table");
                Ok(())
            })
        })
        .await
    }

    fn query_all(&self) -> TaskStream {
        TaskStream::new(self.inner.changes.subscribe())
    }
}

impl Inner {
    fn open(path: PathBuf, passphrase: &Passphrase) -> Result<Self, StoreError> {
        let (conn, key, existing) = if path.exists() {
            let sealed = fs::read(&path)?;
            let key = DatabaseKey::derive(passphrase.as_bytes(), read_salt(&sealed)?)?;
            let image = key.open(&sealed)?;

            let mut conn = Connection::open_in_memory().map_err(StoreError::open)?;
            conn.deserialize(DatabaseName::Main, owned_data_from_bytes(&image)?, false)
                .map_err(StoreError::open)?;
            schema::validate(&conn)?;
            (conn, key, Some(sealed))
        } else {
            let key = DatabaseKey::generate(passphrase.as_bytes())?;
            let conn = Connection::open_in_memory().map_err(StoreError::open)?;
            schema::create(&conn).map_err(StoreError::open)?;
            (conn, key, None)
        };

        let snapshot = load_all(&conn)?;
        let (changes, _rx) = watch::channel(snapshot);
        let inner = Self {
            path,
            key,
            db: Mutex::new(None),
            changes,
        };
        let created = existing.is_none();
        let sealed = match existing {
            Some(sealed) => sealed,
            None => inner.persist(&conn)?,
        };
        info!(
            path = %inner.path.display(),
            created,
            tasks = inner.changes.borrow().len(),
            "task store open"
        );
        *inner.lock_db()? = Some(OpenDb { conn, sealed });
        Ok(inner)
    }

    fn lock_db(&self) -> Result<MutexGuard<'_, Option<OpenDb>>, StoreError> {
        self.db
            .lock()
            .map_err(|_| StoreError::storage("SQLite connection poisoned"))
    }

    /// Apply a write, persist the image and publish the new collection. The
    /// connection lock is held throughout, so writes reach disk in commit order.
    ///
    /// If the image cannot be written, the connection is reset to the image on
    /// disk so the abandoned write never resurfaces. Should that reset fail too,
    /// the store closes.
    fn mutate<T>(
        &self,
        op: impl FnOnce(&mut Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self.lock_db()?;
        let db = guard
            .as_mut()
            .ok_or_else(|| StoreError::storage("task store is closed"))?;

        let out = op(&mut db.conn)?;
        match self.persist(&db.conn) {
            Ok(sealed) => db.sealed = sealed,
            Err(err) => {
                warn!(error = %err, "write not persisted, rolling back");
                if let Err(restore_err) = self.restore(db) {
                    error!(error = %restore_err, "rollback failed, closing task store");
                    *guard = None;
                }
                return Err(err);
            }
        }
        self.changes.send_replace(load_all(&db.conn)?);
        Ok(out)
    }

    /// Write the current image to disk and return what was written.
    fn persist(&self, conn: &Connection) -> Result<Vec<u8>, StoreError> {
        let image = conn.serialize(DatabaseName::Main).map_err(sql_err)?;
        let sealed = self.key.seal(image.as_ref())?;
        write_atomic(&self.path, &sealed)?;
        debug!(bytes = sealed.len(), "task database persisted");
        Ok(sealed)
    }

    fn restore(&self, db: &mut OpenDb) -> Result<(), StoreError> {
        let image = self.key.open(&db.sealed)?;
        db.conn.flush_prepared_statement_cache();
        db.conn
            .deserialize(DatabaseName::Main, owned_data_from_bytes(&image)?, false)
            .map_err(sql_err)
    }
}

fn load_all(conn: &Connection) -> Result<Vec<Task>, StoreError> {
    let mut stmt = conn.prepare_cached(SELECT_ALL).map_err(sql_err)?;
    let rows = stmt
        .query_map([], TaskRow::from_row)
        .map_err(sql_err)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(sql_err)?;
    Ok(rows.into_iter().map(Task::from).collect())
}

fn owned_data_from_bytes(bytes: &[u8]) -> Result<OwnedData, StoreError> {
    if bytes.is_empty() {
        return Err(StoreError::open("database image is empty"));
    }
    let size: i32 = bytes
        .len()
        .try_into()
        .map_err(|_| StoreError::open("database image too large"))?;

    // SAFETY: sqlite3_malloc returns either null or a buffer of `size` bytes; null
    // is checked before use.
    let raw = unsafe { rusqlite::ffi::sqlite3_malloc(size) as *mut u8 };
    let ptr = NonNull::new(raw).ok_or_else(|| StoreError::storage("SQLite allocation failed"))?;

    // SAFETY: `ptr` is a fresh, writable allocation of exactly `bytes.len()` bytes
    // that cannot overlap `bytes`. OwnedData takes ownership and frees it through
    // SQLite.
    unsafe {
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.as_ptr(), bytes.len());
        Ok(OwnedData::from_raw_nonnull(ptr, bytes.len()))
    }
}

fn sql_err(err: rusqlite::Error) -> StoreError {
    StoreError::storage(format!("sqlite: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::passphrase::generate_passphrase;

    fn passphrase() -> Passphrase {
        generate_passphrase(64)
    }

    #[tokio::test]
    async fn insert_then_query_emits_task_with_assigned_id() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = EncryptedTaskStore::open(dir.path().join("encrypted_todo.db"), &passphrase())
            .await
            .expect("open");

        let ids = store
            .insert(&[Task::new("Buy milk", "2%")])
            .await
            .expect("insert");

        let tasks = store.query_all().next().await.expect("snapshot");
        assert_eq!(
            tasks,
            vec![Task {
                id: ids[0],
                ..Task::new("Buy milk", "2%")
            }]
        );
    }

    #[tokio::test]
    async fn subscriber_sees_later_changes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = EncryptedTaskStore::open(dir.path().join("db"), &passphrase())
            .await
            .expect("open");
        let mut stream = store.query_all();
        assert!(stream.next().await.expect("initial").is_empty());

        store.insert(&[Task::new("a", "")]).await.expect("insert");
        assert_eq!(stream.next().await.expect("after insert").len(), 1);

        store.delete_all().await.expect("clear");
        assert!(stream.next().await.expect("after clear").is_empty());
    }

    #[tokio::test]
    async fn update_changes_only_target_row() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = EncryptedTaskStore::open(dir.path().join("db"), &passphrase())
            .await
            .expect("open");
        let ids = store
            .insert(&[Task::new("one", "a"), Task::new("two", "b")])
            .await
            .expect("insert");

        let before = store.query_all().latest();
        store
            .update(&before[0].with_completed(true))
            .await
            .expect("update");

        let after = store.query_all().latest();
        assert_eq!(after[0].id, ids[0]);
        assert!(after[0].is_completed);
        assert_eq!(after[0].title, "one");
        assert_eq!(after[1], before[1]);
    }

    #[tokio::test]
    async fn update_missing_id_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = EncryptedTaskStore::open(dir.path().join("db"), &passphrase())
            .await
            .expect("open");
        let ghost = Task {
            id: 99,
            ..Task::new("ghost", "")
        };
        let err = store.update(&ghost).await.expect_err("missing");
        assert!(matches!(err, StoreError::NotFound { id: 99 }));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = EncryptedTaskStore::open(dir.path().join("db"), &passphrase())
            .await
            .expect("open");
        store.insert(&[Task::new("keep", "")]).await.expect("insert");
        let ghost = Task {
            id: 1234,
            ..Task::new("ghost", "")
        };

        store.delete(&ghost).await.expect("first delete");
        store.delete(&ghost).await.expect("second delete");
        assert_eq!(store.query_all().latest().len(), 1);
    }

    #[tokio::test]
    async fn insert_with_existing_id_replaces_row() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = EncryptedTaskStore::open(dir.path().join("db"), &passphrase())
            .await
            .expect("open");
        let ids = store.insert(&[Task::new("draft", "")]).await.expect("insert");

        let replacement = Task {
            id: ids[0],
            ..Task::new("final", "edited")
        };
        store.insert(&[replacement.clone()]).await.expect("upsert");

        assert_eq!(store.query_all().latest(), vec![replacement]);
    }

    #[tokio::test]
    async fn blank_title_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = EncryptedTaskStore::open(dir.path().join("db"), &passphrase())
            .await
            .expect("open");
        let err = store
            .insert(&[Task::new("", "no title")])
            .await
            .expect_err("blank");
        assert!(matches!(err, StoreError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn reopen_restores_tasks_and_keeps_ids_monotonic() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("encrypted_todo.db");
        let secret = passphrase();

        let store = EncryptedTaskStore::open(&path, &secret).await.expect("open");
        store
            .insert(&[Task::new("a", ""), Task::new("b", "")])
            .await
            .expect("insert");
        let last = store.query_all().latest()[1].clone();
        store.delete(&last).await.expect("delete");
        store.close().await.expect("close");
        assert!(!store.is_open());

        let reopened = EncryptedTaskStore::open(&path, &secret).await.expect("reopen");
        let tasks = reopened.query_all().latest();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].title, "a");

        let ids = reopened.insert(&[Task::new("c", "")]).await.expect("insert");
        assert!(ids[0] > last.id, "ids are not reused after reopen");
    }

    #[tokio::test]
    async fn file_does_not_contain_plaintext() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("db");
        let store = EncryptedTaskStore::open(&path, &passphrase()).await.expect("open");
        store
            .insert(&[Task::new("very-secret-title", "")])
            .await
            .expect("insert");

        let bytes = fs::read(&path).expect("read");
        let needle = b"very-secret-title";
        assert!(!bytes.windows(needle.len()).any(|w| w == needle));
        assert!(!bytes.windows(6).any(|w| w == b"SQLite"));
    }

    #[tokio::test]
    async fn wrong_passphrase_fails_and_leaves_file_intact() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("encrypted_todo.db");
        let secret = passphrase();

        let store = EncryptedTaskStore::open(&path, &secret).await.expect("open");
        store.insert(&[Task::new("kept", "")]).await.expect("insert");
        store.close().await.expect("close");
        let before = fs::read(&path).expect("read");

        let err = EncryptedTaskStore::open(&path, &passphrase())
            .await
            .err()
            .expect("wrong passphrase");
        assert!(matches!(err, StoreError::StoreOpen { .. }));
        assert_eq!(fs::read(&path).expect("read"), before);

        let reopened = EncryptedTaskStore::open(&path, &secret).await.expect("reopen");
        assert_eq!(reopened.query_all().latest()[0].title, "kept");
    }

    #[tokio::test]
    async fn unpersisted_write_is_rolled_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("encrypted_todo.db");
        let secret = passphrase();
        let store = EncryptedTaskStore::open(&path, &secret).await.expect("open");
        store.insert(&[Task::new("kept", "")]).await.expect("insert");

        // A directory in place of the file makes the atomic rename fail.
        fs::remove_file(&path).expect("remove db");
        fs::create_dir(&path).expect("block db path");
        let err = store
            .insert(&[Task::new("failed insert", "")])
            .await
            .expect_err("unwritable");
        assert!(matches!(err, StoreError::Io { .. }));
        assert!(store.is_open());

        let titles = |tasks: Vec<Task>| tasks.into_iter().map(|t| t.title).collect::<Vec<_>>();
        assert_eq!(titles(store.query_all().latest()), ["kept"]);

        fs::remove_dir(&path).expect("unblock db path");
        store.insert(&[Task::new("ok insert", "")]).await.expect("insert");
        assert_eq!(titles(store.query_all().latest()), ["kept", "ok insert"]);
        store.close().await.expect("close");

        let reopened = EncryptedTaskStore::open(&path, &secret).await.expect("reopen");
        assert_eq!(titles(reopened.query_all().latest()), ["kept", "ok insert"]);
    }

    #[tokio::test]
    async fn corrupt_file_fails_to_open() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("db");
        fs::write(&path, b"definitely not a database").expect("write");

        let err = EncryptedTaskStore::open(&path, &passphrase())
            .await
            .err()
            .expect("corrupt");
        assert!(matches!(err, StoreError::StoreOpen { .. }));
    }

    #[tokio::test]
    async fn closed_store_rejects_writes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = EncryptedTaskStore::open(dir.path().join("db"), &passphrase())
            .await
            .expect("open");
        store.close().await.expect("close");

        let err = store
            .insert(&[Task::new("late", "")])
            .await
            .expect_err("closed");
        assert!(matches!(err, StoreError::Storage { .. }));
    }
}
