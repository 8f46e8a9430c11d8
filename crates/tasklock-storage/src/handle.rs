//! Process-wide store handle and the open sequence behind it.

use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, OnceLock,
    },
};

use tasklock_core::StoreError;
use tokio::sync::OnceCell;
use tracing::{info, instrument};

use crate::{
    config::StoreConfig,
    key_provider::KeyProvider,
    passphrase::PassphraseVault,
    secure_prefs::EncryptedPrefsStore,
    sqlite_store::EncryptedTaskStore,
};

/// Lifecycle of a [`StoreSlot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    Closed,
    Opening,
    Open,
}

/// Holds at most one open task store. Concurrent first callers share a single
/// open; a failed open leaves the slot empty.
#[derive(Default)]
pub struct StoreSlot {
    cell: OnceCell<Arc<EncryptedTaskStore>>,
    opening: AtomicBool,
}

impl StoreSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the open store, running `open` only if no store exists yet.
    pub async fn get_or_open<F, Fut>(&self, open: F) -> Result<Arc<EncryptedTaskStore>, StoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<EncryptedTaskStore, StoreError>>,
    {
        let store = self
            .cell
            .get_or_try_init(|| async {
                let _opening = OpeningFlag::raise(&self.opening);
                open().await.map(Arc::new)
            })
            .await?;
        Ok(Arc::clone(store))
    }

    pub fn get(&self) -> Option<Arc<EncryptedTaskStore>> {
        self.cell.get().cloned()
    }

    pub fn state(&self) -> StoreState {
        match self.cell.get() {
            Some(store) if store.is_open() => StoreState::Open,
            Some(_) => StoreState::Closed,
            None if self.opening.load(Ordering::SeqCst) => StoreState::Opening,
            None => StoreState::Closed,
        }
    }
}

/// Clears the `Opening` marker when the open finishes or its future is dropped.
struct OpeningFlag<'a>(&'a AtomicBool);

impl<'a> OpeningFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for OpeningFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// The slot shared by the whole process.
pub fn global() -> &'static StoreSlot {
    static SLOT: OnceLock<StoreSlot> = OnceLock::new();
    SLOT.get_or_init(StoreSlot::new)
}

/// Resolve the wrapping key, fetch or create the passphrase and open the database.
#[instrument(skip_all, fields(data_dir = %config.data_dir.display()))]
pub async fn open_task_store<P: KeyProvider>(
    config: &StoreConfig,
    key_provider: P,
) -> Result<EncryptedTaskStore, StoreError> {
    let prefs = EncryptedPrefsStore::new(config.prefs_path(), key_provider);
    let vault = PassphraseVault::new(prefs, config.passphrase_length)?;
    let passphrase = if config.db_path().exists() {
        vault.get_existing_passphrase().await?
    } else {
        vault.get_passphrase().await?
    };
    let store = EncryptedTaskStore::open(config.db_path(), &passphrase).await?;
    info!("encrypted task store ready");
    Ok(store)
}

/// Open (once) the process-wide store.
pub async fn open_global<P: KeyProvider>(
    config: &StoreConfig,
    key_provider: P,
) -> Result<Arc<EncryptedTaskStore>, StoreError> {
    global()
        .get_or_open(|| open_task_store(config, key_provider))
        .await
}
