//! Encrypted storage for Tasklock.
//!
//! A wrapping key from the OS keyring seals a random database passphrase in a
//! small preferences file; the passphrase keys an AES-GCM encrypted SQLite image.

pub mod config;
pub(crate) mod crypto;
pub(crate) mod fs;
pub mod handle;
pub mod key_provider;
pub mod passphrase;
pub mod secure_prefs;
pub mod sqlite_store;

pub use config::StoreConfig;
pub use handle::{global, open_global, open_task_store, StoreSlot, StoreState};
pub use sqlite_store::EncryptedTaskStore;
