use thiserror::Error;

use crate::tasks::TaskId;

/// Failures surfaced by the task store and everything layered on top of it.
///
/// Only `NotFound` is recoverable. The key and open variants mean the encrypted
/// database cannot be read and must not be retried blindly.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The wrapping key could not be obtained from secure storage.
    #[error("key provisioning failed: {reason}")]
    KeyProvisioning { reason: String },
    /// The sealed passphrase failed authenticated decryption.
    #[error("key store corrupted: {reason}")]
    KeyStoreCorrupted { reason: String },
    /// The database file could not be decrypted or validated.
    #[error("failed to open task store: {reason}")]
    StoreOpen { reason: String },
    /// No task with the given id exists.
    #[error("task {id} not found")]
    NotFound { id: TaskId },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    /// Any other backend failure.
    #[error("storage failure: {reason}")]
    Storage { reason: String },
}

impl StoreError {
    pub fn storage(reason: impl ToString) -> Self {
        StoreError::Storage {
            reason: reason.to_string(),
        }
    }

    pub fn open(reason: impl ToString) -> Self {
        StoreError::StoreOpen {
            reason: reason.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}
