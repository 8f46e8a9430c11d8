use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use thiserror::Error;

use crate::error::StoreError;

/// Errors produced by secure storage implementations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SecureStoreError {
    /// Requested entry does not exist.
    #[error("entry not found for key: {key}")]
    NotFound { key: String },
    /// Authenticated decryption failed: tampered data or the wrong wrapping key.
    #[error("entry corrupted: {reason}")]
    Corrupted { reason: String },
    /// The wrapping key could not be obtained.
    #[error("wrapping key unavailable: {reason}")]
    KeyUnavailable { reason: String },
    /// Underlying storage failure.
    #[error("storage failure: {reason}")]
    Storage { reason: String },
}

impl From<SecureStoreError> for StoreError {
    fn from(err: SecureStoreError) -> Self {
        match err {
            SecureStoreError::Corrupted { reason } => StoreError::KeyStoreCorrupted { reason },
            SecureStoreError::KeyUnavailable { reason } => StoreError::KeyProvisioning { reason },
            other => StoreError::storage(other),
        }
    }
}

/// Encrypted-at-rest key-value namespace. Holds the database passphrase.
#[async_trait]
pub trait SecureStore: Send + Sync {
    /// Persist a value under a key, overwriting any existing entry.
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), SecureStoreError>;

    /// Retrieve the value for a key.
    async fn get(&self, key: &str) -> Result<Vec<u8>, SecureStoreError>;

    /// Remove a key and its value (idempotent).
    async fn delete(&self, key: &str) -> Result<(), SecureStoreError>;
}

/// In-memory secure store for tests. Values are masked, not encrypted.
#[derive(Debug, Default, Clone)]
pub struct InMemorySecureStore {
    inner: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    writes: Arc<Mutex<usize>>,
}

impl InMemorySecureStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `put` calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.lock().map(|count| *count).unwrap_or_default()
    }
}

#[async_trait]
impl SecureStore for InMemorySecureStore {
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), SecureStoreError> {
        let mut map = self.inner.lock().map_err(|err| SecureStoreError::Storage {
            reason: format!("lock poisoned: {err}"),
        })?;
        map.insert(key.to_string(), mask(value));
        if let Ok(mut writes) = self.writes.lock() {
            *writes += 1;
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, SecureStoreError> {
        let map = self.inner.lock().map_err(|err| SecureStoreError::Storage {
            reason: format!("lock poisoned: {err}"),
        })?;

        map.get(key)
            .map(|masked| mask(masked))
            .ok_or_else(|| SecureStoreError::NotFound {
                key: key.to_string(),
            })
    }

    async fn delete(&self, key: &str) -> Result<(), SecureStoreError> {
        let mut map = self.inner.lock().map_err(|err| SecureStoreError::Storage {
            reason: format!("lock poisoned: {err}"),
        })?;
        map.remove(key);
        Ok(())
    }
}

const MASK_BYTE: u8 = 0xA5;

// XOR is its own inverse.
fn mask(input: &[u8]) -> Vec<u8> {
    input.iter().map(|b| b ^ MASK_BYTE).collect()
}
