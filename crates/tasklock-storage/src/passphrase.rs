//! Database passphrase: generated once per installation, kept sealed in the
//! secure preferences, never rotated.

use std::fmt;

use rand::{rngs::OsRng, Rng};
use tasklock_core::{
    storage::{SecureStore, SecureStoreError},
    StoreError,
};
use tracing::{info, instrument};
use zeroize::Zeroizing;

/// Name of the single entry in the secure preferences.
pub const PASSPHRASE_ENTRY: &str = "db_passphrase";

/// Shortest passphrase accepted by [`PassphraseVault::new`].
pub const MIN_PASSPHRASE_LENGTH: usize = 64;

pub const DEFAULT_PASSPHRASE_LENGTH: usize = 4096;

/// Mixed-case Latin letters, digits and 27 ASCII symbols: 89 characters, all
/// single-byte in UTF-8.
const ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789!@#$%^&*()-_=+<>?[]{}~;:,./";

/// Raw passphrase bytes as handed to the database. Zeroized on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct Passphrase(Zeroizing<Vec<u8>>);

impl Passphrase {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Passphrase")
            .field("len", &self.0.len())
            .finish()
    }
}

/// Sample `length` characters uniformly from [`ALPHABET`] with the OS CSPRNG.
///
/// The result is encoded as UTF-8; every alphabet character is ASCII, so each
/// character is exactly one byte.
pub fn generate_passphrase(length: usize) -> Passphrase {
    let mut rng = OsRng;
    let bytes = (0..length)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())])
        .collect();
    Passphrase::from_bytes(bytes)
}

/// Retrieves the database passphrase from a [`SecureStore`], creating and
/// storing it on first use.
pub struct PassphraseVault<S: SecureStore> {
    store: S,
    length: usize,
}

impl<S: SecureStore> PassphraseVault<S> {
    pub fn new(store: S, length: usize) -> Result<Self, StoreError> {
        if length < MIN_PASSPHRASE_LENGTH {
            return Err(StoreError::InvalidInput(format!(
                "passphrase length must be at least {MIN_PASSPHRASE_LENGTH} (got {length})"
            )));
        }
        Ok(Self { store, length })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Return the stored passphrase without ever creating one. Used when a
    /// database already exists: a fresh passphrase could not open it, so a
    /// missing entry fails with `StoreOpen` and nothing is written.
    #[instrument(skip_all)]
    pub async fn get_existing_passphrase(&self) -> Result<Passphrase, StoreError> {
        match self.store.get(PASSPHRASE_ENTRY).await {
            Ok(bytes) if bytes.is_empty() => Err(StoreError::KeyStoreCorrupted {
                reason: "stored passphrase is empty".to_string(),
            }),
            Ok(bytes) => Ok(Passphrase::from_bytes(bytes)),
            Err(SecureStoreError::NotFound { .. }) => Err(StoreError::open(
                "database exists but its passphrase is missing from secure prefs",
            )),
            Err(err) => Err(err.into()),
        }
    }

    /// Return the stored passphrase, generating and persisting one if absent.
    ///
    /// A corrupted entry is fatal and is never replaced: the database is
    /// encrypted under the old value.
    #[instrument(skip_all)]
    pub async fn get_passphrase(&self) -> Result<Passphrase, StoreError> {
        match self.store.get(PASSPHRASE_ENTRY).await {
            Ok(bytes) if bytes.is_empty() => Err(StoreError::KeyStoreCorrupted {
                reason: "stored passphrase is empty".to_string(),
            }),
            Ok(bytes) => Ok(Passphrase::from_bytes(bytes)),
            Err(SecureStoreError::NotFound { .. }) => {
                let length = self.length;
                let passphrase = tokio::task::spawn_blocking(move || generate_passphrase(length))
                    .await
                    .map_err(|e| StoreError::storage(format!("passphrase task failed: {e}")))?;
                self.store
                    .put(PASSPHRASE_ENTRY, passphrase.as_bytes())
                    .await?;
                info!(length, "generated database passphrase");
                Ok(passphrase)
            }
            Err(err) => Err(err.into()),
        }
    }
}
