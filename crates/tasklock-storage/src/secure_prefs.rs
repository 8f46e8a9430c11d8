use std::{
    collections::BTreeMap,
    fs::File,
    io::{ErrorKind, Read},
    path::{Path, PathBuf},
};

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};
use tasklock_core::storage::{SecureStore, SecureStoreError};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, instrument};
use zeroize::Zeroizing;

use crate::{
    fs::write_atomic,
    key_provider::{KeyError, KeyMaterial, KeyProvider},
};

const NAME_KEY_CONTEXT: &str = "tasklock secure prefs v1 entry names";
const VALUE_KEY_CONTEXT: &str = "tasklock secure prefs v1 entry values";
const KEY_CHECK_LABEL: &[u8] = b"tasklock wrapping key check";
const PREFS_VERSION: u8 = 1;
const NONCE_LEN: usize = 12;

/// Encrypted preferences file implementing the shared `SecureStore` contract.
///
/// All entries live in one JSON document. Entry names are replaced by a keyed
/// BLAKE3 hash and values are sealed with AES-256-GCM, both under subkeys of the
/// wrapping key. A key check value in the file detects a wrapping key that does
/// not match the one the file was written with. The wrapping key is resolved
/// once per store instance.
pub struct EncryptedPrefsStore<P: KeyProvider> {
    path: PathBuf,
    key_provider: P,
    keys: OnceCell<PrefsKeys>,
    write_lock: Mutex<()>,
}

struct PrefsKeys {
    names: Zeroizing<[u8; 32]>,
    values: Aes256Gcm,
}

impl PrefsKeys {
    fn derive(material: &KeyMaterial) -> Result<Self, SecureStoreError> {
        let names = Zeroizing::new(blake3::derive_key(NAME_KEY_CONTEXT, &material.bytes));
        let value_key = Zeroizing::new(blake3::derive_key(VALUE_KEY_CONTEXT, &material.bytes));
        let values =
            Aes256Gcm::new_from_slice(value_key.as_slice()).map_err(|e| {
                SecureStoreError::Storage {
                    reason: format!("cipher init failed: {e}"),
                }
            })?;
        Ok(Self { names, values })
    }

    fn token_for(&self, name: &str) -> String {
        URL_SAFE_NO_PAD.encode(blake3::keyed_hash(&self.names, name.as_bytes()).as_bytes())
    }

    fn key_check(&self) -> String {
        URL_SAFE_NO_PAD.encode(blake3::keyed_hash(&self.names, KEY_CHECK_LABEL).as_bytes())
    }

    fn verify(&self, prefs: &PrefsFile) -> Result<(), SecureStoreError> {
        match &prefs.key_check {
            Some(check) if *check != self.key_check() => {
                Err(corrupted("wrapping key does not match secure prefs"))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PrefsFile {
    version: u8,
    #[serde(default)]
    key_check: Option<String>,
    entries: BTreeMap<String, StoredBlob>,
}

impl Default for PrefsFile {
    fn default() -> Self {
        Self {
            version: PREFS_VERSION,
            key_check: None,
            entries: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredBlob {
    nonce: String,
    ciphertext: String,
}

impl<P: KeyProvider> EncryptedPrefsStore<P> {
    pub fn new(path: impl Into<PathBuf>, key_provider: P) -> Self {
        Self {
            path: path.into(),
            key_provider,
            keys: OnceCell::new(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolve the wrapping key. Once the file exists it was sealed under some
    /// key, so a missing key is reported instead of minting one that could never
    /// read it.
    async fn keys(&self) -> Result<&PrefsKeys, SecureStoreError> {
        self.keys
            .get_or_try_init(|| async {
                let material = if self.path.exists() {
                    self.key_provider
                        .get()
                        .await
                        .map_err(key_unavailable)?
                        .ok_or_else(|| SecureStoreError::KeyUnavailable {
                            reason: "wrapping key lost: secure prefs exist but the key store is empty"
                                .to_string(),
                        })?
                } else {
                    self.key_provider
                        .get_or_create()
                        .await
                        .map_err(key_unavailable)?
                };
                PrefsKeys::derive(&material)
            })
            .await
    }
}

#[async_trait]
impl<P: KeyProvider> SecureStore for EncryptedPrefsStore<P> {
    #[instrument(skip_all, fields(key))]
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), SecureStoreError> {
        let keys = self.keys().await?;
        let token = keys.token_for(key);

        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = keys
            .values
            .encrypt(
                &nonce,
                Payload {
                    msg: value,
                    aad: token.as_bytes(),
                },
            )
            .map_err(|e| SecureStoreError::Storage {
                reason: format!("encrypt failed: {e}"),
            })?;

        let _guard = self.write_lock.lock().await;
        let mut prefs = read_prefs(&self.path)?.unwrap_or_default();
        keys.verify(&prefs)?;
        prefs.key_check = Some(keys.key_check());
        prefs.entries.insert(
            token,
            StoredBlob {
                nonce: URL_SAFE_NO_PAD.encode(nonce.as_slice()),
                ciphertext: URL_SAFE_NO_PAD.encode(ciphertext),
            },
        );
        write_prefs(&self.path, &prefs)?;
        debug!(entries = prefs.entries.len(), "secure prefs written");
        Ok(())
    }

    #[instrument(skip_all, fields(key))]
    async fn get(&self, key: &str) -> Result<Vec<u8>, SecureStoreError> {
        let not_found = || SecureStoreError::NotFound {
            key: key.to_string(),
        };
        let prefs = read_prefs(&self.path)?.ok_or_else(not_found)?;

        let keys = self.keys().await?;
        keys.verify(&prefs)?;
        let token = keys.token_for(key);
        let blob = prefs.entries.get(&token).ok_or_else(not_found)?;

        let nonce_bytes = URL_SAFE_NO_PAD
            .decode(&blob.nonce)
            .map_err(|e| corrupted(format!("nonce decode failed: {e}")))?;
        if nonce_bytes.len() != NONCE_LEN {
            return Err(corrupted(format!(
                "nonce must be {NONCE_LEN} bytes, got {}",
                nonce_bytes.len()
            )));
        }
        let ciphertext = URL_SAFE_NO_PAD
            .decode(&blob.ciphertext)
            .map_err(|e| corrupted(format!("ciphertext decode failed: {e}")))?;

        keys.values
            .decrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: &ciphertext,
                    aad: token.as_bytes(),
                },
            )
            .map_err(|_| corrupted("authenticated decryption failed"))
    }

    #[instrument(skip_all, fields(key))]
    async fn delete(&self, key: &str) -> Result<(), SecureStoreError> {
        let keys = self.keys().await?;
        let token = keys.token_for(key);

        let _guard = self.write_lock.lock().await;
        let Some(mut prefs) = read_prefs(&self.path)? else {
            return Ok(());
        };
        keys.verify(&prefs)?;
        if prefs.entries.remove(&token).is_some() {
            write_prefs(&self.path, &prefs)?;
        }
        Ok(())
    }
}

fn read_prefs(path: &Path) -> Result<Option<PrefsFile>, SecureStoreError> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(storage_err(err)),
    };

    let mut buf = Vec::new();
    file.read_to_end(&mut buf).map_err(storage_err)?;
    let prefs: PrefsFile = serde_json::from_slice(&buf)
        .map_err(|e| corrupted(format!("prefs file unreadable: {e}")))?;
    if prefs.version != PREFS_VERSION {
        return Err(corrupted(format!(
            "unsupported prefs version {}",
            prefs.version
        )));
    }
    Ok(Some(prefs))
}

fn write_prefs(path: &Path, prefs: &PrefsFile) -> Result<(), SecureStoreError> {
    let json = serde_json::to_vec(prefs).map_err(storage_err)?;
    write_atomic(path, &json).map_err(storage_err)
}

fn key_unavailable(err: KeyError) -> SecureStoreError {
    SecureStoreError::KeyUnavailable {
        reason: err.to_string(),
    }
}

fn corrupted(reason: impl Into<String>) -> SecureStoreError {
    SecureStoreError::Corrupted {
        reason: reason.into(),
    }
}

fn storage_err<E: ToString>(err: E) -> SecureStoreError {
    SecureStoreError::Storage {
        reason: err.to_string(),
    }
}
