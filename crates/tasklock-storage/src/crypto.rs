//! Database-image encryption.
//!
//! The passphrase bytes are stretched with Argon2id into a 256-bit key, which
//! seals the serialized SQLite image with AES-256-GCM. File layout:
//!
//! ```text
//! magic "TLDB" | format u8 | salt [16] | nonce [12] | ciphertext
//! ```
//!
//! Everything before the ciphertext is bound as associated data.

use std::fmt;

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use argon2::Argon2;
use rand::RngCore;
use tasklock_core::StoreError;
use zeroize::ZeroizeOnDrop;

const MAGIC: &[u8; 4] = b"TLDB";
const FORMAT_VERSION: u8 = 1;
pub(crate) const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const HEADER_LEN: usize = MAGIC.len() + 1 + SALT_LEN;

/// Argon2id parameters. The input is already a long random passphrase, so these
/// stay near the library defaults instead of interactive-password settings.
const ARGON2_MEMORY_KB: u32 = 19 * 1024;
const ARGON2_ITERATIONS: u32 = 2;
const ARGON2_PARALLELISM: u32 = 1;
const KEY_LENGTH: usize = 32;

/// Key derived from the database passphrase. Zeroized on drop.
#[derive(Clone, ZeroizeOnDrop)]
pub(crate) struct DatabaseKey {
    key: [u8; KEY_LENGTH],
    #[zeroize(skip)]
    salt: [u8; SALT_LEN],
}

impl fmt::Debug for DatabaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl DatabaseKey {
    /// Fresh salt, for a database file that does not exist yet.
    pub(crate) fn generate(passphrase: &[u8]) -> Result<Self, StoreError> {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        Self::derive(passphrase, salt)
    }

    pub(crate) fn derive(passphrase: &[u8], salt: [u8; SALT_LEN]) -> Result<Self, StoreError> {
        if passphrase.is_empty() {
            return Err(StoreError::InvalidInput(
                "passphrase cannot be empty".to_string(),
            ));
        }

        let params = argon2::Params::new(
            ARGON2_MEMORY_KB,
            ARGON2_ITERATIONS,
            ARGON2_PARALLELISM,
            Some(KEY_LENGTH),
        )
        .map_err(|e| StoreError::storage(format!("argon2 params: {e}")))?;
        let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

        let mut key = [0u8; KEY_LENGTH];
        argon2
            .hash_password_into(passphrase, &salt, &mut key)
            .map_err(|e| StoreError::storage(format!("key derivation failed: {e}")))?;
        Ok(Self { key, salt })
    }

    fn header(&self) -> Vec<u8> {
        let mut header = Vec::with_capacity(HEADER_LEN);
        header.extend_from_slice(MAGIC);
        header.push(FORMAT_VERSION);
        header.extend_from_slice(&self.salt);
        header
    }

    fn cipher(&self) -> Result<Aes256Gcm, StoreError> {
        Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| StoreError::storage(format!("cipher init failed: {e}")))
    }

    /// Encrypt a serialized database image into the on-disk format.
    pub(crate) fn seal(&self, image: &[u8]) -> Result<Vec<u8>, StoreError> {
        let header = self.header();
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher()?
            .encrypt(
                &nonce,
                Payload {
                    msg: image,
                    aad: &header,
                },
            )
            .map_err(|e| StoreError::storage(format!("encrypt failed: {e}")))?;

        let mut out = header;
        out.extend_from_slice(nonce.as_slice());
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt a file produced by [`DatabaseKey::seal`]. Any failure is a
    /// `StoreOpen` error: wrong passphrase and tampering are indistinguishable.
    pub(crate) fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, StoreError> {
        let header = self.header();
        if sealed.len() < HEADER_LEN + NONCE_LEN || sealed[..HEADER_LEN] != header[..] {
            return Err(StoreError::open("database header mismatch"));
        }
        let (nonce, ciphertext) = sealed[HEADER_LEN..].split_at(NONCE_LEN);

        self.cipher()?
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: &header,
                },
            )
            .map_err(|_| StoreError::open("wrong passphrase or corrupted database"))
    }
}

/// Read the salt from a sealed file header without decrypting anything.
pub(crate) fn read_salt(sealed: &[u8]) -> Result<[u8; SALT_LEN], StoreError> {
    if sealed.len() < HEADER_LEN + NONCE_LEN {
        return Err(StoreError::open("database file is truncated"));
    }
    if &sealed[..MAGIC.len()] != MAGIC {
        return Err(StoreError::open("not a tasklock database"));
    }
    let format = sealed[MAGIC.len()];
    if format != FORMAT_VERSION {
        return Err(StoreError::open(format!(
            "unsupported database format {format}"
        )));
    }

    let mut salt = [0u8; SALT_LEN];
    salt.copy_from_slice(&sealed[MAGIC.len() + 1..HEADER_LEN]);
    Ok(salt)
}
