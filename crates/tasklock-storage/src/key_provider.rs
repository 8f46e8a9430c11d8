use std::{
    fmt,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use rand::{rngs::OsRng, RngCore};
use tasklock_core::StoreError;
use thiserror::Error;
use tracing::{debug, info};
use zeroize::ZeroizeOnDrop;

/// Wrapping key used only to seal other secrets, never the task data itself.
#[derive(Clone, PartialEq, Eq, ZeroizeOnDrop)]
pub struct KeyMaterial {
    /// Identifier for logging/rotation (never log key bytes).
    #[zeroize(skip)]
    pub id: String,
    /// 256-bit symmetric key.
    pub bytes: [u8; 32],
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("id", &self.id)
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("keyring error: {0}")]
    Keyring(String),
    #[error("secure storage unavailable: {0}")]
    Unavailable(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("generation error: {0}")]
    Generation(String),
}

impl From<KeyError> for StoreError {
    fn from(err: KeyError) -> Self {
        StoreError::KeyProvisioning {
            reason: err.to_string(),
        }
    }
}

/// Provides the wrapping key (OS credential store in production; memory in tests).
///
/// Repeated calls against the same installation return the same key. A key is
/// only created when the backing store reports that none exists.
#[async_trait]
pub trait KeyProvider: Send + Sync {
    /// Existing key, if the backing store holds one. Never creates.
    async fn get(&self) -> Result<Option<KeyMaterial>, KeyError>;

    async fn get_or_create(&self) -> Result<KeyMaterial, KeyError>;
}

/// OS keyring-backed provider.
#[derive(Debug, Clone)]
pub struct KeyringProvider {
    service: String,
    account: String,
}

impl KeyringProvider {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry, KeyError> {
        keyring::Entry::new(&self.service, &self.account).map_err(keyring_err)
    }

    fn get_blocking(&self) -> Result<Option<KeyMaterial>, KeyError> {
        match self.entry()?.get_password() {
            Ok(secret) => decode_key(&secret).map(Some),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(keyring_err(err)),
        }
    }

    fn get_or_create_blocking(&self) -> Result<KeyMaterial, KeyError> {
        if let Some(existing) = self.get_blocking()? {
            return Ok(existing);
        }
        let material = generate_key();
        self.entry()?
            .set_password(&encode_key(&material))
            .map_err(keyring_err)?;
        info!(service = %self.service, "created wrapping key");
        Ok(material)
    }

    async fn run_blocking<T: Send + 'static>(
        &self,
        op: fn(&KeyringProvider) -> Result<T, KeyError>,
    ) -> Result<T, KeyError> {
        let provider = self.clone();
        tokio::task::spawn_blocking(move || op(&provider))
            .await
            .map_err(|e| KeyError::Keyring(format!("keyring task failed: {e}")))?
    }
}

#[async_trait]
impl KeyProvider for KeyringProvider {
    async fn get(&self) -> Result<Option<KeyMaterial>, KeyError> {
        self.run_blocking(Self::get_blocking).await
    }

    async fn get_or_create(&self) -> Result<KeyMaterial, KeyError> {
        debug!(service = %self.service, account = %self.account, "resolving wrapping key");
        self.run_blocking(Self::get_or_create_blocking).await
    }
}

fn keyring_err(err: keyring::Error) -> KeyError {
    match err {
        keyring::Error::NoStorageAccess(inner) => KeyError::Unavailable(inner.to_string()),
        keyring::Error::PlatformFailure(inner) => KeyError::Unavailable(inner.to_string()),
        other => KeyError::Keyring(other.to_string()),
    }
}

/// In-memory key provider for tests and ephemeral sessions.
#[derive(Debug, Default, Clone)]
pub struct InMemoryKeyProvider {
    inner: Arc<Mutex<Option<KeyMaterial>>>,
}

impl InMemoryKeyProvider {
    /// Provider that always hands out the given key.
    pub fn with_key(bytes: [u8; 32]) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(KeyMaterial {
                id: "memory".to_string(),
                bytes,
            }))),
        }
    }
}

#[async_trait]
impl KeyProvider for InMemoryKeyProvider {
    async fn get(&self) -> Result<Option<KeyMaterial>, KeyError> {
        let guard = self
            .inner
            .lock()
            .map_err(|err| KeyError::Generation(format!("lock poisoned: {err}")))?;
        Ok(guard.clone())
    }

    async fn get_or_create(&self) -> Result<KeyMaterial, KeyError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|err| KeyError::Generation(format!("lock poisoned: {err}")))?;

        if let Some(existing) = guard.clone() {
            return Ok(existing);
        }

        let material = generate_key();
        *guard = Some(material.clone());
        Ok(material)
    }
}

/// Provider standing in for missing secure hardware. Always fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableKeyProvider;

#[async_trait]
impl KeyProvider for UnavailableKeyProvider {
    async fn get(&self) -> Result<Option<KeyMaterial>, KeyError> {
        Err(unavailable())
    }

    async fn get_or_create(&self) -> Result<KeyMaterial, KeyError> {
        Err(unavailable())
    }
}

fn unavailable() -> KeyError {
    KeyError::Unavailable("no secure key storage on this platform".to_string())
}

fn generate_key() -> KeyMaterial {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    KeyMaterial {
        id: "wrapping".to_string(),
        bytes,
    }
}

fn encode_key(material: &KeyMaterial) -> String {
    general_purpose::STANDARD.encode(material.bytes)
}

fn decode_key(secret: &str) -> Result<KeyMaterial, KeyError> {
    let bytes = general_purpose::STANDARD
        .decode(secret)
        .map_err(|e| KeyError::Decode(e.to_string()))?;

    let bytes: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
        KeyError::Decode(format!("expected 32 bytes, got {}", bytes.len()))
    })?;

    Ok(KeyMaterial {
        id: "wrapping".to_string(),
        bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_provider_returns_same_key() {
        let provider = InMemoryKeyProvider::default();
        let first = provider.get_or_create().await.unwrap();
        let second = provider.get_or_create().await.unwrap();

        assert_eq!(first.bytes, second.bytes);
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn get_never_creates_a_key() {
        let provider = InMemoryKeyProvider::default();
        assert!(provider.get().await.expect("get").is_none());

        let created = provider.get_or_create().await.expect("create");
        let existing = provider.get().await.expect("get").expect("key now exists");
        assert_eq!(existing.bytes, created.bytes);
    }

    #[test]
    fn decode_rejects_wrong_length() {
        let err = decode_key("abcd").expect_err("should reject wrong length");
        assert!(matches!(err, KeyError::Decode(_)));
    }

    #[test]
    fn encoded_key_decodes_to_same_bytes() {
        let material = generate_key();
        let decoded = decode_key(&encode_key(&material)).expect("decode");
        assert_eq!(decoded.bytes, material.bytes);
    }

    #[test]
    fn debug_redacts_key_bytes() {
        let material = InMemoryKeyProvider::with_key([0xAB; 32]);
        let key = material.inner.lock().unwrap().clone().unwrap();
        let rendered = format!("{key:?}");
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains("171"));
    }

    #[tokio::test]
    async fn unavailable_provider_is_a_provisioning_error() {
        let err = UnavailableKeyProvider
            .get_or_create()
            .await
            .expect_err("no hardware");
        let err: StoreError = err.into();
        assert!(matches!(err, StoreError::KeyProvisioning { .. }));
    }
}
