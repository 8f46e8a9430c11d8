//! Secure key-value contract used to keep small secrets (the database passphrase).

mod secure_store;

pub use secure_store::{InMemorySecureStore, SecureStore, SecureStoreError};
