use std::{path::PathBuf, sync::Arc};

use color_eyre::Result;
use dirs::data_dir;
use tasklock_storage::{
    key_provider::KeyringProvider, open_global, EncryptedTaskStore, StoreConfig,
};
use tracing::debug;

use crate::config::Config;

/// Resolve the default data directory for Tasklock.
pub fn default_data_dir() -> Result<PathBuf> {
    let base = data_dir().ok_or_else(|| color_eyre::eyre::eyre!("no data dir available"))?;
    Ok(base.join("tasklock"))
}

/// Store layout derived from config overrides and platform defaults.
pub fn store_config(config: &Config) -> Result<StoreConfig> {
    let root = match &config.data_dir {
        Some(root) => root.clone(),
        None => default_data_dir()?,
    };
    let mut store_config = StoreConfig::new(root);
    if let Some(length) = config.passphrase_length {
        store_config = store_config.with_passphrase_length(length);
    }
    Ok(store_config)
}

/// Open (once per process) the encrypted store, keyed through the OS keychain.
pub async fn open_store(config: &Config) -> Result<Arc<EncryptedTaskStore>> {
    let store_config = store_config(config)?;
    let keyring = config.keyring();
    debug!(root = ?store_config.data_dir, service = %keyring.service, "opening encrypted store");
    let store = open_global(
        &store_config,
        KeyringProvider::new(keyring.service, keyring.account),
    )
    .await?;
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_overrides_data_dir_and_length() {
        let config = Config {
            data_dir: Some(PathBuf::from("/tmp/tasklock-test")),
            passphrase_length: Some(256),
            keyring: None,
        };
        let store_config = store_config(&config).expect("store config");
        assert_eq!(
            store_config.db_path(),
            PathBuf::from("/tmp/tasklock-test/encrypted_todo.db")
        );
        assert_eq!(store_config.passphrase_length, 256);
    }
}
