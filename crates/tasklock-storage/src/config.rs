use std::path::{Path, PathBuf};

use crate::passphrase::DEFAULT_PASSPHRASE_LENGTH;

pub const DEFAULT_DB_FILE: &str = "encrypted_todo.db";
pub const DEFAULT_PREFS_FILE: &str = "secret_shared_prefs";

/// Where the encrypted database and its key side-store live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
    pub db_file_name: String,
    pub prefs_file_name: String,
    /// Length of a newly generated passphrase. Has no effect once one exists.
    pub passphrase_length: usize,
}

impl StoreConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            db_file_name: DEFAULT_DB_FILE.to_string(),
            prefs_file_name: DEFAULT_PREFS_FILE.to_string(),
            passphrase_length: DEFAULT_PASSPHRASE_LENGTH,
        }
    }

    pub fn with_passphrase_length(mut self, length: usize) -> Self {
        self.passphrase_length = length;
        self
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(&self.db_file_name)
    }

    pub fn prefs_path(&self) -> PathBuf {
        self.data_dir.join(&self.prefs_file_name)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}
