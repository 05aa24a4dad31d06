//! Secure key-value storage for session state.
//!
//! The session layer only needs read/write/delete of string values that
//! survive process restarts. Three backends are provided:
//! - `KeyringStorage`: OS keychain via the `keyring` crate
//! - `EncryptedFileStorage`: ChaCha20-Poly1305 encrypted files, for hosts
//!   without a usable keychain
//! - `MemoryStorage`: process-local, for tests and throwaway sessions

pub mod file;
pub mod keychain;

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use thiserror::Error;

pub use self::file::EncryptedFileStorage;
pub use self::keychain::KeyringStorage;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Value could not be encrypted")]
    Encrypt,

    #[error("Stored value could not be decrypted")]
    Decrypt,

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Invalid storage key: {0:?}")]
    InvalidKey(String),
}

/// Opaque persistent string store.
///
/// Deleting a key that does not exist is not an error.
pub trait SecureStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// In-memory storage. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SecureStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.remove(key);
        Ok(())
    }
}

/// Storage keys are used as file names and keychain account names.
pub(crate) fn validate_key(key: &str) -> Result<(), StorageError> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}
