//! Encrypted file storage.
//!
//! Each key lives in `<dir>/<key>.enc` as `nonce || ciphertext`. The cipher
//! key is derived once per directory from a passphrase and a random salt kept
//! in `<dir>/salt`.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use argon2::Argon2;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use tracing::debug;

use super::{validate_key, SecureStorage, StorageError};

const SALT_FILE: &str = "salt";
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;
const VALUE_EXTENSION: &str = "enc";

pub struct EncryptedFileStorage {
    dir: PathBuf,
    cipher: ChaCha20Poly1305,
}

impl EncryptedFileStorage {
    /// Open (or initialize) an encrypted store in `dir`.
    ///
    /// A wrong passphrase is not detected here; values written under another
    /// passphrase fail to decrypt on read.
    pub fn open(dir: impl Into<PathBuf>, passphrase: &str) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let salt = Self::load_or_create_salt(&dir)?;
        let mut key = [0u8; KEY_LEN];
        Argon2::default()
            .hash_password_into(passphrase.as_bytes(), &salt, &mut key)
            .map_err(|e| StorageError::KeyDerivation(e.to_string()))?;

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        debug!(dir = %dir.display(), "Opened encrypted session storage");
        Ok(Self { dir, cipher })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn load_or_create_salt(dir: &Path) -> Result<Vec<u8>, StorageError> {
        let path = dir.join(SALT_FILE);
        if path.exists() {
            let salt = fs::read(&path)?;
            if salt.len() == SALT_LEN {
                return Ok(salt);
            }
            // Anything encrypted under a damaged salt is unrecoverable anyway
            debug!(path = %path.display(), "Replacing malformed salt file");
        }

        let mut salt = vec![0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        write_private(&path, &salt)?;
        Ok(salt)
    }

    fn value_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.dir.join(format!("{}.{}", key, VALUE_EXTENSION)))
    }
}

impl SecureStorage for EncryptedFileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.value_path(key)?;
        if !path.exists() {
            return Ok(None);
        }

        let contents = fs::read(&path)?;
        if contents.len() < NONCE_LEN {
            return Err(StorageError::Decrypt);
        }
        let (nonce, ciphertext) = contents.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| StorageError::Decrypt)?;

        String::from_utf8(plaintext)
            .map(Some)
            .map_err(|_| StorageError::Decrypt)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.value_path(key)?;

        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), value.as_bytes())
            .map_err(|_| StorageError::Encrypt)?;

        let mut contents = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        contents.extend_from_slice(&nonce);
        contents.extend_from_slice(&ciphertext);

        // Write then rename so a crash never leaves a half-written value
        let tmp = path.with_extension("tmp");
        write_private(&tmp, &contents)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.value_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Write a file readable only by the current user (0600 on unix).
fn write_private(path: &Path, contents: &[u8]) -> Result<(), StorageError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)?;
        file.write_all(contents)?;
    }

    #[cfg(not(unix))]
    {
        let mut file = fs::File::create(path)?;
        file.write_all(contents)?;
    }

    Ok(())
}
