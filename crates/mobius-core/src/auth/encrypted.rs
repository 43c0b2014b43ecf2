//! Encrypted on-disk token store.
//!
//! File layout: `MBT1 | salt (16) | nonce (12) | ciphertext`. The key is
//! derived from a passphrase with Argon2id; the payload is the JSON token
//! pair sealed with ChaCha20-Poly1305. Every write uses a fresh nonce and
//! lands through a temp file plus rename, so the file always holds a
//! complete pair or nothing.

use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use argon2::Argon2;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use tracing::debug;

use super::store::{StoredTokens, TokenStore, TokenStoreError};

const MAGIC: &[u8; 4] = b"MBT1";
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const HEADER_LEN: usize = MAGIC.len() + SALT_LEN + NONCE_LEN;

/// Application directory name under the user cache dir
const APP_NAME: &str = "mobius-context";
const TOKEN_FILE: &str = "tokens.bin";

pub struct EncryptedFileTokenStore {
    path: PathBuf,
    salt: [u8; SALT_LEN],
    cipher: ChaCha20Poly1305,
    cached: RwLock<Option<StoredTokens>>,
}

impl EncryptedFileTokenStore {
    /// Default location: `<cache dir>/mobius-context/tokens.bin`
    pub fn default_path() -> Result<PathBuf, TokenStoreError> {
        let cache_dir = dirs::cache_dir().ok_or(TokenStoreError::NoStorageDir)?;
        Ok(cache_dir.join(APP_NAME).join(TOKEN_FILE))
    }

    /// Open (or prepare) the token file at `path`.
    /// Fails if an existing file can't be decrypted with `passphrase`.
    pub fn open(path: impl Into<PathBuf>, passphrase: &str) -> Result<Self, TokenStoreError> {
        let path = path.into();

        let (salt, cipher, cached) = match std::fs::read(&path) {
            Ok(bytes) => {
                let salt = parse_salt(&bytes)?;
                let cipher = derive_cipher(passphrase, &salt)?;
                let tokens = decrypt(&cipher, &bytes)?;
                (salt, cipher, Some(tokens))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let mut salt = [0u8; SALT_LEN];
                rand::thread_rng().fill_bytes(&mut salt);
                let cipher = derive_cipher(passphrase, &salt)?;
                (salt, cipher, None)
            }
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), restored = cached.is_some(), "Opened encrypted token store");

        Ok(Self {
            path,
            salt,
            cipher,
            cached: RwLock::new(cached),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_file(&self, tokens: &StoredTokens) -> Result<(), TokenStoreError> {
        let plaintext = serde_json::to_vec(tokens)?;

        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
            .map_err(|e| TokenStoreError::Crypto(e.to_string()))?;

        let mut contents = Vec::with_capacity(HEADER_LEN + ciphertext.len());
        contents.extend_from_slice(MAGIC);
        contents.extend_from_slice(&self.salt);
        contents.extend_from_slice(&nonce);
        contents.extend_from_slice(&ciphertext);

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, &contents)?;
        restrict_permissions(&tmp)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl TokenStore for EncryptedFileTokenStore {
    fn load(&self) -> Option<StoredTokens> {
        self.cached
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_tokens(&self, tokens: StoredTokens) -> Result<(), TokenStoreError> {
        let mut cached = self.cached.write().unwrap_or_else(PoisonError::into_inner);
        self.write_file(&tokens)?;
        *cached = Some(tokens);
        Ok(())
    }

    fn clear_tokens(&self) -> Result<(), TokenStoreError> {
        let mut cached = self.cached.write().unwrap_or_else(PoisonError::into_inner);
        *cached = None;
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn parse_salt(bytes: &[u8]) -> Result<[u8; SALT_LEN], TokenStoreError> {
    if bytes.len() <= HEADER_LEN || &bytes[..MAGIC.len()] != MAGIC {
        return Err(TokenStoreError::Crypto("unrecognized token file format".to_string()));
    }
    let mut salt = [0u8; SALT_LEN];
    salt.copy_from_slice(&bytes[MAGIC.len()..MAGIC.len() + SALT_LEN]);
    Ok(salt)
}

fn derive_cipher(passphrase: &str, salt: &[u8]) -> Result<ChaCha20Poly1305, TokenStoreError> {
    let mut key = [0u8; 32];
    Argon2::default()
        .hash_password_into(passphrase.as_bytes(), salt, &mut key)
        .map_err(|e| TokenStoreError::Crypto(e.to_string()))?;
    Ok(ChaCha20Poly1305::new(Key::from_slice(&key)))
}

fn decrypt(cipher: &ChaCha20Poly1305, bytes: &[u8]) -> Result<StoredTokens, TokenStoreError> {
    let nonce = &bytes[MAGIC.len() + SALT_LEN..HEADER_LEN];
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), &bytes[HEADER_LEN..])
        .map_err(|_| TokenStoreError::Crypto("wrong passphrase or corrupted token file".to_string()))?;
    Ok(serde_json::from_slice(&plaintext)?)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), TokenStoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<(), TokenStoreError> {
    Ok(())
}
