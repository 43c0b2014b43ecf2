//! CLI configuration management.
//!
//! Remembers the last email used to log in so `mobius login` can offer it
//! again, and decides where tokens are kept between runs.
//!
//! Configuration is stored at `~/.config/mobius-context/config.json`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use mobius_core::{EncryptedFileTokenStore, KeyringTokenStore, MemoryTokenStore, TokenStore};
use serde::{Deserialize, Serialize};

/// Application name used for config/cache directory paths
pub const APP_NAME: &str = "mobius-context";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Keychain account holding the token pair
const KEYRING_ACCOUNT: &str = "default-session";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CliConfig {
    pub last_email: Option<String>,
}

impl CliConfig {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Ok(serde_json::from_str(&contents).context("Failed to parse config file")?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }
}

/// Directory for the log file, created on demand
pub fn log_dir() -> Option<PathBuf> {
    let dir = dirs::cache_dir()?.join(APP_NAME);
    std::fs::create_dir_all(&dir).ok()?;
    Some(dir)
}

/// Token store selected by `MOBIUS_TOKEN_STORE`: `keyring` (default),
/// `file` (encrypted with `MOBIUS_TOKEN_PASSPHRASE`, prompted if unset),
/// or `memory`.
pub fn open_token_store() -> Result<Arc<dyn TokenStore>> {
    let kind = std::env::var("MOBIUS_TOKEN_STORE").unwrap_or_default();
    match kind.as_str() {
        "" | "keyring" => {
            let store = KeyringTokenStore::open(KEYRING_ACCOUNT)
                .context("Failed to open keychain token store")?;
            Ok(Arc::new(store))
        }
        "file" => {
            let passphrase = match std::env::var("MOBIUS_TOKEN_PASSPHRASE") {
                Ok(passphrase) if !passphrase.is_empty() => passphrase,
                _ => rpassword::prompt_password("Token store passphrase: ")
                    .context("Failed to read passphrase")?,
            };
            let path = EncryptedFileTokenStore::default_path()?;
            let store = EncryptedFileTokenStore::open(&path, &passphrase)
                .with_context(|| format!("Failed to open token file {}", path.display()))?;
            Ok(Arc::new(store))
        }
        "memory" => Ok(Arc::new(MemoryTokenStore::new())),
        other => anyhow::bail!("Unknown MOBIUS_TOKEN_STORE {other:?} (expected keyring, file or memory)"),
    }
}
