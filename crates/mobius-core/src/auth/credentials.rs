use std::sync::{PoisonError, RwLock};

use keyring::Entry;
use tracing::{debug, warn};

use super::store::{StoredTokens, TokenStore, TokenStoreError};

const SERVICE_NAME: &str = "mobius-context";

/// Token store backed by the OS keychain.
///
/// The pair is serialized as a single JSON secret so a write replaces both
/// tokens at once. Reads are served from an in-process copy, refreshed on
/// every write, so requests don't hit the keychain.
pub struct KeyringTokenStore {
    entry: Entry,
    cached: RwLock<Option<StoredTokens>>,
}

impl KeyringTokenStore {
    /// Open the keychain entry for an account and load any saved tokens
    pub fn open(account: &str) -> Result<Self, TokenStoreError> {
        let entry = Entry::new(SERVICE_NAME, account)?;
        let cached = match entry.get_password() {
            Ok(secret) => match serde_json::from_str::<StoredTokens>(&secret) {
                Ok(tokens) => Some(tokens),
                Err(e) => {
                    warn!(error = %e, "Ignoring unreadable tokens in keychain");
                    None
                }
            },
            Err(keyring::Error::NoEntry) => None,
            Err(e) => return Err(e.into()),
        };
        debug!(account, restored = cached.is_some(), "Opened keychain token store");

        Ok(Self {
            entry,
            cached: RwLock::new(cached),
        })
    }
}

impl TokenStore for KeyringTokenStore {
    fn load(&self) -> Option<StoredTokens> {
        self.cached
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_tokens(&self, tokens: StoredTokens) -> Result<(), TokenStoreError> {
        let secret = serde_json::to_string(&tokens)?;
        let mut cached = self.cached.write().unwrap_or_else(PoisonError::into_inner);
        self.entry.set_password(&secret)?;
        *cached = Some(tokens);
        Ok(())
    }

    fn clear_tokens(&self) -> Result<(), TokenStoreError> {
        let mut cached = self.cached.write().unwrap_or_else(PoisonError::into_inner);
        // Drop the in-process copy first so a keychain failure can't leave a usable token behind
        *cached = None;
        match self.entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
