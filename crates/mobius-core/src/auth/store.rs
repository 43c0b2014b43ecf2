//! Token store abstraction.
//!
//! A store holds at most one `StoredTokens` pair. Because the pair is read
//! and written as a single value, a reader can never observe an access
//! token from one session next to a refresh token from another.

use std::sync::{PoisonError, RwLock};

use thiserror::Error;

pub use crate::models::StoredTokens;

#[derive(Error, Debug)]
pub enum TokenStoreError {
    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Token file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to (de)serialize tokens: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Token encryption failed: {0}")]
    Crypto(String),

    #[error("No home or cache directory available for token storage")]
    NoStorageDir,
}

/// Persistence for the access/refresh token pair.
///
/// Only the auth session controller writes through this trait; the HTTP
/// client reads the access token when attaching headers.
pub trait TokenStore: Send + Sync {
    /// Current token pair, if any
    fn load(&self) -> Option<StoredTokens>;

    /// Replace the stored pair atomically
    fn set_tokens(&self, tokens: StoredTokens) -> Result<(), TokenStoreError>;

    /// Remove both tokens
    fn clear_tokens(&self) -> Result<(), TokenStoreError>;

    fn access_token(&self) -> Option<String> {
        self.load().map(|t| t.access_token)
    }

    fn refresh_token(&self) -> Option<String> {
        self.load().map(|t| t.refresh_token)
    }

    fn has_tokens(&self) -> bool {
        self.load().is_some()
    }
}

/// In-process token store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: RwLock<Option<StoredTokens>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a token pair
    pub fn with_tokens(tokens: StoredTokens) -> Self {
        Self {
            tokens: RwLock::new(Some(tokens)),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Option<StoredTokens> {
        self.tokens
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_tokens(&self, tokens: StoredTokens) -> Result<(), TokenStoreError> {
        *self.tokens.write().unwrap_or_else(PoisonError::into_inner) = Some(tokens);
        Ok(())
    }

    fn clear_tokens(&self) -> Result<(), TokenStoreError> {
        *self.tokens.write().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn paired(store: &dyn TokenStore) -> bool {
        store.access_token().is_some() == store.refresh_token().is_some()
    }

    #[test]
    fn test_set_then_clear() {
        let store = MemoryTokenStore::new();
        assert!(!store.has_tokens());

        store.set_tokens(StoredTokens::new("tok1", "ref1")).unwrap();
        assert_eq!(store.access_token().as_deref(), Some("tok1"));
        assert_eq!(store.refresh_token().as_deref(), Some("ref1"));

        store.clear_tokens().unwrap();
        assert_eq!(store.access_token(), None);
        assert_eq!(store.refresh_token(), None);
    }

    #[test]
    fn test_pairing_holds_across_operation_sequences() {
        let store = MemoryTokenStore::new();
        let ops: [Option<(&str, &str)>; 7] = [
            Some(("a1", "r1")),
            None,
            None,
            Some(("a2", "r2")),
            Some(("a3", "r2")),
            None,
            Some(("a4", "r4")),
        ];
        for op in ops {
            match op {
                Some((a, r)) => store.set_tokens(StoredTokens::new(a, r)).unwrap(),
                None => store.clear_tokens().unwrap(),
            }
            assert!(paired(&store));
        }
    }

    #[test]
    fn test_concurrent_readers_never_see_mixed_sessions() {
        let store = Arc::new(MemoryTokenStore::new());
        let writer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for i in 0..2_000 {
                    let tag = i.to_string();
                    store
                        .set_tokens(StoredTokens::new(format!("a{tag}"), format!("r{tag}")))
                        .unwrap();
                    if i % 7 == 0 {
                        store.clear_tokens().unwrap();
                    }
                }
            })
        };

        for _ in 0..2_000 {
            if let Some(tokens) = store.load() {
                assert_eq!(tokens.access_token[1..], tokens.refresh_token[1..]);
            }
        }
        writer.join().unwrap();
    }
}
