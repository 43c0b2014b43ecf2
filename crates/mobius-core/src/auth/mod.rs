//! Authentication: token storage, the session controller, and the
//! login-redirect effect.
//!
//! This module provides:
//! - `TokenStore`: persistence for the access/refresh token pair, with
//!   in-memory, OS keychain, and encrypted file implementations
//! - `AuthSession`: login, register, coalesced refresh, and logout
//! - `LoginRedirect`: the side effect run when a session can't be recovered

pub mod credentials;
pub mod encrypted;
pub mod redirect;
pub mod session;
pub mod store;

pub use credentials::KeyringTokenStore;
pub use encrypted::EncryptedFileTokenStore;
pub use redirect::{LoginRedirect, NoRedirect, LOGIN_ROUTE};
pub use session::{
    is_session_endpoint, AuthError, AuthSession, SessionState, LOGIN_PATH, LOGOUT_PATH,
    REFRESH_PATH, REGISTER_PATH,
};
pub use store::{MemoryTokenStore, StoredTokens, TokenStore, TokenStoreError};
