//! Mobius Context Platform API client.
//!
//! An authenticated HTTP client with single-retry token refresh, a typed
//! error taxonomy, and pluggable token storage.
//!
//! ```no_run
//! use mobius_core::{ApiClient, ClientConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ApiClient::new(ClientConfig::from_env()?)?;
//! client.session().login("t@example.com", "pw").await?;
//! let contexts: serde_json::Value = client.get("/contexts").await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

pub use api::{
    classify, ApiClient, ApiClientBuilder, ApiError, ApiRequest, ApiResponse, ClassifiedError,
    ErrorCode, ReqwestTransport, Transport, TransportError,
};
pub use auth::{
    AuthError, AuthSession, EncryptedFileTokenStore, KeyringTokenStore, LoginRedirect,
    MemoryTokenStore, NoRedirect, SessionState, StoredTokens, TokenStore, TokenStoreError,
};
pub use config::{ClientConfig, ConfigError};
pub use models::{Session, User};
